//! Bounded scrollback for replay on session reattach.
//!
//! Stores the last N bytes of PTY output so that a reconnecting client
//! sees its history without the server keeping unbounded output.

/// Default scrollback capacity (1 MiB).
pub const DEFAULT_SCROLLBACK_BYTES: usize = 1024 * 1024;

/// A fixed-capacity circular byte buffer. Oldest bytes are evicted first.
#[derive(Debug)]
pub struct Scrollback {
    buf: Vec<u8>,
    capacity: usize,
    /// Write position (wraps around).
    write_pos: usize,
    /// Total bytes ever written (used to detect wrap).
    total_written: u64,
}

impl Scrollback {
    /// Create a new scrollback with the given capacity in bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity],
            capacity,
            write_pos: 0,
            total_written: 0,
        }
    }

    /// Append data, overwriting the oldest bytes once full.
    pub fn write(&mut self, data: &[u8]) {
        self.total_written += data.len() as u64;
        if self.capacity == 0 || data.is_empty() {
            return;
        }

        // Only the tail of an oversized chunk can survive.
        let data = if data.len() > self.capacity {
            &data[data.len() - self.capacity..]
        } else {
            data
        };

        let first = (self.capacity - self.write_pos).min(data.len());
        self.buf[self.write_pos..self.write_pos + first].copy_from_slice(&data[..first]);
        let rest = data.len() - first;
        self.buf[..rest].copy_from_slice(&data[first..]);
        self.write_pos = (self.write_pos + data.len()) % self.capacity;
    }

    /// Copy out all retained bytes, oldest first.
    ///
    /// The returned vector is independent of the buffer.
    pub fn snapshot(&self) -> Vec<u8> {
        if self.total_written == 0 {
            return Vec::new();
        }

        let len = self.len();
        let mut result = Vec::with_capacity(len);

        if self.total_written <= self.capacity as u64 {
            result.extend_from_slice(&self.buf[..len]);
        } else {
            result.extend_from_slice(&self.buf[self.write_pos..]);
            result.extend_from_slice(&self.buf[..self.write_pos]);
        }

        result
    }

    /// Number of bytes currently retained.
    pub fn len(&self) -> usize {
        if self.total_written >= self.capacity as u64 {
            self.capacity
        } else {
            self.total_written as usize
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total bytes ever written, including evicted ones.
    pub fn total_written(&self) -> u64 {
        self.total_written
    }
}

impl Default for Scrollback {
    fn default() -> Self {
        Self::new(DEFAULT_SCROLLBACK_BYTES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_in_order() {
        let mut sb = Scrollback::new(64);
        sb.write(b"hello");
        sb.write(b" world");
        assert_eq!(sb.snapshot(), b"hello world");
        assert_eq!(sb.len(), 11);
    }

    #[test]
    fn evicts_oldest_on_overflow() {
        let mut sb = Scrollback::new(10);
        sb.write(b"hello world"); // 11 bytes
        assert_eq!(sb.snapshot(), b"ello world");
        assert_eq!(sb.len(), 10);
    }

    #[test]
    fn keeps_last_capacity_bytes_across_many_writes() {
        let mut sb = Scrollback::new(7);
        let mut all = Vec::new();
        for i in 0..50u8 {
            let chunk = [b'a' + (i % 26); 3];
            sb.write(&chunk);
            all.extend_from_slice(&chunk);
        }
        assert_eq!(sb.snapshot(), &all[all.len() - 7..]);
        assert_eq!(sb.total_written(), 150);
    }

    #[test]
    fn wrap_around() {
        let mut sb = Scrollback::new(5);
        sb.write(b"abcde"); // fills exactly
        sb.write(b"fg"); // overwrites a, b
        assert_eq!(sb.snapshot(), b"cdefg");
    }

    #[test]
    fn snapshot_is_independent_copy() {
        let mut sb = Scrollback::new(16);
        sb.write(b"data");
        let mut first = sb.snapshot();
        let second = sb.snapshot();
        first[0] = b'X';
        assert_eq!(second, b"data");
        assert_eq!(sb.snapshot(), b"data");
    }

    #[test]
    fn empty_buffer() {
        let sb = Scrollback::new(10);
        assert!(sb.is_empty());
        assert!(sb.snapshot().is_empty());
    }

    #[test]
    fn zero_capacity_retains_nothing() {
        let mut sb = Scrollback::new(0);
        sb.write(b"test");
        assert!(sb.is_empty());
        assert_eq!(sb.total_written(), 4);
        assert!(sb.snapshot().is_empty());
    }
}
