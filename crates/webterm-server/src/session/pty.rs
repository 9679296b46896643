//! PTY engine: process spawning and the per-session output reader.
//!
//! Spawning is pluggable through [`Spawner`]. [`PortablePtySpawner`] runs a
//! real login shell behind a pseudo-terminal; [`EchoSpawner`] wires a socket
//! pair so that input is echoed back as output, which lets the whole
//! protocol run without a terminal.

use super::state::Session;
use portable_pty::{native_pty_system, CommandBuilder, MasterPty, PtySize};
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
#[cfg(unix)]
use filedescriptor::{pollfd, FileDescriptor, Pipe, POLLIN};
#[cfg(unix)]
use std::os::unix::io::{AsRawFd, RawFd};
use tracing::{debug, info, warn};
use webterm_core::{WebtermError, WebtermResult};

/// Default read chunk size for the output reader.
pub const DEFAULT_READ_CHUNK: usize = 4096;

/// Invoked with the session id once the reader has finished.
pub type ExitHook = Box<dyn FnOnce(&str) + Send>;

/// Control half of a spawned process: input, geometry, lifetime.
pub trait PtyControl: Send {
    /// Write input bytes to the process.
    fn write(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Change the terminal size.
    fn resize(&mut self, cols: u16, rows: u16) -> WebtermResult<()>;

    /// Best-effort terminate: signal the process and close the master side.
    fn kill(&mut self);

    /// Reap the process. Returns its exit code when known.
    fn wait(&mut self) -> Option<u32>;
}

/// A freshly spawned process: its control handle and its output stream.
pub struct SpawnedPty {
    pub control: Box<dyn PtyControl>,
    pub output: Box<dyn Read + Send>,
}

/// Something that can start a shell for a new session.
pub trait Spawner: Send + Sync {
    fn spawn(&self) -> WebtermResult<SpawnedPty>;
}

// ── Real PTY ────────────────────────────────────────────────────────

/// Shell command used for new sessions.
#[derive(Debug, Clone)]
pub struct ShellCommand {
    pub program: String,
    pub args: Vec<String>,
    pub term: String,
    pub cwd: Option<PathBuf>,
    pub cols: u16,
    pub rows: u16,
}

impl Default for ShellCommand {
    fn default() -> Self {
        Self {
            program: std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string()),
            args: vec!["-l".to_string()],
            term: "xterm-256color".to_string(),
            cwd: None,
            cols: 80,
            rows: 24,
        }
    }
}

/// Spawns the configured shell behind a native pseudo-terminal.
#[derive(Debug, Clone, Default)]
pub struct PortablePtySpawner {
    command: ShellCommand,
}

impl PortablePtySpawner {
    pub fn new(command: ShellCommand) -> Self {
        Self { command }
    }
}

impl Spawner for PortablePtySpawner {
    fn spawn(&self) -> WebtermResult<SpawnedPty> {
        let size = PtySize {
            rows: self.command.rows,
            cols: self.command.cols,
            pixel_width: 0,
            pixel_height: 0,
        };
        let pair = native_pty_system()
            .openpty(size)
            .map_err(|e| WebtermError::Spawn(format!("failed to open PTY: {e}")))?;

        let mut cmd = CommandBuilder::new(&self.command.program);
        for arg in &self.command.args {
            cmd.arg(arg);
        }
        cmd.env("TERM", &self.command.term);
        if let Some(cwd) = &self.command.cwd {
            cmd.cwd(cwd);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| WebtermError::Spawn(format!("failed to spawn {}: {e}", self.command.program)))?;
        // Only the child may hold the slave, so its exit ends the reader.
        drop(pair.slave);

        #[cfg(unix)]
        let (output, wake) = match wakeable_reader(pair.master.as_ref()) {
            Ok(parts) => parts,
            Err(e) => {
                let mut child = child;
                let _ = child.kill();
                let _ = child.wait();
                return Err(e);
            }
        };
        #[cfg(not(unix))]
        let output = pair
            .master
            .try_clone_reader()
            .map_err(|e| WebtermError::Spawn(format!("failed to clone PTY reader: {e}")))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| WebtermError::Spawn(format!("failed to take PTY writer: {e}")))?;

        info!(program = %self.command.program, pid = ?child.process_id(), "PTY spawned");

        Ok(SpawnedPty {
            control: Box::new(PortablePtyControl {
                master: Some(pair.master),
                writer: Some(writer),
                child,
                #[cfg(unix)]
                wake: Some(wake),
            }),
            output,
        })
    }
}

struct PortablePtyControl {
    master: Option<Box<dyn MasterPty + Send>>,
    writer: Option<Box<dyn Write + Send>>,
    child: Box<dyn portable_pty::Child + Send>,
    /// Write end of the reader's wake pipe. Dropping it ends the reader.
    #[cfg(unix)]
    wake: Option<FileDescriptor>,
}

impl PtyControl for PortablePtyControl {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| io::Error::from(io::ErrorKind::BrokenPipe))?;
        writer.write_all(data)?;
        writer.flush()?;
        Ok(data.len())
    }

    fn resize(&mut self, cols: u16, rows: u16) -> WebtermResult<()> {
        let master = self
            .master
            .as_ref()
            .ok_or_else(|| WebtermError::Other("PTY master closed".into()))?;
        master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| WebtermError::Other(format!("PTY resize failed: {e}")))
    }

    fn kill(&mut self) {
        if let Err(e) = self.child.kill() {
            debug!(error = %e, "child kill failed (already exited?)");
        }
        self.writer = None;
        self.master = None;
        // Descendants may still hold the slave open; stop the reader regardless.
        #[cfg(unix)]
        {
            self.wake = None;
        }
    }

    fn wait(&mut self) -> Option<u32> {
        self.child.wait().ok().map(|status| status.exit_code())
    }
}

/// Borrowed raw descriptor, only used to dup the master.
#[cfg(unix)]
struct MasterFd(RawFd);

#[cfg(unix)]
impl AsRawFd for MasterFd {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

/// Reader over a dup of the PTY master that also watches a wake pipe.
///
/// Reports end of output as soon as the pipe's write end is dropped, even
/// while some process still holds the slave side open.
#[cfg(unix)]
struct PtyReader {
    pty: FileDescriptor,
    wake: FileDescriptor,
}

#[cfg(unix)]
fn wakeable_reader(master: &dyn MasterPty) -> WebtermResult<(Box<dyn Read + Send>, FileDescriptor)> {
    let raw = master
        .as_raw_fd()
        .ok_or_else(|| WebtermError::Spawn("PTY master has no file descriptor".into()))?;
    let pty = FileDescriptor::dup(&MasterFd(raw))
        .map_err(|e| WebtermError::Spawn(format!("failed to dup PTY master: {e}")))?;
    let pipe = Pipe::new().map_err(|e| WebtermError::Spawn(format!("failed to create wake pipe: {e}")))?;
    Ok((Box::new(PtyReader { pty, wake: pipe.read }), pipe.write))
}

#[cfg(unix)]
impl Read for PtyReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let mut fds = [
                pollfd {
                    fd: self.pty.as_raw_fd(),
                    events: POLLIN,
                    revents: 0,
                },
                pollfd {
                    fd: self.wake.as_raw_fd(),
                    events: POLLIN,
                    revents: 0,
                },
            ];
            match filedescriptor::poll(&mut fds, None) {
                Ok(_) => {}
                Err(filedescriptor::Error::Poll(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(io::Error::new(io::ErrorKind::Other, e)),
            }
            if fds[1].revents != 0 {
                return Ok(0);
            }
            if fds[0].revents != 0 {
                return self.pty.read(buf);
            }
        }
    }
}

// ── Echo double ─────────────────────────────────────────────────────

/// Socket-pair spawner: bytes written as input come back as output.
#[cfg(unix)]
#[derive(Debug, Clone, Default)]
pub struct EchoSpawner {
    resizes: Arc<std::sync::Mutex<Vec<(u16, u16)>>>,
}

#[cfg(unix)]
impl EchoSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every resize applied to processes spawned by this spawner, in order.
    pub fn resizes(&self) -> Vec<(u16, u16)> {
        self.resizes
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

#[cfg(unix)]
impl Spawner for EchoSpawner {
    fn spawn(&self) -> WebtermResult<SpawnedPty> {
        let (input, output) = std::os::unix::net::UnixStream::pair()?;
        Ok(SpawnedPty {
            control: Box::new(EchoControl {
                input: Some(input),
                resizes: self.resizes.clone(),
            }),
            output: Box::new(output),
        })
    }
}

#[cfg(unix)]
struct EchoControl {
    input: Option<std::os::unix::net::UnixStream>,
    resizes: Arc<std::sync::Mutex<Vec<(u16, u16)>>>,
}

#[cfg(unix)]
impl PtyControl for EchoControl {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let input = self
            .input
            .as_mut()
            .ok_or_else(|| io::Error::from(io::ErrorKind::BrokenPipe))?;
        input.write_all(data)?;
        Ok(data.len())
    }

    fn resize(&mut self, cols: u16, rows: u16) -> WebtermResult<()> {
        self.resizes
            .lock()
            .map_err(|_| WebtermError::Other("resize log poisoned".into()))?
            .push((cols, rows));
        Ok(())
    }

    fn kill(&mut self) {
        if let Some(input) = self.input.take() {
            let _ = input.shutdown(std::net::Shutdown::Both);
        }
    }

    fn wait(&mut self) -> Option<u32> {
        Some(0)
    }
}

// ── Engine ──────────────────────────────────────────────────────────

/// Spawn the session's process and start its output reader.
///
/// The reader runs on a dedicated thread for the whole session lifetime,
/// independent of any attached connection. When output ends it fires the
/// session's termination signal, reaps the process and calls `on_exit`.
pub fn spawn(
    session: &Arc<Session>,
    spawner: &dyn Spawner,
    read_chunk: usize,
    on_exit: ExitHook,
) -> WebtermResult<()> {
    let SpawnedPty { control, output } = spawner.spawn()?;
    session.install_control(control);

    let reader_session = session.clone();
    let spawned = std::thread::Builder::new()
        .name(format!("pty-{}", short_id(&session.id)))
        .spawn(move || read_loop(reader_session, output, read_chunk, on_exit));

    if let Err(e) = spawned {
        if let Some(mut control) = session.take_control() {
            control.kill();
            control.wait();
        }
        return Err(WebtermError::Spawn(format!("failed to start PTY reader: {e}")));
    }
    Ok(())
}

fn read_loop(session: Arc<Session>, mut output: Box<dyn Read + Send>, read_chunk: usize, on_exit: ExitHook) {
    let mut buf = vec![0u8; read_chunk.max(1)];
    loop {
        match output.read(&mut buf) {
            Ok(0) => {
                debug!(session_id = %session.id, "PTY output closed");
                break;
            }
            Ok(n) => session.ingest(&buf[..n]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            // EIO: the slave side is gone, i.e. the shell exited.
            Err(e) if e.raw_os_error() == Some(5) => {
                debug!(session_id = %session.id, "PTY slave closed");
                break;
            }
            Err(e) => {
                warn!(session_id = %session.id, error = %e, "PTY read error");
                break;
            }
        }
    }

    drop(output);
    session.done().fire();
    if let Some(mut control) = session.take_control() {
        control.kill();
        let code = control.wait();
        info!(
            session_id = %session.id,
            exit_code = ?code,
            output_bytes = session.output_bytes(),
            "shell exited"
        );
    }
    on_exit(&session.id);
}

/// Forward input bytes to the session's process.
///
/// Blocking; call from a blocking context.
pub fn write(session: &Session, data: &[u8]) -> WebtermResult<usize> {
    session.with_control(|c| c.write(data).map_err(WebtermError::Io))
}

/// Resize the session's terminal. Zero dimensions are ignored.
///
/// Returns whether a resize was applied.
pub fn resize(session: &Session, cols: u16, rows: u16) -> WebtermResult<bool> {
    if cols == 0 || rows == 0 {
        return Ok(false);
    }
    session.with_control(|c| c.resize(cols, rows))?;
    debug!(session_id = %session.id, cols, rows, "PTY resized");
    Ok(true)
}

fn short_id(id: &str) -> &str {
    &id[..8.min(id.len())]
}
