//! Set-once broadcast signal.
//!
//! Once fired a signal stays fired; every current and future waiter
//! observes it. Used for session termination and owner displacement.

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

#[derive(Debug, Default)]
pub struct Signal {
    fired: AtomicBool,
    notify: Notify,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the signal. Returns `true` only for the call that fired it.
    pub fn fire(&self) -> bool {
        if self.fired.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.notify.notify_waiters();
        true
    }

    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Wait until the signal has fired. Returns immediately if it already has.
    pub async fn fired(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a concurrent fire is not missed.
        notified.as_mut().enable();
        if self.is_fired() {
            return;
        }
        notified.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn fires_exactly_once() {
        let signal = Signal::new();
        assert!(!signal.is_fired());
        assert!(signal.fire());
        assert!(!signal.fire());
        assert!(signal.is_fired());
    }

    #[tokio::test]
    async fn wait_after_fire_returns_immediately() {
        let signal = Signal::new();
        signal.fire();
        tokio::time::timeout(Duration::from_millis(100), signal.fired())
            .await
            .expect("already-fired signal should not block");
    }

    #[tokio::test]
    async fn wakes_every_waiter() {
        let signal = Arc::new(Signal::new());
        let mut waiters = Vec::new();
        for _ in 0..4 {
            let s = signal.clone();
            waiters.push(tokio::spawn(async move { s.fired().await }));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        signal.fire();
        for w in waiters {
            tokio::time::timeout(Duration::from_secs(1), w)
                .await
                .expect("waiter not woken")
                .unwrap();
        }
    }
}
