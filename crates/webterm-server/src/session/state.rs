//! A single live session and its single-owner attachment state.

use super::pty::PtyControl;
use super::scrollback::Scrollback;
use super::signal::Signal;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{info, trace};
use webterm_core::{SessionInfo, WebtermError, WebtermResult};

/// Sending half of a connection's live output channel.
pub type OutputSender = mpsc::Sender<Vec<u8>>;

/// The currently attached connection.
struct Owner {
    lease: u64,
    tx: OutputSender,
    displaced: Arc<Signal>,
}

#[derive(Default)]
struct AttachState {
    owner: Option<Owner>,
    next_lease: u64,
}

/// Returned by [`Session::set_client`]; identifies one attachment.
#[derive(Debug)]
pub struct Attachment {
    lease: u64,
    displaced: Arc<Signal>,
    replay: Vec<u8>,
}

impl Attachment {
    pub fn lease(&self) -> u64 {
        self.lease
    }

    /// Fires when a later attachment takes over the session.
    pub fn displaced(&self) -> Arc<Signal> {
        self.displaced.clone()
    }

    /// Scrollback captured at attach time. Live output sent to this
    /// attachment starts exactly where it ends.
    pub fn take_replay(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.replay)
    }
}

/// A named shell process with its scrollback and attachment slot.
pub struct Session {
    /// Unique session identifier.
    pub id: String,
    /// Display name, unique among live sessions.
    pub name: String,
    pub created_at: DateTime<Utc>,
    last_active: Mutex<DateTime<Utc>>,
    scrollback: Mutex<Scrollback>,
    attach: Mutex<AttachState>,
    control: Mutex<Option<Box<dyn PtyControl>>>,
    done: Signal,
}

impl Session {
    pub fn new(id: String, name: String, scrollback_bytes: usize) -> Self {
        let now = Utc::now();
        Self {
            id,
            name,
            created_at: now,
            last_active: Mutex::new(now),
            scrollback: Mutex::new(Scrollback::new(scrollback_bytes)),
            attach: Mutex::new(AttachState::default()),
            control: Mutex::new(None),
            done: Signal::new(),
        }
    }

    /// Install `tx` as the sole live-output owner, displacing any previous one.
    pub fn set_client(&self, tx: OutputSender) -> Attachment {
        let mut attach = lock(&self.attach);
        if let Some(previous) = attach.owner.take() {
            previous.displaced.fire();
            info!(session_id = %self.id, lease = previous.lease, "client displaced");
        }

        attach.next_lease += 1;
        let lease = attach.next_lease;
        let displaced = Arc::new(Signal::new());
        // Snapshot under the attach lock: the reader appends and forwards under
        // the same lock, so no chunk lands in both the replay and the channel.
        let replay = self.scrollback_snapshot();
        attach.owner = Some(Owner {
            lease,
            tx,
            displaced: displaced.clone(),
        });

        Attachment {
            lease,
            displaced,
            replay,
        }
    }

    /// Release the owner slot if `attachment` still holds it.
    ///
    /// Either way the session no longer holds the attachment's sender, so the
    /// matching receiver closes once drained. Returns whether it was the owner.
    pub fn clear_client(&self, attachment: &Attachment) -> bool {
        let mut attach = lock(&self.attach);
        let owned = attach
            .owner
            .as_ref()
            .is_some_and(|o| o.lease == attachment.lease);
        if owned {
            attach.owner = None;
        }
        owned
    }

    /// Whether a live-output owner is installed.
    pub fn is_connected(&self) -> bool {
        lock(&self.attach).owner.is_some()
    }

    /// Record a chunk of process output: scrollback, activity, live owner.
    ///
    /// Never blocks on the owner; a full or closed channel drops the chunk
    /// from the live view only.
    pub fn ingest(&self, chunk: &[u8]) {
        let attach = lock(&self.attach);
        lock(&self.scrollback).write(chunk);
        *lock(&self.last_active) = Utc::now();

        if let Some(owner) = attach.owner.as_ref() {
            if owner.tx.try_send(chunk.to_vec()).is_err() {
                trace!(session_id = %self.id, len = chunk.len(), "live output chunk dropped");
            }
        }
    }

    /// Independent copy of the retained output.
    pub fn scrollback_snapshot(&self) -> Vec<u8> {
        lock(&self.scrollback).snapshot()
    }

    /// Total output bytes produced, including those evicted from scrollback.
    pub fn output_bytes(&self) -> u64 {
        lock(&self.scrollback).total_written()
    }

    pub fn last_active(&self) -> DateTime<Utc> {
        *lock(&self.last_active)
    }

    /// Termination signal; fires once when the process output ends.
    pub fn done(&self) -> &Signal {
        &self.done
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            created_at: self.created_at,
            last_active: self.last_active(),
            connected: self.is_connected(),
        }
    }

    pub(crate) fn install_control(&self, control: Box<dyn PtyControl>) {
        *lock(&self.control) = Some(control);
    }

    pub(crate) fn take_control(&self) -> Option<Box<dyn PtyControl>> {
        lock(&self.control).take()
    }

    /// Run `f` against the process handle, failing once the session has ended.
    pub(crate) fn with_control<R>(
        &self,
        f: impl FnOnce(&mut dyn PtyControl) -> WebtermResult<R>,
    ) -> WebtermResult<R> {
        let mut control = lock(&self.control);
        match control.as_mut() {
            Some(c) => f(c.as_mut()),
            None => Err(WebtermError::SessionClosed(self.id.clone())),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("connected", &self.is_connected())
            .field("done", &self.done.is_fired())
            .finish()
    }
}

/// Lock a mutex, recovering the data if a panicking thread poisoned it.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
