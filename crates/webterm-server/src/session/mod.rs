//! Session management: registry, PTY engine, scrollback, attachment.

pub mod manager;
pub mod pty;
pub mod scrollback;
pub mod signal;
pub mod state;

pub use manager::{SessionManager, SessionSettings};
pub use pty::{PortablePtySpawner, ShellCommand, Spawner};
#[cfg(unix)]
pub use pty::EchoSpawner;
pub use signal::Signal;
pub use state::{Attachment, Session};
