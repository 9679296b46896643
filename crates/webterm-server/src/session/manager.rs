//! Session lifecycle management.
//!
//! Owns the registry of live sessions: creation with name uniqueness,
//! listing, lookup, kill, and removal when a shell exits on its own.

use super::pty::{self, Spawner, DEFAULT_READ_CHUNK};
use super::scrollback::DEFAULT_SCROLLBACK_BYTES;
use super::state::Session;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use tracing::info;
use webterm_core::{SessionInfo, WebtermError, WebtermResult};

type Registry = RwLock<HashMap<String, Arc<Session>>>;

/// Per-session resource settings.
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub scrollback_bytes: usize,
    pub read_chunk: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            scrollback_bytes: DEFAULT_SCROLLBACK_BYTES,
            read_chunk: DEFAULT_READ_CHUNK,
        }
    }
}

/// Manages all live sessions.
///
/// The registry lock only guards the id → session map; a session's own
/// scrollback and attachment state have their own locks.
pub struct SessionManager {
    sessions: Arc<Registry>,
    spawner: Arc<dyn Spawner>,
    settings: SessionSettings,
}

impl SessionManager {
    /// Create a new session manager spawning shells with `spawner`.
    pub fn new(spawner: Arc<dyn Spawner>, settings: SessionSettings) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            spawner,
            settings,
        }
    }

    /// Create and start a new session named `name`.
    ///
    /// Fails with `NameTaken` if a live session already uses the name. If the
    /// spawn fails nothing is registered.
    pub fn create(&self, name: &str) -> WebtermResult<Arc<Session>> {
        if name.trim().is_empty() {
            return Err(WebtermError::InvalidName(name.to_string()));
        }

        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        if sessions.values().any(|s| s.name == name) {
            return Err(WebtermError::NameTaken(name.to_string()));
        }

        let session = Arc::new(Session::new(
            generate_session_id(),
            name.to_string(),
            self.settings.scrollback_bytes,
        ));

        let registry = Arc::downgrade(&self.sessions);
        pty::spawn(
            &session,
            self.spawner.as_ref(),
            self.settings.read_chunk,
            Box::new(move |id| remove(&registry, id)),
        )?;

        sessions.insert(session.id.clone(), session.clone());
        info!(session_id = %session.id, name = %session.name, "session created");
        Ok(session)
    }

    /// All live sessions, in no particular order.
    pub fn list(&self) -> Vec<Arc<Session>> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        sessions.values().cloned().collect()
    }

    /// Summaries of all live sessions, oldest first.
    pub fn list_info(&self) -> Vec<SessionInfo> {
        let mut infos: Vec<SessionInfo> = self.list().iter().map(|s| s.info()).collect();
        infos.sort_by_key(|i| i.created_at);
        infos
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        sessions.get(id).cloned()
    }

    /// Kill a session: deregister it, then terminate its process.
    ///
    /// The name is free for reuse as soon as this returns. The reader sees
    /// the pty close and fires the termination signal.
    pub fn kill(&self, id: &str) -> WebtermResult<()> {
        let session = {
            let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
            sessions
                .remove(id)
                .ok_or_else(|| WebtermError::SessionNotFound(id.to_string()))?
        };

        // Already-ended sessions have no control handle left.
        let _ = session.with_control(|c| {
            c.kill();
            Ok(())
        });
        info!(session_id = %id, name = %session.name, "session killed");
        Ok(())
    }

    /// Kill every live session. Returns how many were killed.
    pub fn kill_all(&self) -> usize {
        let ids: Vec<String> = self.list().iter().map(|s| s.id.clone()).collect();
        ids.iter().filter(|id| self.kill(id).is_ok()).count()
    }

    /// Number of live sessions.
    pub fn count(&self) -> usize {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Exit-hook removal. Idempotent; a concurrent `kill` may have won already.
fn remove(registry: &Weak<Registry>, id: &str) {
    let Some(registry) = registry.upgrade() else {
        return;
    };
    let mut sessions = registry.write().unwrap_or_else(PoisonError::into_inner);
    if sessions.remove(id).is_some() {
        info!(session_id = %id, "session removed (process exited)");
    }
}

/// Generate a random session ID (hex-encoded, 16 bytes = 32 hex chars).
fn generate_session_id() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: [u8; 16] = rng.gen();
    hex::encode(bytes)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::session::pty::{EchoSpawner, SpawnedPty};
    use std::time::Duration;

    fn manager() -> SessionManager {
        SessionManager::new(Arc::new(EchoSpawner::new()), SessionSettings::default())
    }

    fn eventually(mut cond: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn create_and_get() {
        let m = manager();
        let s = m.create("test").unwrap();
        assert_eq!(s.name, "test");
        assert_eq!(s.id.len(), 32);
        let got = m.get(&s.id).unwrap();
        assert_eq!(got.id, s.id);
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let m = manager();
        let first = m.create("dup").unwrap();
        let err = m.create("dup").unwrap_err();
        assert!(matches!(err, WebtermError::NameTaken(_)));
        assert!(m.get(&first.id).is_some());
        assert_eq!(m.count(), 1);
    }

    #[test]
    fn blank_name_is_rejected() {
        let m = manager();
        assert!(matches!(m.create("  "), Err(WebtermError::InvalidName(_))));
        assert_eq!(m.count(), 0);
    }

    #[test]
    fn list_returns_all() {
        let m = manager();
        m.create("a").unwrap();
        m.create("b").unwrap();
        assert_eq!(m.list().len(), 2);
        let names: Vec<String> = m.list_info().into_iter().map(|i| i.name).collect();
        assert!(names.contains(&"a".to_string()));
        assert!(names.contains(&"b".to_string()));
    }

    #[test]
    fn kill_frees_name() {
        let m = manager();
        let s = m.create("killme").unwrap();
        m.kill(&s.id).unwrap();
        assert!(m.get(&s.id).is_none());
        let again = m.create("killme").unwrap();
        assert_ne!(again.id, s.id);
    }

    #[test]
    fn kill_unknown_is_not_found() {
        let m = manager();
        assert!(matches!(m.kill("nonexistent"), Err(WebtermError::SessionNotFound(_))));
        assert!(m.get("nonexistent").is_none());
    }

    #[test]
    fn kill_fires_termination() {
        let m = manager();
        let s = m.create("term").unwrap();
        m.kill(&s.id).unwrap();
        assert!(eventually(|| s.done().is_fired()));
    }

    #[test]
    fn process_exit_removes_session() {
        let m = manager();
        let s = m.create("auto-remove").unwrap();
        // Simulate the shell exiting without going through kill().
        s.with_control(|c| {
            c.kill();
            Ok(())
        })
        .unwrap();
        assert!(eventually(|| m.get(&s.id).is_none()));
        assert!(s.done().is_fired());
    }

    #[test]
    fn end_to_end_echo() {
        let m = manager();
        let s = m.create("s1").unwrap();
        pty::write(&s, b"echo hi\n").unwrap();
        assert!(eventually(|| {
            String::from_utf8_lossy(&s.scrollback_snapshot()).contains("hi")
        }));
        m.kill(&s.id).unwrap();
        assert!(m.get(&s.id).is_none());
    }

    #[test]
    fn kill_all_empties_registry() {
        let m = manager();
        m.create("x").unwrap();
        m.create("y").unwrap();
        assert_eq!(m.kill_all(), 2);
        assert_eq!(m.count(), 0);
    }

    #[test]
    fn kill_ends_session_despite_lingering_descendant() {
        use crate::session::pty::{PortablePtySpawner, ShellCommand};

        let spawner = PortablePtySpawner::new(ShellCommand {
            program: "/bin/sh".to_string(),
            args: vec!["-c".to_string(), "(trap '' HUP; exec sleep 30) & sleep 30".to_string()],
            ..ShellCommand::default()
        });
        let m = SessionManager::new(Arc::new(spawner), SessionSettings::default());
        let s = m.create("nohup").unwrap();
        std::thread::sleep(Duration::from_millis(300));

        m.kill(&s.id).unwrap();
        assert!(eventually(|| s.done().is_fired()), "termination never fired after kill");
        assert!(m.get(&s.id).is_none());
        assert!(eventually(|| s.with_control(|_| Ok(())).is_err()));
    }

    struct BrokenSpawner;

    impl Spawner for BrokenSpawner {
        fn spawn(&self) -> WebtermResult<SpawnedPty> {
            Err(WebtermError::Spawn("fork failed".into()))
        }
    }

    #[test]
    fn spawn_failure_registers_nothing() {
        let m = SessionManager::new(Arc::new(BrokenSpawner), SessionSettings::default());
        assert!(matches!(m.create("x"), Err(WebtermError::Spawn(_))));
        assert_eq!(m.count(), 0);
        assert!(m.list().is_empty());
    }
}
