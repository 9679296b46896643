//! Core server: accepts connections and routes them to the session
//! registry's control socket or to a session's streaming socket.

use crate::config::ServerConfig;
use crate::control;
use crate::session::{PortablePtySpawner, Session, SessionManager, Spawner};
use crate::stream;
use crate::transport::websocket::{self, Rejection};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};
use webterm_core::{WebtermError, WebtermResult};

/// Where an upgraded connection goes.
pub enum Route {
    /// `/api/sessions`
    Control,
    /// `/api/sessions/{id}/ws`
    Stream(Arc<Session>),
}

/// The web terminal server instance.
pub struct WebtermServer {
    config: ServerConfig,
    sessions: Arc<SessionManager>,
}

impl WebtermServer {
    /// Create a new server instance.
    pub fn new(config: ServerConfig) -> Self {
        let spawner = select_spawner(&config);
        let sessions = Arc::new(SessionManager::new(spawner, config.session));
        Self { config, sessions }
    }

    /// Shared handle to the session registry.
    pub fn sessions(&self) -> Arc<SessionManager> {
        self.sessions.clone()
    }

    /// Accept and serve connections until the listener stops.
    pub async fn run(self) -> WebtermResult<()> {
        let addr = resolve_listen_addr(&self.config.host, self.config.port).await?;

        let registry = self.sessions.clone();
        let mut conn_rx = websocket::start_listener(addr, move |path| classify(&registry, path)).await?;

        info!(addr = %addr, shell = %self.config.shell.program, "webterm-server ready");

        while let Some(conn) = conn_rx.recv().await {
            let remote = conn.remote_addr;
            match conn.route {
                Route::Control => {
                    let sessions = self.sessions.clone();
                    tokio::spawn(async move {
                        if let Err(e) = control::serve(conn.ws_stream, sessions).await {
                            debug!(remote = %remote, error = %e, "control connection ended");
                        }
                    });
                }
                Route::Stream(session) => {
                    let settings = self.config.stream;
                    tokio::spawn(async move {
                        let session_id = session.id.clone();
                        if let Err(e) = stream::serve(conn.ws_stream, session, settings).await {
                            warn!(remote = %remote, session_id = %session_id, error = %e, "stream connection error");
                        }
                    });
                }
            }
        }

        info!("listener closed, shutting down");
        Ok(())
    }
}

/// Resolve the configured host (IP literal or name) to a bind address.
async fn resolve_listen_addr(host: &str, port: u16) -> WebtermResult<SocketAddr> {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| WebtermError::Config(format!("invalid listen address {host}:{port}: {e}")))?
        .next()
        .ok_or_else(|| WebtermError::Config(format!("listen address {host}:{port} resolved to nothing")))
}

fn select_spawner(config: &ServerConfig) -> Arc<dyn Spawner> {
    #[cfg(unix)]
    if config.echo_shell {
        warn!("echo shell enabled: sessions echo input instead of running a shell");
        return Arc::new(crate::session::EchoSpawner::new());
    }
    Arc::new(PortablePtySpawner::new(config.shell.clone()))
}

/// Map an upgrade request path to a route.
fn classify(sessions: &SessionManager, path: &str) -> Result<Route, Rejection> {
    let path = path.trim_end_matches('/');
    if path == "/api/sessions" {
        return Ok(Route::Control);
    }

    let id = path
        .strip_prefix("/api/sessions/")
        .and_then(|rest| rest.strip_suffix("/ws"))
        .filter(|id| !id.is_empty() && !id.contains('/'))
        .ok_or_else(|| Rejection::not_found("not found"))?;

    sessions
        .get(id)
        .map(Route::Stream)
        .ok_or_else(|| Rejection::not_found("session not found"))
}
