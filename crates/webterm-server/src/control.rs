//! Control socket: the session registry's command surface.
//!
//! One JSON request per frame, one JSON reply per request. Errors are
//! reported in-band and never end the connection.

use crate::session::SessionManager;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::debug;
use webterm_core::{json_decode, json_encode, ControlRequest, ControlResponse, WebtermError, WebtermResult};

/// Serve control requests until the peer closes the socket.
pub async fn serve<S>(mut ws: WebSocketStream<S>, sessions: Arc<SessionManager>) -> WebtermResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(frame) = ws.next().await {
        let frame = frame.map_err(|e| WebtermError::Transport(format!("WS recv failed: {e}")))?;
        let payload = match &frame {
            Message::Text(text) => text.as_bytes(),
            Message::Binary(data) => &data[..],
            Message::Close(_) => break,
            _ => continue,
        };

        let response = match json_decode::<ControlRequest>(payload) {
            Ok(request) => {
                // create and kill fork, reap and sleep; keep them off the async workers.
                let sessions = sessions.clone();
                tokio::task::spawn_blocking(move || dispatch(&sessions, request))
                    .await
                    .map_err(|e| WebtermError::Other(format!("join error: {e}")))?
            }
            Err(e) => ControlResponse::error(&WebtermError::InvalidMessage(e.to_string())),
        };

        ws.send(Message::Text(json_encode(&response)?.into()))
            .await
            .map_err(|e| WebtermError::Transport(format!("WS send failed: {e}")))?;
    }
    Ok(())
}

/// Apply one request to the registry.
pub fn dispatch(sessions: &SessionManager, request: ControlRequest) -> ControlResponse {
    let result = match request {
        ControlRequest::List => Ok(ControlResponse::Sessions {
            sessions: sessions.list_info(),
        }),
        ControlRequest::Create { name } => sessions
            .create(&name)
            .map(|s| ControlResponse::Session { session: s.info() }),
        ControlRequest::Get { id } => sessions
            .get(&id)
            .map(|s| ControlResponse::Session { session: s.info() })
            .ok_or(WebtermError::SessionNotFound(id)),
        ControlRequest::Kill { id } => sessions.kill(&id).map(|()| ControlResponse::Killed { id }),
    };

    result.unwrap_or_else(|e| {
        debug!(error = %e, "control request failed");
        ControlResponse::error(&e)
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::session::{EchoSpawner, SessionSettings, Spawner};
    use std::time::Duration;
    use tokio_tungstenite::tungstenite::protocol::Role;

    fn manager() -> Arc<SessionManager> {
        Arc::new(SessionManager::new(Arc::new(EchoSpawner::new()), SessionSettings::default()))
    }

    #[test]
    fn create_then_duplicate() {
        let m = manager();
        let created = dispatch(&m, ControlRequest::Create { name: "dev".into() });
        let id = match created {
            ControlResponse::Session { session } => {
                assert_eq!(session.name, "dev");
                assert!(!session.connected);
                session.id
            }
            other => panic!("unexpected response: {other:?}"),
        };

        match dispatch(&m, ControlRequest::Create { name: "dev".into() }) {
            ControlResponse::Error { code, .. } => assert_eq!(code, 409),
            other => panic!("unexpected response: {other:?}"),
        }

        match dispatch(&m, ControlRequest::Get { id: id.clone() }) {
            ControlResponse::Session { session } => assert_eq!(session.id, id),
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn kill_then_get_is_not_found() {
        let m = manager();
        let s = m.create("tmp").unwrap();
        assert_eq!(
            dispatch(&m, ControlRequest::Kill { id: s.id.clone() }),
            ControlResponse::Killed { id: s.id.clone() }
        );
        match dispatch(&m, ControlRequest::Get { id: s.id.clone() }) {
            ControlResponse::Error { code, .. } => assert_eq!(code, 404),
            other => panic!("unexpected response: {other:?}"),
        }
        match dispatch(&m, ControlRequest::Kill { id: s.id.clone() }) {
            ControlResponse::Error { code, .. } => assert_eq!(code, 404),
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn list_reports_sessions() {
        let m = manager();
        m.create("one").unwrap();
        m.create("two").unwrap();
        match dispatch(&m, ControlRequest::List) {
            ControlResponse::Sessions { sessions } => assert_eq!(sessions.len(), 2),
            other => panic!("unexpected response: {other:?}"),
        }
    }

    /// Echo spawner that takes a while to start, like a slow fork/exec.
    struct SlowSpawner(EchoSpawner);

    impl Spawner for SlowSpawner {
        fn spawn(&self) -> WebtermResult<crate::session::pty::SpawnedPty> {
            std::thread::sleep(Duration::from_millis(300));
            self.0.spawn()
        }
    }

    #[tokio::test]
    async fn slow_create_leaves_runtime_responsive() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let m = Arc::new(SessionManager::new(
            Arc::new(SlowSpawner(EchoSpawner::new())),
            SessionSettings::default(),
        ));
        let (client_io, server_io) = tokio::io::duplex(16 * 1024);
        let server_ws = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
        let mut client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
        tokio::spawn(serve(server_ws, m.clone()));

        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let ticker = tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(10)).await;
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        client
            .send(Message::Text(r#"{"type":"create","name":"slow"}"#.to_string().into()))
            .await
            .unwrap();
        let before = ticks.load(Ordering::SeqCst);
        let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let during = ticks.load(Ordering::SeqCst) - before;
        ticker.abort();

        assert!(matches!(
            json_decode::<ControlResponse>(&frame.into_data()).unwrap(),
            ControlResponse::Session { .. }
        ));
        assert!(during >= 5, "runtime stalled during create: {during} ticks");
    }

    #[tokio::test]
    async fn malformed_request_gets_error_reply_and_connection_survives() {
        let m = manager();
        let (client_io, server_io) = tokio::io::duplex(16 * 1024);
        let server_ws = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
        let mut client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
        let handle = tokio::spawn(serve(server_ws, m.clone()));

        client.send(Message::Text("nope".to_string().into())).await.unwrap();
        client
            .send(Message::Text(r#"{"type":"create","name":"ws"}"#.to_string().into()))
            .await
            .unwrap();

        let mut replies = Vec::new();
        while replies.len() < 2 {
            let frame = tokio::time::timeout(Duration::from_secs(2), client.next())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            if let Message::Text(text) = frame {
                replies.push(json_decode::<ControlResponse>(text.as_bytes()).unwrap());
            }
        }
        assert!(matches!(replies[0], ControlResponse::Error { code: 400, .. }));
        assert!(matches!(replies[1], ControlResponse::Session { .. }));
        assert_eq!(m.count(), 1);

        client.close(None).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
