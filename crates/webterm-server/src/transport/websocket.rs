//! WebSocket listener using tokio-tungstenite.
//!
//! Connections are routed during the HTTP upgrade: the caller's classifier
//! maps the request path to a route, or rejects it with an HTTP status so a
//! browser gets a plain 404 instead of a socket that closes immediately.

use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};
use webterm_core::{json_encode, WebtermError, WebtermResult};

/// Write half of a WebSocket, shared by every task that sends on it.
pub type SharedSink<S> = Arc<Mutex<SplitSink<WebSocketStream<S>, Message>>>;

/// Why an upgrade request was refused.
#[derive(Debug, Clone)]
pub struct Rejection {
    pub status: StatusCode,
    pub reason: String,
}

impl Rejection {
    pub fn not_found(reason: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            reason: reason.into(),
        }
    }

    fn into_response(self) -> ErrorResponse {
        let mut response = ErrorResponse::new(Some(self.reason));
        *response.status_mut() = self.status;
        response
    }
}

/// An accepted WebSocket connection and the route it was upgraded for.
pub struct WebSocketConnection<R> {
    pub ws_stream: WebSocketStream<TcpStream>,
    pub remote_addr: SocketAddr,
    pub route: R,
}

/// Start the WebSocket listener.
///
/// `classify` sees each upgrade request's path. Returns a receiver that
/// yields accepted, routed connections.
pub async fn start_listener<R, F>(
    bind_addr: SocketAddr,
    classify: F,
) -> WebtermResult<mpsc::Receiver<WebSocketConnection<R>>>
where
    R: Send + 'static,
    F: Fn(&str) -> Result<R, Rejection> + Send + Sync + 'static,
{
    let tcp_listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| WebtermError::Transport(format!("WS bind failed on {bind_addr}: {e}")))?;

    info!(addr = %bind_addr, "WebSocket listener started");

    let (tx, rx) = mpsc::channel::<WebSocketConnection<R>>(64);
    let classify = Arc::new(classify);

    tokio::spawn(async move {
        loop {
            match tcp_listener.accept().await {
                Ok((stream, addr)) => {
                    let tx = tx.clone();
                    let classify = classify.clone();
                    tokio::spawn(async move {
                        let mut route = None;
                        let accepted = tokio_tungstenite::accept_hdr_async(
                            stream,
                            |req: &Request, resp: Response| match classify(req.uri().path()) {
                                Ok(r) => {
                                    route = Some(r);
                                    Ok(resp)
                                }
                                Err(rejection) => {
                                    debug!(remote = %addr, path = %req.uri().path(), status = %rejection.status, "upgrade rejected");
                                    Err(rejection.into_response())
                                }
                            },
                        )
                        .await;

                        match (accepted, route) {
                            (Ok(ws_stream), Some(route)) => {
                                debug!(remote = %addr, "WebSocket connection accepted");
                                let conn = WebSocketConnection {
                                    ws_stream,
                                    remote_addr: addr,
                                    route,
                                };
                                if tx.send(conn).await.is_err() {
                                    warn!("WebSocket connection channel closed");
                                }
                            }
                            (Ok(_), None) => {
                                warn!(remote = %addr, "WebSocket accepted without a route");
                            }
                            (Err(e), _) => {
                                debug!(remote = %addr, error = %e, "WebSocket handshake failed");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "TCP accept failed");
                }
            }
        }
    });

    Ok(rx)
}

/// Send one JSON message as a text frame.
pub async fn ws_send_json<S, T>(sink: &SharedSink<S>, msg: &T) -> WebtermResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    T: serde::Serialize,
{
    let text = json_encode(msg)?;
    sink.lock()
        .await
        .send(Message::Text(text.into()))
        .await
        .map_err(|e| WebtermError::Transport(format!("WS send failed: {e}")))
}

/// Send a transport-level ping.
pub async fn ws_send_ping<S>(sink: &SharedSink<S>) -> WebtermResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    sink.lock()
        .await
        .send(Message::Ping(Vec::new().into()))
        .await
        .map_err(|e| WebtermError::Transport(format!("WS ping failed: {e}")))
}

/// Close the WebSocket. Errors are ignored; the peer may already be gone.
pub async fn ws_close<S>(sink: &SharedSink<S>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let _ = sink.lock().await.close().await;
}

/// Extract the payload of a data frame. `None` for control frames.
pub fn frame_payload(msg: &Message) -> Option<&[u8]> {
    match msg {
        Message::Text(text) => Some(text.as_bytes()),
        Message::Binary(data) => Some(&data[..]),
        _ => None,
    }
}
