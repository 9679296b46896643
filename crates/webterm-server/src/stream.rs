//! Streaming protocol handler: one attached browser tab per connection.
//!
//! On attach the connection takes the session's owner slot, replays the
//! scrollback, then runs three helper tasks next to its receive loop:
//!
//! - pump: live output chunks → `output` messages; on shell exit, `closed` + close
//! - watcher: displacement → close silently
//! - keepalive: transport pings on a fixed interval
//!
//! Every send goes through the connection's [`SharedSink`] lock.

use crate::session::{pty, Attachment, Session, Signal};
use crate::transport::websocket::{frame_payload, ws_close, ws_send_json, ws_send_ping, SharedSink};
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};
use webterm_core::{decode_data, json_decode, ClientMessage, ServerMessage, WebtermError, WebtermResult};

/// Default interval between transport pings.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);
/// Default peer silence after which the connection is dropped.
pub const DEFAULT_PONG_WAIT: Duration = Duration::from_secs(60);
/// Default capacity of the live output channel, in chunks.
pub const DEFAULT_LIVE_BUFFER: usize = 256;

/// Per-connection protocol settings.
#[derive(Debug, Clone, Copy)]
pub struct StreamSettings {
    pub ping_interval: Duration,
    pub pong_wait: Duration,
    pub live_buffer: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            ping_interval: DEFAULT_PING_INTERVAL,
            pong_wait: DEFAULT_PONG_WAIT,
            live_buffer: DEFAULT_LIVE_BUFFER,
        }
    }
}

/// Attach `ws` to `session` and serve it until the connection ends.
///
/// The session itself is never affected by how the connection ends.
pub async fn serve<S>(
    ws: WebSocketStream<S>,
    session: Arc<Session>,
    settings: StreamSettings,
) -> WebtermResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, stream) = ws.split();
    let sink: SharedSink<S> = Arc::new(Mutex::new(sink));

    let (tx, rx) = mpsc::channel::<Vec<u8>>(settings.live_buffer.max(1));
    let attachment = session.set_client(tx);
    info!(session_id = %session.id, lease = attachment.lease(), "client attached");

    let closing = Arc::new(Signal::new());
    run(&session, attachment, &sink, stream, rx, &closing, settings).await
}

async fn run<S>(
    session: &Arc<Session>,
    mut attachment: Attachment,
    sink: &SharedSink<S>,
    mut stream: futures_util::stream::SplitStream<WebSocketStream<S>>,
    rx: mpsc::Receiver<Vec<u8>>,
    closing: &Arc<Signal>,
    settings: StreamSettings,
) -> WebtermResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let result = async {
        let replay = attachment.take_replay();
        if !replay.is_empty() {
            ws_send_json(sink, &ServerMessage::output(&replay)).await?;
        }

        tokio::spawn(pump(session.clone(), sink.clone(), rx, closing.clone()));
        tokio::spawn(watch(
            session.clone(),
            attachment.displaced(),
            closing.clone(),
            sink.clone(),
        ));
        tokio::spawn(keepalive(sink.clone(), closing.clone(), settings.ping_interval));

        receive_loop(session, &mut stream, closing, settings.pong_wait).await
    }
    .await;

    // Teardown runs on every exit path, including a failed replay.
    closing.fire();
    if session.clear_client(&attachment) {
        info!(session_id = %session.id, lease = attachment.lease(), "client detached");
    }
    result
}

/// Forward live output until the session stops holding our sender.
///
/// When the shell exits, flushes what is already queued, then sends the
/// `closed` notice and closes the transport.
async fn pump<S>(session: Arc<Session>, sink: SharedSink<S>, mut rx: mpsc::Receiver<Vec<u8>>, closing: Arc<Signal>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            biased;
            chunk = rx.recv() => match chunk {
                Some(chunk) => {
                    if ws_send_json(&sink, &ServerMessage::output(&chunk)).await.is_err() {
                        return;
                    }
                }
                None => return,
            },
            _ = session.done().fired() => break,
        }
    }

    // The reader has stopped, so everything it produced is already queued.
    while let Ok(chunk) = rx.try_recv() {
        if ws_send_json(&sink, &ServerMessage::output(&chunk)).await.is_err() {
            break;
        }
    }
    debug!(session_id = %session.id, "session ended; notifying client");
    let _ = ws_send_json(&sink, &ServerMessage::Closed).await;
    ws_close(&sink).await;
    closing.fire();
}

/// Close the transport when a later connection takes over the session.
async fn watch<S>(session: Arc<Session>, displaced: Arc<Signal>, closing: Arc<Signal>, sink: SharedSink<S>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    tokio::select! {
        _ = displaced.fired() => {
            // No `closed` notice: the client must tell this apart from the shell exiting.
            debug!(session_id = %session.id, "connection displaced; closing");
            ws_close(&sink).await;
            closing.fire();
        }
        _ = closing.fired() => {}
    }
}

async fn keepalive<S>(sink: SharedSink<S>, closing: Arc<Signal>, every: Duration)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if ws_send_ping(&sink).await.is_err() {
                    return;
                }
            }
            _ = closing.fired() => return,
        }
    }
}

/// Read client messages until the peer goes away, goes silent, or the
/// watcher closes the connection.
async fn receive_loop<S>(
    session: &Arc<Session>,
    stream: &mut futures_util::stream::SplitStream<WebSocketStream<S>>,
    closing: &Signal,
    pong_wait: Duration,
) -> WebtermResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let next = tokio::select! {
            _ = closing.fired() => return Ok(()),
            next = tokio::time::timeout(pong_wait, stream.next()) => next,
        };

        let msg = match next {
            Err(_) => {
                debug!(session_id = %session.id, "peer silent past pong wait");
                return Ok(());
            }
            Ok(None) | Ok(Some(Ok(Message::Close(_)))) => return Ok(()),
            Ok(Some(Err(e))) => {
                debug!(session_id = %session.id, error = %e, "WebSocket read ended");
                return Ok(());
            }
            Ok(Some(Ok(msg))) => msg,
        };

        // Pings are answered by tungstenite; pongs only matter for the timeout.
        let Some(payload) = frame_payload(&msg) else {
            continue;
        };

        match json_decode::<ClientMessage>(payload)? {
            ClientMessage::Input { data } => {
                let bytes = match decode_data(&data) {
                    Ok(b) => b,
                    Err(e) => {
                        debug!(session_id = %session.id, error = %e, "ignoring undecodable input");
                        continue;
                    }
                };
                if bytes.is_empty() {
                    continue;
                }
                let target = session.clone();
                tokio::task::spawn_blocking(move || pty::write(&target, &bytes))
                    .await
                    .map_err(|e| WebtermError::Other(format!("join error: {e}")))??;
            }
            ClientMessage::Resize { cols, rows } => {
                if let Err(e) = pty::resize(session, cols, rows) {
                    warn!(session_id = %session.id, cols, rows, error = %e, "PTY resize failed");
                }
            }
            ClientMessage::Unknown => {}
        }
    }
}
