//! Transport layer: WebSocket listener and send helpers.

pub mod websocket;
