//! webterm-core: Shared protocol library for the web terminal.
//!
//! Provides the JSON message types spoken over the streaming and control
//! sockets, the text codec, and the error type shared by server and clients.

pub mod codec;
pub mod error;
pub mod messages;

// Re-export commonly used items at crate root.
pub use codec::{decode_data, encode_data, json_decode, json_encode};
pub use error::{WebtermError, WebtermResult};
pub use messages::{ClientMessage, ControlRequest, ControlResponse, ServerMessage, SessionInfo};
