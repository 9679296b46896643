//! JSON text framing for the webterm sockets.
//!
//! Every frame is one JSON object; raw terminal bytes travel inside it as
//! standard (padded) base64.

use crate::error::WebtermResult;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Encode a serializable value into a JSON text frame.
pub fn json_encode<T: serde::Serialize>(value: &T) -> WebtermResult<String> {
    Ok(serde_json::to_string(value)?)
}

/// Decode a JSON frame (text or binary payload) into a typed value.
pub fn json_decode<T: serde::de::DeserializeOwned>(data: &[u8]) -> WebtermResult<T> {
    Ok(serde_json::from_slice(data)?)
}

/// Base64-encode terminal bytes for a `data` field.
pub fn encode_data(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode a base64 `data` field back into terminal bytes.
pub fn decode_data(data: &str) -> WebtermResult<Vec<u8>> {
    Ok(STANDARD.decode(data)?)
}
