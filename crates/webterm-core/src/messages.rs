//! Message types for the streaming and control sockets.
//!
//! All messages are internally tagged by a `type` field so the browser can
//! switch on it directly.

use crate::codec::encode_data;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Messages a browser sends on a session's streaming socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Keystrokes for the shell, base64-encoded.
    Input {
        #[serde(default)]
        data: String,
    },
    /// Terminal geometry change. Missing dimensions decode as zero.
    Resize {
        #[serde(default)]
        cols: u16,
        #[serde(default)]
        rows: u16,
    },
    /// Any type this server does not understand.
    #[serde(other)]
    Unknown,
}

/// Messages the server sends on a session's streaming socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    /// Terminal output (scrollback replay or live), base64-encoded.
    Output { data: String },
    /// The shell process ended.
    Closed,
}

impl ServerMessage {
    pub fn output(bytes: &[u8]) -> Self {
        ServerMessage::Output {
            data: encode_data(bytes),
        }
    }
}

/// Public summary of a live session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub connected: bool,
}

/// Requests accepted on the control socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlRequest {
    List,
    Create { name: String },
    Get { id: String },
    Kill { id: String },
}

/// Replies sent on the control socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlResponse {
    Sessions { sessions: Vec<SessionInfo> },
    Session { session: SessionInfo },
    Killed { id: String },
    Error { code: u16, message: String },
}

impl ControlResponse {
    pub fn error(err: &crate::WebtermError) -> Self {
        ControlResponse::Error {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::json_decode;

    #[test]
    fn unknown_client_type_is_tolerated() {
        let msg: ClientMessage = json_decode(br#"{"type":"paste","data":"eA=="}"#).unwrap();
        assert_eq!(msg, ClientMessage::Unknown);
    }

    #[test]
    fn resize_missing_dimension_defaults_to_zero() {
        let msg: ClientMessage = json_decode(br#"{"type":"resize","cols":80}"#).unwrap();
        assert_eq!(msg, ClientMessage::Resize { cols: 80, rows: 0 });
    }

    #[test]
    fn resize_rejects_out_of_range_dimension() {
        assert!(json_decode::<ClientMessage>(br#"{"type":"resize","cols":70000,"rows":24}"#).is_err());
    }

    #[test]
    fn missing_type_is_a_decode_error() {
        assert!(json_decode::<ClientMessage>(br#"{"data":"eA=="}"#).is_err());
    }

    #[test]
    fn control_create_request() {
        let req: ControlRequest = json_decode(br#"{"type":"create","name":"dev"}"#).unwrap();
        assert_eq!(req, ControlRequest::Create { name: "dev".into() });
    }

    #[test]
    fn control_error_carries_code() {
        let resp = ControlResponse::error(&crate::WebtermError::NameTaken("dev".into()));
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["code"], 409);
    }

    #[test]
    fn session_info_uses_rfc3339_timestamps() {
        let ts = DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let info = SessionInfo {
            id: "ab".into(),
            name: "dev".into(),
            created_at: ts,
            last_active: ts,
            connected: false,
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["created_at"], "2024-05-01T12:00:00Z");
        assert_eq!(json["connected"], false);
    }
}
