use thiserror::Error;

/// Errors produced by the webterm session core and protocol layer.
#[derive(Debug, Error)]
pub enum WebtermError {
    #[error("session name already in use: {0}")]
    NameTaken(String),

    #[error("invalid session name: {0:?}")]
    InvalidName(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session closed: {0}")]
    SessionClosed(String),

    #[error("spawn failed: {0}")]
    Spawn(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl WebtermError {
    /// HTTP-style status code reported in control-protocol error replies.
    pub fn code(&self) -> u16 {
        match self {
            WebtermError::InvalidName(_)
            | WebtermError::InvalidMessage(_)
            | WebtermError::Codec(_) => 400,
            WebtermError::SessionNotFound(_) => 404,
            WebtermError::NameTaken(_) => 409,
            WebtermError::SessionClosed(_) => 410,
            _ => 500,
        }
    }
}

impl From<serde_json::Error> for WebtermError {
    fn from(e: serde_json::Error) -> Self {
        WebtermError::Codec(e.to_string())
    }
}

impl From<base64::DecodeError> for WebtermError {
    fn from(e: base64::DecodeError) -> Self {
        WebtermError::Codec(format!("base64: {e}"))
    }
}

pub type WebtermResult<T> = Result<T, WebtermError>;
