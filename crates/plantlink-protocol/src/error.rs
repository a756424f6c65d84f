use thiserror::Error;

/// Errors raised while decoding protocol payloads.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("invalid plant address '{input}': {reason}")]
    InvalidAddress { input: String, reason: String },

    #[error("unknown offer '{0}'")]
    UnknownOffer(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        ProtocolError::Serialization(e.to_string())
    }
}
