//! plantlink network - message transports and agent directory.
//!
//! Two transports share the [`Transport`] trait:
//! - [`LocalBus`] routes envelopes between endpoints in one process
//! - [`TcpTransport`] carries one JSON envelope per line over TCP
//!
//! A request opens a reply stream. Request/response exchanges read the first
//! reply; subscriptions keep reading until the responder drops its sender.

pub mod directory;
pub mod local;
pub mod tcp;
pub mod transport;

pub use directory::{Directory, LocalDirectory, StaticDirectory};
pub use local::LocalBus;
pub use tcp::{serve_endpoint, TcpTransport};
pub use transport::{BoxFuture, Endpoint, ReplySender, ReplyStream, Transport};

use std::time::Duration;

use plantlink_protocol::AgentId;

/// Errors from the network layer.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("unknown recipient: {0}")]
    UnknownRecipient(AgentId),

    #[error("{0} closed the conversation without replying")]
    NoReply(AgentId),

    #[error("no reply from {to} within {after:?}")]
    Timeout { to: AgentId, after: Duration },

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("directory error: {0}")]
    Directory(String),
}

impl From<std::io::Error> for NetworkError {
    fn from(e: std::io::Error) -> Self {
        NetworkError::Connection(e.to_string())
    }
}

impl From<serde_json::Error> for NetworkError {
    fn from(e: serde_json::Error) -> Self {
        NetworkError::Serialization(e.to_string())
    }
}
