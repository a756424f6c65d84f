use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::mpsc;

use plantlink_protocol::{AgentId, PlantMessage};

use crate::NetworkError;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Responder side of a conversation. Dropping every clone ends the stream.
pub type ReplySender = mpsc::UnboundedSender<PlantMessage>;

/// Requester side of a conversation; yields replies in arrival order.
pub type ReplyStream = mpsc::UnboundedReceiver<PlantMessage>;

/// Something that answers inbound messages.
///
/// A handler may reply zero, one or many times. Long-lived conversations
/// (subscriptions) keep a clone of `replies` after `handle` returns.
pub trait Endpoint: Send + Sync {
    fn handle<'a>(&'a self, message: PlantMessage, replies: ReplySender) -> BoxFuture<'a, ()>;
}

/// Delivers envelopes to agents by id.
pub trait Transport: Send + Sync {
    /// Send `message` to `to` and return the stream of its replies.
    fn open_stream<'a>(
        &'a self,
        to: &'a AgentId,
        message: PlantMessage,
    ) -> BoxFuture<'a, Result<ReplyStream, NetworkError>>;

    /// Send `message` and wait at most `within` for the first reply.
    fn request<'a>(
        &'a self,
        to: &'a AgentId,
        message: PlantMessage,
        within: Duration,
    ) -> BoxFuture<'a, Result<PlantMessage, NetworkError>> {
        Box::pin(async move {
            let mut replies = self.open_stream(to, message).await?;
            match tokio::time::timeout(within, replies.recv()).await {
                Ok(Some(reply)) => Ok(reply),
                Ok(None) => Err(NetworkError::NoReply(to.clone())),
                Err(_) => Err(NetworkError::Timeout {
                    to: to.clone(),
                    after: within,
                }),
            }
        })
    }

    /// Fire and forget. Any reply is discarded.
    fn send<'a>(
        &'a self,
        to: &'a AgentId,
        message: PlantMessage,
    ) -> BoxFuture<'a, Result<(), NetworkError>> {
        Box::pin(async move { self.open_stream(to, message).await.map(drop) })
    }
}
