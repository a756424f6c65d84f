//! In-process message bus.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;

use plantlink_protocol::{AgentId, PlantMessage};

use crate::transport::{BoxFuture, Endpoint, ReplyStream, Transport};
use crate::NetworkError;

/// Routes envelopes to endpoints registered in the same process. Each
/// delivery runs the handler on its own task.
#[derive(Clone, Default)]
pub struct LocalBus {
    endpoints: Arc<RwLock<HashMap<AgentId, Arc<dyn Endpoint>>>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an endpoint, replacing any previous one with the same id.
    pub fn register(&self, id: AgentId, endpoint: Arc<dyn Endpoint>) {
        tracing::debug!(agent = %id, "Endpoint attached to local bus");
        self.endpoints.write().insert(id, endpoint);
    }

    pub fn deregister(&self, id: &AgentId) -> bool {
        let removed = self.endpoints.write().remove(id).is_some();
        if removed {
            tracing::debug!(agent = %id, "Endpoint detached from local bus");
        }
        removed
    }

    pub fn contains(&self, id: &AgentId) -> bool {
        self.endpoints.read().contains_key(id)
    }
}

impl Transport for LocalBus {
    fn open_stream<'a>(
        &'a self,
        to: &'a AgentId,
        message: PlantMessage,
    ) -> BoxFuture<'a, Result<ReplyStream, NetworkError>> {
        Box::pin(async move {
            let endpoint = self
                .endpoints
                .read()
                .get(to)
                .cloned()
                .ok_or_else(|| NetworkError::UnknownRecipient(to.clone()))?;

            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(async move {
                endpoint.handle(message, tx).await;
            });
            Ok(rx)
        })
    }
}
