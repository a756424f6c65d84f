//! Connector-side negotiation and subscription responder.
//!
//! Request handling runs on the tokio runtime; the only blocking wait (the
//! Accept handler waiting for a first snapshot) runs on the blocking pool.
//! All reads and writes of the link state go through the shared link lock.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;

use plantlink_network::{BoxFuture, Endpoint, ReplySender};
use plantlink_protocol::{
    AgentId, ConnectionState, FailureReason, Offer, Performative, PlantAddress, PlantMessage,
};
use plantlink_state::{CancelOutcome, ConnectAttempt, LinkEvent, SharedLink, SubscriptionRegistry};

use crate::config::ConnectorConfig;
use crate::ingester::{IngestEvent, IngesterHandle, StreamIngester, TerminationCause};
use crate::ConnectorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentLifecycle {
    Running,
    Terminating,
    Terminated,
}

/// One connector. Cheap to clone; clones share the same agent.
#[derive(Clone)]
pub struct ConnectionAgent {
    inner: Arc<AgentInner>,
}

struct AgentInner {
    id: AgentId,
    config: ConnectorConfig,
    link: Arc<SharedLink>,
    registry: Arc<SubscriptionRegistry>,
    ingester: Mutex<Option<IngesterHandle>>,
    lifecycle: watch::Sender<AgentLifecycle>,
}

impl ConnectionAgent {
    pub fn new(config: ConnectorConfig) -> Self {
        let id = AgentId::new(config.agent_id.clone());
        let (lifecycle, _) = watch::channel(AgentLifecycle::Running);
        Self {
            inner: Arc::new(AgentInner {
                registry: Arc::new(SubscriptionRegistry::new(id.clone())),
                id,
                config,
                link: Arc::new(SharedLink::new()),
                ingester: Mutex::new(None),
                lifecycle,
            }),
        }
    }

    pub fn id(&self) -> &AgentId {
        &self.inner.id
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.link.state()
    }

    /// Address owned while Connecting or Streaming.
    pub fn owned_address(&self) -> Option<PlantAddress> {
        self.inner.link.with(|link| link.owned_address().cloned())
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.registry.active_count()
    }

    pub fn lifecycle(&self) -> AgentLifecycle {
        *self.inner.lifecycle.borrow()
    }

    fn is_accepting(&self) -> bool {
        self.lifecycle() == AgentLifecycle::Running
    }

    /// Resolves once the agent has fully terminated.
    pub async fn terminated(&self) {
        let mut rx = self.inner.lifecycle.subscribe();
        let _ = rx.wait_for(|state| *state == AgentLifecycle::Terminated).await;
    }

    // -----------------------------------------------------------------------
    // Bidding
    // -----------------------------------------------------------------------

    fn on_call_for_proposal(&self, cfp: &PlantMessage) -> PlantMessage {
        let id = &self.inner.id;
        let requested: PlantAddress = match cfp.content.parse() {
            Ok(address) => address,
            Err(e) => {
                tracing::warn!(agent = %id, error = %e, "Refusing bid with malformed address");
                return cfp.refuse(id);
            }
        };

        let offer = self.inner.link.with(|link| match link.connection {
            ConnectionState::Idle => Some(Offer::Ready),
            ConnectionState::Connecting | ConnectionState::Streaming
                if link.address.as_ref() == Some(&requested) =>
            {
                Some(Offer::Connected)
            }
            _ => None,
        });

        match offer {
            Some(offer) => {
                tracing::debug!(agent = %id, address = %requested, offer = offer.as_str(), "Proposing");
                cfp.propose(id, offer)
            }
            None => {
                tracing::debug!(agent = %id, address = %requested, "Refusing bid");
                cfp.refuse(id)
            }
        }
    }

    async fn on_accept(&self, accept: &PlantMessage) -> PlantMessage {
        let id = &self.inner.id;
        let timing = &self.inner.config.timing;

        let address: PlantAddress = match accept.content.parse() {
            Ok(address) => address,
            Err(e) => {
                tracing::warn!(agent = %id, error = %e, "Accept carried a malformed address");
                return accept.failure(id, None);
            }
        };

        let budget = |margin: Duration| {
            accept
                .time_left()
                .map(|left| left.saturating_sub(margin))
                .unwrap_or_else(|| timing.default_accept_wait())
        };

        let wait = match self.inner.link.try_begin_connecting(&address) {
            ConnectAttempt::AlreadyStreaming => None,
            ConnectAttempt::AlreadyConnecting => Some(budget(timing.connecting_margin())),
            ConnectAttempt::Started => {
                if let Err(e) = self.open_plant(&address).await {
                    tracing::warn!(agent = %id, address = %address, error = %e, "Plant connection failed");
                    self.inner.link.connect_failed();
                    return accept.failure(id, None);
                }
                Some(budget(timing.idle_margin()))
            }
            ConnectAttempt::OwnsOther(owned) => {
                tracing::warn!(agent = %id, owned = %owned, requested = %address, "Accept for a plant this agent does not own");
                return accept.failure(id, None);
            }
            ConnectAttempt::Unavailable(state) => {
                tracing::warn!(agent = %id, state = %state, "Accept while unavailable");
                return accept.failure(id, None);
            }
        };

        if let Some(wait) = wait {
            tracing::debug!(agent = %id, ?wait, "Waiting for first plant document");
            let link = Arc::clone(&self.inner.link);
            let streaming = tokio::task::spawn_blocking(move || link.wait_until_streaming(wait))
                .await
                .unwrap_or(false);
            if !streaming {
                tracing::warn!(agent = %id, address = %address, "No plant document before the accept deadline");
                return accept.failure(id, None);
            }
        }

        let names = self.inner.link.with(|link| link.snapshot.encode_variable_list());
        if names.is_empty() {
            return accept.failure(id, None);
        }
        tracing::info!(agent = %id, address = %address, variables = %names, "Accept answered");
        accept.reply(Performative::Inform, id, names)
    }

    /// Open the plant socket and start its reader thread.
    async fn open_plant(&self, address: &PlantAddress) -> Result<(), ConnectorError> {
        let timing = &self.inner.config.timing;
        let target = (address.host().to_string(), address.port());

        let stream = tokio::time::timeout(
            timing.connect_timeout(),
            tokio::net::TcpStream::connect(target),
        )
        .await
        .map_err(|_| ConnectorError::PlantConnect {
            address: address.clone(),
            reason: format!("timed out after {:?}", timing.connect_timeout()),
        })?
        .map_err(|e| ConnectorError::PlantConnect {
            address: address.clone(),
            reason: e.to_string(),
        })?;

        let stream = stream.into_std()?;
        stream.set_nonblocking(false)?;

        // Takedown marks the lifecycle before it takes the handle.
        let mut slot = self.inner.ingester.lock();
        if !self.is_accepting() {
            tracing::info!(agent = %self.inner.id, address = %address, "Takedown began during connect, dropping plant socket");
            return Err(ConnectorError::ShuttingDown);
        }
        let handle = StreamIngester::spawn(
            format!("plant-reader-{}", self.inner.id),
            stream,
            Arc::clone(&self.inner.link),
            Arc::clone(&self.inner.registry),
            self.inner.config.document.clone(),
            self.event_callback(),
        )?;
        *slot = Some(handle);
        drop(slot);
        tracing::info!(agent = %self.inner.id, address = %address, "Plant socket open");
        Ok(())
    }

    /// Ingester events arrive on the reader thread; a terminal one schedules
    /// agent takedown on the runtime.
    fn event_callback(&self) -> Arc<dyn Fn(IngestEvent) + Send + Sync> {
        let weak: Weak<AgentInner> = Arc::downgrade(&self.inner);
        let runtime = tokio::runtime::Handle::current();
        Arc::new(move |event| {
            if let IngestEvent::Terminated(cause) = event {
                if cause == TerminationCause::Shutdown {
                    return;
                }
                if let Some(inner) = weak.upgrade() {
                    let agent = ConnectionAgent { inner };
                    runtime.spawn(async move { agent.shutdown().await });
                }
            }
        })
    }

    // -----------------------------------------------------------------------
    // Subscriptions
    // -----------------------------------------------------------------------

    fn on_subscribe(&self, subscribe: &PlantMessage, replies: &ReplySender) {
        let id = &self.inner.id;
        let (state, values) = self
            .inner
            .link
            .with(|link| (link.connection, link.snapshot.encode_values()));
        let initial = subscribe.reply(Performative::Inform, id, values);

        if let Err(e) = self.inner.registry.subscribe(
            &subscribe.conversation_id,
            &subscribe.sender,
            state,
            replies.clone(),
            initial,
        ) {
            tracing::warn!(agent = %id, channel = %subscribe.conversation_id, error = %e, "Subscription refused");
            let _ = replies.send(subscribe.refuse(id));
        }
    }

    fn on_cancel(&self, cancel: &PlantMessage) -> PlantMessage {
        let id = &self.inner.id;
        match self.inner.registry.cancel(&cancel.conversation_id) {
            CancelOutcome::Removed => cancel.reply(Performative::Inform, id, ""),
            CancelOutcome::NotFound => {
                tracing::debug!(agent = %id, channel = %cancel.conversation_id, "Cancel for unknown channel");
                cancel.failure(id, None)
            }
        }
    }

    /// Answer for a request that arrives after takedown began.
    fn closed_reply(&self, message: &PlantMessage) -> Option<PlantMessage> {
        let id = &self.inner.id;
        match message.performative {
            Performative::CallForProposal | Performative::Subscribe => Some(message.refuse(id)),
            Performative::AcceptProposal | Performative::Cancel => {
                Some(message.failure(id, Some(FailureReason::ConnectorTerminated)))
            }
            _ => None,
        }
    }

    // -----------------------------------------------------------------------
    // Takedown
    // -----------------------------------------------------------------------

    /// Stop accepting work, notify subscribers, stop the reader and release
    /// the plant socket. Idempotent; later callers wait for the first.
    pub async fn shutdown(&self) {
        let mut first = false;
        self.inner.lifecycle.send_if_modified(|state| {
            if *state == AgentLifecycle::Running {
                *state = AgentLifecycle::Terminating;
                first = true;
                true
            } else {
                false
            }
        });
        if !first {
            self.terminated().await;
            return;
        }

        let id = &self.inner.id;
        tracing::info!(agent = %id, state = %self.connection_state(), "Connector terminating");

        if self.connection_state() == ConnectionState::Streaming {
            self.inner.registry.fail_all(FailureReason::ConnectorTerminated);
        }
        // Wakes any Accept handler still waiting for a first document.
        self.inner.link.terminate(LinkEvent::Shutdown);

        let handle = self.inner.ingester.lock().take();
        if let Some(handle) = handle {
            let grace = self.inner.config.timing.ingester_join_grace();
            let joined = tokio::task::spawn_blocking(move || handle.shutdown(grace))
                .await
                .unwrap_or(false);
            if !joined {
                tracing::warn!(agent = %id, "Plant reader forcibly detached");
            }
        }

        let _ = self.inner.lifecycle.send(AgentLifecycle::Terminated);
        tracing::info!(agent = %id, "Connector terminated");
    }
}

impl Endpoint for ConnectionAgent {
    fn handle<'a>(&'a self, message: PlantMessage, replies: ReplySender) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            tracing::debug!(
                agent = %self.inner.id,
                from = %message.sender,
                performative = message.performative.as_str(),
                conversation = %message.conversation_id,
                "Message received"
            );

            if !self.is_accepting() {
                if let Some(reply) = self.closed_reply(&message) {
                    let _ = replies.send(reply);
                }
                return;
            }

            let reply = match message.performative {
                Performative::CallForProposal => Some(self.on_call_for_proposal(&message)),
                Performative::AcceptProposal => Some(self.on_accept(&message).await),
                Performative::RejectProposal => {
                    tracing::info!(agent = %self.inner.id, round = %message.conversation_id, "Proposal rejected");
                    None
                }
                Performative::Subscribe => {
                    self.on_subscribe(&message, &replies);
                    None
                }
                Performative::Cancel => Some(self.on_cancel(&message)),
                other => {
                    tracing::debug!(agent = %self.inner.id, performative = other.as_str(), "Ignoring unexpected message");
                    None
                }
            };

            if let Some(reply) = reply {
                let _ = replies.send(reply);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn connect_finishing_after_takedown_leaves_no_reader() {
        let agent = ConnectionAgent::new(ConnectorConfig {
            agent_id: "c-late".into(),
            ..Default::default()
        });
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = PlantAddress::new("127.0.0.1", listener.local_addr().unwrap().port()).unwrap();

        agent.shutdown().await;
        assert_eq!(agent.lifecycle(), AgentLifecycle::Terminated);

        // The connect resolves only now, as it would for a slow plant.
        let err = agent.open_plant(&address).await.unwrap_err();
        assert!(matches!(err, ConnectorError::ShuttingDown));
        assert!(agent.inner.ingester.lock().is_none());

        let (mut plant, _) = listener.accept().await.unwrap();
        let mut rest = Vec::new();
        let read = tokio::time::timeout(Duration::from_secs(2), plant.read_to_end(&mut rest))
            .await
            .expect("socket released")
            .unwrap();
        assert_eq!(read, 0);
    }
}
