//! Subscriber channels of one connector.
//!
//! Fan-out iterates a point-in-time copy of the active subscriptions taken
//! under the lock and sends outside it. A Cancel never blocks a publish, but
//! a publish that copied its targets before the Cancel may still deliver one
//! last update to the cancelled channel.

use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use plantlink_protocol::{AgentId, ConnectionState, FailureReason, Performative, PlantMessage};

use crate::StateError;

/// Where a subscriber's messages go. Dropping it ends the subscriber's stream.
pub type Outbox = mpsc::UnboundedSender<PlantMessage>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionStatus {
    Active,
    Canceled,
}

#[derive(Debug)]
pub struct Subscription {
    pub channel_id: String,
    pub subscriber: AgentId,
    pub status: SubscriptionStatus,
    outbox: Option<Outbox>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Removed,
    NotFound,
}

#[derive(Debug, Default)]
struct Channels {
    entries: IndexMap<String, Subscription>,
    /// Set by `fail_all`; no new subscriptions afterwards.
    closed: bool,
}

pub struct SubscriptionRegistry {
    owner: AgentId,
    channels: Mutex<Channels>,
}

impl SubscriptionRegistry {
    /// `owner` is the sender id stamped on published messages.
    pub fn new(owner: AgentId) -> Self {
        Self {
            owner,
            channels: Mutex::new(Channels::default()),
        }
    }

    /// Register `channel_id`, first delivering `initial` to it.
    ///
    /// Refused unless `state` is Streaming. Subscribing an existing channel
    /// replaces its outbox.
    pub fn subscribe(
        &self,
        channel_id: &str,
        subscriber: &AgentId,
        state: ConnectionState,
        outbox: Outbox,
        initial: PlantMessage,
    ) -> Result<(), StateError> {
        if state != ConnectionState::Streaming {
            return Err(StateError::SubscriptionRefused(state));
        }
        let mut channels = self.channels.lock();
        if channels.closed {
            return Err(StateError::RegistryClosed);
        }
        // Sent under the lock so it precedes any publish that sees this entry.
        let _ = outbox.send(initial);
        channels.entries.insert(
            channel_id.to_string(),
            Subscription {
                channel_id: channel_id.to_string(),
                subscriber: subscriber.clone(),
                status: SubscriptionStatus::Active,
                outbox: Some(outbox),
            },
        );
        tracing::info!(channel = %channel_id, subscriber = %subscriber, "Subscription added");
        Ok(())
    }

    pub fn cancel(&self, channel_id: &str) -> CancelOutcome {
        match self.channels.lock().entries.shift_remove(channel_id) {
            Some(_) => {
                tracing::info!(channel = %channel_id, "Subscription canceled");
                CancelOutcome::Removed
            }
            None => CancelOutcome::NotFound,
        }
    }

    /// Deliver `content` as an Inform to every active channel. Returns the
    /// number of deliveries.
    pub fn publish(&self, content: &str) -> usize {
        let targets: Vec<(String, Outbox)> = {
            let channels = self.channels.lock();
            channels
                .entries
                .values()
                .filter(|s| s.status == SubscriptionStatus::Active)
                .filter_map(|s| s.outbox.clone().map(|o| (s.channel_id.clone(), o)))
                .collect()
        };

        let mut delivered = 0;
        let mut gone = Vec::new();
        for (channel_id, outbox) in targets {
            let message =
                PlantMessage::new(Performative::Inform, self.owner.clone(), &channel_id, content);
            if outbox.send(message).is_ok() {
                delivered += 1;
            } else {
                gone.push(channel_id);
            }
        }

        if !gone.is_empty() {
            let mut channels = self.channels.lock();
            for channel_id in gone {
                let closed = channels
                    .entries
                    .get(&channel_id)
                    .and_then(|s| s.outbox.as_ref())
                    .is_some_and(|o| o.is_closed());
                if closed {
                    channels.entries.shift_remove(&channel_id);
                    tracing::debug!(channel = %channel_id, "Pruned subscriber that went away");
                }
            }
        }
        delivered
    }

    /// Send a terminal Failure to every active channel and mark it Canceled.
    /// Closes the registry to new subscriptions. Returns the number notified.
    pub fn fail_all(&self, reason: FailureReason) -> usize {
        let targets: Vec<(String, Outbox)> = {
            let mut channels = self.channels.lock();
            channels.closed = true;
            channels
                .entries
                .values_mut()
                .filter(|s| s.status == SubscriptionStatus::Active)
                .filter_map(|s| {
                    s.status = SubscriptionStatus::Canceled;
                    s.outbox.take().map(|o| (s.channel_id.clone(), o))
                })
                .collect()
        };

        let content = reason.to_content();
        let mut notified = 0;
        for (channel_id, outbox) in targets {
            let message = PlantMessage::new(
                Performative::Failure,
                self.owner.clone(),
                &channel_id,
                content.clone(),
            );
            if outbox.send(message).is_ok() {
                notified += 1;
            }
        }
        if notified > 0 {
            tracing::info!(?reason, notified, "Failure delivered to subscribers");
        }
        notified
    }

    pub fn active_count(&self) -> usize {
        self.channels
            .lock()
            .entries
            .values()
            .filter(|s| s.status == SubscriptionStatus::Active)
            .count()
    }

    pub fn is_closed(&self) -> bool {
        self.channels.lock().closed
    }
}
