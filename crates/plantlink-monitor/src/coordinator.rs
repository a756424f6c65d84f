//! Monitor-side session state machine for one plant address.
//!
//! Drives a session through discovery, a bidding round, acceptance,
//! subscription and streaming, then tears it down. User stop is only
//! observed at state boundaries: an Accept or Subscribe already in flight
//! always completes or times out first.
//!
//! ```text
//! Discovering ──► Negotiating ──► AwaitingAccept ──► Subscribing ──► Running
//!      │  ▲            │                │                 │             │
//!      ▼  │            ▼                ▼                 ▼             ▼
//! RepeatDiscovering ◄──┘(no offers)  Closing ◄────────────┴─────────────┘
//!                                       │
//!                                       ▼
//!                                   Terminated
//! ```

use std::time::Duration;

use futures_util::stream::{FuturesUnordered, StreamExt};
use tokio::sync::watch;
use tokio::time::Instant;

use plantlink_bidding::{
    transition, BiddingError, CloseReason, NegotiationRound, SessionEvent, SessionState,
};
use plantlink_network::{NetworkError, ReplyStream};
use plantlink_protocol::{
    decode_value_update, decode_variable_list, ConnectorId, FailureReason, Performative,
    PlantAddress, PlantMessage, PLANT_CONNECTION_CAPABILITY,
};

use crate::supervisor::MonitorSupervisor;

/// A negotiated, subscribed session.
struct Channel {
    owner: ConnectorId,
    replies: ReplyStream,
}

/// Drives one monitoring session from discovery to teardown.
pub struct NegotiationCoordinator {
    supervisor: MonitorSupervisor,
    address: PlantAddress,
    session_id: String,
    stop: watch::Receiver<bool>,
    state: SessionState,
    channel_open: bool,
}

impl NegotiationCoordinator {
    pub fn new(
        supervisor: MonitorSupervisor,
        address: PlantAddress,
        session_id: String,
        stop: watch::Receiver<bool>,
    ) -> Self {
        Self {
            supervisor,
            address,
            session_id,
            stop,
            state: SessionState::Discovering,
            channel_open: false,
        }
    }

    /// Run the session to completion.
    pub async fn run(mut self) {
        let reason = self.drive().await;
        self.close(reason);
    }

    async fn drive(&mut self) -> CloseReason {
        let channel = match self.establish().await {
            Ok(channel) => channel,
            Err(reason) => return reason,
        };
        self.stream(channel).await
    }

    /// Discover, bid, accept and subscribe. Loops back to discovery when a
    /// round draws no offers.
    async fn establish(&mut self) -> Result<Channel, CloseReason> {
        loop {
            let candidates = self.discover().await?;

            let mut round = self.negotiate(candidates).await;
            if self.stop_requested() {
                return Err(self.exit(SessionEvent::StopRequested, CloseReason::StoppedByUser));
            }

            let winner = match round.close() {
                Ok(winner) => winner,
                Err(e) => {
                    tracing::info!(session = %self.session_id, reason = %e, "No offers, retrying discovery");
                    self.advance(SessionEvent::NoOffers);
                    self.pause(self.supervisor.timing().discovery_retry()).await?;
                    continue;
                }
            };
            self.advance(SessionEvent::WinnerChosen);

            let variables = self.accept(&round, &winner).await?;
            self.supervisor.record_owner(&self.address, &winner);
            self.advance(SessionEvent::AcceptInformed);

            if self.stop_requested() {
                return Err(self.exit(SessionEvent::StopRequested, CloseReason::StoppedByUser));
            }

            return self.subscribe(winner, &variables).await;
        }
    }

    // -----------------------------------------------------------------------
    // Discovery
    // -----------------------------------------------------------------------

    async fn discover(&mut self) -> Result<Vec<ConnectorId>, CloseReason> {
        loop {
            let candidates = match self.supervisor.directory().find(PLANT_CONNECTION_CAPABILITY) {
                Ok(candidates) => candidates,
                Err(e) => {
                    tracing::warn!(session = %self.session_id, error = %e, "Directory lookup failed");
                    Vec::new()
                }
            };

            if self.stop_requested() {
                return Err(self.exit(SessionEvent::StopRequested, CloseReason::StoppedByUser));
            }
            if !candidates.is_empty() {
                tracing::debug!(session = %self.session_id, candidates = candidates.len(), "Candidates found");
                self.advance(SessionEvent::CandidatesFound);
                return Ok(candidates);
            }

            tracing::debug!(
                session = %self.session_id,
                error = %BiddingError::NoCandidatesAvailable(PLANT_CONNECTION_CAPABILITY.to_string()),
                "Retrying discovery"
            );
            self.advance(SessionEvent::NoCandidates);
            self.pause(self.supervisor.timing().discovery_retry()).await?;
        }
    }

    /// Sleep for `period`, returning early with a close reason if the user
    /// stops the session meanwhile.
    async fn pause(&mut self, period: Duration) -> Result<(), CloseReason> {
        let mut stop = self.stop.clone();
        let stopped = tokio::select! {
            _ = tokio::time::sleep(period) => false,
            _ = stop.wait_for(|stopped| *stopped) => true,
        };
        if stopped {
            Err(self.exit(SessionEvent::StopRequested, CloseReason::StoppedByUser))
        } else {
            Ok(())
        }
    }

    // -----------------------------------------------------------------------
    // Bidding
    // -----------------------------------------------------------------------

    /// Call for proposals and collect replies in arrival order until every
    /// candidate answered or the reply window closed.
    async fn negotiate(&mut self, candidates: Vec<ConnectorId>) -> NegotiationRound {
        let mut round = NegotiationRound::new(self.address.clone(), candidates);
        let window = self.supervisor.timing().cfp_reply();
        let deadline = Instant::now() + window;
        let monitor = self.supervisor.monitor_id().clone();

        tracing::info!(
            session = %self.session_id,
            round = %round.round_id(),
            candidates = round.candidates().len(),
            "Calling for proposals"
        );

        let mut pending: FuturesUnordered<_> = round
            .candidates()
            .iter()
            .cloned()
            .map(|to| {
                let transport = self.supervisor.transport();
                let cfp = PlantMessage::call_for_proposal(
                    monitor.clone(),
                    round.round_id(),
                    &self.address,
                    window,
                );
                async move {
                    let reply = transport.request(&to, cfp, window).await;
                    (to, reply)
                }
            })
            .collect();

        let expiry = tokio::time::sleep_until(deadline);
        tokio::pin!(expiry);
        loop {
            tokio::select! {
                next = pending.next() => match next {
                    Some((_, Ok(reply))) => {
                        if let Err(e) = round.record(&reply) {
                            tracing::debug!(session = %self.session_id, error = %e, "Reply not recorded");
                        }
                    }
                    Some((to, Err(e))) => {
                        tracing::debug!(session = %self.session_id, connector = %to, error = %e, "No bid");
                        round.record_silence(&to);
                    }
                    None => break,
                },
                _ = &mut expiry => {
                    tracing::debug!(session = %self.session_id, "Bidding window closed");
                    break;
                }
            }
        }
        round
    }

    /// Accept the winner, reject the other bidders and wait for the variable
    /// list.
    async fn accept(
        &mut self,
        round: &NegotiationRound,
        winner: &ConnectorId,
    ) -> Result<Vec<String>, CloseReason> {
        let monitor = self.supervisor.monitor_id().clone();
        let transport = self.supervisor.transport();
        let window = self.supervisor.timing().accept_reply();

        for loser in round.losers() {
            let reject = PlantMessage::new(
                Performative::RejectProposal,
                monitor.clone(),
                round.round_id(),
                self.address.to_content(),
            );
            if let Err(e) = transport.send(&loser, reject).await {
                tracing::debug!(session = %self.session_id, connector = %loser, error = %e, "Reject not delivered");
            }
        }

        tracing::info!(session = %self.session_id, winner = %winner, "Accepting proposal");
        let accept = PlantMessage::new(
            Performative::AcceptProposal,
            monitor,
            round.round_id(),
            self.address.to_content(),
        )
        .reply_within(window);

        let reason = match transport.request(winner, accept, window).await {
            Ok(reply) if reply.performative == Performative::Inform => {
                let variables = decode_variable_list(&reply.content);
                if !variables.is_empty() {
                    return Ok(variables);
                }
                CloseReason::NegotiationFailed("connector sent no variables".into())
            }
            Ok(reply) if reply.performative == Performative::Failure => {
                CloseReason::NegotiationFailed(format!("{winner} could not reach the plant"))
            }
            Ok(reply) => {
                tracing::warn!(session = %self.session_id, performative = reply.performative.as_str(), "Unexpected accept reply");
                CloseReason::OutOfSequence
            }
            Err(NetworkError::Timeout { .. }) => CloseReason::NegotiationFailed(
                BiddingError::NegotiationTimeout(self.address.to_string()).to_string(),
            ),
            Err(e) => CloseReason::NegotiationFailed(e.to_string()),
        };
        Err(self.exit(SessionEvent::AcceptFailed, reason))
    }

    // -----------------------------------------------------------------------
    // Subscription
    // -----------------------------------------------------------------------

    async fn subscribe(
        &mut self,
        owner: ConnectorId,
        variables: &[String],
    ) -> Result<Channel, CloseReason> {
        let window = self.supervisor.timing().subscribe_reply();
        let subscribe = PlantMessage::new(
            Performative::Subscribe,
            self.supervisor.monitor_id().clone(),
            self.session_id.as_str(),
            "",
        )
        .reply_within(window);

        let transport = self.supervisor.transport();
        let mut replies = match transport.open_stream(&owner, subscribe).await {
            Ok(replies) => replies,
            Err(e) => {
                tracing::warn!(session = %self.session_id, error = %e, "Subscribe not delivered");
                return Err(self.exit(SessionEvent::SubscribeFailed, CloseReason::SubscriptionRefused));
            }
        };

        let reason = match tokio::time::timeout(window, replies.recv()).await {
            Ok(Some(reply)) if reply.performative == Performative::Inform => {
                let display_id = format!("{}@{}", self.address, owner);
                self.supervisor.ensure_results_visible();
                self.supervisor
                    .display()
                    .create_channel(&self.session_id, &display_id, variables);
                self.channel_open = true;
                self.apply_update(&reply.content);
                self.advance(SessionEvent::Subscribed);
                tracing::info!(session = %self.session_id, owner = %owner, "Streaming");
                return Ok(Channel { owner, replies });
            }
            Ok(Some(reply)) if reply.performative == Performative::Refuse => {
                CloseReason::SubscriptionRefused
            }
            Ok(Some(reply)) if reply.performative == Performative::Failure => {
                failure_reason(&reply)
            }
            Ok(Some(_)) => CloseReason::OutOfSequence,
            Ok(None) => CloseReason::SubscriptionRefused,
            Err(_) => CloseReason::NegotiationFailed(format!(
                "no subscription reply within {}ms",
                window.as_millis()
            )),
        };
        Err(self.exit(SessionEvent::SubscribeFailed, reason))
    }

    // -----------------------------------------------------------------------
    // Running
    // -----------------------------------------------------------------------

    async fn stream(&mut self, mut channel: Channel) -> CloseReason {
        let mut stop = self.stop.clone();
        loop {
            let next = tokio::select! {
                _ = stop.wait_for(|stopped| *stopped) => None,
                message = channel.replies.recv() => Some(message),
            };

            match next {
                None => {
                    self.cancel(&channel.owner).await;
                    return self.exit(SessionEvent::StopRequested, CloseReason::StoppedByUser);
                }
                Some(Some(message)) => match message.performative {
                    Performative::Inform => {
                        self.apply_update(&message.content);
                        self.advance(SessionEvent::Update);
                    }
                    Performative::Failure => {
                        let reason = failure_reason(&message);
                        tracing::info!(session = %self.session_id, reason = %reason, "Connector ended the subscription");
                        return self.exit(SessionEvent::ConnectorFailed, reason);
                    }
                    other => {
                        tracing::debug!(session = %self.session_id, performative = other.as_str(), "Ignoring message while running");
                    }
                },
                Some(None) => {
                    tracing::info!(session = %self.session_id, "Subscription stream ended");
                    return self.exit(SessionEvent::ConnectorFailed, CloseReason::ConnectorTerminated);
                }
            }
        }
    }

    async fn cancel(&self, owner: &ConnectorId) {
        let window = self.supervisor.timing().cancel_reply();
        let cancel = PlantMessage::new(
            Performative::Cancel,
            self.supervisor.monitor_id().clone(),
            self.session_id.as_str(),
            "",
        )
        .reply_within(window);

        match self.supervisor.transport().request(owner, cancel, window).await {
            Ok(reply) if reply.performative == Performative::Inform => {
                tracing::debug!(session = %self.session_id, "Subscription cancelled");
            }
            Ok(reply) => {
                tracing::debug!(session = %self.session_id, performative = reply.performative.as_str(), "Cancel not acknowledged");
            }
            Err(e) => {
                tracing::debug!(session = %self.session_id, error = %e, "Cancel failed");
            }
        }
    }

    fn apply_update(&self, content: &str) {
        let display = self.supervisor.display();
        for (name, value) in decode_value_update(content) {
            display.update_value(&self.session_id, &name, &value);
        }
    }

    // -----------------------------------------------------------------------
    // Closing
    // -----------------------------------------------------------------------

    fn close(&mut self, reason: CloseReason) {
        tracing::info!(session = %self.session_id, reason = %reason, "Closing session");
        let display = self.supervisor.display();
        if reason.shows_disconnect_notice() {
            display.show_disconnect(&self.session_id);
        }
        if self.channel_open {
            display.remove_channel(&self.session_id);
            self.channel_open = false;
        }
        self.advance(SessionEvent::Closed);
        self.supervisor.finish_session(&self.address);
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn stop_requested(&self) -> bool {
        *self.stop.borrow()
    }

    fn advance(&mut self, event: SessionEvent) {
        match transition(self.state, event) {
            Ok(next) => {
                if next != self.state {
                    tracing::debug!(session = %self.session_id, from = %self.state, to = %next, "Session transition");
                    self.state = next;
                    self.supervisor.record_state(&self.address, next);
                }
            }
            Err(e) => {
                tracing::warn!(session = %self.session_id, error = %e, "Ignoring invalid session event");
            }
        }
    }

    fn exit(&mut self, event: SessionEvent, reason: CloseReason) -> CloseReason {
        self.advance(event);
        reason
    }
}

fn failure_reason(message: &PlantMessage) -> CloseReason {
    match FailureReason::from_content(&message.content) {
        FailureReason::PlantDisconnected => CloseReason::PlantDisconnected,
        FailureReason::ConnectorTerminated => CloseReason::ConnectorTerminated,
    }
}
