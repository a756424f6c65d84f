//! Connection state and value snapshot of one connector, guarded together.
//!
//! The ingester thread mutates the link as documents arrive; request
//! handlers read it to answer bids and block on it while waiting for the
//! first snapshot. Both sides go through the one [`SharedLink`] mutex, and
//! every state change notifies the condvar.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use plantlink_protocol::{ConnectionState, PlantAddress};

use crate::snapshot::ValueSnapshot;
use crate::StateError;

/// Inputs to the connection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    ConnectRequested,
    ConnectFailed,
    FirstDocument,
    Document,
    EmptyDocument,
    MalformedDocument,
    StreamLost,
    Shutdown,
}

/// Connection state transition table. `None` means the event is not valid
/// in that state.
pub fn next_state(state: ConnectionState, event: LinkEvent) -> Option<ConnectionState> {
    use ConnectionState::*;
    use LinkEvent::*;

    match (state, event) {
        (Idle, ConnectRequested) => Some(Connecting),
        (Connecting, ConnectFailed) => Some(Idle),
        (Connecting, FirstDocument) => Some(Streaming),
        (Streaming, Document) => Some(Streaming),
        (Connecting | Streaming, EmptyDocument | MalformedDocument) => Some(Faulted),
        (Connecting | Streaming, StreamLost) => Some(Disconnected),
        (Idle | Connecting | Streaming, Shutdown) => Some(Disconnected),
        _ => None,
    }
}

/// Everything guarded by the link mutex.
#[derive(Debug, Clone, Default)]
pub struct LinkState {
    pub connection: ConnectionState,
    /// Plant this connector owns while Connecting or Streaming.
    pub address: Option<PlantAddress>,
    pub snapshot: ValueSnapshot,
}

impl LinkState {
    /// Owned address, only while the state actually claims the plant.
    pub fn owned_address(&self) -> Option<&PlantAddress> {
        if self.connection.owns_plant() {
            self.address.as_ref()
        } else {
            None
        }
    }

    fn apply(&mut self, event: LinkEvent) -> Result<ConnectionState, StateError> {
        let from = self.connection;
        let to = next_state(from, event).ok_or(StateError::InvalidTransition { from, event })?;
        if from != to {
            tracing::debug!(from = %from, to = %to, ?event, "Link state change");
        }
        self.connection = to;
        Ok(to)
    }
}

/// Result of trying to claim the plant for a new connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectAttempt {
    /// Idle -> Connecting happened; the caller must open the socket.
    Started,
    /// A connect to the same address is already pending.
    AlreadyConnecting,
    /// Already streaming from the same address.
    AlreadyStreaming,
    /// The connector owns a different plant.
    OwnsOther(PlantAddress),
    /// Terminal state; no more connections from this agent.
    Unavailable(ConnectionState),
}

/// What applying one parsed document did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentOutcome {
    /// First document; the link is now Streaming with these variables.
    First(Vec<String>),
    /// Later document; publish this snapshot.
    Update(ValueSnapshot),
    /// Zero variables; the link is now Faulted.
    Empty,
}

/// One mutex + condvar pair over [`LinkState`].
#[derive(Debug, Default)]
pub struct SharedLink {
    inner: Mutex<LinkState>,
    changed: Condvar,
}

impl SharedLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().connection
    }

    /// Read several fields under one lock acquisition.
    pub fn with<R>(&self, f: impl FnOnce(&LinkState) -> R) -> R {
        f(&self.inner.lock())
    }

    pub fn snapshot(&self) -> ValueSnapshot {
        self.inner.lock().snapshot.clone()
    }

    /// Atomically claim the plant at `address` if Idle.
    pub fn try_begin_connecting(&self, address: &PlantAddress) -> ConnectAttempt {
        let mut link = self.inner.lock();
        match link.connection {
            ConnectionState::Idle => {
                link.connection = ConnectionState::Connecting;
                link.address = Some(address.clone());
                link.snapshot = ValueSnapshot::new();
                tracing::debug!(address = %address, "Link claimed, connecting");
                ConnectAttempt::Started
            }
            state if state.owns_plant() => match &link.address {
                Some(owned) if owned == address => {
                    if state == ConnectionState::Streaming {
                        ConnectAttempt::AlreadyStreaming
                    } else {
                        ConnectAttempt::AlreadyConnecting
                    }
                }
                Some(owned) => ConnectAttempt::OwnsOther(owned.clone()),
                None => ConnectAttempt::Unavailable(state),
            },
            state => ConnectAttempt::Unavailable(state),
        }
    }

    /// Give the claim back after the socket could not be opened.
    pub fn connect_failed(&self) {
        let mut link = self.inner.lock();
        if link.apply(LinkEvent::ConnectFailed).is_ok() {
            link.address = None;
        }
        self.changed.notify_all();
    }

    /// Block until the link leaves Connecting or `timeout` elapses.
    /// Returns whether it is Streaming at the end of the wait.
    pub fn wait_until_streaming(&self, timeout: Duration) -> bool {
        let mut link = self.inner.lock();
        self.changed.wait_while_for(
            &mut link,
            |link| link.connection == ConnectionState::Connecting,
            timeout,
        );
        link.connection == ConnectionState::Streaming
    }

    /// Fold one fully parsed document into the snapshot.
    pub fn apply_document(
        &self,
        pairs: Vec<(String, String)>,
    ) -> Result<DocumentOutcome, StateError> {
        let mut link = self.inner.lock();
        let outcome = if pairs.is_empty() {
            link.apply(LinkEvent::EmptyDocument)?;
            DocumentOutcome::Empty
        } else if link.connection == ConnectionState::Connecting {
            link.apply(LinkEvent::FirstDocument)?;
            link.snapshot.establish(pairs);
            DocumentOutcome::First(link.snapshot.variable_names())
        } else {
            link.apply(LinkEvent::Document)?;
            link.snapshot.update(pairs);
            DocumentOutcome::Update(link.snapshot.clone())
        };
        self.changed.notify_all();
        Ok(outcome)
    }

    /// Apply a terminal event. Returns the new state, or `None` when the
    /// link was already terminal.
    pub fn terminate(&self, event: LinkEvent) -> Option<ConnectionState> {
        let mut link = self.inner.lock();
        let result = link.apply(event).ok();
        self.changed.notify_all();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;

    #[test]
    fn transition_table_rejects_out_of_order_events() {
        assert_eq!(next_state(Idle, LinkEvent::FirstDocument), None);
        assert_eq!(next_state(Faulted, LinkEvent::ConnectRequested), None);
        assert_eq!(next_state(Disconnected, LinkEvent::StreamLost), None);
        assert_eq!(next_state(Streaming, LinkEvent::ConnectRequested), None);
    }

    #[test]
    fn terminal_events_from_owning_states() {
        for state in [Connecting, Streaming] {
            assert_eq!(next_state(state, LinkEvent::MalformedDocument), Some(Faulted));
            assert_eq!(next_state(state, LinkEvent::EmptyDocument), Some(Faulted));
            assert_eq!(next_state(state, LinkEvent::StreamLost), Some(Disconnected));
        }
    }

    #[test]
    fn connect_failed_returns_to_idle() {
        let link = SharedLink::new();
        let addr = PlantAddress::new("10.0.0.1", 502).unwrap();
        assert_eq!(link.try_begin_connecting(&addr), ConnectAttempt::Started);
        link.connect_failed();
        assert_eq!(link.state(), Idle);
        assert!(link.with(|l| l.address.is_none()));
        assert_eq!(link.try_begin_connecting(&addr), ConnectAttempt::Started);
    }
}
