//! Monitor session state machine.
//!
//! One session tracks one monitor's interest in one plant address. States
//! only change through [`transition`], an explicit state x event table, so
//! a new state or event forces every arm to be revisited.

use std::fmt;

use crate::BiddingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Discovering,
    RepeatDiscovering,
    Negotiating,
    AwaitingAccept,
    Subscribing,
    Running,
    Closing,
    Terminated,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Terminated)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Discovering => "discovering",
            Self::RepeatDiscovering => "repeat-discovering",
            Self::Negotiating => "negotiating",
            Self::AwaitingAccept => "awaiting-accept",
            Self::Subscribing => "subscribing",
            Self::Running => "running",
            Self::Closing => "closing",
            Self::Terminated => "terminated",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionEvent {
    CandidatesFound,
    NoCandidates,
    /// User stop observed at a checkpoint.
    StopRequested,
    /// Round closed without any offer.
    NoOffers,
    WinnerChosen,
    AcceptInformed,
    /// Failure, timeout or empty variable list.
    AcceptFailed,
    Subscribed,
    /// Refuse, out-of-sequence reply or timeout.
    SubscribeFailed,
    Update,
    /// Failure sent by the connector, or its stream ended.
    ConnectorFailed,
    Closed,
}

/// The session transition table.
pub fn transition(from: SessionState, event: SessionEvent) -> Result<SessionState, BiddingError> {
    use SessionEvent as E;
    use SessionState as S;

    let to = match (from, event) {
        (S::Discovering | S::RepeatDiscovering, E::CandidatesFound) => S::Negotiating,
        (S::Discovering | S::RepeatDiscovering, E::NoCandidates) => S::RepeatDiscovering,

        (S::Negotiating, E::NoOffers) => S::RepeatDiscovering,
        (S::Negotiating, E::WinnerChosen) => S::AwaitingAccept,

        (S::AwaitingAccept, E::AcceptInformed) => S::Subscribing,
        (S::AwaitingAccept, E::AcceptFailed) => S::Closing,

        (S::Subscribing, E::Subscribed) => S::Running,
        (S::Subscribing, E::SubscribeFailed) => S::Closing,

        (S::Running, E::Update) => S::Running,
        (S::Running, E::ConnectorFailed) => S::Closing,

        (
            S::Discovering
            | S::RepeatDiscovering
            | S::Negotiating
            | S::AwaitingAccept
            | S::Subscribing
            | S::Running,
            E::StopRequested,
        ) => S::Closing,

        (S::Closing, E::Closed) => S::Terminated,

        _ => return Err(BiddingError::InvalidTransition { from, event }),
    };
    Ok(to)
}

/// Why a session reached Closing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    StoppedByUser,
    PlantDisconnected,
    ConnectorTerminated,
    /// Accept answered with Failure, timed out or carried no variables.
    NegotiationFailed(String),
    SubscriptionRefused,
    OutOfSequence,
}

impl CloseReason {
    /// Whether the user sees a disconnect notice for this ending.
    pub fn shows_disconnect_notice(&self) -> bool {
        !matches!(
            self,
            CloseReason::StoppedByUser | CloseReason::ConnectorTerminated
        )
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StoppedByUser => write!(f, "stopped by user"),
            Self::PlantDisconnected => write!(f, "plant disconnected"),
            Self::ConnectorTerminated => write!(f, "connector terminated"),
            Self::NegotiationFailed(detail) => write!(f, "negotiation failed: {detail}"),
            Self::SubscriptionRefused => write!(f, "subscription refused"),
            Self::OutOfSequence => write!(f, "out-of-sequence reply"),
        }
    }
}
