use std::fmt;

use serde::{Deserialize, Serialize};

/// Connection state of a single connector.
///
/// Exactly one per connection agent. Written by the stream ingester and the
/// accept handler, read by the negotiation responder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ConnectionState {
    /// No plant socket; ready to bid.
    #[default]
    Idle,
    /// Socket open, first document not parsed yet.
    Connecting,
    /// At least one full document parsed.
    Streaming,
    /// Malformed or empty document received; terminal.
    Faulted,
    /// Plant socket lost; terminal.
    Disconnected,
}

impl ConnectionState {
    /// Whether this state claims ownership of a plant address.
    pub fn owns_plant(&self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Streaming)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Faulted | ConnectionState::Disconnected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Streaming => "streaming",
            Self::Faulted => "faulted",
            Self::Disconnected => "disconnected",
        };
        write!(f, "{s}")
    }
}

/// What a connector offers in reply to a call for proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Offer {
    /// Idle and willing to open the connection.
    Ready,
    /// Already attached to the requested plant.
    Connected,
}

impl Offer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Offer::Ready => crate::OFFER_READY,
            Offer::Connected => crate::OFFER_CONNECTED,
        }
    }

    pub fn parse(content: &str) -> Result<Self, crate::ProtocolError> {
        match content.trim() {
            crate::OFFER_READY => Ok(Offer::Ready),
            crate::OFFER_CONNECTED => Ok(Offer::Connected),
            other => Err(crate::ProtocolError::UnknownOffer(other.to_string())),
        }
    }
}

/// Why a connector ended a subscription, as carried in Failure content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureReason {
    /// The plant socket was lost.
    PlantDisconnected,
    /// The connector itself is going away (fault, takedown).
    ConnectorTerminated,
}

impl FailureReason {
    /// Failure payload: the legacy tag for a disconnect, empty otherwise.
    pub fn to_content(&self) -> String {
        match self {
            FailureReason::PlantDisconnected => crate::PLANT_DISCONNECTED_TAG.to_string(),
            FailureReason::ConnectorTerminated => String::new(),
        }
    }

    pub fn from_content(content: &str) -> Self {
        if content.trim() == crate::PLANT_DISCONNECTED_TAG {
            FailureReason::PlantDisconnected
        } else {
            FailureReason::ConnectorTerminated
        }
    }
}
