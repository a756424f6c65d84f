//! plantlink state - what a connector knows about its plant link.
//!
//! - [`SharedLink`]: connection state and value snapshot behind one
//!   mutex/condvar pair
//! - [`ValueSnapshot`]: latest formatted values in document order
//! - [`SubscriptionRegistry`]: subscriber channels, fan-out and bulk failure

pub mod link;
pub mod snapshot;
pub mod subscriptions;

pub use link::{next_state, ConnectAttempt, DocumentOutcome, LinkEvent, LinkState, SharedLink};
pub use snapshot::ValueSnapshot;
pub use subscriptions::{
    CancelOutcome, Outbox, Subscription, SubscriptionRegistry, SubscriptionStatus,
};

use plantlink_protocol::ConnectionState;

/// Errors raised by connector state operations.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("subscription refused: connector is {0}")]
    SubscriptionRefused(ConnectionState),

    #[error("subscription registry closed after terminal failure")]
    RegistryClosed,

    #[error("invalid link transition: {event:?} while {from}")]
    InvalidTransition {
        from: ConnectionState,
        event: LinkEvent,
    },
}
