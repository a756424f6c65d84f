//! plantlink bidding - ownership negotiation without I/O.
//!
//! - [`round`]: one call-for-proposal round, reply collection and tie-break
//! - [`fsm`]: the per-address monitor session state machine

pub mod fsm;
pub mod round;

pub use fsm::{transition, CloseReason, SessionEvent, SessionState};
pub use round::{select_winner, CandidateReply, NegotiationRound};

/// Errors from bidding and the session state machine.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum BiddingError {
    #[error("no connector offers capability '{0}'")]
    NoCandidatesAvailable(String),

    #[error("negotiation for {0} timed out")]
    NegotiationTimeout(String),

    #[error("every candidate refused {0}")]
    NegotiationRefused(String),

    #[error("round {round} already closed")]
    RoundClosed { round: String },

    #[error("event {event:?} not valid in state {from:?}")]
    InvalidTransition {
        from: SessionState,
        event: SessionEvent,
    },
}
