//! A single bidding round.
//!
//! The coordinator broadcasts a call for proposal for one plant address,
//! feeds each reply to [`NegotiationRound::record`] as it arrives, then
//! closes the round. Winner selection:
//!
//! 1. the first "connected" offer by arrival order, else
//! 2. the first "ready" offer by arrival order.
//!
//! Every other offering candidate is a loser and gets a Reject.

use plantlink_protocol::{ConnectorId, Offer, Performative, PlantAddress, PlantMessage};

use crate::BiddingError;

/// One candidate's answer. `offer` is `None` for a refusal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateReply {
    pub connector: ConnectorId,
    pub offer: Option<Offer>,
}

/// Pick the winning reply per the tie-break rule.
pub fn select_winner(replies: &[CandidateReply]) -> Option<&CandidateReply> {
    replies
        .iter()
        .find(|r| r.offer == Some(Offer::Connected))
        .or_else(|| replies.iter().find(|r| r.offer == Some(Offer::Ready)))
}

#[derive(Debug, Clone)]
pub struct NegotiationRound {
    round_id: String,
    address: PlantAddress,
    candidates: Vec<ConnectorId>,
    /// Replies in arrival order.
    replies: Vec<CandidateReply>,
    winner: Option<ConnectorId>,
    closed: bool,
}

impl NegotiationRound {
    pub fn new(address: PlantAddress, candidates: Vec<ConnectorId>) -> Self {
        Self {
            round_id: uuid::Uuid::new_v4().to_string(),
            address,
            candidates,
            replies: Vec::new(),
            winner: None,
            closed: false,
        }
    }

    pub fn round_id(&self) -> &str {
        &self.round_id
    }

    pub fn address(&self) -> &PlantAddress {
        &self.address
    }

    pub fn candidates(&self) -> &[ConnectorId] {
        &self.candidates
    }

    pub fn replies(&self) -> &[CandidateReply] {
        &self.replies
    }

    /// Every candidate has answered.
    pub fn is_complete(&self) -> bool {
        self.replies.len() >= self.candidates.len()
    }

    /// Record a reply. Returns `false` when it was ignored: not a candidate,
    /// a second reply from the same candidate, or a different round.
    pub fn record(&mut self, reply: &PlantMessage) -> Result<bool, BiddingError> {
        if self.closed {
            return Err(BiddingError::RoundClosed {
                round: self.round_id.clone(),
            });
        }
        if reply.conversation_id != self.round_id
            || !self.candidates.contains(&reply.sender)
            || self.replies.iter().any(|r| r.connector == reply.sender)
        {
            tracing::debug!(
                round = %self.round_id,
                sender = %reply.sender,
                "Ignoring stray bidding reply"
            );
            return Ok(false);
        }

        let offer = match reply.performative {
            Performative::Propose => {
                let offer = reply.offer();
                if offer.is_none() {
                    tracing::warn!(
                        round = %self.round_id,
                        sender = %reply.sender,
                        content = %reply.content,
                        "Unrecognised offer treated as refusal"
                    );
                }
                offer
            }
            _ => None,
        };

        self.replies.push(CandidateReply {
            connector: reply.sender.clone(),
            offer,
        });
        Ok(true)
    }

    /// Record that `connector` never answered (timeout or transport error).
    pub fn record_silence(&mut self, connector: &ConnectorId) {
        if !self.closed && !self.replies.iter().any(|r| &r.connector == connector) {
            self.replies.push(CandidateReply {
                connector: connector.clone(),
                offer: None,
            });
        }
    }

    /// Close the round and choose the winner.
    pub fn close(&mut self) -> Result<ConnectorId, BiddingError> {
        if self.closed {
            return Err(BiddingError::RoundClosed {
                round: self.round_id.clone(),
            });
        }
        self.closed = true;

        let winner = select_winner(&self.replies)
            .map(|r| r.connector.clone())
            .ok_or_else(|| BiddingError::NegotiationRefused(self.address.to_string()))?;

        tracing::info!(
            round = %self.round_id,
            address = %self.address,
            winner = %winner,
            offers = self.replies.iter().filter(|r| r.offer.is_some()).count(),
            "Bidding round closed"
        );
        self.winner = Some(winner.clone());
        Ok(winner)
    }

    pub fn winner(&self) -> Option<&ConnectorId> {
        self.winner.as_ref()
    }

    /// Offering candidates other than the winner.
    pub fn losers(&self) -> Vec<ConnectorId> {
        self.replies
            .iter()
            .filter(|r| r.offer.is_some() && Some(&r.connector) != self.winner.as_ref())
            .map(|r| r.connector.clone())
            .collect()
    }
}
