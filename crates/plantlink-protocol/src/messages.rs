use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::address::PlantAddress;
use crate::constants::{ENTRY_SEPARATOR, PAIR_SEPARATOR};
use crate::identity::AgentId;
use crate::types::{FailureReason, Offer};

/// Communicative act carried by a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Performative {
    CallForProposal,
    Propose,
    Refuse,
    AcceptProposal,
    RejectProposal,
    Inform,
    Failure,
    Subscribe,
    Cancel,
}

impl Performative {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CallForProposal => "cfp",
            Self::Propose => "propose",
            Self::Refuse => "refuse",
            Self::AcceptProposal => "accept-proposal",
            Self::RejectProposal => "reject-proposal",
            Self::Inform => "inform",
            Self::Failure => "failure",
            Self::Subscribe => "subscribe",
            Self::Cancel => "cancel",
        }
    }
}

/// Envelope for every monitor/connector exchange.
///
/// `content` keeps the legacy string payloads; everything else is routing
/// metadata. On the TCP transport one envelope is one JSON line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlantMessage {
    pub id: String,
    pub performative: Performative,
    pub sender: AgentId,
    /// Bidding round id, or the subscriber channel id for subscriptions.
    pub conversation_id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_by: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<String>,
}

impl PlantMessage {
    pub fn new(
        performative: Performative,
        sender: AgentId,
        conversation_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            performative,
            sender,
            conversation_id: conversation_id.into(),
            content: content.into(),
            reply_by: None,
            in_reply_to: None,
        }
    }

    /// Set the reply-by deadline to `window` from now.
    pub fn reply_within(mut self, window: Duration) -> Self {
        let window = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX);
        self.reply_by = Some(Utc::now() + window);
        self
    }

    /// Build a reply in the same conversation.
    pub fn reply(
        &self,
        performative: Performative,
        sender: &AgentId,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            performative,
            sender: sender.clone(),
            conversation_id: self.conversation_id.clone(),
            content: content.into(),
            reply_by: None,
            in_reply_to: Some(self.id.clone()),
        }
    }

    /// Time left until `reply_by`, saturating at zero. `None` if no deadline.
    pub fn time_left(&self) -> Option<Duration> {
        self.reply_by
            .map(|deadline| (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO))
    }

    // ── Constructors for the fixed exchanges ──

    pub fn call_for_proposal(
        sender: AgentId,
        round_id: impl Into<String>,
        address: &PlantAddress,
        window: Duration,
    ) -> Self {
        Self::new(
            Performative::CallForProposal,
            sender,
            round_id,
            address.to_content(),
        )
        .reply_within(window)
    }

    pub fn propose(&self, sender: &AgentId, offer: Offer) -> Self {
        self.reply(Performative::Propose, sender, offer.as_str())
    }

    pub fn refuse(&self, sender: &AgentId) -> Self {
        self.reply(Performative::Refuse, sender, "")
    }

    pub fn failure(&self, sender: &AgentId, reason: Option<FailureReason>) -> Self {
        let content = reason.map(|r| r.to_content()).unwrap_or_default();
        self.reply(Performative::Failure, sender, content)
    }

    /// Offer carried by a Propose; `None` for any other act or unknown text.
    pub fn offer(&self) -> Option<Offer> {
        if self.performative != Performative::Propose {
            return None;
        }
        Offer::parse(&self.content).ok()
    }
}

// ── Payload encodings ──

/// Semicolon-joined names, no trailing separator.
pub fn encode_variable_list<I, S>(names: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = String::new();
    for name in names {
        if !out.is_empty() {
            out.push(ENTRY_SEPARATOR);
        }
        out.push_str(name.as_ref());
    }
    out
}

pub fn decode_variable_list(content: &str) -> Vec<String> {
    content
        .trim()
        .split(ENTRY_SEPARATOR)
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// Semicolon-joined `name:value` pairs, no trailing separator.
pub fn encode_value_update<I, K, V>(pairs: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut out = String::new();
    for (name, value) in pairs {
        if !out.is_empty() {
            out.push(ENTRY_SEPARATOR);
        }
        out.push_str(name.as_ref());
        out.push(PAIR_SEPARATOR);
        out.push_str(value.as_ref());
    }
    out
}

/// Decode a value update. Entries without a separator or with an empty
/// value are skipped.
pub fn decode_value_update(content: &str) -> Vec<(String, String)> {
    content
        .trim()
        .split(ENTRY_SEPARATOR)
        .filter_map(|entry| entry.split_once(PAIR_SEPARATOR))
        .filter(|(name, value)| !name.is_empty() && !value.is_empty())
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect()
}
