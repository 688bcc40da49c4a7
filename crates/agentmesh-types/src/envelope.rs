//! Message envelope routed between agents.
//!
//! Every message crossing the network carries exactly one destination:
//! either a specific recipient agent or a named topic.

use crate::agent::AgentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a routed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub Uuid);

impl MessageId {
    /// Create a new random MessageId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where an envelope is directed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Destination {
    /// A specific agent.
    Recipient(AgentId),
    /// A named broadcast topic.
    Topic(String),
}

/// A routed message: one protocol, one sender, exactly one destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique per send.
    pub message_id: MessageId,
    /// When the sender created the message.
    pub timestamp: DateTime<Utc>,
    /// Protocol this message belongs to.
    pub protocol: String,
    /// Sending agent.
    pub sender: AgentId,
    /// Recipient agent or topic; the wire form carries exactly one of the
    /// `recipient`/`topic` keys.
    #[serde(flatten)]
    pub destination: Destination,
    /// Opaque protocol-specific payload.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub payload: Vec<u8>,
    /// Set on responses to correlate with the originating request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl Envelope {
    /// Build a point-to-point envelope.
    pub fn direct(
        protocol: impl Into<String>,
        sender: impl Into<AgentId>,
        recipient: impl Into<AgentId>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            message_id: MessageId::new(),
            timestamp: Utc::now(),
            protocol: protocol.into(),
            sender: sender.into(),
            destination: Destination::Recipient(recipient.into()),
            payload,
            correlation_id: None,
        }
    }

    /// Build a topic publish envelope.
    pub fn publish(
        protocol: impl Into<String>,
        sender: impl Into<AgentId>,
        topic: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            message_id: MessageId::new(),
            timestamp: Utc::now(),
            protocol: protocol.into(),
            sender: sender.into(),
            destination: Destination::Topic(topic.into()),
            payload,
            correlation_id: None,
        }
    }

    /// The recipient agent, when the destination is point-to-point.
    pub fn recipient(&self) -> Option<&AgentId> {
        match &self.destination {
            Destination::Recipient(id) => Some(id),
            Destination::Topic(_) => None,
        }
    }

    /// The topic name, when the destination is a topic.
    pub fn topic(&self) -> Option<&str> {
        match &self.destination {
            Destination::Recipient(_) => None,
            Destination::Topic(topic) => Some(topic),
        }
    }
}
