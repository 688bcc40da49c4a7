//! Agent identity, service declarations, and public descriptors.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for an agent on the network.
///
/// Chosen by the agent at registration time and stable for the lifetime
/// of its connection. Ids are unique across the network process: a second
/// registration under a live id is refused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub String);

impl AgentId {
    /// Create an AgentId from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AgentId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for AgentId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Identity of a registered agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentIdentity {
    /// Unique agent id.
    pub id: AgentId,
    /// Human-readable name.
    pub name: String,
}

impl AgentIdentity {
    /// Build an identity from an id and display name.
    pub fn new(id: impl Into<AgentId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// A named request/response capability an agent exposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// Service name, unique within the owning agent.
    pub name: String,
    /// What the service does.
    #[serde(default)]
    pub description: String,
}

impl ServiceSpec {
    /// Build a service spec.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// Public view of a registered agent, as advertised by discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    /// Unique agent id.
    pub id: AgentId,
    /// Human-readable name.
    pub name: String,
    /// Services the agent has declared.
    pub services: Vec<ServiceSpec>,
    /// Topics the agent is subscribed to.
    pub subscriptions: Vec<String>,
}

impl AgentDescriptor {
    /// Whether this descriptor matches a case-insensitive substring query
    /// over its id, name, and service names.
    pub fn matches(&self, query: &str) -> bool {
        let q = query.to_lowercase();
        self.id.as_str().to_lowercase().contains(&q)
            || self.name.to_lowercase().contains(&q)
            || self
                .services
                .iter()
                .any(|s| s.name.to_lowercase().contains(&q))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_id_display_and_serde() {
        let id = AgentId::new("agent-1");
        assert_eq!(id.to_string(), "agent-1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"agent-1\"");
        let back: AgentId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_descriptor_query_matching() {
        let descriptor = AgentDescriptor {
            id: AgentId::new("worker-1"),
            name: "Translator".to_string(),
            services: vec![ServiceSpec::new("translate", "Translate text")],
            subscriptions: vec!["general".to_string()],
        };
        assert!(descriptor.matches("translat"));
        assert!(descriptor.matches("WORKER"));
        assert!(!descriptor.matches("summarize"));
    }
}
