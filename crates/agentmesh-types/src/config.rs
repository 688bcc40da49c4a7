//! Network configuration consumed by the runtime.
//!
//! The operator collaborator loads and merges configuration files; the
//! core only consumes the constructed value. Everything here is plain
//! serde data so TOML, YAML, and JSON front ends all work unchanged.

use crate::agent::ServiceSpec;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;

/// Source of the management credential.
///
/// The wire form is a single string: either the literal secret value, or
/// an `env:<VAR>` reference resolved against the process environment at
/// startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    /// The literal secret value.
    Literal(String),
    /// Resolved from the named environment variable at startup.
    Env(String),
}

impl CredentialSource {
    /// Parse the configuration string form.
    pub fn parse(value: &str) -> Self {
        match value.strip_prefix("env:") {
            Some(var) => Self::Env(var.to_string()),
            None => Self::Literal(value.to_string()),
        }
    }
}

impl Default for CredentialSource {
    fn default() -> Self {
        Self::Literal(String::new())
    }
}

impl Serialize for CredentialSource {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Literal(value) => serializer.serialize_str(value),
            Self::Env(var) => serializer.serialize_str(&format!("env:{var}")),
        }
    }
}

impl<'de> Deserialize<'de> for CredentialSource {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(Self::parse(&value))
    }
}

/// Authentication scheme for connections and discovery access.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthScheme {
    /// All callers admitted.
    #[default]
    None,
    /// Callers must present the management credential.
    Token,
}

/// A protocol listed in the network configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolEntry {
    /// Protocol name; must match a loaded definition.
    pub name: String,
    /// Whether the network enables this protocol.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// One adapter requested for a service agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterEntry {
    /// Protocol name the adapter binds.
    pub name: String,
    /// Whether the adapter is active for this agent.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Opaque adapter-specific configuration.
    #[serde(default)]
    pub config: HashMap<String, String>,
}

/// A service agent the operator hosts on this network.
///
/// The core validates these entries at startup; the operator collaborator
/// connects them as ordinary agents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAgentConfig {
    /// Agent name (also used as its id by the default launcher).
    pub name: String,
    /// Adapters the agent binds.
    #[serde(default)]
    pub adapters: Vec<AdapterEntry>,
    /// Services the agent declares.
    #[serde(default)]
    pub services: Vec<ServiceSpec>,
    /// Topics the agent subscribes to at registration.
    #[serde(default)]
    pub subscriptions: Vec<String>,
}

/// Public and operational profile of a network.
///
/// Immutable after start, except `capacity` and `discoverable` which the
/// operator may hot-reload through the policy enforcer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkProfile {
    /// Unique network id.
    pub network_id: String,
    /// Whether the network answers discovery queries about itself.
    #[serde(default)]
    pub discoverable: bool,
    /// Management credential, literal or `env:<VAR>`.
    #[serde(default)]
    pub management_token: CredentialSource,
    /// Display name.
    pub name: String,
    /// Display description.
    #[serde(default)]
    pub description: String,
    /// Icon URL.
    #[serde(default)]
    pub icon: Option<String>,
    /// Website URL.
    #[serde(default)]
    pub website: Option<String>,
    /// Free-form tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Category labels.
    #[serde(default)]
    pub categories: Vec<String>,
    /// Country code.
    #[serde(default)]
    pub country: Option<String>,
    /// Minimum client version the network accepts.
    #[serde(default)]
    pub required_version: Option<String>,
    /// Maximum concurrent agents.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Authentication scheme.
    #[serde(default)]
    pub authentication: AuthScheme,
    /// Bind host.
    #[serde(default = "default_host")]
    pub host: String,
    /// Bind port; 0 lets the OS pick.
    #[serde(default)]
    pub port: u16,
}

impl Default for NetworkProfile {
    fn default() -> Self {
        Self {
            network_id: "agentmesh".to_string(),
            discoverable: false,
            management_token: CredentialSource::default(),
            name: "agentmesh".to_string(),
            description: String::new(),
            icon: None,
            website: None,
            tags: Vec::new(),
            categories: Vec::new(),
            country: None,
            required_version: None,
            capacity: default_capacity(),
            authentication: AuthScheme::None,
            host: default_host(),
            port: 0,
        }
    }
}

/// Complete configuration for one network instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Network display name.
    pub name: String,
    /// Protocols the network loads.
    #[serde(default)]
    pub protocols: Vec<ProtocolEntry>,
    /// Operator-hosted service agents.
    #[serde(default)]
    pub service_agents: Vec<ServiceAgentConfig>,
    /// Network profile.
    #[serde(default)]
    pub profile: NetworkProfile,
    /// Deadline for service calls, in milliseconds.
    #[serde(default = "default_service_call_timeout_ms")]
    pub service_call_timeout_ms: u64,
}

impl NetworkConfig {
    /// Names of the protocols the configuration enables.
    pub fn enabled_protocols(&self) -> Vec<&str> {
        self.protocols
            .iter()
            .filter(|p| p.enabled)
            .map(|p| p.name.as_str())
            .collect()
    }

    /// The `host:port` string the server binds.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.profile.host, self.profile.port)
    }
}

fn default_true() -> bool {
    true
}

fn default_capacity() -> usize {
    100
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_service_call_timeout_ms() -> u64 {
    30_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_source_parsing() {
        assert_eq!(
            CredentialSource::parse("s3cret"),
            CredentialSource::Literal("s3cret".to_string())
        );
        assert_eq!(
            CredentialSource::parse("env:MESH_TOKEN"),
            CredentialSource::Env("MESH_TOKEN".to_string())
        );
    }

    #[test]
    fn test_credential_source_serde_roundtrip() {
        let source = CredentialSource::Env("MESH_TOKEN".to_string());
        let json = serde_json::to_string(&source).unwrap();
        assert_eq!(json, "\"env:MESH_TOKEN\"");
        let back: CredentialSource = serde_json::from_str(&json).unwrap();
        assert_eq!(back, source);
    }

    #[test]
    fn test_config_from_toml() {
        let raw = r#"
            name = "Research Mesh"
            service_call_timeout_ms = 5000

            [[protocols]]
            name = "simple_messaging"

            [[protocols]]
            name = "agent_discovery"
            enabled = false

            [[service_agents]]
            name = "translator"
            subscriptions = ["general"]

            [[service_agents.adapters]]
            name = "simple_messaging"

            [[service_agents.services]]
            name = "translate"
            description = "Translate text"

            [profile]
            network_id = "research-mesh"
            name = "Research Mesh"
            discoverable = true
            management_token = "env:MESH_TOKEN"
            capacity = 16
            host = "0.0.0.0"
            port = 8700
            tags = ["research"]

            [profile.authentication]
            type = "token"
        "#;
        let config: NetworkConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.enabled_protocols(), vec!["simple_messaging"]);
        assert_eq!(config.profile.capacity, 16);
        assert_eq!(config.profile.authentication, AuthScheme::Token);
        assert_eq!(
            config.profile.management_token,
            CredentialSource::Env("MESH_TOKEN".to_string())
        );
        assert_eq!(config.bind_addr(), "0.0.0.0:8700");
        assert_eq!(config.service_agents.len(), 1);
        assert_eq!(config.service_agents[0].services[0].name, "translate");
        assert_eq!(config.service_call_timeout_ms, 5000);
    }

    #[test]
    fn test_config_defaults() {
        let config: NetworkConfig = serde_json::from_str(r#"{"name":"n"}"#).unwrap();
        assert_eq!(config.profile.capacity, 100);
        assert_eq!(config.profile.authentication, AuthScheme::None);
        assert_eq!(config.service_call_timeout_ms, 30_000);
        assert!(config.protocols.is_empty());
    }
}
