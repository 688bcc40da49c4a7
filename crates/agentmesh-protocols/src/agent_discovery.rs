//! Agent discovery protocol: query the network directory.
//!
//! Handle-only protocol. Queries run over the [`NetworkDirectory`]
//! projection the runtime maintains; responses are JSON bodies. Access is
//! policy-gated by the directory itself.

use crate::adapter::ProtocolAdapter;
use crate::directory::NetworkDirectory;
use agentmesh_types::agent::{AgentDescriptor, AgentId};
use agentmesh_types::error::MeshResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Protocol name.
pub const AGENT_DISCOVERY: &str = "agent_discovery";

/// Action: list agents matching a query.
pub const DISCOVER_AGENTS: &str = "discover_agents";

/// Action: look up a single agent.
pub const GET_AGENT_INFO: &str = "get_agent_info";

/// Action: fetch the network's advert.
pub const NETWORK_INFO: &str = "network_info";

/// Request body for [`DISCOVER_AGENTS`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoverAgentsQuery {
    /// Case-insensitive substring matched against id, name, and service
    /// names; absent lists everyone.
    #[serde(default)]
    pub query: Option<String>,
}

/// Response body for [`DISCOVER_AGENTS`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryResults {
    /// Matching agents.
    pub agents: Vec<AgentDescriptor>,
}

/// Request body for [`GET_AGENT_INFO`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInfoQuery {
    /// The agent to look up.
    pub agent_id: AgentId,
}

/// Agent discovery adapter: one per agent connection.
pub struct AgentDiscoveryAdapter {
    directory: Arc<dyn NetworkDirectory>,
}

impl AgentDiscoveryAdapter {
    /// Build an adapter over the runtime's directory projection.
    pub fn new(directory: Arc<dyn NetworkDirectory>) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl ProtocolAdapter for AgentDiscoveryAdapter {
    fn protocol(&self) -> &str {
        AGENT_DISCOVERY
    }

    fn encode(&self, payload: &[u8]) -> MeshResult<Vec<u8>> {
        Ok(payload.to_vec())
    }

    fn decode(&self, payload: &[u8]) -> MeshResult<Vec<u8>> {
        Ok(payload.to_vec())
    }

    async fn handle(
        &self,
        action: &str,
        payload: &[u8],
        credential: Option<&str>,
    ) -> MeshResult<Option<Vec<u8>>> {
        match action {
            DISCOVER_AGENTS => {
                let query: DiscoverAgentsQuery = if payload.is_empty() {
                    DiscoverAgentsQuery::default()
                } else {
                    serde_json::from_slice(payload)?
                };
                let agents = self
                    .directory
                    .list_agents(credential, query.query.as_deref())?;
                debug!(results = agents.len(), "Discovery query answered");
                Ok(Some(serde_json::to_vec(&DiscoveryResults { agents })?))
            }
            GET_AGENT_INFO => {
                let query: AgentInfoQuery = serde_json::from_slice(payload)?;
                let info = self.directory.agent_info(credential, &query.agent_id)?;
                Ok(Some(serde_json::to_vec(&info)?))
            }
            NETWORK_INFO => {
                let advert = self.directory.network_advert(credential)?;
                Ok(Some(serde_json::to_vec(&advert)?))
            }
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::NetworkAdvert;
    use agentmesh_types::agent::ServiceSpec;
    use agentmesh_types::error::MeshError;

    /// Directory stub over a fixed agent list.
    struct FixedDirectory {
        agents: Vec<AgentDescriptor>,
        require_credential: bool,
    }

    impl FixedDirectory {
        fn authorize(&self, credential: Option<&str>) -> MeshResult<()> {
            if self.require_credential && credential != Some("s3cret") {
                return Err(MeshError::Auth("invalid credential".to_string()));
            }
            Ok(())
        }
    }

    impl NetworkDirectory for FixedDirectory {
        fn network_advert(&self, credential: Option<&str>) -> MeshResult<Option<NetworkAdvert>> {
            self.authorize(credential)?;
            Ok(Some(NetworkAdvert {
                network_id: "mesh-1".to_string(),
                name: "Mesh".to_string(),
                description: String::new(),
                tags: vec![],
                categories: vec![],
                country: None,
                website: None,
                icon: None,
                agent_count: self.agents.len(),
                capacity: 10,
            }))
        }

        fn list_agents(
            &self,
            credential: Option<&str>,
            query: Option<&str>,
        ) -> MeshResult<Vec<AgentDescriptor>> {
            self.authorize(credential)?;
            Ok(self
                .agents
                .iter()
                .filter(|a| query.map_or(true, |q| a.matches(q)))
                .cloned()
                .collect())
        }

        fn agent_info(
            &self,
            credential: Option<&str>,
            id: &AgentId,
        ) -> MeshResult<Option<AgentDescriptor>> {
            self.authorize(credential)?;
            Ok(self.agents.iter().find(|a| a.id == *id).cloned())
        }
    }

    fn directory(require_credential: bool) -> Arc<FixedDirectory> {
        Arc::new(FixedDirectory {
            agents: vec![
                AgentDescriptor {
                    id: AgentId::new("echo-agent"),
                    name: "Echo".to_string(),
                    services: vec![ServiceSpec::new("echo", "Echo back")],
                    subscriptions: vec!["general".to_string()],
                },
                AgentDescriptor {
                    id: AgentId::new("translator"),
                    name: "Translator".to_string(),
                    services: vec![],
                    subscriptions: vec![],
                },
            ],
            require_credential,
        })
    }

    #[tokio::test]
    async fn test_discover_agents_with_query() {
        let adapter = AgentDiscoveryAdapter::new(directory(false));
        let body = serde_json::to_vec(&DiscoverAgentsQuery {
            query: Some("echo".to_string()),
        })
        .unwrap();
        let result = adapter
            .handle(DISCOVER_AGENTS, &body, None)
            .await
            .unwrap()
            .unwrap();
        let results: DiscoveryResults = serde_json::from_slice(&result).unwrap();
        assert_eq!(results.agents.len(), 1);
        assert_eq!(results.agents[0].id.as_str(), "echo-agent");
    }

    #[tokio::test]
    async fn test_discover_agents_without_query_lists_all() {
        let adapter = AgentDiscoveryAdapter::new(directory(false));
        let result = adapter
            .handle(DISCOVER_AGENTS, b"", None)
            .await
            .unwrap()
            .unwrap();
        let results: DiscoveryResults = serde_json::from_slice(&result).unwrap();
        assert_eq!(results.agents.len(), 2);
    }

    #[tokio::test]
    async fn test_get_agent_info() {
        let adapter = AgentDiscoveryAdapter::new(directory(false));
        let body = serde_json::to_vec(&AgentInfoQuery {
            agent_id: AgentId::new("translator"),
        })
        .unwrap();
        let result = adapter
            .handle(GET_AGENT_INFO, &body, None)
            .await
            .unwrap()
            .unwrap();
        let info: Option<AgentDescriptor> = serde_json::from_slice(&result).unwrap();
        assert_eq!(info.unwrap().name, "Translator");
    }

    #[tokio::test]
    async fn test_credential_gate() {
        let adapter = AgentDiscoveryAdapter::new(directory(true));
        let denied = adapter.handle(DISCOVER_AGENTS, b"", None).await;
        assert!(matches!(denied, Err(MeshError::Auth(_))));

        let allowed = adapter
            .handle(DISCOVER_AGENTS, b"", Some("s3cret"))
            .await
            .unwrap();
        assert!(allowed.is_some());
    }

    #[test]
    fn test_payload_passthrough_round_trip() {
        let adapter = AgentDiscoveryAdapter::new(directory(false));
        let payload = br#"{"query":"echo"}"#.to_vec();
        let encoded = adapter.encode(&payload).unwrap();
        assert_eq!(adapter.decode(&encoded).unwrap(), payload);
    }

    #[tokio::test]
    async fn test_unknown_action_unhandled() {
        let adapter = AgentDiscoveryAdapter::new(directory(false));
        let result = adapter.handle("dance", b"", None).await.unwrap();
        assert!(result.is_none());
    }
}
