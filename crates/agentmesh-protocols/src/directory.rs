//! Read-only directory view the discovery protocol serves from.
//!
//! The trait decouples protocol adapters from the runtime that owns the
//! membership state: the runtime implements it, adapters call through it.

use agentmesh_types::agent::{AgentDescriptor, AgentId};
use agentmesh_types::error::MeshResult;
use serde::{Deserialize, Serialize};

/// Network metadata advertised to discovery queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkAdvert {
    /// Unique network id.
    pub network_id: String,
    /// Display name.
    pub name: String,
    /// Display description.
    pub description: String,
    /// Free-form tags.
    pub tags: Vec<String>,
    /// Category labels.
    pub categories: Vec<String>,
    /// Country code.
    pub country: Option<String>,
    /// Website URL.
    pub website: Option<String>,
    /// Icon URL.
    pub icon: Option<String>,
    /// Currently connected agents.
    pub agent_count: usize,
    /// Maximum concurrent agents.
    pub capacity: usize,
}

/// Read-only projection of the network that discovery queries run over.
///
/// Every method takes the caller's credential: when the network's
/// authentication scheme is not `none`, queries without a valid credential
/// fail with an auth error.
pub trait NetworkDirectory: Send + Sync {
    /// The network's advert, or `None` when the network is not
    /// discoverable.
    fn network_advert(&self, credential: Option<&str>) -> MeshResult<Option<NetworkAdvert>>;

    /// List agents whose id, name, or services match the query; no query
    /// lists everyone.
    fn list_agents(
        &self,
        credential: Option<&str>,
        query: Option<&str>,
    ) -> MeshResult<Vec<AgentDescriptor>>;

    /// Look up a single agent.
    fn agent_info(
        &self,
        credential: Option<&str>,
        id: &AgentId,
    ) -> MeshResult<Option<AgentDescriptor>>;
}
