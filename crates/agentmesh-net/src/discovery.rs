//! DiscoveryService: a synchronously-maintained projection of the
//! registry.
//!
//! The registry calls `on_registered`/`on_unregistered` from inside its
//! mutation critical section, so discovery lookups never observe stale
//! membership. Reads are served lock-free from the projection.

use crate::policy::PolicyEnforcer;
use agentmesh_protocols::directory::{NetworkAdvert, NetworkDirectory};
use agentmesh_types::agent::{AgentDescriptor, AgentId};
use agentmesh_types::config::NetworkProfile;
use agentmesh_types::error::MeshResult;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// Advertises network and agent metadata, gated by policy.
pub struct DiscoveryService {
    profile: NetworkProfile,
    policy: Arc<PolicyEnforcer>,
    agents: DashMap<AgentId, AgentDescriptor>,
}

impl DiscoveryService {
    /// Build the service over a profile and policy enforcer.
    pub fn new(profile: NetworkProfile, policy: Arc<PolicyEnforcer>) -> Self {
        Self {
            profile,
            policy,
            agents: DashMap::new(),
        }
    }

    /// Reflect a new registration. Called by the registry inside its
    /// mutation critical section.
    pub(crate) fn on_registered(&self, descriptor: AgentDescriptor) {
        debug!(agent = %descriptor.id, "Discovery projection: agent added");
        self.agents.insert(descriptor.id.clone(), descriptor);
    }

    /// Reflect an unregistration.
    pub(crate) fn on_unregistered(&self, id: &AgentId) {
        debug!(agent = %id, "Discovery projection: agent removed");
        self.agents.remove(id);
    }

    /// Reflect a subscription change.
    pub(crate) fn on_subscriptions_changed(&self, id: &AgentId, subscriptions: Vec<String>) {
        if let Some(mut entry) = self.agents.get_mut(id) {
            entry.subscriptions = subscriptions;
        }
    }

    /// Number of agents currently projected.
    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }
}

impl NetworkDirectory for DiscoveryService {
    fn network_advert(&self, credential: Option<&str>) -> MeshResult<Option<NetworkAdvert>> {
        self.policy.authorize(credential)?;
        if !self.policy.discoverable() {
            return Ok(None);
        }
        Ok(Some(NetworkAdvert {
            network_id: self.profile.network_id.clone(),
            name: self.profile.name.clone(),
            description: self.profile.description.clone(),
            tags: self.profile.tags.clone(),
            categories: self.profile.categories.clone(),
            country: self.profile.country.clone(),
            website: self.profile.website.clone(),
            icon: self.profile.icon.clone(),
            agent_count: self.agents.len(),
            capacity: self.policy.capacity(),
        }))
    }

    fn list_agents(
        &self,
        credential: Option<&str>,
        query: Option<&str>,
    ) -> MeshResult<Vec<AgentDescriptor>> {
        self.policy.authorize(credential)?;
        let mut agents: Vec<AgentDescriptor> = self
            .agents
            .iter()
            .filter(|entry| query.map_or(true, |q| entry.value().matches(q)))
            .map(|entry| entry.value().clone())
            .collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(agents)
    }

    fn agent_info(
        &self,
        credential: Option<&str>,
        id: &AgentId,
    ) -> MeshResult<Option<AgentDescriptor>> {
        self.policy.authorize(credential)?;
        Ok(self.agents.get(id).map(|entry| entry.value().clone()))
    }
}
