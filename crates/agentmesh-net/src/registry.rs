//! Agent membership and subscription bookkeeping.
//!
//! All mutating operations serialize on a single write lock, so
//! concurrent callers never observe a torn registration and the capacity
//! check is atomic with the insertion it gates.

use crate::discovery::DiscoveryService;
use crate::policy::PolicyEnforcer;
use agentmesh_protocols::ProtocolAdapter;
use agentmesh_types::agent::{AgentDescriptor, AgentId, AgentIdentity, ServiceSpec};
use agentmesh_types::envelope::Envelope;
use agentmesh_types::error::{MeshError, MeshResult};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Items queued for delivery to one agent's connection.
#[derive(Debug)]
pub enum Outbound {
    /// An envelope for this agent (direct send or topic fanout).
    Deliver(Envelope),
    /// A service invocation this agent must answer.
    CallRequest {
        /// Correlation id the reply must echo.
        correlation_id: String,
        /// Service being invoked.
        service: String,
        /// The caller's request envelope.
        envelope: Envelope,
    },
    /// A response to one of this agent's own requests.
    Reply {
        /// Frame id of the request being answered.
        frame_id: String,
        /// The response frame body.
        response: agentmesh_wire::Response,
    },
    /// The network is closing this connection.
    Goodbye,
}

/// A registered agent's record.
#[derive(Clone)]
pub struct AgentRecord {
    /// The agent's identity.
    pub identity: AgentIdentity,
    /// Bound protocol adapters, keyed by protocol name.
    pub adapters: HashMap<String, Arc<dyn ProtocolAdapter>>,
    /// Services the agent declared, in declaration order.
    pub services: Vec<ServiceSpec>,
    /// Topics the agent is subscribed to.
    pub subscriptions: HashSet<String>,
    /// Queue feeding the agent's connection writer.
    pub outbox: mpsc::UnboundedSender<Outbound>,
    /// When the agent registered.
    pub connected_at: DateTime<Utc>,
}

impl AgentRecord {
    /// Build a record for registration.
    pub fn new(
        identity: AgentIdentity,
        adapters: HashMap<String, Arc<dyn ProtocolAdapter>>,
        services: Vec<ServiceSpec>,
        subscriptions: Vec<String>,
        outbox: mpsc::UnboundedSender<Outbound>,
    ) -> Self {
        Self {
            identity,
            adapters,
            services,
            subscriptions: subscriptions.into_iter().collect(),
            outbox,
            connected_at: Utc::now(),
        }
    }

    /// The public descriptor advertised by discovery.
    pub fn descriptor(&self) -> AgentDescriptor {
        let mut subscriptions: Vec<String> = self.subscriptions.iter().cloned().collect();
        subscriptions.sort();
        AgentDescriptor {
            id: self.identity.id.clone(),
            name: self.identity.name.clone(),
            services: self.services.clone(),
            subscriptions,
        }
    }
}

/// Membership and subscription indices, guarded together.
#[derive(Default)]
struct Indices {
    agents: HashMap<AgentId, AgentRecord>,
    topics: HashMap<String, HashSet<AgentId>>,
}

/// Bookkeeping of connected agents.
pub struct AgentRegistry {
    inner: RwLock<Indices>,
    policy: Arc<PolicyEnforcer>,
    discovery: Arc<DiscoveryService>,
}

impl AgentRegistry {
    /// Create an empty registry.
    pub fn new(policy: Arc<PolicyEnforcer>, discovery: Arc<DiscoveryService>) -> Self {
        Self {
            inner: RwLock::new(Indices::default()),
            policy,
            discovery,
        }
    }

    /// Register an agent.
    ///
    /// All-or-nothing: capacity and duplicate checks happen under the same
    /// lock as the insertion, and the discovery projection is updated
    /// before the lock is released. Partial registration is never
    /// observable.
    pub fn register(&self, record: AgentRecord) -> MeshResult<()> {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let inner = &mut *guard;

        let limit = self.policy.capacity();
        if inner.agents.len() >= limit {
            return Err(MeshError::CapacityExceeded { limit });
        }
        let id = record.identity.id.clone();
        if inner.agents.contains_key(&id) {
            return Err(MeshError::DuplicateAgent(id.to_string()));
        }

        for topic in &record.subscriptions {
            inner
                .topics
                .entry(topic.clone())
                .or_default()
                .insert(id.clone());
        }
        let descriptor = record.descriptor();
        inner.agents.insert(id.clone(), record);
        self.discovery.on_registered(descriptor);

        info!(agent = %id, connected = inner.agents.len(), "Registered agent");
        Ok(())
    }

    /// Remove an agent, all its subscriptions, and its discovery entry.
    ///
    /// Idempotent: unregistering an absent id is a no-op.
    pub fn unregister(&self, id: &AgentId) -> Option<AgentRecord> {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let inner = &mut *guard;

        let record = inner.agents.remove(id)?;
        for topic in &record.subscriptions {
            let now_empty = inner
                .topics
                .get_mut(topic)
                .map(|subscribers| {
                    subscribers.remove(id);
                    subscribers.is_empty()
                })
                .unwrap_or(false);
            if now_empty {
                inner.topics.remove(topic);
            }
        }
        self.discovery.on_unregistered(id);

        info!(agent = %id, connected = inner.agents.len(), "Unregistered agent");
        Some(record)
    }

    /// Subscribe an agent to a topic. Idempotent per pair.
    pub fn subscribe(&self, id: &AgentId, topic: &str) -> MeshResult<()> {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let inner = &mut *guard;

        let record = inner
            .agents
            .get_mut(id)
            .ok_or_else(|| MeshError::UnknownAgent(id.to_string()))?;
        record.subscriptions.insert(topic.to_string());
        let mut subscriptions: Vec<String> = record.subscriptions.iter().cloned().collect();
        subscriptions.sort();

        inner
            .topics
            .entry(topic.to_string())
            .or_default()
            .insert(id.clone());
        self.discovery.on_subscriptions_changed(id, subscriptions);

        debug!(agent = %id, topic, "Subscribed");
        Ok(())
    }

    /// Unsubscribe an agent from a topic. Removing an absent subscription
    /// is a no-op for a registered agent.
    pub fn unsubscribe(&self, id: &AgentId, topic: &str) -> MeshResult<()> {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let inner = &mut *guard;

        let record = inner
            .agents
            .get_mut(id)
            .ok_or_else(|| MeshError::UnknownAgent(id.to_string()))?;
        record.subscriptions.remove(topic);
        let mut subscriptions: Vec<String> = record.subscriptions.iter().cloned().collect();
        subscriptions.sort();

        let now_empty = inner
            .topics
            .get_mut(topic)
            .map(|subscribers| {
                subscribers.remove(id);
                subscribers.is_empty()
            })
            .unwrap_or(false);
        if now_empty {
            inner.topics.remove(topic);
        }
        self.discovery.on_subscriptions_changed(id, subscriptions);

        debug!(agent = %id, topic, "Unsubscribed");
        Ok(())
    }

    /// Whether an agent is currently registered.
    pub fn contains(&self, id: &AgentId) -> bool {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.agents.contains_key(id)
    }

    /// Number of connected agents.
    pub fn len(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.agents.len()
    }

    /// Whether no agents are connected.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of one agent's record.
    pub fn record(&self, id: &AgentId) -> Option<AgentRecord> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.agents.get(id).cloned()
    }

    /// The adapter an agent has bound for a protocol.
    pub fn adapter(&self, id: &AgentId, protocol: &str) -> Option<Arc<dyn ProtocolAdapter>> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .agents
            .get(id)
            .and_then(|record| record.adapters.get(protocol).cloned())
    }

    /// The outbound queue for an agent's connection.
    pub fn outbox(&self, id: &AgentId) -> Option<mpsc::UnboundedSender<Outbound>> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.agents.get(id).map(|record| record.outbox.clone())
    }

    /// Current subscribers of a topic.
    pub fn subscribers(&self, topic: &str) -> Vec<AgentId> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .topics
            .get(topic)
            .map(|subscribers| subscribers.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentmesh_types::config::NetworkProfile;

    fn registry_with_capacity(capacity: usize) -> AgentRegistry {
        let profile = NetworkProfile {
            capacity,
            ..NetworkProfile::default()
        };
        let policy = Arc::new(PolicyEnforcer::from_profile(&profile).unwrap());
        let discovery = Arc::new(DiscoveryService::new(profile, Arc::clone(&policy)));
        AgentRegistry::new(policy, discovery)
    }

    fn record(id: &str, subscriptions: &[&str]) -> AgentRecord {
        let (tx, _rx) = mpsc::unbounded_channel();
        AgentRecord::new(
            AgentIdentity::new(id, id),
            HashMap::new(),
            Vec::new(),
            subscriptions.iter().map(|s| s.to_string()).collect(),
            tx,
        )
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = registry_with_capacity(4);
        registry.register(record("a1", &["general"])).unwrap();

        assert!(registry.contains(&AgentId::new("a1")));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.subscribers("general"), vec![AgentId::new("a1")]);
    }

    #[test]
    fn test_capacity_is_enforced_atomically() {
        let registry = registry_with_capacity(2);
        registry.register(record("a1", &[])).unwrap();
        registry.register(record("a2", &[])).unwrap();

        let result = registry.register(record("a3", &[]));
        assert!(matches!(
            result,
            Err(MeshError::CapacityExceeded { limit: 2 })
        ));
        // The registered agents are unaffected.
        assert_eq!(registry.len(), 2);
        assert!(registry.contains(&AgentId::new("a1")));
        assert!(registry.contains(&AgentId::new("a2")));
    }

    #[test]
    fn test_duplicate_id_is_rejected() {
        let registry = registry_with_capacity(4);
        registry.register(record("a1", &[])).unwrap();
        let result = registry.register(record("a1", &[]));
        assert!(matches!(result, Err(MeshError::DuplicateAgent(_))));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unregister_is_idempotent_and_cleans_subscriptions() {
        let registry = registry_with_capacity(4);
        registry.register(record("a1", &["general", "alerts"])).unwrap();
        registry.register(record("a2", &["general"])).unwrap();

        assert!(registry.unregister(&AgentId::new("a1")).is_some());
        assert!(registry.unregister(&AgentId::new("a1")).is_none());

        assert_eq!(registry.subscribers("general"), vec![AgentId::new("a2")]);
        assert!(registry.subscribers("alerts").is_empty());
    }

    #[test]
    fn test_subscribe_unknown_agent_fails() {
        let registry = registry_with_capacity(4);
        let result = registry.subscribe(&AgentId::new("ghost"), "general");
        assert!(matches!(result, Err(MeshError::UnknownAgent(_))));
        let result = registry.unsubscribe(&AgentId::new("ghost"), "general");
        assert!(matches!(result, Err(MeshError::UnknownAgent(_))));
    }

    #[test]
    fn test_subscribe_and_unsubscribe() {
        let registry = registry_with_capacity(4);
        registry.register(record("a1", &[])).unwrap();

        registry.subscribe(&AgentId::new("a1"), "general").unwrap();
        assert_eq!(registry.subscribers("general"), vec![AgentId::new("a1")]);

        registry.unsubscribe(&AgentId::new("a1"), "general").unwrap();
        assert!(registry.subscribers("general").is_empty());
    }

    #[test]
    fn test_descriptor_reflects_registration() {
        let registry = registry_with_capacity(4);
        let (tx, _rx) = mpsc::unbounded_channel();
        let record = AgentRecord::new(
            AgentIdentity::new("a1", "Agent One"),
            HashMap::new(),
            vec![ServiceSpec::new("echo", "Echo back")],
            vec!["general".to_string()],
            tx,
        );
        registry.register(record).unwrap();

        let snapshot = registry.record(&AgentId::new("a1")).unwrap();
        let descriptor = snapshot.descriptor();
        assert_eq!(descriptor.name, "Agent One");
        assert_eq!(descriptor.services[0].name, "echo");
        assert_eq!(descriptor.subscriptions, vec!["general".to_string()]);
    }
}
