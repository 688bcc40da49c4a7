//! MessageRouter: point-to-point delivery, topic fanout, and service
//! calls.
//!
//! Delivery to independent recipients proceeds concurrently through their
//! outbound queues; order from any single sender to any single recipient
//! is preserved exactly as enqueued. There is no total order across
//! senders, and no automatic retries anywhere.

use crate::registry::{AgentRegistry, Outbound};
use agentmesh_protocols::ProtocolAdapter;
use agentmesh_types::agent::AgentId;
use agentmesh_types::envelope::{Destination, Envelope, MessageId};
use agentmesh_types::error::{MeshError, MeshResult};
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// How a routed envelope was dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Delivered to the recipient's inbound queue.
    Delivered,
    /// Fanned out to this many topic subscribers.
    Fanout(usize),
}

/// A service call awaiting its reply.
struct PendingCall {
    caller: AgentId,
    target: AgentId,
    protocol: String,
    service: String,
    tx: oneshot::Sender<MeshResult<Envelope>>,
}

/// Dispatches inbound envelopes to recipients, topic subscribers, or
/// service handlers.
pub struct MessageRouter {
    registry: Arc<AgentRegistry>,
    pending: DashMap<String, PendingCall>,
    call_timeout: Duration,
}

impl MessageRouter {
    /// Build a router over the registry with the given service-call
    /// deadline.
    pub fn new(registry: Arc<AgentRegistry>, call_timeout: Duration) -> Self {
        Self {
            registry,
            pending: DashMap::new(),
            call_timeout,
        }
    }

    /// The adapter the sender has bound for the envelope's protocol.
    fn sender_adapter(&self, envelope: &Envelope) -> MeshResult<Arc<dyn ProtocolAdapter>> {
        if !self.registry.contains(&envelope.sender) {
            return Err(MeshError::UnknownAgent(envelope.sender.to_string()));
        }
        self.registry
            .adapter(&envelope.sender, &envelope.protocol)
            .ok_or_else(|| {
                MeshError::ProtocolMismatch(format!(
                    "agent '{}' has no adapter for protocol '{}'",
                    envelope.sender, envelope.protocol
                ))
            })
    }

    /// Dispatch an envelope to its destination.
    ///
    /// The sender must hold an adapter for the envelope's protocol; its
    /// payload is decoded through that adapter before dispatch.
    pub fn route(&self, mut envelope: Envelope) -> MeshResult<RouteOutcome> {
        let adapter = self.sender_adapter(&envelope)?;
        envelope.payload = adapter.decode(&envelope.payload)?;

        match envelope.destination.clone() {
            Destination::Recipient(recipient) => {
                let outbox = self
                    .registry
                    .outbox(&recipient)
                    .ok_or_else(|| MeshError::UnknownAgent(recipient.to_string()))?;
                outbox
                    .send(Outbound::Deliver(envelope))
                    .map_err(|_| MeshError::UnknownAgent(recipient.to_string()))?;
                Ok(RouteOutcome::Delivered)
            }
            Destination::Topic(topic) => {
                let mut delivered = 0;
                for subscriber in self.registry.subscribers(&topic) {
                    // No self-echo: a publisher never receives its own publish.
                    if subscriber == envelope.sender {
                        continue;
                    }
                    if let Some(outbox) = self.registry.outbox(&subscriber) {
                        if outbox.send(Outbound::Deliver(envelope.clone())).is_ok() {
                            delivered += 1;
                        }
                    }
                }
                debug!(topic = %topic, delivered, sender = %envelope.sender, "Published to topic");
                Ok(RouteOutcome::Fanout(delivered))
            }
        }
    }

    /// Invoke a declared service on the envelope's recipient and await
    /// its reply.
    ///
    /// Expiry of the deadline fails only this call; other in-flight calls
    /// are unaffected.
    pub async fn call(&self, service: &str, mut envelope: Envelope) -> MeshResult<Envelope> {
        let adapter = self.sender_adapter(&envelope)?;
        envelope.payload = adapter.decode(&envelope.payload)?;

        let target = match &envelope.destination {
            Destination::Recipient(id) => id.clone(),
            Destination::Topic(_) => {
                return Err(MeshError::Internal(
                    "service calls require a recipient destination".to_string(),
                ))
            }
        };
        let record = self
            .registry
            .record(&target)
            .ok_or_else(|| MeshError::UnknownAgent(target.to_string()))?;
        if !record.services.iter().any(|s| s.name == service) {
            return Err(MeshError::UnknownService {
                agent: target.to_string(),
                service: service.to_string(),
            });
        }

        let correlation_id = envelope
            .correlation_id
            .clone()
            .unwrap_or_else(|| envelope.message_id.to_string());
        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            correlation_id.clone(),
            PendingCall {
                caller: envelope.sender.clone(),
                target: target.clone(),
                protocol: envelope.protocol.clone(),
                service: service.to_string(),
                tx,
            },
        );

        let request = Outbound::CallRequest {
            correlation_id: correlation_id.clone(),
            service: service.to_string(),
            envelope,
        };
        if record.outbox.send(request).is_err() {
            self.pending.remove(&correlation_id);
            return Err(MeshError::ConnectionClosed(format!(
                "agent '{target}' disconnected"
            )));
        }

        match tokio::time::timeout(self.call_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(MeshError::ConnectionClosed(
                "service call cancelled".to_string(),
            )),
            Err(_) => {
                self.pending.remove(&correlation_id);
                Err(MeshError::Timeout {
                    service: service.to_string(),
                    ms: self.call_timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Complete a pending call with the target's reply payload.
    ///
    /// Replies from anyone but the call's target, or for unknown/expired
    /// correlation ids, are dropped.
    pub fn complete_call(&self, correlation_id: &str, responder: &AgentId, payload: Vec<u8>) {
        let from_target = self
            .pending
            .get(correlation_id)
            .map(|entry| entry.target == *responder)
            .unwrap_or(false);
        if !from_target {
            debug!(correlation_id, responder = %responder, "Dropping stray call reply");
            return;
        }
        if let Some((_, pending)) = self.pending.remove(correlation_id) {
            let reply = Envelope {
                message_id: MessageId::new(),
                timestamp: Utc::now(),
                protocol: pending.protocol,
                sender: responder.clone(),
                destination: Destination::Recipient(pending.caller),
                payload,
                correlation_id: Some(correlation_id.to_string()),
            };
            let _ = pending.tx.send(Ok(reply));
        }
    }

    /// Fail every pending call that targets a departed agent.
    ///
    /// Calls addressed to other agents are never affected.
    pub fn cancel_calls_for(&self, agent: &AgentId) {
        let stale: Vec<String> = self
            .pending
            .iter()
            .filter(|entry| entry.value().target == *agent)
            .map(|entry| entry.key().clone())
            .collect();
        for correlation_id in stale {
            if let Some((_, pending)) = self.pending.remove(&correlation_id) {
                warn!(
                    correlation_id = %correlation_id,
                    service = %pending.service,
                    target = %agent,
                    "Cancelling pending call: target disconnected"
                );
                let _ = pending.tx.send(Err(MeshError::ConnectionClosed(format!(
                    "agent '{agent}' disconnected"
                ))));
            }
        }
    }

    /// Number of calls currently awaiting replies.
    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }
}
