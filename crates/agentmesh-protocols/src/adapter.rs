//! The protocol adapter seam.

use agentmesh_types::error::MeshResult;
use async_trait::async_trait;

/// A protocol bound to one agent connection.
///
/// Adapters are created during negotiation with that agent's opaque
/// configuration and dropped when the agent disconnects. `encode` and
/// `decode` transform payloads crossing the wire; `handle` answers
/// protocol-specific calls for protocols that declare the capability.
///
/// Law: `decode(encode(p)) == p` for every payload `p` the protocol
/// accepts.
#[async_trait]
pub trait ProtocolAdapter: Send + Sync {
    /// Name of the protocol this adapter implements.
    fn protocol(&self) -> &str;

    /// Transform an outbound payload before delivery.
    fn encode(&self, payload: &[u8]) -> MeshResult<Vec<u8>>;

    /// Transform an inbound payload. Inverse of [`encode`](Self::encode).
    fn decode(&self, payload: &[u8]) -> MeshResult<Vec<u8>>;

    /// Answer a protocol-specific call.
    ///
    /// Returns `Ok(None)` when the protocol does not handle this action;
    /// the server surfaces that as a protocol mismatch to the caller.
    async fn handle(
        &self,
        _action: &str,
        _payload: &[u8],
        _credential: Option<&str>,
    ) -> MeshResult<Option<Vec<u8>>> {
        Ok(None)
    }
}
