//! Agentmesh network runtime.
//!
//! The process that accepts agent connections, negotiates protocol
//! adapters, routes messages and service calls, enforces network policy,
//! and maintains topic subscriptions.
//!
//! ## Architecture
//!
//! - **PolicyEnforcer**: authentication scheme, management credential,
//!   capacity, and discoverability
//! - **DiscoveryService**: synchronously-maintained projection of the
//!   registry that answers discovery queries
//! - **AgentRegistry**: membership and subscription bookkeeping
//! - **MessageRouter**: direct delivery, topic fanout, service calls
//! - **NetworkServer**: listening endpoint and per-connection lifecycle

pub mod discovery;
pub mod policy;
pub mod registry;
pub mod router;
pub mod server;

pub use discovery::DiscoveryService;
pub use policy::PolicyEnforcer;
pub use registry::{AgentRecord, AgentRegistry, Outbound};
pub use router::{MessageRouter, RouteOutcome};
pub use server::NetworkServer;
