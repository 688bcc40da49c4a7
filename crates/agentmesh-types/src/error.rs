//! Shared error types for the agentmesh runtime.

use thiserror::Error;

/// Top-level error type for the agentmesh runtime.
#[derive(Error, Debug)]
pub enum MeshError {
    /// Invalid configuration: unknown protocol reference, duplicate
    /// definition, or unresolved credential indirection. Fatal at startup;
    /// the network never opens its listening endpoint.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An agent requested an adapter for a protocol the network has not
    /// enabled, or sent a message on a protocol it never bound.
    #[error("Protocol mismatch: {0}")]
    ProtocolMismatch(String),

    /// Registration refused because the network is at capacity.
    #[error("Capacity exceeded: network is full ({limit} agents)")]
    CapacityExceeded {
        /// The capacity in effect when the registration was refused.
        limit: usize,
    },

    /// Credential or authentication scheme check failed.
    #[error("Auth denied: {0}")]
    Auth(String),

    /// The referenced agent is not currently registered.
    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    /// The target agent has not declared the requested service.
    #[error("Unknown service '{service}' on agent '{agent}'")]
    UnknownService {
        /// The agent the call was addressed to.
        agent: String,
        /// The service name that was not found.
        service: String,
    },

    /// A service call did not complete within its deadline.
    #[error("Service call '{service}' timed out after {ms}ms")]
    Timeout {
        /// The service that was being called.
        service: String,
        /// The deadline that expired, in milliseconds.
        ms: u64,
    },

    /// The owning connection closed while the operation was in flight.
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// An agent with this id is already registered.
    #[error("Agent already registered: {0}")]
    DuplicateAgent(String),

    /// A wire frame exceeded the maximum allowed size.
    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Declared size of the offending frame.
        size: u32,
        /// Maximum size the runtime accepts.
        max: u32,
    },

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An internal invariant was violated.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Alias for Result with MeshError.
pub type MeshResult<T> = Result<T, MeshError>;

impl MeshError {
    /// Numeric code carried by wire-level error frames.
    pub fn code(&self) -> i32 {
        match self {
            MeshError::Config(_) => 1,
            MeshError::ProtocolMismatch(_) => 2,
            MeshError::CapacityExceeded { .. } => 3,
            MeshError::Auth(_) => 4,
            MeshError::UnknownAgent(_) => 5,
            MeshError::UnknownService { .. } => 6,
            MeshError::Timeout { .. } => 7,
            MeshError::ConnectionClosed(_) => 8,
            MeshError::DuplicateAgent(_) => 9,
            MeshError::FrameTooLarge { .. } => 10,
            MeshError::Io(_) => 11,
            MeshError::Serialization(_) => 12,
            MeshError::Internal(_) => 13,
        }
    }
}
