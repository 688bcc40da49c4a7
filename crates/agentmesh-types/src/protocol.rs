//! Protocol definitions: the closed capability table loaded at startup.

use serde::{Deserialize, Serialize};

/// Which adapter capabilities a protocol implements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolCapabilities {
    /// Transforms outbound payloads.
    #[serde(default)]
    pub encode: bool,
    /// Transforms inbound payloads.
    #[serde(default)]
    pub decode: bool,
    /// Answers protocol-specific calls.
    #[serde(default)]
    pub handle: bool,
}

/// An immutable protocol definition.
///
/// Definitions are loaded once at startup; no protocol may be added or
/// removed while the network is running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolDefinition {
    /// Unique protocol name.
    pub name: String,
    /// Definition version.
    pub version: u32,
    /// Declared capabilities.
    pub capabilities: ProtocolCapabilities,
}

impl ProtocolDefinition {
    /// Build a definition.
    pub fn new(name: impl Into<String>, version: u32, capabilities: ProtocolCapabilities) -> Self {
        Self {
            name: name.into(),
            version,
            capabilities,
        }
    }
}
