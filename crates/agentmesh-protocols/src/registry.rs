//! The closed, name-keyed protocol table.
//!
//! Built once at startup from the loaded definitions and the set of names
//! the network configuration enables. Unknown references fail at load
//! time; adapter construction is a validated tagged-variant lookup
//! checked during negotiation, never at first use. The table is passed
//! into the server as an explicit dependency, so multiple network
//! instances can coexist in one process.

use crate::adapter::ProtocolAdapter;
use crate::agent_discovery::{AgentDiscoveryAdapter, AGENT_DISCOVERY};
use crate::directory::NetworkDirectory;
use crate::simple_messaging::{SimpleMessagingAdapter, SIMPLE_MESSAGING};
use agentmesh_types::error::{MeshError, MeshResult};
use agentmesh_types::protocol::{ProtocolCapabilities, ProtocolDefinition};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::info;

/// Dependencies adapters may need at construction time.
#[derive(Clone)]
pub struct AdapterContext {
    /// Directory projection the discovery protocol serves from.
    pub directory: Arc<dyn NetworkDirectory>,
}

/// Name-keyed table of protocol definitions, closed after startup.
pub struct ProtocolRegistry {
    definitions: HashMap<String, ProtocolDefinition>,
    enabled: BTreeSet<String>,
}

impl ProtocolRegistry {
    /// Built-in protocol definitions shipped with the runtime.
    pub fn builtin_definitions() -> Vec<ProtocolDefinition> {
        vec![
            ProtocolDefinition::new(
                SIMPLE_MESSAGING,
                1,
                ProtocolCapabilities {
                    encode: true,
                    decode: true,
                    handle: false,
                },
            ),
            ProtocolDefinition::new(
                AGENT_DISCOVERY,
                1,
                ProtocolCapabilities {
                    encode: false,
                    decode: false,
                    handle: true,
                },
            ),
        ]
    }

    /// Build the table from definitions and the names the configuration
    /// enables.
    ///
    /// Fails fast with a configuration error when two definitions share a
    /// name or an enabled name has no definition.
    pub fn load<S: AsRef<str>>(
        definitions: Vec<ProtocolDefinition>,
        enabled_names: &[S],
    ) -> MeshResult<Self> {
        let mut table = HashMap::new();
        for definition in definitions {
            if table.contains_key(&definition.name) {
                return Err(MeshError::Config(format!(
                    "duplicate protocol definition '{}'",
                    definition.name
                )));
            }
            table.insert(definition.name.clone(), definition);
        }

        let mut enabled = BTreeSet::new();
        for name in enabled_names {
            let name = name.as_ref();
            if !table.contains_key(name) {
                return Err(MeshError::Config(format!(
                    "network configuration enables unknown protocol '{name}'"
                )));
            }
            enabled.insert(name.to_string());
        }

        info!(
            protocols = ?enabled.iter().collect::<Vec<_>>(),
            "Protocol table loaded"
        );
        Ok(Self {
            definitions: table,
            enabled,
        })
    }

    /// Whether the network enables this protocol.
    pub fn is_enabled(&self, name: &str) -> bool {
        self.enabled.contains(name)
    }

    /// Look up a loaded definition.
    pub fn definition(&self, name: &str) -> Option<&ProtocolDefinition> {
        self.definitions.get(name)
    }

    /// Construct an adapter instance for one agent connection.
    ///
    /// This is the single dispatch point for protocol names: disabled or
    /// unimplemented names fail here, during negotiation.
    pub fn instantiate(
        &self,
        name: &str,
        config: &HashMap<String, String>,
        ctx: &AdapterContext,
    ) -> MeshResult<Arc<dyn ProtocolAdapter>> {
        if !self.is_enabled(name) {
            return Err(MeshError::ProtocolMismatch(format!(
                "protocol '{name}' is not enabled on this network"
            )));
        }
        match name {
            SIMPLE_MESSAGING => Ok(Arc::new(SimpleMessagingAdapter::new(config)?)),
            AGENT_DISCOVERY => Ok(Arc::new(AgentDiscoveryAdapter::new(Arc::clone(
                &ctx.directory,
            )))),
            other => Err(MeshError::ProtocolMismatch(format!(
                "no adapter implementation for protocol '{other}'"
            ))),
        }
    }
}
