//! Capability registry
//!
//! Maps a unit primitive (the finest-grained named capability) to the add-ons
//! that grant it. The registry is owned by the host and injected read-only.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::catalog::AddOnName;
use crate::error::{EntitlementError, EntitlementResult};

/// A capability and the add-on names that grant it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    pub name: String,
    /// Raw names as published by the registry owner
    #[serde(rename = "add_ons")]
    pub add_on_names: BTreeSet<String>,
}

impl Capability {
    /// Add-on names this engine knows about; unknown names are skipped
    pub fn known_add_ons(&self) -> BTreeSet<AddOnName> {
        self.add_on_names
            .iter()
            .filter_map(|raw| match raw.parse::<AddOnName>() {
                Ok(name) => Some(name),
                Err(_) => {
                    tracing::debug!(
                        capability = %self.name,
                        add_on = %raw,
                        "Skipping unknown add-on in capability registry"
                    );
                    None
                }
            })
            .collect()
    }
}

/// Read-only capability lookup
pub trait CapabilityRegistry: Send + Sync {
    fn find_capability(&self, name: &str) -> Option<Capability>;
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    unit_primitives: Vec<Capability>,
}

/// Registry loaded once from configuration
#[derive(Debug, Clone, Default)]
pub struct StaticCapabilityRegistry {
    capabilities: HashMap<String, Capability>,
}

impl StaticCapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a capability
    pub fn with(mut self, name: &str, add_ons: &[AddOnName]) -> Self {
        self.capabilities.insert(
            name.to_string(),
            Capability {
                name: name.to_string(),
                add_on_names: add_ons.iter().map(|a| a.as_str().to_string()).collect(),
            },
        );
        self
    }

    /// Parse `{"unit_primitives": [{"name": "...", "add_ons": ["..."]}]}`
    pub fn from_json(json: &str) -> EntitlementResult<Self> {
        let file: RegistryFile = serde_json::from_str(json)
            .map_err(|e| EntitlementError::Config(format!("Invalid capability registry: {}", e)))?;

        let capabilities = file
            .unit_primitives
            .into_iter()
            .map(|c| (c.name.clone(), c))
            .collect();

        Ok(Self { capabilities })
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }
}

impl CapabilityRegistry for StaticCapabilityRegistry {
    fn find_capability(&self, name: &str) -> Option<Capability> {
        self.capabilities.get(name).cloned()
    }
}
