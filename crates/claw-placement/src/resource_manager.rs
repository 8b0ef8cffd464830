//! Node-capability lookup seam (spec §6: `ResourceManager`).
//!
//! The placement engine does not discover node capabilities on its own;
//! it asks a collaborator for them. The actual discovery mechanism
//! (inventory service, local introspection, whatever else) lives
//! outside this crate, mirroring how `claw_netcore::NodeManager` keeps
//! node-publication transport out of the coordinator.

use std::collections::HashSet;

use claw_netcore::NodeId;

use crate::error::Result;
use crate::types::Device;

/// The capability subset of [`crate::types::NodeSnapshot`] a
/// `ResourceManager` reports. Priority and locality are supplied by the
/// caller, not the resource manager (spec §6).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeConfig {
    /// Node type, as reported by the resource manager.
    pub node_type: String,
    /// Arbitrary labels this node carries.
    pub labels: HashSet<String>,
    /// Arbitrary resource tags this node carries.
    pub resources: HashSet<String>,
    /// Local shareable devices.
    pub devices: Vec<Device>,
    /// Runner (execution engine) types this node supports.
    pub runners: Vec<String>,
}

impl NodeConfig {
    /// A node with no declared capabilities — what a "not found" lookup
    /// resolves to (spec §6: "a 'not found' failure is accepted and
    /// yields a node with empty capabilities").
    #[must_use]
    pub fn empty(node_type: impl Into<String>) -> Self {
        Self {
            node_type: node_type.into(),
            labels: HashSet::new(),
            resources: HashSet::new(),
            devices: Vec::new(),
            runners: Vec::new(),
        }
    }
}

/// Collaborator contract for discovering a node's static capabilities.
pub trait ResourceManager: Send + Sync {
    /// Looks up `node_id`'s capabilities.
    ///
    /// Returns `Ok(None)` when the resource manager has no record of
    /// `node_id` — an expected outcome, not a fault (spec §6). Callers
    /// should treat that as [`NodeConfig::empty`] for `node_type`.
    ///
    /// # Errors
    ///
    /// Returns an error only for a genuine lookup fault (transport
    /// unreachable, malformed response) distinct from "not found".
    fn get_node_config(&self, node_id: &NodeId, node_type: &str) -> Result<Option<NodeConfig>>;
}

/// [`ResourceManager`] that always reports "not found" — used in tests
/// and for running the engine without a live resource-manager
/// collaborator attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingResourceManager;

impl ResourceManager for LoggingResourceManager {
    fn get_node_config(&self, node_id: &NodeId, node_type: &str) -> Result<Option<NodeConfig>> {
        tracing::info!(%node_id, node_type, "no resource manager attached, reporting empty capabilities");
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_config_empty_carries_node_type_only() {
        let config = NodeConfig::empty("worker");
        assert_eq!(config.node_type, "worker");
        assert!(config.labels.is_empty());
        assert!(config.resources.is_empty());
        assert!(config.devices.is_empty());
        assert!(config.runners.is_empty());
    }

    #[test]
    fn logging_resource_manager_always_reports_not_found() {
        let manager = LoggingResourceManager;
        let result = manager
            .get_node_config(&NodeId::new("node-1"), "worker")
            .expect("lookup itself does not fail");
        assert_eq!(result, None);
    }
}
