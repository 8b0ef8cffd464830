//! # claw-placement
//!
//! Node capability filtering, priority-based selection, shareable
//! device allocation, and per-node `RunRequest` bookkeeping for a
//! multi-node workload orchestrator's placement path.
//!
//! Placement decisions run a fixed four-stage filtering pipeline
//! ([`filters::filter_candidates`]) before picking the highest-priority
//! survivor and incrementing its device allocation counters
//! ([`engine::PlacementEngine::select_node`]). Node capability state is
//! owned entirely by this crate; the network coordinator in
//! `claw-netcore` never touches it.
//!
//! ## Quick start
//!
//! ```rust
//! use std::collections::HashSet;
//! use std::sync::Arc;
//!
//! use claw_netcore::storage::InMemoryNetworkStorage;
//! use claw_netcore::NodeId;
//! use claw_placement::{Device, InstanceDescriptor, NodeSnapshot, PlacementEngine, ServiceDescriptor};
//!
//! let engine = PlacementEngine::new(Arc::new(InMemoryNetworkStorage::new()));
//! engine.upsert_node(NodeSnapshot {
//!     node_id: NodeId::new("node-1"),
//!     node_type: "worker".to_string(),
//!     priority: 10,
//!     labels: HashSet::new(),
//!     resources: HashSet::new(),
//!     devices: vec![Device::new("gpu", 1)],
//!     runners: Vec::new(),
//!     is_local: true,
//! });
//!
//! let service = ServiceDescriptor {
//!     devices: vec!["gpu".to_string()],
//!     ..Default::default()
//! };
//! let chosen = engine
//!     .select_node(&service, &InstanceDescriptor::default())
//!     .expect("a node with a free gpu share exists");
//! assert_eq!(chosen, NodeId::new("node-1"));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod engine;
pub mod error;
pub mod filters;
pub mod resource_manager;
pub mod types;

pub use engine::{PlacementConfig, PlacementEngine};
pub use error::{FilterStage, PlacementError, Result};
pub use resource_manager::{LoggingResourceManager, NodeConfig, ResourceManager};
pub use types::{Device, InstanceDescriptor, LayerDescriptor, NodeSnapshot, RunRequest, ServiceDescriptor};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
