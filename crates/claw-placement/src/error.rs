//! Error types for the placement engine (spec §7).

use thiserror::Error;

/// Result type for placement operations.
pub type Result<T> = std::result::Result<T, PlacementError>;

/// A stage of the filtering pipeline (spec §4.5.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterStage {
    /// Runner-type filter.
    Runners,
    /// Instance label filter.
    Labels,
    /// Service resource-tag filter.
    Resources,
    /// Device-sharing filter.
    Devices,
}

impl std::fmt::Display for FilterStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Runners => "runners",
            Self::Labels => "labels",
            Self::Resources => "resources",
            Self::Devices => "devices",
        };
        write!(f, "{name}")
    }
}

/// Errors surfaced by the placement engine.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PlacementError {
    /// A filtering stage emptied the candidate set.
    #[error("no node satisfies {stage} requirement: {missing}")]
    NoNode {
        /// The stage that emptied the candidate set.
        stage: FilterStage,
        /// Description of what was missing (e.g. the requested runner,
        /// label, resource, or device name).
        missing: String,
    },

    /// Device allocation requested beyond its `shared_count`.
    #[error("device {device} exhausted on node {node_id}")]
    DeviceExhausted {
        /// The node whose device is exhausted.
        node_id: String,
        /// The device name.
        device: String,
    },

    /// Any persistence-layer fault. Transient.
    #[error("storage failure: {0}")]
    StorageFailure(String),
}
