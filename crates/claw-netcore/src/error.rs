//! Error taxonomy for the network coordinator (spec §7).

use std::net::IpAddr;

use thiserror::Error;

use crate::types::{NetworkId, NodeId};

/// Errors surfaced by the network coordinator and its collaborators.
#[derive(Debug, Error)]
pub enum NetCoreError {
    /// IPAM has no free subnet or host.
    #[error("address pool exhausted: {reason}")]
    Exhausted {
        /// What ran out (subnet pool, or a specific network's host pool).
        reason: String,
    },

    /// `AllowConnections`/`ExposePorts` syntax error.
    #[error("malformed policy: {reason}")]
    MalformedPolicy {
        /// Description of the grammar violation.
        reason: String,
    },

    /// A subnet or IP string failed to parse.
    #[error("invalid address: {reason}")]
    InvalidAddress {
        /// Description of the parse failure.
        reason: String,
    },

    /// An IP was claimed as allocated a second time; this indicates
    /// persisted-state corruption rather than ordinary contention.
    #[error("IP {ip} already allocated in network {network_id}")]
    AlreadyAllocated {
        /// The network whose pool detected the conflict.
        network_id: NetworkId,
        /// The IP that was already allocated.
        ip: IpAddr,
    },

    /// Any persistence-layer fault. Transient.
    #[error("storage failure: {0}")]
    StorageFailure(String),

    /// `GetNodeState` found no persisted row for this node. Distinct
    /// from `StorageFailure` so callers can treat it as an empty
    /// `RunRequest` rather than a retryable I/O fault (spec §6).
    #[error("no persisted state for node {0}")]
    NodeStateNotFound(NodeId),

    /// `NodeManager` publication failed. Transient.
    #[error("transport failure: {0}")]
    TransportFailure(String),

    /// Persisted state disagrees with an invariant. Startup-fatal.
    #[error("corrupted state: {0}")]
    CorruptedState(String),
}

/// Crate-local result alias.
pub type Result<T> = std::result::Result<T, NetCoreError>;
