//! Node-publication seam (spec §4.4.1 step 5).
//!
//! After the coordinator reconciles a network's bindings it must push
//! the result out to the node so the node-side agent can program its
//! own interfaces. The actual transport (gRPC, a local socket, whatever
//! the node manager uses) lives outside this crate.

use crate::error::Result;
use crate::types::{NetworkId, ProviderNetworkBinding};

/// Collaborator contract for publishing a reconciled binding to its
/// owning node.
pub trait NodeManager: Send + Sync {
    /// Pushes `binding` to the node it belongs to.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::NetCoreError::TransportFailure`] if the
    /// node is unreachable or rejects the update.
    fn update_network(&self, binding: &ProviderNetworkBinding) -> Result<()>;

    /// Informs the node that `network_id` no longer applies to it.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::NetCoreError::TransportFailure`] if the
    /// node is unreachable or rejects the update.
    fn remove_network(&self, network_id: &NetworkId) -> Result<()>;
}

/// [`NodeManager`] that only logs — used in tests and for running the
/// coordinator without a live node-manager transport attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingNodeManager;

impl NodeManager for LoggingNodeManager {
    fn update_network(&self, binding: &ProviderNetworkBinding) -> Result<()> {
        tracing::info!(
            network_id = %binding.network_id,
            node_id = %binding.node_id,
            ip = %binding.ip,
            "publishing network binding to node"
        );
        Ok(())
    }

    fn remove_network(&self, network_id: &NetworkId) -> Result<()> {
        tracing::info!(%network_id, "publishing network removal to node");
        Ok(())
    }
}
