//! The placement engine: node bookkeeping, filtering, priority
//! selection, device allocation, and `RunRequest` accumulation
//! (spec §4.5).

use std::collections::HashMap;
use std::sync::Arc;

use claw_netcore::storage::NetworkStorage;
use claw_netcore::{NetCoreError, NodeId};
use parking_lot::RwLock;

use crate::error::{PlacementError, Result};
use crate::filters;
use crate::resource_manager::{LoggingResourceManager, NodeConfig, ResourceManager};
use crate::types::{InstanceDescriptor, LayerDescriptor, NodeSnapshot, RunRequest, ServiceDescriptor};

/// Configuration recognised by the placement engine.
#[derive(Debug, Clone)]
pub struct PlacementConfig {
    /// Runner types a node matches when it declares none of its own
    /// (spec §4.5.1).
    pub default_runners: Vec<String>,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            default_runners: filters::DEFAULT_RUNNERS.iter().map(|&r| r.to_string()).collect(),
        }
    }
}

/// Coordinates node capability bookkeeping and placement decisions.
///
/// Node state (capabilities, device allocation counters) is mutated
/// only by the placement path; the network coordinator's reconcile
/// paths never touch it (spec §5). `RunRequest` persistence reuses
/// `claw_netcore`'s `NetworkStorage::get_node_state`/`set_node_state`
/// pair rather than inventing a parallel storage contract, since both
/// subsystems share the same collaborator — `storage` is typically the
/// very `Arc` handed to the network coordinator's own storage wiring.
pub struct PlacementEngine {
    nodes: RwLock<HashMap<NodeId, NodeSnapshot>>,
    run_requests: RwLock<HashMap<NodeId, RunRequest>>,
    storage: Arc<dyn NetworkStorage>,
    config: PlacementConfig,
    resource_manager: Box<dyn ResourceManager>,
}

impl PlacementEngine {
    /// Creates an engine with no registered nodes, backed by `storage`
    /// for `RunRequest` persistence, [`PlacementConfig::default`], and
    /// no live resource manager attached ([`LoggingResourceManager`]).
    #[must_use]
    pub fn new(storage: Arc<dyn NetworkStorage>) -> Self {
        Self::with_collaborators(storage, PlacementConfig::default(), Box::new(LoggingResourceManager))
    }

    /// Creates an engine with an explicit [`PlacementConfig`], e.g. to
    /// override `default_runners` (spec §4.5.1). No live resource
    /// manager is attached.
    #[must_use]
    pub fn with_config(storage: Arc<dyn NetworkStorage>, config: PlacementConfig) -> Self {
        Self::with_collaborators(storage, config, Box::new(LoggingResourceManager))
    }

    /// Creates an engine with explicit config and resource-manager
    /// collaborators.
    #[must_use]
    pub fn with_collaborators(
        storage: Arc<dyn NetworkStorage>,
        config: PlacementConfig,
        resource_manager: Box<dyn ResourceManager>,
    ) -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            run_requests: RwLock::new(HashMap::new()),
            storage,
            config,
            resource_manager,
        }
    }

    /// Registers or replaces a node's capability snapshot.
    pub fn upsert_node(&self, node: NodeSnapshot) {
        let mut nodes = self.nodes.write();
        nodes.insert(node.node_id.clone(), node);
    }

    /// Removes a node entirely. Idempotent.
    pub fn remove_node(&self, node_id: &NodeId) {
        self.nodes.write().remove(node_id);
    }

    /// Looks up `node_id`'s capabilities through the attached
    /// [`ResourceManager`] and registers (or replaces) its snapshot,
    /// carrying over `priority` and `is_local` from the caller since the
    /// resource manager does not know about either (spec §6).
    ///
    /// A "not found" lookup is not an error: it registers the node with
    /// [`NodeConfig::empty`] capabilities under `node_type`, per spec.
    ///
    /// # Errors
    ///
    /// Returns an error only for a genuine resource-manager fault, not
    /// for "not found".
    pub fn refresh_node(
        &self,
        node_id: &NodeId,
        node_type: &str,
        priority: u32,
        is_local: bool,
    ) -> Result<()> {
        let config = self
            .resource_manager
            .get_node_config(node_id, node_type)?
            .unwrap_or_else(|| NodeConfig::empty(node_type));

        self.upsert_node(NodeSnapshot {
            node_id: node_id.clone(),
            node_type: config.node_type,
            priority,
            labels: config.labels,
            resources: config.resources,
            devices: config.devices,
            runners: config.runners,
            is_local,
        });
        Ok(())
    }

    /// Returns a clone of a node's current snapshot, if registered.
    #[must_use]
    pub fn node_snapshot(&self, node_id: &NodeId) -> Option<NodeSnapshot> {
        self.nodes.read().get(node_id).cloned()
    }

    /// Returns every registered node.
    #[must_use]
    pub fn nodes(&self) -> Vec<NodeSnapshot> {
        self.nodes.read().values().cloned().collect()
    }

    /// Runs the filtering pipeline and priority selection, then
    /// increments the chosen node's device allocation counters.
    ///
    /// Filtering and allocation happen under the same write lock so a
    /// concurrent placement or node update cannot interleave between
    /// selection and the device-count increment (spec §4.5.3).
    ///
    /// # Errors
    ///
    /// Returns [`PlacementError::NoNode`] if a filtering stage empties
    /// the candidate set, or [`PlacementError::DeviceExhausted`] if the
    /// selected node's device share was consumed by a racing caller
    /// between filtering and allocation (defensive; filtering already
    /// checked free shares).
    pub fn select_node(
        &self,
        service: &ServiceDescriptor,
        instance: &InstanceDescriptor,
    ) -> Result<NodeId> {
        let mut nodes = self.nodes.write();
        let candidates: Vec<&NodeSnapshot> = nodes.values().collect();
        let survivors =
            filters::filter_candidates(&candidates, service, instance, &self.config.default_runners)?;

        let chosen = select_by_priority(&survivors);
        let chosen_id = chosen.node_id.clone();
        drop(survivors);
        drop(candidates);

        let node = nodes
            .get_mut(&chosen_id)
            .expect("selected node must still be registered under the held write lock");
        for device_name in &service.devices {
            let device = node.device_mut(device_name).ok_or_else(|| PlacementError::NoNode {
                stage: crate::error::FilterStage::Devices,
                missing: device_name.clone(),
            })?;
            if device.allocated_count >= device.shared_count {
                return Err(PlacementError::DeviceExhausted {
                    node_id: chosen_id.to_string(),
                    device: device_name.clone(),
                });
            }
            device.allocated_count += 1;
        }

        Ok(chosen_id)
    }

    /// Releases one share of `device` on `node_id`, previously
    /// allocated by [`PlacementEngine::select_node`]. Idempotent at
    /// zero: releasing below zero is clamped, not an error.
    pub fn release_device(&self, node_id: &NodeId, device: &str) {
        let mut nodes = self.nodes.write();
        if let Some(node) = nodes.get_mut(node_id) {
            if let Some(d) = node.device_mut(device) {
                d.allocated_count = d.allocated_count.saturating_sub(1);
            }
        }
    }

    /// Appends `instance`, `service`, and `layers` to `node_id`'s
    /// pending `RunRequest`, deduplicating services and layers by
    /// structural equality. URLs are rewritten to their remote form
    /// before comparison and storage when `node_id` is not the local
    /// node (spec §4.5.4).
    pub fn add_run_request(
        &self,
        node_id: &NodeId,
        instance: InstanceDescriptor,
        service: ServiceDescriptor,
        layers: Vec<LayerDescriptor>,
        is_local: bool,
    ) {
        let mut requests = self.run_requests.write();
        let request = requests.entry(node_id.clone()).or_default();

        let service = if is_local {
            service
        } else {
            ServiceDescriptor {
                url: service.remote_url.clone(),
                ..service
            }
        };
        if !request.services.contains(&service) {
            request.services.push(service);
        }

        for layer in layers {
            let layer = if is_local {
                layer
            } else {
                LayerDescriptor {
                    url: layer.remote_url.clone(),
                    ..layer
                }
            };
            if !request.layers.contains(&layer) {
                request.layers.push(layer);
            }
        }

        request.instances.push(instance);
    }

    /// Returns a clone of `node_id`'s accumulated `RunRequest`.
    #[must_use]
    pub fn run_request(&self, node_id: &NodeId) -> RunRequest {
        self.run_requests.read().get(node_id).cloned().unwrap_or_default()
    }

    /// Serialises `node_id`'s accumulated `RunRequest` to storage.
    ///
    /// # Errors
    ///
    /// Returns [`PlacementError::StorageFailure`] on any I/O or
    /// serialization fault.
    pub fn persist(&self, node_id: &NodeId) -> Result<()> {
        let request = self.run_request(node_id);
        let bytes = serde_json::to_vec(&request)
            .map_err(|e| PlacementError::StorageFailure(e.to_string()))?;
        self.storage
            .set_node_state(node_id, &bytes)
            .map_err(|e| PlacementError::StorageFailure(e.to_string()))
    }

    /// Restores `node_id`'s accumulated `RunRequest` from storage.
    ///
    /// A "not exist" storage failure is treated as an empty
    /// `RunRequest`, not an error. Any other storage failure is logged
    /// and the accumulator is left empty (spec §4.5.4).
    pub fn load(&self, node_id: &NodeId) {
        let request = match self.storage.get_node_state(node_id) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                tracing::warn!(node_id = %node_id, error = %e, "corrupt run-request state, discarding");
                RunRequest::default()
            }),
            Err(NetCoreError::NodeStateNotFound(_)) => RunRequest::default(),
            Err(e) => {
                tracing::warn!(node_id = %node_id, error = %e, "failed to load run-request state");
                RunRequest::default()
            }
        };
        self.run_requests.write().insert(node_id.clone(), request);
    }
}

/// Returns the survivor with the highest `priority`, ties broken by
/// first-occurrence order (spec §4.5.2).
fn select_by_priority<'a>(survivors: &[&'a NodeSnapshot]) -> &'a NodeSnapshot {
    let mut best = survivors[0];
    for candidate in &survivors[1..] {
        if candidate.priority > best.priority {
            best = candidate;
        }
    }
    best
}
