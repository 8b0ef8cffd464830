//! Persistence contract for coordinator state (spec §6).
//!
//! This module defines its own narrow storage seam rather than assuming
//! any particular backing store. Production wiring can supply any
//! implementation — a JSON file, a KV store — as long as it satisfies
//! [`NetworkStorage`].

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{NetCoreError, Result};
use crate::types::{InstanceIdent, InstanceNetworkInfo, NetworkId, NodeId, ProviderNetworkBinding};

/// Persisted snapshot of everything the coordinator needs to reconcile
/// its in-memory allocator state at startup (spec §4.4.1 step 1, §6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistedNetworkState {
    /// All provider-network node bindings ever recorded, keyed by
    /// `(NetworkID, NodeID)`.
    pub bindings: Vec<ProviderNetworkBinding>,
}

/// Storage contract the coordinator depends on for durability.
///
/// Narrow and synchronous by design: a handful of operations, no async,
/// errors mapped into the crate's own error type at the boundary.
pub trait NetworkStorage: Send + Sync {
    /// Loads every persisted binding. Called once at startup.
    ///
    /// # Errors
    ///
    /// Returns [`NetCoreError::StorageFailure`] on any I/O or
    /// deserialization fault.
    fn load(&self) -> Result<PersistedNetworkState>;

    /// Appends or overwrites a single binding.
    ///
    /// # Errors
    ///
    /// Returns [`NetCoreError::StorageFailure`] on any I/O fault.
    fn save_binding(&self, binding: &ProviderNetworkBinding) -> Result<()>;

    /// Removes the binding for `(network_id, node_id)`, if present.
    /// Idempotent: removing an absent binding is not an error (spec
    /// §4.1).
    ///
    /// # Errors
    ///
    /// Returns [`NetCoreError::StorageFailure`] on any I/O fault.
    fn remove_binding(&self, network_id: &NetworkId, node_id: &NodeId) -> Result<()>;

    /// Returns the opaque, caller-serialised state blob for `node_id`
    /// (the placement engine's `RunRequest` accumulator, per spec §6).
    ///
    /// # Errors
    ///
    /// Returns [`NetCoreError::NodeStateNotFound`] if nothing has ever
    /// been saved for this node, or [`NetCoreError::StorageFailure`] on
    /// any other I/O fault.
    fn get_node_state(&self, node_id: &NodeId) -> Result<Vec<u8>>;

    /// Overwrites the opaque state blob for `node_id`.
    ///
    /// # Errors
    ///
    /// Returns [`NetCoreError::StorageFailure`] on any I/O fault.
    fn set_node_state(&self, node_id: &NodeId, state: &[u8]) -> Result<()>;

    /// Persists (or overwrites) one instance's materialised network
    /// record, keyed by its identity (spec §6: `AddNetworkInstanceInfo`).
    ///
    /// # Errors
    ///
    /// Returns [`NetCoreError::StorageFailure`] on any I/O fault.
    fn add_network_instance_info(&self, info: &InstanceNetworkInfo) -> Result<()>;

    /// Removes the persisted record for `identity`, if present.
    /// Idempotent (spec §6: `RemoveNetworkInstanceInfo`).
    ///
    /// # Errors
    ///
    /// Returns [`NetCoreError::StorageFailure`] on any I/O fault.
    fn remove_network_instance_info(&self, identity: &InstanceIdent) -> Result<()>;

    /// Loads every persisted instance record. Called once at startup so
    /// the allocator's free-lists can be reseeded alongside the provider
    /// bindings (spec §6: `GetNetworkInstancesInfo`, spec §9: two-phase
    /// startup).
    ///
    /// # Errors
    ///
    /// Returns [`NetCoreError::StorageFailure`] on any I/O or
    /// deserialization fault.
    fn get_network_instances_info(&self) -> Result<Vec<InstanceNetworkInfo>>;
}

/// In-memory [`NetworkStorage`] for tests and for running the
/// coordinator without a durable backing store.
#[derive(Debug, Default)]
pub struct InMemoryNetworkStorage {
    bindings: RwLock<HashMap<(NetworkId, NodeId), ProviderNetworkBinding>>,
    node_state: RwLock<HashMap<NodeId, Vec<u8>>>,
    instances: RwLock<HashMap<InstanceIdent, InstanceNetworkInfo>>,
}

impl InMemoryNetworkStorage {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl NetworkStorage for InMemoryNetworkStorage {
    fn load(&self) -> Result<PersistedNetworkState> {
        let bindings = self.bindings.read().values().cloned().collect();
        Ok(PersistedNetworkState { bindings })
    }

    fn save_binding(&self, binding: &ProviderNetworkBinding) -> Result<()> {
        let key = (binding.network_id.clone(), binding.node_id.clone());
        self.bindings.write().insert(key, binding.clone());
        Ok(())
    }

    fn remove_binding(&self, network_id: &NetworkId, node_id: &NodeId) -> Result<()> {
        self.bindings
            .write()
            .remove(&(network_id.clone(), node_id.clone()));
        Ok(())
    }

    fn get_node_state(&self, node_id: &NodeId) -> Result<Vec<u8>> {
        self.node_state
            .read()
            .get(node_id)
            .cloned()
            .ok_or_else(|| NetCoreError::NodeStateNotFound(node_id.clone()))
    }

    fn set_node_state(&self, node_id: &NodeId, state: &[u8]) -> Result<()> {
        self.node_state
            .write()
            .insert(node_id.clone(), state.to_vec());
        Ok(())
    }

    fn add_network_instance_info(&self, info: &InstanceNetworkInfo) -> Result<()> {
        self.instances
            .write()
            .insert(info.identity.clone(), info.clone());
        Ok(())
    }

    fn remove_network_instance_info(&self, identity: &InstanceIdent) -> Result<()> {
        self.instances.write().remove(identity);
        Ok(())
    }

    fn get_network_instances_info(&self) -> Result<Vec<InstanceNetworkInfo>> {
        Ok(self.instances.read().values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use ipnet::IpNet;

    use super::*;

    fn binding(network: &str, node: &str) -> ProviderNetworkBinding {
        ProviderNetworkBinding {
            network_id: NetworkId::new(network),
            node_id: NodeId::new(node),
            subnet: "10.1.0.0/24".parse::<IpNet>().expect("subnet"),
            ip: IpAddr::V4(Ipv4Addr::new(10, 1, 0, 1)),
            vlan_id: 42,
        }
    }

    #[test]
    fn save_then_load_roundtrips() {
        let store = InMemoryNetworkStorage::new();
        store.save_binding(&binding("net-a", "node-1")).expect("save");

        let loaded = store.load().expect("load");
        assert_eq!(loaded.bindings.len(), 1);
        assert_eq!(loaded.bindings[0].network_id, NetworkId::new("net-a"));
    }

    #[test]
    fn save_binding_overwrites_same_key() {
        let store = InMemoryNetworkStorage::new();
        store.save_binding(&binding("net-a", "node-1")).expect("save");

        let mut updated = binding("net-a", "node-1");
        updated.vlan_id = 99;
        store.save_binding(&updated).expect("save again");

        let loaded = store.load().expect("load");
        assert_eq!(loaded.bindings.len(), 1);
        assert_eq!(loaded.bindings[0].vlan_id, 99);
    }

    #[test]
    fn remove_binding_is_idempotent() {
        let store = InMemoryNetworkStorage::new();
        store.save_binding(&binding("net-a", "node-1")).expect("save");

        store
            .remove_binding(&NetworkId::new("net-a"), &NodeId::new("node-1"))
            .expect("remove");
        store
            .remove_binding(&NetworkId::new("net-a"), &NodeId::new("node-1"))
            .expect("remove again is not an error");

        assert!(store.load().expect("load").bindings.is_empty());
    }

    #[test]
    fn node_state_roundtrips() {
        let store = InMemoryNetworkStorage::new();
        let node = NodeId::new("node-1");
        store.set_node_state(&node, b"hello").expect("set");
        assert_eq!(store.get_node_state(&node).expect("get"), b"hello");
    }

    #[test]
    fn unset_node_state_is_not_found() {
        let store = InMemoryNetworkStorage::new();
        let err = store
            .get_node_state(&NodeId::new("node-1"))
            .expect_err("should not exist");
        assert!(matches!(err, NetCoreError::NodeStateNotFound(_)));
    }

    fn instance_info(service: &str, subject: &str, instance: u64) -> InstanceNetworkInfo {
        InstanceNetworkInfo {
            identity: InstanceIdent::new(service, subject, instance),
            params: crate::types::NetworkParameters {
                network_id: NetworkId::new("net-a"),
                ip: IpAddr::V4(Ipv4Addr::new(10, 1, 0, 5)),
                subnet: "10.1.0.0/24".parse::<IpNet>().expect("subnet"),
                vlan_id: 42,
                dns_servers: vec![],
                firewall_rules: vec![],
            },
            exposed_ports: vec![],
        }
    }

    #[test]
    fn add_network_instance_info_then_get_roundtrips() {
        let store = InMemoryNetworkStorage::new();
        store
            .add_network_instance_info(&instance_info("svc", "sub", 0))
            .expect("add");

        let loaded = store.get_network_instances_info().expect("get");
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].identity, InstanceIdent::new("svc", "sub", 0));
    }

    #[test]
    fn remove_network_instance_info_is_idempotent() {
        let store = InMemoryNetworkStorage::new();
        let identity = InstanceIdent::new("svc", "sub", 0);
        store
            .add_network_instance_info(&instance_info("svc", "sub", 0))
            .expect("add");

        store.remove_network_instance_info(&identity).expect("remove");
        store
            .remove_network_instance_info(&identity)
            .expect("remove again is not an error");

        assert!(store.get_network_instances_info().expect("get").is_empty());
    }
}
