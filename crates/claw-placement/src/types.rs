//! Core data model for node placement (spec §3, §4.5).

use std::collections::HashSet;

use claw_netcore::NodeId;
use serde::{Deserialize, Serialize};

/// A shareable local resource on a node (e.g. a GPU).
///
/// `shared_count == 0` means the device is not shareable and is
/// ineligible for allocation through the placement path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Device name, matched against a service's requested device list.
    pub name: String,
    /// Total concurrent shares this device admits.
    pub shared_count: u32,
    /// Shares currently allocated. Invariant: `0 <= allocated_count <=
    /// shared_count`.
    pub allocated_count: u32,
}

impl Device {
    /// Creates a new, fully-unallocated device.
    #[must_use]
    pub fn new(name: impl Into<String>, shared_count: u32) -> Self {
        Self {
            name: name.into(),
            shared_count,
            allocated_count: 0,
        }
    }

    /// Returns true if at least one share is free.
    #[must_use]
    pub fn has_free_share(&self) -> bool {
        self.shared_count > 0 && self.allocated_count < self.shared_count
    }
}

/// A snapshot of one node's static capabilities and identity (spec §3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    /// Node identifier.
    pub node_id: NodeId,
    /// Node type, as reported by the resource manager.
    pub node_type: String,
    /// Scheduling priority; ties broken by first-occurrence order.
    pub priority: u32,
    /// Arbitrary labels this node carries.
    pub labels: HashSet<String>,
    /// Arbitrary resource tags this node carries.
    pub resources: HashSet<String>,
    /// Local shareable devices.
    pub devices: Vec<Device>,
    /// Runner (execution engine) types this node supports.
    pub runners: Vec<String>,
    /// True if this node is the local node issuing the placement
    /// decision (affects RunRequest URL rewriting, spec §4.5.4).
    pub is_local: bool,
}

impl NodeSnapshot {
    /// Returns the device named `name`, if this node has one.
    #[must_use]
    pub fn device(&self, name: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.name == name)
    }

    /// Returns a mutable reference to the device named `name`, if any.
    pub fn device_mut(&mut self, name: &str) -> Option<&mut Device> {
        self.devices.iter_mut().find(|d| d.name == name)
    }
}

/// A service's placement requirements (spec §4.5.1).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    /// Service identifier, carried through to the RunRequest.
    pub service_id: String,
    /// Container/runtime URL for this service. Rewritten to its remote
    /// form when dispatched to a non-local node (spec §4.5.4).
    pub url: String,
    /// Remote-accessible form of `url`, substituted for non-local nodes.
    pub remote_url: String,
    /// Acceptable runner types. Empty means `DefaultRunners`.
    pub runners: Vec<String>,
    /// Resource tags every candidate node must carry.
    pub resources: HashSet<String>,
    /// Devices this service needs, by name.
    pub devices: Vec<String>,
}

/// A content layer backing an instance (e.g. an image layer), subject
/// to the same dedup/URL-rewrite treatment as [`ServiceDescriptor`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerDescriptor {
    /// Layer identifier.
    pub layer_id: String,
    /// Local URL.
    pub url: String,
    /// Remote-accessible form of `url`.
    pub remote_url: String,
}

/// A single instance's placement requirements (spec §4.5.1).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDescriptor {
    /// Instance identifier, carried through to the RunRequest.
    pub instance_id: String,
    /// Labels every candidate node must carry.
    pub labels: HashSet<String>,
}

/// The pending dispatch set for one node: services, layers, and
/// instances accumulated but not yet dispatched (spec §3, §4.5.4).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    /// Accumulated service descriptors, deduplicated by structural
    /// equality.
    pub services: Vec<ServiceDescriptor>,
    /// Accumulated layer descriptors, deduplicated by structural
    /// equality.
    pub layers: Vec<LayerDescriptor>,
    /// Accumulated instance descriptors.
    pub instances: Vec<InstanceDescriptor>,
}

impl RunRequest {
    /// Returns true if nothing has been accumulated yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty() && self.layers.is_empty() && self.instances.is_empty()
    }

    /// Returns the total count of accumulated descriptors across all
    /// three lists.
    #[must_use]
    pub fn len(&self) -> usize {
        self.services.len() + self.layers.len() + self.instances.len()
    }
}
