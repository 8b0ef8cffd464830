//! # claw-netcore
//!
//! Network coordination core: provider-network lifecycle, per-instance
//! subnet/IP/VLAN allocation, DNS host registration, and egress
//! firewall-rule synthesis for a multi-node workload orchestrator.
//!
//! The coordinator owns three collaborators behind trait seams so
//! production defaults can be swapped for test fakes:
//!
//! - [`allocator::SubnetAllocator`] — carves provider subnets and hands
//!   out instance IPs ([`allocator::Ipam`] is the production default).
//! - [`vlan::VlanPicker`] — assigns a VLAN id to a brand-new provider
//!   network ([`vlan::CryptoVlanPicker`] is the production default).
//! - [`storage::NetworkStorage`] — durable persistence of bindings.
//!
//! ## Quick start
//!
//! ```rust
//! use std::net::Ipv4Addr;
//! use std::sync::Arc;
//!
//! use claw_netcore::allocator::Ipam;
//! use claw_netcore::dns::{DnsRegistry, LoggingResolverControl};
//! use claw_netcore::node_manager::LoggingNodeManager;
//! use claw_netcore::storage::InMemoryNetworkStorage;
//! use claw_netcore::vlan::CryptoVlanPicker;
//! use claw_netcore::{InstanceIdent, InstancePolicy, NetworkCoordinator, NetworkId, NodeId};
//!
//! let dir = tempfile::tempdir().expect("tempdir");
//! let dns_ip = Ipv4Addr::new(10, 10, 0, 1).into();
//! let allocator = Ipam::new("10.50.0.0/16".parse().expect("aggregate"), 24).expect("ipam");
//! let dns = DnsRegistry::new(dir.path(), dns_ip, Box::new(LoggingResolverControl)).expect("dns");
//!
//! let coordinator = NetworkCoordinator::new(
//!     dns_ip,
//!     Box::new(allocator),
//!     Box::new(CryptoVlanPicker),
//!     dns,
//!     Arc::new(InMemoryNetworkStorage::new()),
//!     Box::new(LoggingNodeManager),
//! )
//! .expect("coordinator");
//!
//! let params = coordinator
//!     .reconcile_node_providers(&NodeId::new("node-1"), &[NetworkId::new("net-a")])
//!     .expect("reconcile");
//! assert_eq!(params.len(), 1);
//!
//! let instance = InstanceIdent::new("svc", "sub", 0);
//! coordinator
//!     .prepare_instance(&instance, &NetworkId::new("net-a"), &InstancePolicy::default())
//!     .expect("prepare instance");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod allocator;
pub mod coordinator;
pub mod dns;
pub mod error;
pub mod node_manager;
pub mod policy;
pub mod storage;
pub mod types;
pub mod vlan;

pub use allocator::{AllocationStats, NetworkStats};
pub use coordinator::{CoordinatorConfig, NetworkCoordinator};
pub use error::{NetCoreError, Result};
pub use types::{
    EgressRule, ExposedPort, HostsTable, InstanceIdent, InstanceNetworkInfo, InstancePolicy,
    NetworkId, NetworkParameters, NodeId, Protocol, ProviderNetworkBinding,
};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
