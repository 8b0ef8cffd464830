//! Core data model for the network coordinator: tenant-scoped provider
//! networks, per-node bindings, and per-instance allocations.

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use crate::error::{NetCoreError, Result};

/// Identifier for a cluster node, as handed to us by the node manager.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(String);

impl NodeId {
    /// Creates a new node identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if this is the stale "unset" node id used for legacy
    /// persisted binding rows (spec §4.4.1 step 1, §9 open question).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Identifier for a tenant-scoped provider network.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkId(String);

impl NetworkId {
    /// Creates a new provider-network identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NetworkId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Identity key for a service instance: `(ServiceID, SubjectID, Instance)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceIdent {
    /// Owning service identifier.
    pub service_id: String,
    /// Subject (tenant/user) identifier.
    pub subject_id: String,
    /// Ordinal of this instance within the subject/service pair.
    pub instance: u64,
}

impl InstanceIdent {
    /// Creates a new instance identity.
    #[must_use]
    pub fn new(service_id: impl Into<String>, subject_id: impl Into<String>, instance: u64) -> Self {
        Self {
            service_id: service_id.into(),
            subject_id: subject_id.into(),
            instance,
        }
    }

    /// Returns true if both service and subject are set (spec §4.4.2
    /// step 1: autogenerated hosts only apply when both are non-empty).
    #[must_use]
    pub fn has_canonical_identity(&self) -> bool {
        !self.service_id.is_empty() && !self.subject_id.is_empty()
    }
}

impl fmt::Display for InstanceIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.service_id, self.subject_id, self.instance)
    }
}

/// Transport protocol for a firewall rule. Defaults to TCP per spec
/// §4.4.3/§4.4.4 grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// TCP transport.
    #[default]
    Tcp,
    /// UDP transport.
    Udp,
}

impl Protocol {
    /// Parses a protocol token from policy grammar text.
    ///
    /// # Errors
    ///
    /// Returns [`NetCoreError::MalformedPolicy`] for anything other than
    /// `"tcp"` or `"udp"` (case-insensitive).
    pub fn parse(token: &str) -> Result<Self> {
        match token.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            other => Err(NetCoreError::MalformedPolicy {
                reason: format!("unknown protocol '{other}'"),
            }),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
            Self::Udp => write!(f, "udp"),
        }
    }
}

/// An ingress descriptor: a local port an instance exposes to peers.
///
/// This is the "exposed" `FirewallRule` variant from spec §3 — distinct
/// from the derived egress [`EgressRule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExposedPort {
    /// Transport protocol, defaulting to TCP.
    pub protocol: Protocol,
    /// Local port number.
    pub port: u16,
}

/// A synthesised egress allow-list entry (spec §4.4.5).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EgressRule {
    /// Source instance IP.
    pub src_ip: IpAddr,
    /// Destination instance IP.
    pub dst_ip: IpAddr,
    /// Transport protocol.
    pub proto: Protocol,
    /// Destination port.
    pub dst_port: u16,
}

/// Per-instance materialised network record (spec §3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkParameters {
    /// Provider network this instance belongs to.
    pub network_id: NetworkId,
    /// Allocated instance IP.
    pub ip: IpAddr,
    /// The provider network's subnet.
    pub subnet: IpNet,
    /// VLAN id shared by all bindings of this provider network.
    pub vlan_id: u16,
    /// DNS servers advertised to the instance. Invariant 4: always
    /// contains exactly the coordinator's configured DNS IP.
    pub dns_servers: Vec<IpAddr>,
    /// Synthesised egress firewall rules for this instance.
    pub firewall_rules: Vec<EgressRule>,
}

/// One node's membership in a provider network (spec §3).
///
/// Multiple bindings share a `NetworkID` (invariant 3: one per node) but
/// each has its own gateway IP/subnet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderNetworkBinding {
    /// Provider network identifier.
    pub network_id: NetworkId,
    /// Node this binding belongs to. Empty string marks a stale,
    /// pre-migration persisted row (spec §9 open question).
    pub node_id: NodeId,
    /// The subnet carved for this node's bindings of the network.
    pub subnet: IpNet,
    /// This node's gateway IP within `subnet`.
    pub ip: IpAddr,
    /// VLAN id, identical across all bindings of `network_id`.
    pub vlan_id: u16,
}

/// A fully materialised instance network record, as tracked by the
/// coordinator (spec §3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceNetworkInfo {
    /// Instance identity.
    pub identity: InstanceIdent,
    /// Materialised network parameters.
    pub params: NetworkParameters,
    /// Ingress ports this instance exposes to peers.
    pub exposed_ports: Vec<ExposedPort>,
}

impl InstanceNetworkInfo {
    /// Returns true if `ip` lies within this instance's own subnet.
    #[must_use]
    pub fn same_subnet(&self, ip: IpAddr) -> bool {
        self.params.subnet.contains(&ip)
    }
}

/// Declarative network policy attached to a `PrepareInstance` request
/// (spec §4.4.2).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstancePolicy {
    /// Extra hostnames to register in DNS, beyond the autogenerated ones.
    pub hosts: Vec<String>,
    /// Egress policy entries, `"serviceID/port[/proto]"`.
    pub allow_connections: Vec<String>,
    /// Ingress policy entries, `"port[/proto]"`.
    pub expose_ports: Vec<String>,
}

/// Raw hosts-file style record, `IP -> hostnames`.
pub type HostsTable = HashMap<IpAddr, Vec<String>>;
