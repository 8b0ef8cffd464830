//! Central network state: provider-network reconciliation, instance
//! preparation, and egress firewall synthesis (spec §4.4).

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use ipnet::{IpNet, Ipv4Net};
use parking_lot::RwLock;

use crate::allocator::SubnetAllocator;
use crate::dns::DnsRegistry;
use crate::error::{NetCoreError, Result};
use crate::node_manager::NodeManager;
use crate::policy;
use crate::storage::NetworkStorage;
use crate::types::{
    EgressRule, ExposedPort, InstanceIdent, InstanceNetworkInfo, InstancePolicy, NetworkId,
    NetworkParameters, NodeId, ProviderNetworkBinding,
};
use crate::vlan::VlanPicker;

/// Configuration recognised by the network coordinator subsystem (spec
/// §6: `WorkingDir`, `DNSIP`, and the IPAM aggregate range/host prefix).
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Base directory for DNS artifacts (the `hosts` file lives under
    /// `<working_dir>/network/`).
    pub working_dir: PathBuf,
    /// The single DNS server advertised to instances.
    pub dns_ip: IpAddr,
    /// Aggregate CIDR that provider-network subnets are carved from.
    pub aggregate_cidr: Ipv4Net,
    /// Prefix length of each carved per-network subnet.
    pub host_prefix_len: u8,
}

impl CoordinatorConfig {
    /// Default aggregate: 10.200.0.0/16.
    const DEFAULT_AGGREGATE: Ipv4Net = Ipv4Net::new_assert(Ipv4Addr::new(10, 200, 0, 0), 16);
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            working_dir: PathBuf::from("."),
            dns_ip: IpAddr::V4(Ipv4Addr::new(10, 200, 0, 1)),
            aggregate_cidr: Self::DEFAULT_AGGREGATE,
            host_prefix_len: 24,
        }
    }
}

impl CoordinatorConfig {
    /// Returns the aggregate CIDR as an [`IpNet`] for [`crate::allocator::Ipam::new`].
    #[must_use]
    pub fn aggregate(&self) -> IpNet {
        IpNet::V4(self.aggregate_cidr)
    }
}

/// Central coordinator state, guarded by a single readers-writer mutex
/// (spec §5): `instancesByNetwork` and `providerBindings` together with
/// the allocator's and DNS registry's own internal locking are treated
/// as one critical section per public call.
struct CoordinatorState {
    instances_by_network: HashMap<NetworkId, HashMap<InstanceIdent, InstanceNetworkInfo>>,
    provider_bindings: HashMap<NetworkId, Vec<ProviderNetworkBinding>>,
}

impl CoordinatorState {
    fn new() -> Self {
        Self {
            instances_by_network: HashMap::new(),
            provider_bindings: HashMap::new(),
        }
    }
}

/// The network coordinator: provider-network lifecycle, per-instance
/// subnet/IP/VLAN allocation, DNS registration, and egress firewall
/// synthesis.
pub struct NetworkCoordinator {
    dns_ip: IpAddr,
    allocator: Box<dyn SubnetAllocator>,
    vlan_picker: Box<dyn VlanPicker>,
    dns: DnsRegistry,
    storage: std::sync::Arc<dyn NetworkStorage>,
    node_manager: Box<dyn NodeManager>,
    state: RwLock<CoordinatorState>,
}

impl NetworkCoordinator {
    /// Builds a coordinator and performs the two-phase startup described
    /// in spec §9: load persisted bindings and instances, reseed the
    /// allocator's free-lists from both, then hand back a coordinator
    /// ready to accept requests.
    ///
    /// # Errors
    ///
    /// Returns [`NetCoreError::CorruptedState`] if persisted state
    /// disagrees with the uniqueness invariant, or any storage error
    /// surfaced while loading.
    pub fn new(
        dns_ip: IpAddr,
        allocator: Box<dyn SubnetAllocator>,
        vlan_picker: Box<dyn VlanPicker>,
        dns: DnsRegistry,
        storage: std::sync::Arc<dyn NetworkStorage>,
        node_manager: Box<dyn NodeManager>,
    ) -> Result<Self> {
        let persisted = storage.load()?;
        let persisted_instances = storage.get_network_instances_info()?;

        let mut provider_bindings: HashMap<NetworkId, Vec<ProviderNetworkBinding>> = HashMap::new();
        for binding in &persisted.bindings {
            provider_bindings
                .entry(binding.network_id.clone())
                .or_default()
                .push(binding.clone());
        }

        let mut instances_by_network: HashMap<NetworkId, HashMap<InstanceIdent, InstanceNetworkInfo>> =
            HashMap::new();
        for info in &persisted_instances {
            instances_by_network
                .entry(info.params.network_id.clone())
                .or_default()
                .insert(info.identity.clone(), info.clone());
        }

        // Reseed the allocator's free-lists from both bindings and
        // instances before accepting any request (spec §9: two-phase
        // startup breaks the cyclic dependency between instance
        // allocation and the subnet allocator).
        allocator
            .reconcile_from_persisted_state(&persisted.bindings, &persisted_instances)
            .map_err(|e| NetCoreError::CorruptedState(e.to_string()))?;

        tracing::info!(
            bindings = persisted.bindings.len(),
            instances = persisted_instances.len(),
            "network coordinator startup reconciliation complete"
        );

        Ok(Self {
            dns_ip,
            allocator,
            vlan_picker,
            dns,
            storage,
            node_manager,
            state: RwLock::new(CoordinatorState {
                instances_by_network,
                provider_bindings,
            }),
        })
    }

    /// Reconciles the set of provider networks a node belongs to (spec
    /// §4.4.1). Returns the resulting [`NetworkParameters`] for every
    /// requested provider, in the order requested.
    ///
    /// # Errors
    ///
    /// Returns [`NetCoreError::Exhausted`] if IPAM cannot satisfy a new
    /// binding, or a storage/transport error from persistence or
    /// publication.
    pub fn reconcile_node_providers(
        &self,
        node_id: &NodeId,
        provider_ids: &[NetworkId],
    ) -> Result<Vec<NetworkParameters>> {
        let mut state = self.state.write();

        let wanted: std::collections::HashSet<&NetworkId> = provider_ids.iter().collect();

        // Step 1 + 2: drop bindings for this node on providers no longer
        // requested, plus any stale empty-NodeID rows; tear down
        // providers left with no bindings at all.
        let tracked_networks: Vec<NetworkId> = state.provider_bindings.keys().cloned().collect();
        for network_id in tracked_networks {
            let bindings = state
                .provider_bindings
                .get_mut(&network_id)
                .expect("key from own keys() iterator");

            let drop_for_this_node = !wanted.contains(&network_id);
            bindings.retain(|b| {
                let stale = b.node_id.is_empty();
                let ours_and_dropped = drop_for_this_node && &b.node_id == node_id;
                !(stale || ours_and_dropped)
            });

            if drop_for_this_node {
                if let Err(e) = self.storage.remove_binding(&network_id, node_id) {
                    tracing::warn!(%network_id, %node_id, error = %e, "failed to remove stale binding from storage");
                }
            }

            if bindings.is_empty() {
                state.provider_bindings.remove(&network_id);
                if let Some(instances) = state.instances_by_network.remove(&network_id) {
                    for identity in instances.keys() {
                        if let Err(e) = self.storage_remove_instance(identity) {
                            tracing::warn!(%network_id, %identity, error = %e, "failed to remove torn-down instance from storage");
                        }
                        if let Some(info) = instances.get(identity) {
                            self.dns_best_effort_remove(info.params.ip);
                        }
                    }
                }
                self.allocator.release_network(&network_id);
                tracing::info!(%network_id, "provider network torn down: no bindings remain");
            }
        }

        // Step 3: ensure a binding exists for each requested provider.
        let mut results = Vec::with_capacity(provider_ids.len());
        for network_id in provider_ids {
            let existing_for_node = state
                .provider_bindings
                .get(network_id)
                .and_then(|bindings| bindings.iter().find(|b| &b.node_id == node_id))
                .cloned();

            let binding = if let Some(binding) = existing_for_node {
                binding
            } else {
                let existing_vlan = state
                    .provider_bindings
                    .get(network_id)
                    .and_then(|bindings| bindings.first())
                    .map(|b| b.vlan_id);

                let (subnet, ip) = self.allocator.prepare_subnet(network_id)?;
                let vlan_id = match existing_vlan {
                    Some(vlan_id) => vlan_id,
                    None => self.vlan_picker.pick(),
                };

                let binding = ProviderNetworkBinding {
                    network_id: network_id.clone(),
                    node_id: node_id.clone(),
                    subnet,
                    ip,
                    vlan_id,
                };

                state
                    .provider_bindings
                    .entry(network_id.clone())
                    .or_default()
                    .push(binding.clone());

                binding
            };

            // Step 4: persist.
            self.storage.save_binding(&binding)?;

            results.push(NetworkParameters {
                network_id: binding.network_id.clone(),
                ip: binding.ip,
                subnet: binding.subnet,
                vlan_id: binding.vlan_id,
                dns_servers: vec![self.dns_ip],
                firewall_rules: Vec::new(),
            });
        }

        drop(state);

        // Step 5: publish.
        for network_id in provider_ids {
            let state = self.state.read();
            if let Some(binding) = state
                .provider_bindings
                .get(network_id)
                .and_then(|bindings| bindings.iter().find(|b| &b.node_id == node_id))
                .cloned()
            {
                drop(state);
                self.node_manager.update_network(&binding)?;
            }
        }

        Ok(results)
    }

    /// Allocates (or reallocates) network parameters for an instance
    /// (spec §4.4.2).
    ///
    /// # Errors
    ///
    /// Returns [`NetCoreError::MalformedPolicy`] for invalid
    /// `ExposePorts`/`AllowConnections` syntax, [`NetCoreError::Exhausted`]
    /// if IPAM cannot allocate, or a storage/DNS error.
    pub fn prepare_instance(
        &self,
        identity: &InstanceIdent,
        network_id: &NetworkId,
        policy: &InstancePolicy,
    ) -> Result<NetworkParameters> {
        let exposed_ports = policy
            .expose_ports
            .iter()
            .map(|entry| policy::parse_expose_port(entry))
            .collect::<Result<Vec<ExposedPort>>>()?;

        let mut hosts = policy.hosts.clone();
        hosts.extend(autogenerated_hostnames(identity, network_id));

        let mut state = self.state.write();

        let existing = find_instance(&state.instances_by_network, identity);
        if let Some((existing_network, _)) = &existing {
            if existing_network != network_id {
                self.release_instance_locked(&mut state, existing_network, identity)?;
            }
        }

        let still_bound = existing
            .as_ref()
            .filter(|(existing_network, _)| existing_network == network_id)
            .map(|(_, info)| info.clone());

        let info = if let Some(info) = still_bound {
            info
        } else {
            let (subnet, ip) = self.allocator.prepare_subnet(network_id)?;
            let info = InstanceNetworkInfo {
                identity: identity.clone(),
                params: NetworkParameters {
                    network_id: network_id.clone(),
                    ip,
                    subnet,
                    vlan_id: self.vlan_id_for(&state, network_id),
                    dns_servers: vec![self.dns_ip],
                    firewall_rules: Vec::new(),
                },
                exposed_ports,
            };

            state
                .instances_by_network
                .entry(network_id.clone())
                .or_default()
                .insert(identity.clone(), info.clone());

            info
        };

        self.storage_save_instance(&info)?;

        self.dns.add_hosts(hosts.clone(), info.params.ip)?;

        let firewall_rules = self.synthesise_egress_rules_locked(
            &state,
            identity,
            info.params.ip,
            info.params.subnet,
            &policy.allow_connections,
        )?;

        let mut params = info.params.clone();
        params.firewall_rules = firewall_rules;

        if let Some(network_instances) = state.instances_by_network.get_mut(network_id) {
            if let Some(stored) = network_instances.get_mut(identity) {
                stored.params.firewall_rules = params.firewall_rules.clone();
            }
        }

        Ok(params)
    }

    /// Removes an instance's binding, releasing its IP and DNS entry.
    /// No-op if the identity is unknown (spec §4.4.6).
    ///
    /// # Errors
    ///
    /// Returns a storage error if removal from persistence fails.
    pub fn remove_instance(&self, identity: &InstanceIdent) -> Result<()> {
        let mut state = self.state.write();
        let Some((network_id, _)) = find_instance(&state.instances_by_network, identity) else {
            return Ok(());
        };
        self.release_instance_locked(&mut state, &network_id, identity)
    }

    /// Returns every known instance identity across all provider
    /// networks (spec §4.4.6).
    #[must_use]
    pub fn get_instances(&self) -> Vec<InstanceIdent> {
        let state = self.state.read();
        state
            .instances_by_network
            .values()
            .flat_map(|instances| instances.keys().cloned())
            .collect()
    }

    /// Returns the network parameters currently recorded for `identity`,
    /// if any.
    #[must_use]
    pub fn lookup_instance(&self, identity: &InstanceIdent) -> Option<NetworkParameters> {
        let state = self.state.read();
        find_instance(&state.instances_by_network, identity).map(|(_, info)| info.params)
    }

    /// Returns every provider-network binding currently held for
    /// `node_id`, for operator introspection.
    #[must_use]
    pub fn node_snapshot(&self, node_id: &NodeId) -> Vec<ProviderNetworkBinding> {
        let state = self.state.read();
        state
            .provider_bindings
            .values()
            .flatten()
            .filter(|b| &b.node_id == node_id)
            .cloned()
            .collect()
    }

    /// Returns every binding currently recorded for `network_id`, across
    /// all nodes, for operator introspection.
    #[must_use]
    pub fn provider_bindings(&self, network_id: &NetworkId) -> Vec<ProviderNetworkBinding> {
        let state = self.state.read();
        state
            .provider_bindings
            .get(network_id)
            .cloned()
            .unwrap_or_default()
    }

    fn vlan_id_for(&self, state: &CoordinatorState, network_id: &NetworkId) -> u16 {
        state
            .provider_bindings
            .get(network_id)
            .and_then(|bindings| bindings.first())
            .map_or_else(|| self.vlan_picker.pick(), |b| b.vlan_id)
    }

    fn release_instance_locked(
        &self,
        state: &mut CoordinatorState,
        network_id: &NetworkId,
        identity: &InstanceIdent,
    ) -> Result<()> {
        let Some(instances) = state.instances_by_network.get_mut(network_id) else {
            return Ok(());
        };
        let Some(info) = instances.remove(identity) else {
            return Ok(());
        };
        if instances.is_empty() {
            state.instances_by_network.remove(network_id);
        }

        self.allocator.release_ip(network_id, info.params.ip);
        self.dns_best_effort_remove(info.params.ip);
        self.storage_remove_instance(identity)?;
        Ok(())
    }

    fn storage_save_instance(&self, info: &InstanceNetworkInfo) -> Result<()> {
        self.storage.add_network_instance_info(info)?;
        tracing::debug!(identity = %info.identity, ip = %info.params.ip, "instance network info persisted");
        Ok(())
    }

    fn storage_remove_instance(&self, identity: &InstanceIdent) -> Result<()> {
        self.storage.remove_network_instance_info(identity)?;
        tracing::debug!(%identity, "instance network info removed");
        Ok(())
    }

    fn dns_best_effort_remove(&self, ip: IpAddr) {
        if let Err(e) = self.dns.remove_ip(ip) {
            tracing::warn!(%ip, error = %e, "failed to remove DNS entry");
        }
    }

    /// Synthesises egress rules for one instance's `AllowConnections`
    /// entries (spec §4.4.5). Holds the coordinator's state lock; the
    /// caller must already be holding `state`.
    fn synthesise_egress_rules_locked(
        &self,
        state: &CoordinatorState,
        source_identity: &InstanceIdent,
        source_ip: IpAddr,
        source_subnet: ipnet::IpNet,
        allow_connections: &[String],
    ) -> Result<Vec<EgressRule>> {
        let mut rules = Vec::with_capacity(allow_connections.len());

        for entry in allow_connections {
            let parsed = policy::parse_allow_connections(entry)?;

            let target = state
                .instances_by_network
                .values()
                .flatten()
                .filter(|(identity, _)| identity.service_id == parsed.service_id)
                .filter(|(identity, _)| *identity != source_identity)
                .map(|(_, info)| info)
                .find(|info| {
                    !source_subnet.contains(&info.params.ip)
                        && info
                            .exposed_ports
                            .iter()
                            .any(|p: &ExposedPort| p.port == parsed.port && p.protocol == parsed.proto)
                });

            if let Some(target) = target {
                rules.push(EgressRule {
                    src_ip: source_ip,
                    dst_ip: target.params.ip,
                    proto: parsed.proto,
                    dst_port: parsed.port,
                });
            }
        }

        Ok(rules)
    }
}

fn find_instance(
    instances_by_network: &HashMap<NetworkId, HashMap<InstanceIdent, InstanceNetworkInfo>>,
    identity: &InstanceIdent,
) -> Option<(NetworkId, InstanceNetworkInfo)> {
    instances_by_network.iter().find_map(|(network_id, instances)| {
        instances
            .get(identity)
            .map(|info| (network_id.clone(), info.clone()))
    })
}

/// Autogenerated canonical hostnames for an instance (spec §4.4.2 step
/// 1). Requires both `ServiceID` and `SubjectID` to be non-empty.
fn autogenerated_hostnames(identity: &InstanceIdent, network_id: &NetworkId) -> Vec<String> {
    if !identity.has_canonical_identity() {
        return Vec::new();
    }

    let mut names = vec![
        format!("{}.{}.{}", identity.instance, identity.subject_id, identity.service_id),
        format!(
            "{}.{}.{}.{}",
            identity.instance, identity.subject_id, identity.service_id, network_id
        ),
    ];

    if identity.instance == 0 {
        names.push(format!("{}.{}", identity.subject_id, identity.service_id));
        names.push(format!("{}.{}.{}", identity.subject_id, identity.service_id, network_id));
    }

    names
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::allocator::Ipam;
    use crate::dns::LoggingResolverControl;
    use crate::node_manager::LoggingNodeManager;
    use crate::storage::InMemoryNetworkStorage;
    use crate::vlan::CryptoVlanPicker;

    fn coordinator() -> (tempfile::TempDir, NetworkCoordinator) {
        let dir = tempfile::tempdir().expect("tempdir");
        let dns_ip = IpAddr::V4(Ipv4Addr::new(10, 10, 0, 1));
        let allocator = Ipam::new("10.60.0.0/16".parse().expect("aggregate"), 24).expect("ipam");
        let dns = DnsRegistry::new(dir.path(), dns_ip, Box::new(LoggingResolverControl))
            .expect("dns registry");
        let coordinator = NetworkCoordinator::new(
            dns_ip,
            Box::new(allocator),
            Box::new(CryptoVlanPicker),
            dns,
            std::sync::Arc::new(InMemoryNetworkStorage::new()),
            Box::new(LoggingNodeManager),
        )
        .expect("coordinator");
        (dir, coordinator)
    }

    #[test]
    fn first_provider_on_first_node_allocates_subnet_and_vlan() {
        let (_dir, coordinator) = coordinator();
        let net_x = NetworkId::new("netX");

        let results = coordinator
            .reconcile_node_providers(&NodeId::new("nodeA"), std::slice::from_ref(&net_x))
            .expect("reconcile");

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].network_id, net_x);
        assert!((1..=4096).contains(&results[0].vlan_id));
        assert!(results[0].subnet.contains(&results[0].ip));
    }

    #[test]
    fn second_node_joining_shares_vlan_but_gets_distinct_subnet() {
        let (_dir, coordinator) = coordinator();
        let net_x = NetworkId::new("netX");

        let first = coordinator
            .reconcile_node_providers(&NodeId::new("nodeA"), std::slice::from_ref(&net_x))
            .expect("reconcile a");
        let second = coordinator
            .reconcile_node_providers(&NodeId::new("nodeB"), std::slice::from_ref(&net_x))
            .expect("reconcile b");

        assert_eq!(first[0].vlan_id, second[0].vlan_id);
        assert_ne!(first[0].ip, second[0].ip);
    }

    #[test]
    fn provider_drop_releases_ipam_pool() {
        let (_dir, coordinator) = coordinator();
        let net_x = NetworkId::new("netX");
        let node_a = NodeId::new("nodeA");

        coordinator
            .reconcile_node_providers(&node_a, std::slice::from_ref(&net_x))
            .expect("reconcile");
        let after_drop = coordinator
            .reconcile_node_providers(&node_a, &[])
            .expect("reconcile drop");

        assert!(after_drop.is_empty());

        // Subnet index should be reusable by a fresh network now.
        let reused = coordinator
            .reconcile_node_providers(&node_a, std::slice::from_ref(&NetworkId::new("netY")))
            .expect("reconcile after drop");
        assert_eq!(reused.len(), 1);
    }

    #[test]
    fn reconcile_is_idempotent() {
        let (_dir, coordinator) = coordinator();
        let net_x = NetworkId::new("netX");
        let node_a = NodeId::new("nodeA");

        let first = coordinator
            .reconcile_node_providers(&node_a, std::slice::from_ref(&net_x))
            .expect("reconcile once");
        let second = coordinator
            .reconcile_node_providers(&node_a, std::slice::from_ref(&net_x))
            .expect("reconcile twice");

        assert_eq!(first, second);
    }

    #[test]
    fn prepare_instance_default_hosts_are_autogenerated() {
        let (_dir, coordinator) = coordinator();
        let net_x = NetworkId::new("netX");
        coordinator
            .reconcile_node_providers(&NodeId::new("nodeA"), std::slice::from_ref(&net_x))
            .expect("reconcile");

        let identity = InstanceIdent::new("svc", "sub", 0);
        let policy = InstancePolicy {
            hosts: vec![],
            allow_connections: vec![],
            expose_ports: vec!["80".to_string()],
        };

        let params = coordinator
            .prepare_instance(&identity, &net_x, &policy)
            .expect("prepare");

        assert!(params.subnet.contains(&params.ip));

        let dns_names = coordinator.dns.lookup(params.ip).expect("dns entry");
        for expected in ["0.sub.svc", "0.sub.svc.netX", "sub.svc", "sub.svc.netX"] {
            assert!(
                dns_names.contains(&expected.to_string()),
                "expected {expected} among {dns_names:?}"
            );
        }
    }

    #[test]
    fn instance_move_releases_old_network_ip() {
        let (_dir, coordinator) = coordinator();
        let net_x = NetworkId::new("netX");
        let net_y = NetworkId::new("netY");
        coordinator
            .reconcile_node_providers(&NodeId::new("nodeA"), &[net_x.clone(), net_y.clone()])
            .expect("reconcile");

        let identity = InstanceIdent::new("svc", "sub", 0);
        let policy = InstancePolicy::default();

        let first = coordinator
            .prepare_instance(&identity, &net_x, &policy)
            .expect("prepare on netX");
        let second = coordinator
            .prepare_instance(&identity, &net_y, &policy)
            .expect("prepare on netY");

        assert_eq!(second.network_id, net_y);
        assert!(coordinator.lookup_instance(&identity).is_some());

        // The old IP must be free again: allocating many more instances
        // on netX should eventually reuse it.
        let mut reused = false;
        for i in 1..300 {
            let ident = InstanceIdent::new("svc", "sub", i);
            let params = coordinator
                .prepare_instance(&ident, &net_x, &policy)
                .expect("prepare filler");
            if params.ip == first.ip {
                reused = true;
                break;
            }
        }
        assert!(reused, "netX's freed IP should become available again");
    }

    #[test]
    fn egress_rules_exclude_same_subnet_targets() {
        let (_dir, coordinator) = coordinator();
        let net_x = NetworkId::new("netX");
        coordinator
            .reconcile_node_providers(&NodeId::new("nodeA"), std::slice::from_ref(&net_x))
            .expect("reconcile");

        let server = InstanceIdent::new("backend", "sub", 0);
        coordinator
            .prepare_instance(
                &server,
                &net_x,
                &InstancePolicy {
                    hosts: vec![],
                    allow_connections: vec![],
                    expose_ports: vec!["9090".to_string()],
                },
            )
            .expect("prepare backend");

        let client = InstanceIdent::new("frontend", "sub", 0);
        let params = coordinator
            .prepare_instance(
                &client,
                &net_x,
                &InstancePolicy {
                    hosts: vec![],
                    allow_connections: vec!["backend/9090".to_string()],
                    expose_ports: vec![],
                },
            )
            .expect("prepare frontend");

        // Both instances share netX's subnet, so no egress rule should
        // be synthesised (spec invariant 7: same-subnet not fenced).
        assert!(params.firewall_rules.is_empty());
    }

    #[test]
    fn remove_instance_is_noop_for_unknown_identity() {
        let (_dir, coordinator) = coordinator();
        let identity = InstanceIdent::new("svc", "sub", 0);
        assert!(coordinator.remove_instance(&identity).is_ok());
    }

    #[test]
    fn get_instances_lists_all_known_identities() {
        let (_dir, coordinator) = coordinator();
        let net_x = NetworkId::new("netX");
        coordinator
            .reconcile_node_providers(&NodeId::new("nodeA"), std::slice::from_ref(&net_x))
            .expect("reconcile");

        let a = InstanceIdent::new("svc", "sub", 0);
        let b = InstanceIdent::new("svc", "sub", 1);
        coordinator
            .prepare_instance(&a, &net_x, &InstancePolicy::default())
            .expect("prepare a");
        coordinator
            .prepare_instance(&b, &net_x, &InstancePolicy::default())
            .expect("prepare b");

        let all = coordinator.get_instances();
        assert_eq!(all.len(), 2);
        assert!(all.contains(&a));
        assert!(all.contains(&b));
    }

    #[test]
    fn coordinator_config_default_is_usable() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.host_prefix_len, 24);
        assert!(matches!(config.aggregate(), IpNet::V4(_)));
    }

    #[test]
    fn provider_bindings_lists_every_node_on_a_network() {
        let (_dir, coordinator) = coordinator();
        let net_x = NetworkId::new("netX");
        coordinator
            .reconcile_node_providers(&NodeId::new("nodeA"), std::slice::from_ref(&net_x))
            .expect("reconcile a");
        coordinator
            .reconcile_node_providers(&NodeId::new("nodeB"), std::slice::from_ref(&net_x))
            .expect("reconcile b");

        let bindings = coordinator.provider_bindings(&net_x);
        assert_eq!(bindings.len(), 2);
    }

    #[test]
    fn startup_reseeds_instances_and_bindings_from_storage() {
        let dir = tempfile::tempdir().expect("tempdir");
        let dns_ip = IpAddr::V4(Ipv4Addr::new(10, 10, 0, 1));
        let aggregate: Ipv4Net = "10.80.0.0/16".parse().expect("aggregate");
        let storage = std::sync::Arc::new(InMemoryNetworkStorage::new());
        let net_x = NetworkId::new("netX");
        let node_a = NodeId::new("nodeA");

        {
            let allocator = Ipam::new(aggregate, 24).expect("ipam");
            let dns = DnsRegistry::new(dir.path(), dns_ip, Box::new(LoggingResolverControl))
                .expect("dns");
            let coordinator = NetworkCoordinator::new(
                dns_ip,
                Box::new(allocator),
                Box::new(CryptoVlanPicker),
                dns,
                storage.clone(),
                Box::new(LoggingNodeManager),
            )
            .expect("coordinator");

            coordinator
                .reconcile_node_providers(&node_a, std::slice::from_ref(&net_x))
                .expect("reconcile");
            coordinator
                .prepare_instance(
                    &InstanceIdent::new("svc", "sub", 0),
                    &net_x,
                    &InstancePolicy::default(),
                )
                .expect("prepare");
        }

        // Rebuild a fresh coordinator from the same storage; it must
        // reconstruct both the binding and the instance, and reseed the
        // allocator so neither IP can be handed out again.
        let allocator = Ipam::new(aggregate, 24).expect("ipam");
        let dns = DnsRegistry::new(dir.path(), dns_ip, Box::new(LoggingResolverControl))
            .expect("dns");
        let restarted = NetworkCoordinator::new(
            dns_ip,
            Box::new(allocator),
            Box::new(CryptoVlanPicker),
            dns,
            storage,
            Box::new(LoggingNodeManager),
        )
        .expect("restarted coordinator");

        let identity = InstanceIdent::new("svc", "sub", 0);
        let restored = restarted.lookup_instance(&identity).expect("instance restored");
        assert_eq!(restored.network_id, net_x);

        let bindings = restarted.provider_bindings(&net_x);
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].node_id, node_a);

        // Neither the gateway IP nor the instance IP should be handed
        // out to a freshly prepared instance on the same network.
        let other = restarted
            .prepare_instance(
                &InstanceIdent::new("svc", "sub", 1),
                &net_x,
                &InstancePolicy::default(),
            )
            .expect("prepare new instance");
        assert_ne!(other.ip, restored.ip);
        assert_ne!(other.ip, bindings[0].ip);
    }

    #[test]
    fn malformed_expose_ports_is_rejected() {
        let (_dir, coordinator) = coordinator();
        let net_x = NetworkId::new("netX");
        coordinator
            .reconcile_node_providers(&NodeId::new("nodeA"), std::slice::from_ref(&net_x))
            .expect("reconcile");

        let identity = InstanceIdent::new("svc", "sub", 0);
        let policy = InstancePolicy {
            hosts: vec![],
            allow_connections: vec![],
            expose_ports: vec!["not-a-port".to_string()],
        };

        let result = coordinator.prepare_instance(&identity, &net_x, &policy);
        assert!(matches!(result, Err(NetCoreError::MalformedPolicy { .. })));
    }
}
