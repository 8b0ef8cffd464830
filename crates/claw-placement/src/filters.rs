//! The fixed-order candidate filtering pipeline (spec §4.5.1).

use crate::error::{FilterStage, PlacementError, Result};
use crate::types::{InstanceDescriptor, NodeSnapshot, ServiceDescriptor};

/// Runners a node matches when it declares no runner list of its own.
pub const DEFAULT_RUNNERS: &[&str] = &["runc"];

/// Filters `candidates` down to nodes that support at least one of
/// `service.runners` (or `default_runners` if empty). A node with an
/// empty runner list matches exactly the default set.
///
/// `default_runners` is the caller's configured [`crate::engine::PlacementConfig::default_runners`]
/// (spec §4.5.1: `DefaultRunners`, "a configured constant list").
///
/// # Errors
///
/// Returns [`PlacementError::NoNode`] if no candidate survives.
pub fn filter_runners<'a>(
    candidates: &[&'a NodeSnapshot],
    service: &ServiceDescriptor,
    default_runners: &[String],
) -> Result<Vec<&'a NodeSnapshot>> {
    let requested: Vec<&str> = if service.runners.is_empty() {
        default_runners.iter().map(String::as_str).collect()
    } else {
        service.runners.iter().map(String::as_str).collect()
    };

    let survivors: Vec<&NodeSnapshot> = candidates
        .iter()
        .copied()
        .filter(|node| {
            let declared: Vec<&str> = if node.runners.is_empty() {
                default_runners.iter().map(String::as_str).collect()
            } else {
                node.runners.iter().map(String::as_str).collect()
            };
            requested.iter().any(|r| declared.contains(r))
        })
        .collect();

    if survivors.is_empty() {
        return Err(PlacementError::NoNode {
            stage: FilterStage::Runners,
            missing: requested.join(","),
        });
    }
    Ok(survivors)
}

/// Filters `candidates` down to nodes carrying every label in
/// `instance.labels`. An empty label request matches everything; nodes
/// with no labels never match a non-empty request.
///
/// # Errors
///
/// Returns [`PlacementError::NoNode`] if no candidate survives.
pub fn filter_labels<'a>(
    candidates: &[&'a NodeSnapshot],
    instance: &InstanceDescriptor,
) -> Result<Vec<&'a NodeSnapshot>> {
    if instance.labels.is_empty() {
        return Ok(candidates.to_vec());
    }

    let survivors: Vec<&NodeSnapshot> = candidates
        .iter()
        .copied()
        .filter(|node| instance.labels.iter().all(|l| node.labels.contains(l)))
        .collect();

    if survivors.is_empty() {
        return Err(PlacementError::NoNode {
            stage: FilterStage::Labels,
            missing: instance.labels.iter().cloned().collect::<Vec<_>>().join(","),
        });
    }
    Ok(survivors)
}

/// Filters `candidates` down to nodes carrying every resource tag in
/// `service.resources`. Same all-of semantics as [`filter_labels`].
///
/// # Errors
///
/// Returns [`PlacementError::NoNode`] if no candidate survives.
pub fn filter_resources<'a>(
    candidates: &[&'a NodeSnapshot],
    service: &ServiceDescriptor,
) -> Result<Vec<&'a NodeSnapshot>> {
    if service.resources.is_empty() {
        return Ok(candidates.to_vec());
    }

    let survivors: Vec<&NodeSnapshot> = candidates
        .iter()
        .copied()
        .filter(|node| service.resources.iter().all(|r| node.resources.contains(r)))
        .collect();

    if survivors.is_empty() {
        return Err(PlacementError::NoNode {
            stage: FilterStage::Resources,
            missing: service.resources.iter().cloned().collect::<Vec<_>>().join(","),
        });
    }
    Ok(survivors)
}

/// Filters `candidates` down to nodes with a free share of every
/// device named in `service.devices`.
///
/// # Errors
///
/// Returns [`PlacementError::NoNode`] if no candidate survives.
pub fn filter_devices<'a>(
    candidates: &[&'a NodeSnapshot],
    service: &ServiceDescriptor,
) -> Result<Vec<&'a NodeSnapshot>> {
    if service.devices.is_empty() {
        return Ok(candidates.to_vec());
    }

    let survivors: Vec<&NodeSnapshot> = candidates
        .iter()
        .copied()
        .filter(|node| {
            service.devices.iter().all(|name| {
                node.device(name)
                    .is_some_and(super::types::Device::has_free_share)
            })
        })
        .collect();

    if survivors.is_empty() {
        return Err(PlacementError::NoNode {
            stage: FilterStage::Devices,
            missing: service.devices.join(","),
        });
    }
    Ok(survivors)
}

/// Runs the full fixed-order pipeline: runners, labels, resources,
/// devices. Each stage narrows (or errors out) the candidate set.
///
/// # Errors
///
/// Returns [`PlacementError::NoNode`] naming the first stage that
/// empties the candidate set.
pub fn filter_candidates<'a>(
    candidates: &[&'a NodeSnapshot],
    service: &ServiceDescriptor,
    instance: &InstanceDescriptor,
    default_runners: &[String],
) -> Result<Vec<&'a NodeSnapshot>> {
    let survivors = filter_runners(candidates, service, default_runners)?;
    let survivors = filter_labels(&survivors, instance)?;
    let survivors = filter_resources(&survivors, service)?;
    filter_devices(&survivors, service)
}


#[cfg(test)]
mod proptests {
    use std::collections::HashSet;

    use claw_netcore::NodeId;
    use proptest::prelude::*;

    use super::*;
    use crate::types::InstanceDescriptor;

    fn labelled_node(id: &str, labels: &[&str]) -> NodeSnapshot {
        NodeSnapshot {
            node_id: NodeId::new(id),
            node_type: "worker".to_string(),
            priority: 1,
            labels: labels.iter().map(|l| (*l).to_string()).collect(),
            resources: HashSet::new(),
            devices: Vec::new(),
            runners: Vec::new(),
            is_local: false,
        }
    }

    fn survivor_count(nodes: &[&NodeSnapshot], instance: &InstanceDescriptor) -> usize {
        match filter_labels(nodes, instance) {
            Ok(survivors) => survivors.len(),
            Err(_) => 0,
        }
    }

    proptest! {
        /// Filter monotonicity (spec §8): dropping a label from a node
        /// can only shrink, never grow, how many candidates survive the
        /// label filter against the same request.
        #[test]
        fn removing_a_node_label_never_grows_the_survivor_set(
            label_count in 1usize..4,
            drop_index in 0usize..4,
        ) {
            let all_labels: Vec<String> = (0..label_count).map(|i| format!("label-{i}")).collect();
            let label_refs: Vec<&str> = all_labels.iter().map(String::as_str).collect();

            let full = labelled_node("full", &label_refs);

            let drop_index = drop_index % label_count;
            let shrunk_labels: Vec<&str> = label_refs
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != drop_index)
                .map(|(_, l)| *l)
                .collect();
            let shrunk = labelled_node("shrunk", &shrunk_labels);

            let instance = InstanceDescriptor {
                labels: all_labels.iter().cloned().collect(),
                ..Default::default()
            };

            let before = survivor_count(&[&full], &instance);
            let after = survivor_count(&[&shrunk], &instance);
            prop_assert!(after <= before);
        }
    }
}
