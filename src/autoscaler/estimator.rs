//! Estimates how many nodes of a node group are needed to host a list of pods. Every pod goes to
//! one of the template nodes opened so far, a new template node is opened only when none fits.
//! Nodes are added to a fork of the cluster snapshot, so estimation never changes the snapshot.

use std::collections::{BTreeMap, BTreeSet};

use log::debug;

use crate::autoscaler::interface::NodeGroup;
use crate::core::pod::Pod;
use crate::core::snapshot::{ClusterSnapshot, NodeInfo, SchedulingError};

#[derive(Debug, Clone, PartialEq)]
pub struct Estimate {
    pub node_group: String,
    pub node_count: u64,
    /// Pods which fit onto the new nodes, in input order.
    pub scheduled_pods: Vec<Pod>,
}

/// Packs pods onto at most `max_nodes` new nodes built from the group template.
pub fn estimate(
    snapshot: &mut ClusterSnapshot,
    group: &NodeGroup,
    pods: &[Pod],
    max_nodes: u64,
) -> Result<Estimate, SchedulingError> {
    let mut snapshot = snapshot.fork_scope();
    let mut new_nodes: BTreeSet<String> = BTreeSet::new();
    let mut scheduled_pods: Vec<Pod> = vec![];

    for pod in pods.iter() {
        if !new_nodes.is_empty() {
            match snapshot
                .schedule_pod_on_any_node_matching(pod, &|node_info: &NodeInfo| {
                    new_nodes.contains(node_info.name())
                }) {
                Ok(_) => {
                    scheduled_pods.push(pod.clone());
                    continue;
                }
                Err(SchedulingError::FailingPredicate { .. }) => {}
                Err(err) => return Err(err),
            }
        }
        if new_nodes.len() as u64 >= max_nodes {
            continue;
        }

        let mut node = group.node_template.clone();
        node.metadata.name = format!("{}-template-{}", group.name(), new_nodes.len());
        node.reset_allocatable();
        let node_name = node.metadata.name.clone();
        snapshot.add_node(node)?;
        match snapshot.schedule_pod(pod, &node_name) {
            Ok(()) => {
                new_nodes.insert(node_name);
                scheduled_pods.push(pod.clone());
            }
            Err(SchedulingError::FailingPredicate { .. }) => {
                // Pod does not fit even an empty template node.
                snapshot.remove_node(&node_name)?;
            }
            Err(err) => return Err(err),
        }
    }

    debug!(
        "Node group {} needs {} nodes for {} of {} pods",
        group.name(),
        new_nodes.len(),
        scheduled_pods.len(),
        pods.len()
    );
    Ok(Estimate {
        node_group: group.name().to_string(),
        node_count: new_nodes.len() as u64,
        scheduled_pods,
    })
}

/// Estimates for every node group which still has quota. `node_budget` bounds the number of new
/// nodes in every single estimate.
pub fn estimate_node_groups(
    snapshot: &mut ClusterSnapshot,
    node_groups: &BTreeMap<String, NodeGroup>,
    pods: &[Pod],
    node_budget: u64,
) -> Result<Vec<Estimate>, SchedulingError> {
    let mut estimates = vec![];
    for group in node_groups.values() {
        if !group.has_quota() {
            continue;
        }
        let max_nodes = u64::min(group.max_count - group.current_count, node_budget);
        if max_nodes == 0 {
            continue;
        }
        let estimate = estimate(snapshot, group, pods, max_nodes)?;
        if !estimate.scheduled_pods.is_empty() {
            estimates.push(estimate);
        }
    }
    Ok(estimates)
}

/// Option which helps most pods, then needs fewest nodes. Earlier options win ties.
pub fn best_option(estimates: Vec<Estimate>) -> Option<Estimate> {
    let mut best: Option<Estimate> = None;
    for estimate in estimates.into_iter() {
        let better = match &best {
            None => true,
            Some(current) => {
                estimate.scheduled_pods.len() > current.scheduled_pods.len()
                    || (estimate.scheduled_pods.len() == current.scheduled_pods.len()
                        && estimate.node_count < current.node_count)
            }
        };
        if better {
            best = Some(estimate);
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use crate::autoscaler::estimator::{best_option, estimate, estimate_node_groups};
    use crate::autoscaler::interface::NodeGroup;
    use crate::core::node::Node;
    use crate::core::pod::Pod;
    use crate::core::snapshot::ClusterSnapshot;

    fn group(name: &str, cpu: u32, max_count: u64) -> NodeGroup {
        NodeGroup {
            max_count,
            current_count: 0,
            total_allocated: 0,
            node_template: Node::new(name.to_string(), cpu, 4096),
        }
    }

    fn pods(count: usize, cpu: u32) -> Vec<Pod> {
        (0..count)
            .map(|i| Pod::new(format!("pod-{}", i), cpu, 100))
            .collect()
    }

    #[test]
    fn test_first_fit_packing() {
        let mut snapshot = ClusterSnapshot::default();
        let result = estimate(&mut snapshot, &group("small", 1000, 10), &pods(5, 400), 10).unwrap();
        assert_eq!(result.node_count, 3);
        assert_eq!(result.scheduled_pods.len(), 5);
        assert_eq!(snapshot.node_count(), 0);
        assert_eq!(snapshot.fork_depth(), 0);
    }

    #[test]
    fn test_node_limit_and_too_big_pods() {
        let mut snapshot = ClusterSnapshot::default();
        let mut input = pods(4, 600);
        input.push(Pod::new("huge".to_string(), 5000, 100));
        let result = estimate(&mut snapshot, &group("small", 1000, 10), &input, 2).unwrap();
        assert_eq!(result.node_count, 2);
        assert_eq!(result.scheduled_pods.len(), 2);
    }

    #[test]
    fn test_best_option() {
        let mut snapshot = ClusterSnapshot::default();
        let mut node_groups = BTreeMap::new();
        node_groups.insert("a-small".to_string(), group("a-small", 1000, 10));
        node_groups.insert("b-big".to_string(), group("b-big", 4000, 10));
        let mut full = group("c-full", 4000, 1);
        full.current_count = 1;
        node_groups.insert("c-full".to_string(), full);

        let estimates = estimate_node_groups(&mut snapshot, &node_groups, &pods(4, 900), 100).unwrap();
        assert_eq!(estimates.len(), 2);
        let best = best_option(estimates).unwrap();
        assert_eq!(best.node_group, "b-big");
        assert_eq!(best.node_count, 1);
    }
}
