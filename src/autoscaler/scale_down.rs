//! Scale-down of underutilized autoscaled nodes.
//!
//! A node is removed when all of the following holds:
//!   1) It belongs to the autoscaler (`origin=cluster autoscaler` label).
//!   2) Max of cpu and memory requests divided by capacity is below the threshold.
//!   3) It hosts no pods consuming a ProvisioningRequest, booked capacity stays.
//!   4) All its pods can be moved to other nodes.
//! Moved pods are kept on their new nodes in the snapshot, so later candidates see them.

use log::{debug, info};

use crate::autoscaler::interface::{
    AutoscalerError, AutoscalingContext, CLUSTER_AUTOSCALER_ORIGIN_LABEL, NODE_GROUP_LABEL,
    ORIGIN_LABEL,
};
use crate::core::snapshot::NodeInfo;
use crate::provreq::provisioning_request::is_provisioning_request_pod;

pub struct ScaleDownPlanner {
    utilization_threshold: f64,
}

/// Max of per resource utilization, where utilization is the sum of requests divided by
/// capacity.
pub fn node_utilization(node_info: &NodeInfo) -> f64 {
    let capacity = node_info.node.status.capacity;
    let requested = node_info.requested();
    let cpu = if capacity.cpu == 0 {
        0.0
    } else {
        requested.cpu as f64 / capacity.cpu as f64
    };
    let ram = if capacity.ram == 0 {
        0.0
    } else {
        requested.ram as f64 / capacity.ram as f64
    };
    f64::max(cpu, ram)
}

impl ScaleDownPlanner {
    pub fn new(utilization_threshold: f64) -> Self {
        Self {
            utilization_threshold,
        }
    }

    fn is_candidate(&self, node_info: &NodeInfo) -> bool {
        let labels = &node_info.node.metadata.labels;
        if labels.get(ORIGIN_LABEL).map(String::as_str) != Some(CLUSTER_AUTOSCALER_ORIGIN_LABEL) {
            return false;
        }
        if node_info.pods.iter().any(is_provisioning_request_pod) {
            debug!(
                "Node {} hosts booked ProvisioningRequest pods",
                node_info.name()
            );
            return false;
        }
        node_utilization(node_info) < self.utilization_threshold
    }

    /// Removes underutilized nodes from the snapshot and returns their names. Node group counters
    /// are decremented for every removed node.
    pub fn plan(&mut self, ctx: &mut AutoscalingContext) -> Result<Vec<String>, AutoscalerError> {
        let candidates: Vec<String> = ctx
            .snapshot
            .list_node_infos()
            .into_iter()
            .filter(|node_info| self.is_candidate(node_info))
            .map(|node_info| node_info.name().to_string())
            .collect();

        let mut removed = vec![];
        for node_name in candidates.into_iter() {
            // Earlier removals may have moved pods onto this node.
            match ctx.snapshot.get_node_info(&node_name) {
                Ok(node_info) if self.is_candidate(node_info) => {}
                _ => continue,
            }
            let mut snapshot = ctx.snapshot.fork_scope();
            let node_info = snapshot.remove_node(&node_name)?;
            let pods: Vec<_> = node_info
                .pods
                .into_iter()
                .map(|mut pod| {
                    pod.status.assigned_node.clear();
                    pod
                })
                .collect();
            let mut all_moved = true;
            for pod in pods.iter() {
                match snapshot.schedule_pod_on_any_node_matching(pod, &|_: &NodeInfo| true) {
                    Ok(_) => {}
                    Err(err) if err.is_internal() => return Err(AutoscalerError::from(err)),
                    Err(_) => {
                        all_moved = false;
                        break;
                    }
                }
            }
            if !all_moved {
                debug!(
                    "Cannot scale down node {} as not all pods can be moved to other nodes",
                    node_name
                );
                continue;
            }
            snapshot.commit();

            if let Some(group) = node_info
                .node
                .metadata
                .labels
                .get(NODE_GROUP_LABEL)
                .and_then(|group| ctx.node_groups.get_mut(group))
            {
                group.current_count = group.current_count.saturating_sub(1);
            }
            info!("Scaling down node {}", node_name);
            removed.push(node_name);
        }
        Ok(removed)
    }
}
