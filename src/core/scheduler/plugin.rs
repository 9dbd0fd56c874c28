use std::collections::HashMap;

use lazy_static::lazy_static;

use crate::core::node::TaintEffect;
use crate::core::pod::Pod;
use crate::core::snapshot::NodeInfo;

pub enum PluginType {
    FilterPlugin(Box<dyn FilterPlugin>),
    ScorePlugin(Box<dyn ScorePlugin>),
}

lazy_static! {
    pub static ref PLUGIN_REGISTRY: HashMap<&'static str, PluginType> = {
        HashMap::from([
            ("Fit", PluginType::FilterPlugin(Box::new(Fit {}))),
            (
                "NodeUnschedulable",
                PluginType::FilterPlugin(Box::new(NodeUnschedulable {})),
            ),
            (
                "TaintToleration",
                PluginType::FilterPlugin(Box::new(TaintToleration {})),
            ),
            (
                "NodeSelector",
                PluginType::FilterPlugin(Box::new(NodeSelector {})),
            ),
            (
                "LeastAllocatedResources",
                PluginType::ScorePlugin(Box::new(LeastAllocatedResources {})),
            ),
        ])
    };
}

pub trait FilterPlugin: Send + Sync {
    fn fits(&self, pod: &Pod, node: &NodeInfo) -> bool;

    fn filter<'a>(&self, pod: &Pod, nodes: Vec<&'a NodeInfo>) -> Vec<&'a NodeInfo> {
        nodes
            .into_iter()
            .filter(|&node| self.fits(pod, node))
            .collect()
    }
}

pub trait ScorePlugin: Send + Sync {
    fn score(&self, pod: &Pod, node: &NodeInfo) -> f64;
}

// Fit is a plugin that checks if a node has sufficient resources.
pub struct Fit {}
impl FilterPlugin for Fit {
    fn fits(&self, pod: &Pod, node: &NodeInfo) -> bool {
        pod.requests().fits_into(&node.node.status.allocatable)
    }
}

pub struct NodeUnschedulable {}
impl FilterPlugin for NodeUnschedulable {
    fn fits(&self, _pod: &Pod, node: &NodeInfo) -> bool {
        !node.node.spec.unschedulable
    }
}

// Every NoSchedule and NoExecute taint of a node should be tolerated by the pod.
pub struct TaintToleration {}
impl FilterPlugin for TaintToleration {
    fn fits(&self, pod: &Pod, node: &NodeInfo) -> bool {
        node.node
            .spec
            .taints
            .iter()
            .filter(|taint| taint.effect != TaintEffect::PreferNoSchedule)
            .all(|taint| {
                pod.spec
                    .tolerations
                    .iter()
                    .any(|toleration| toleration.tolerates(taint))
            })
    }
}

pub struct NodeSelector {}
impl FilterPlugin for NodeSelector {
    fn fits(&self, pod: &Pod, node: &NodeInfo) -> bool {
        pod.spec
            .node_selector
            .iter()
            .all(|(key, value)| node.node.metadata.labels.get(key) == Some(value))
    }
}

// Least requested resources plugin is a score plugin. Its score means that after subtracting pod's
// requested resources from node's allocatable resources, the node with the highest
// percentage (relatively to current allocatable) is prioritized for scheduling.
//
// Weights for cpu and memory are equal by default.
pub struct LeastAllocatedResources {}
impl ScorePlugin for LeastAllocatedResources {
    fn score(&self, pod: &Pod, node: &NodeInfo) -> f64 {
        let requests = pod.requests();
        let allocatable = &node.node.status.allocatable;
        let cpu_score = if allocatable.cpu == 0 {
            0.0
        } else {
            allocatable.cpu.saturating_sub(requests.cpu) as f64 * 100.0 / allocatable.cpu as f64
        };
        let ram_score = if allocatable.ram == 0 {
            0.0
        } else {
            allocatable.ram.saturating_sub(requests.ram) as f64 * 100.0 / allocatable.ram as f64
        };
        (cpu_score + ram_score) / 2.0
    }
}
