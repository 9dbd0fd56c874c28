use crate::core::pod::Pod;
use crate::core::snapshot::NodeInfo;

#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleError {
    NoNodesInCluster,
    /// Names of filter plugins which rejected at least one node.
    NoSufficientNodes { failed_plugins: Vec<String> },
}

// Trait which should implement any scheduler in the simulator.
pub trait PodSchedulingAlgorithm {
    // A method to assign a node on which the pod will be executed.
    // Returns Result consisting of name of assigned node or scheduling error.
    fn schedule_one(&self, pod: &Pod, nodes: &[&NodeInfo]) -> Result<String, ScheduleError>;

    // Runs only filtering stage for a single node. Returns the name of the first plugin which
    // rejected the node.
    fn check_node(&self, pod: &Pod, node: &NodeInfo) -> Result<(), String>;
}
