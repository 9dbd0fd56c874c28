//! Forkable in-memory view of nodes and pods bound to them. Scheduling simulations run against
//! the snapshot: pods are placed with the same filter plugins the scheduler uses, and a fork
//! can be reverted to drop every change made since it was taken.

use std::collections::{BTreeMap, HashMap};
use std::ops::{Deref, DerefMut};

use log::warn;
use thiserror::Error;

use crate::core::common::RuntimeResources;
use crate::core::node::Node;
use crate::core::pod::Pod;
use crate::core::scheduler::interface::{PodSchedulingAlgorithm, ScheduleError};
use crate::core::scheduler::kube_scheduler::KubeScheduler;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchedulingError {
    /// The pod does not pass scheduling predicates. Recoverable: callers try other nodes.
    #[error("pod {pod} cannot be scheduled: {reasons:?}")]
    FailingPredicate { pod: String, reasons: Vec<String> },
    /// Snapshot is in an unexpected state.
    #[error("internal snapshot error: {0}")]
    Internal(String),
}

impl SchedulingError {
    pub fn is_internal(&self) -> bool {
        matches!(self, SchedulingError::Internal(_))
    }
}

/// Node together with the pods bound to it. `node.status.allocatable` always reflects resources
/// left after subtracting requests of bound pods.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeInfo {
    pub node: Node,
    pub pods: Vec<Pod>,
}

impl NodeInfo {
    pub fn new(mut node: Node) -> Self {
        node.reset_allocatable();
        Self { node, pods: vec![] }
    }

    pub fn name(&self) -> &str {
        &self.node.metadata.name
    }

    pub fn requested(&self) -> RuntimeResources {
        self.node
            .status
            .capacity
            .saturating_sub(&self.node.status.allocatable)
    }

    fn add_pod(&mut self, mut pod: Pod) {
        self.node.status.allocatable = self
            .node
            .status
            .allocatable
            .saturating_sub(&pod.requests());
        pod.status.assigned_node = self.node.metadata.name.clone();
        self.pods.push(pod);
    }

    fn remove_pod(&mut self, namespace: &str, name: &str) -> Option<Pod> {
        let idx = self
            .pods
            .iter()
            .position(|pod| pod.metadata.namespace == namespace && pod.metadata.name == name)?;
        let pod = self.pods.remove(idx);
        self.node.status.allocatable = self
            .node
            .status
            .allocatable
            .saturating_add(&pod.requests());
        Some(pod)
    }
}

#[derive(Default, Clone)]
struct SnapshotData {
    node_infos: BTreeMap<String, NodeInfo>,
    // <namespace/name of pod, node name>
    pod_locations: HashMap<String, String>,
}

pub struct ClusterSnapshot {
    // The last element is the current state, all others are states saved by `fork`.
    layers: Vec<SnapshotData>,
    scheduling_algorithm: Box<dyn PodSchedulingAlgorithm>,
}

impl Default for ClusterSnapshot {
    fn default() -> Self {
        Self::new(Box::new(KubeScheduler::default()))
    }
}

fn pod_key(pod: &Pod) -> String {
    pod.metadata.key()
}

impl ClusterSnapshot {
    pub fn new(scheduling_algorithm: Box<dyn PodSchedulingAlgorithm>) -> Self {
        Self {
            layers: vec![SnapshotData::default()],
            scheduling_algorithm,
        }
    }

    /// Clears the snapshot and fills it with given nodes and pods already bound to them.
    /// Pods bound to unknown nodes are skipped.
    pub fn initialize(&mut self, nodes: Vec<Node>, scheduled_pods: Vec<Pod>) {
        self.layers = vec![SnapshotData::default()];
        for node in nodes {
            if let Err(err) = self.add_node(node) {
                warn!("skipping node during snapshot initialization: {}", err);
            }
        }
        for pod in scheduled_pods {
            let node_name = pod.status.assigned_node.clone();
            if let Err(err) = self.add_pod(pod, &node_name) {
                warn!("skipping pod during snapshot initialization: {}", err);
            }
        }
    }

    fn data(&self) -> &SnapshotData {
        // There is always at least one layer.
        &self.layers[self.layers.len() - 1]
    }

    fn data_mut(&mut self) -> &mut SnapshotData {
        let last = self.layers.len() - 1;
        &mut self.layers[last]
    }

    pub fn add_node(&mut self, node: Node) -> Result<(), SchedulingError> {
        let name = node.metadata.name.clone();
        let data = self.data_mut();
        if data.node_infos.contains_key(&name) {
            return Err(SchedulingError::Internal(format!(
                "node {} already exists in snapshot",
                name
            )));
        }
        data.node_infos.insert(name, NodeInfo::new(node));
        Ok(())
    }

    pub fn remove_node(&mut self, node_name: &str) -> Result<NodeInfo, SchedulingError> {
        let data = self.data_mut();
        let node_info = data.node_infos.remove(node_name).ok_or_else(|| {
            SchedulingError::Internal(format!("node {} not found in snapshot", node_name))
        })?;
        for pod in node_info.pods.iter() {
            data.pod_locations.remove(&pod_key(pod));
        }
        Ok(node_info)
    }

    pub fn get_node_info(&self, node_name: &str) -> Result<&NodeInfo, SchedulingError> {
        self.data().node_infos.get(node_name).ok_or_else(|| {
            SchedulingError::Internal(format!("node {} not found in snapshot", node_name))
        })
    }

    /// Node infos ordered by node name.
    pub fn list_node_infos(&self) -> Vec<&NodeInfo> {
        self.data().node_infos.values().collect()
    }

    pub fn node_count(&self) -> usize {
        self.data().node_infos.len()
    }

    /// Name of the node the pod is bound to.
    pub fn pod_location(&self, namespace: &str, name: &str) -> Option<&str> {
        self.data()
            .pod_locations
            .get(&format!("{}/{}", namespace, name))
            .map(|node| node.as_str())
    }

    /// Binds the pod to the node without running predicates.
    pub fn add_pod(&mut self, pod: Pod, node_name: &str) -> Result<(), SchedulingError> {
        let key = pod_key(&pod);
        let data = self.data_mut();
        if data.pod_locations.contains_key(&key) {
            return Err(SchedulingError::Internal(format!(
                "pod {} is already scheduled",
                key
            )));
        }
        let node_info = data.node_infos.get_mut(node_name).ok_or_else(|| {
            SchedulingError::Internal(format!("node {} not found in snapshot", node_name))
        })?;
        node_info.add_pod(pod);
        data.pod_locations.insert(key, node_name.to_string());
        Ok(())
    }

    pub fn unschedule_pod(
        &mut self,
        namespace: &str,
        name: &str,
        node_name: &str,
    ) -> Result<Pod, SchedulingError> {
        let data = self.data_mut();
        let node_info = data.node_infos.get_mut(node_name).ok_or_else(|| {
            SchedulingError::Internal(format!("node {} not found in snapshot", node_name))
        })?;
        let pod = node_info.remove_pod(namespace, name).ok_or_else(|| {
            SchedulingError::Internal(format!(
                "pod {}/{} is not scheduled on node {}",
                namespace, name, node_name
            ))
        })?;
        data.pod_locations.remove(&format!("{}/{}", namespace, name));
        Ok(pod)
    }

    /// Runs filter plugins for the pod against the node.
    pub fn check_predicates(&self, pod: &Pod, node_name: &str) -> Result<(), SchedulingError> {
        let node_info = self.get_node_info(node_name)?;
        self.scheduling_algorithm
            .check_node(pod, node_info)
            .map_err(|plugin| SchedulingError::FailingPredicate {
                pod: pod_key(pod),
                reasons: vec![format!("{} rejected node {}", plugin, node_name)],
            })
    }

    /// Checks predicates and binds the pod to the given node.
    pub fn schedule_pod(&mut self, pod: &Pod, node_name: &str) -> Result<(), SchedulingError> {
        if self.data().pod_locations.contains_key(&pod_key(pod)) {
            return Err(SchedulingError::Internal(format!(
                "pod {} is already scheduled",
                pod_key(pod)
            )));
        }
        self.check_predicates(pod, node_name)?;
        self.add_pod(pod.clone(), node_name)
    }

    /// Picks the best node among nodes accepted by `node_matches` that pass predicates and binds
    /// the pod to it. Returns name of the chosen node.
    pub fn schedule_pod_on_any_node_matching(
        &mut self,
        pod: &Pod,
        node_matches: &dyn Fn(&NodeInfo) -> bool,
    ) -> Result<String, SchedulingError> {
        if self.data().pod_locations.contains_key(&pod_key(pod)) {
            return Err(SchedulingError::Internal(format!(
                "pod {} is already scheduled",
                pod_key(pod)
            )));
        }
        let candidates: Vec<&NodeInfo> = self
            .data()
            .node_infos
            .values()
            .filter(|node_info| node_matches(node_info))
            .collect();

        let node_name = self
            .scheduling_algorithm
            .schedule_one(pod, &candidates)
            .map_err(|err| SchedulingError::FailingPredicate {
                pod: pod_key(pod),
                reasons: match err {
                    ScheduleError::NoNodesInCluster => vec!["no matching nodes".to_string()],
                    ScheduleError::NoSufficientNodes { failed_plugins } => failed_plugins,
                },
            })?;

        self.add_pod(pod.clone(), &node_name)?;
        Ok(node_name)
    }

    /// Saves the current state. Changes made after `fork` can be dropped with `revert` or kept
    /// with `commit`.
    pub fn fork(&mut self) {
        let current = self.data().clone();
        self.layers.push(current);
    }

    /// Drops all changes since the last `fork`. No-op when there is no fork.
    pub fn revert(&mut self) {
        if self.layers.len() > 1 {
            self.layers.pop();
        }
    }

    /// Applies changes made since the last `fork` to the previous state.
    pub fn commit(&mut self) {
        if self.layers.len() > 1 {
            if let Some(current) = self.layers.pop() {
                let last = self.layers.len() - 1;
                self.layers[last] = current;
            }
        }
    }

    pub fn fork_depth(&self) -> usize {
        self.layers.len() - 1
    }

    /// Forks the snapshot and returns a guard which reverts the fork when dropped unless
    /// `ForkGuard::commit` is called.
    pub fn fork_scope(&mut self) -> ForkGuard<'_> {
        self.fork();
        ForkGuard {
            snapshot: self,
            committed: false,
        }
    }
}

pub struct ForkGuard<'a> {
    snapshot: &'a mut ClusterSnapshot,
    committed: bool,
}

impl ForkGuard<'_> {
    pub fn commit(mut self) {
        self.snapshot.commit();
        self.committed = true;
    }
}

impl Deref for ForkGuard<'_> {
    type Target = ClusterSnapshot;

    fn deref(&self) -> &ClusterSnapshot {
        self.snapshot
    }
}

impl DerefMut for ForkGuard<'_> {
    fn deref_mut(&mut self) -> &mut ClusterSnapshot {
        self.snapshot
    }
}

impl Drop for ForkGuard<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.snapshot.revert();
        }
    }
}
