//! Hinting simulator places lists of pods on a cluster snapshot. It remembers the node each pod
//! was last placed on and tries that node first on the next attempt, and it does not retry
//! pods which are equivalent to already unschedulable pods of the same controller.

use std::collections::{HashMap, HashSet};

use log::debug;

use crate::core::pod::Pod;
use crate::core::snapshot::{ClusterSnapshot, NodeInfo, SchedulingError};

/// Max number of distinct unschedulable pods remembered per controller.
pub const MAX_SIMILAR_PODS_PER_CONTROLLER: usize = 10;

const DAEMON_SET_KIND: &str = "DaemonSet";

/// Identity of a pod for hint lookups: uid if set, `<namespace>/<name>` otherwise.
pub fn hint_key(pod: &Pod) -> String {
    if pod.metadata.uid.is_empty() {
        pod.metadata.key()
    } else {
        pod.metadata.uid.clone()
    }
}

/// Acceptance predicate which admits every node.
pub fn schedule_anywhere(_node_info: &NodeInfo) -> bool {
    true
}

/// Two-generation map of pod identity to node name. Hints written since the last `drop_old`
/// survive one more generation.
#[derive(Default, Debug, Clone)]
pub struct Hints {
    current: HashMap<String, String>,
    old: HashMap<String, String>,
}

impl Hints {
    pub fn get(&self, key: &str) -> Option<&String> {
        self.current.get(key).or_else(|| self.old.get(key))
    }

    pub fn set(&mut self, key: String, node_name: String) {
        self.current.insert(key, node_name);
    }

    pub fn drop_old(&mut self) {
        self.old = std::mem::take(&mut self.current);
    }

    pub fn len(&self) -> usize {
        let mut keys: HashSet<&String> = self.current.keys().collect();
        keys.extend(self.old.keys());
        keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_empty() && self.old.is_empty()
    }
}

/// Pod placed during a single `try_schedule_pods` call.
#[derive(Debug, Clone, PartialEq)]
pub struct PodPlacement {
    pub pod: Pod,
    pub node_name: String,
}

#[derive(Default)]
struct SimilarPods {
    // Controller uid (or name when uid is missing) -> pods which failed to schedule.
    unschedulable: HashMap<String, Vec<Pod>>,
    overflowing_controllers: HashSet<String>,
}

fn controller_key(pod: &Pod) -> Option<String> {
    pod.metadata.controller_ref().map(|owner| {
        if owner.uid.is_empty() {
            format!("{}/{}/{}", owner.kind, pod.metadata.namespace, owner.name)
        } else {
            owner.uid.clone()
        }
    })
}

fn is_similar(pod: &Pod, other: &Pod) -> bool {
    pod.spec == other.spec && pod.metadata.labels == other.metadata.labels
}

impl SimilarPods {
    fn is_similar_unschedulable(&self, pod: &Pod) -> bool {
        match controller_key(pod) {
            Some(key) => self
                .unschedulable
                .get(&key)
                .map(|pods| pods.iter().any(|other| is_similar(pod, other)))
                .unwrap_or(false),
            None => false,
        }
    }

    fn set_unschedulable(&mut self, pod: &Pod) {
        let owner = match pod.metadata.controller_ref() {
            Some(owner) => owner,
            None => return,
        };
        if owner.kind == DAEMON_SET_KIND {
            return;
        }
        let key = match controller_key(pod) {
            Some(key) => key,
            None => return,
        };
        if self.overflowing_controllers.contains(&key) {
            return;
        }
        let pods = self.unschedulable.entry(key.clone()).or_default();
        if pods.len() >= MAX_SIMILAR_PODS_PER_CONTROLLER {
            self.overflowing_controllers.insert(key);
            return;
        }
        pods.push(pod.clone());
    }

    fn overflowing_controller_count(&self) -> usize {
        self.overflowing_controllers.len()
    }
}

#[derive(Default)]
pub struct HintingSimulator {
    hints: Hints,
}

impl HintingSimulator {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn hints(&self) -> &Hints {
        &self.hints
    }

    /// Tries to place pods in order. Returns placements that succeeded and the number of
    /// controllers which had too many distinct unschedulable pods to track. With
    /// `break_on_failure` iteration stops at the first pod which cannot be placed.
    ///
    /// Internal snapshot errors abort the call; placements made so far stay in the snapshot.
    pub fn try_schedule_pods(
        &mut self,
        snapshot: &mut ClusterSnapshot,
        pods: &[Pod],
        is_node_acceptable: &dyn Fn(&NodeInfo) -> bool,
        break_on_failure: bool,
    ) -> Result<(Vec<PodPlacement>, usize), SchedulingError> {
        let mut similar_pods = SimilarPods::default();
        let mut placements: Vec<PodPlacement> = vec![];

        for pod in pods.iter() {
            let mut node_name = self.try_schedule_using_hints(snapshot, pod, is_node_acceptable)?;

            if node_name.is_none() {
                if similar_pods.is_similar_unschedulable(pod) {
                    debug!(
                        "Pod {} is similar to an unschedulable pod, skipping",
                        pod.metadata.key()
                    );
                } else {
                    match snapshot.schedule_pod_on_any_node_matching(pod, is_node_acceptable) {
                        Ok(name) => {
                            self.hints.set(hint_key(pod), name.clone());
                            node_name = Some(name);
                        }
                        Err(SchedulingError::FailingPredicate { .. }) => {
                            similar_pods.set_unschedulable(pod);
                        }
                        Err(err) => return Err(err),
                    }
                }
            }

            match node_name {
                Some(node_name) => placements.push(PodPlacement {
                    pod: pod.clone(),
                    node_name,
                }),
                None => {
                    if break_on_failure {
                        break;
                    }
                }
            }
        }

        Ok((placements, similar_pods.overflowing_controller_count()))
    }

    fn try_schedule_using_hints(
        &mut self,
        snapshot: &mut ClusterSnapshot,
        pod: &Pod,
        is_node_acceptable: &dyn Fn(&NodeInfo) -> bool,
    ) -> Result<Option<String>, SchedulingError> {
        let key = hint_key(pod);
        let hinted_node = match self.hints.get(&key) {
            Some(node_name) => node_name.clone(),
            None => return Ok(None),
        };

        // Hinted node may be gone from the snapshot.
        match snapshot.get_node_info(&hinted_node) {
            Ok(node_info) => {
                if !is_node_acceptable(node_info) {
                    return Ok(None);
                }
            }
            Err(_) => return Ok(None),
        }

        match snapshot.schedule_pod(pod, &hinted_node) {
            Ok(()) => {
                self.hints.set(key, hinted_node.clone());
                Ok(Some(hinted_node))
            }
            Err(SchedulingError::FailingPredicate { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Must be called at most once per autoscaler loop.
    pub fn drop_old_hints(&mut self) {
        self.hints.drop_old();
    }
}
