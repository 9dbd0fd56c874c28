//! Implementation of kube-scheduler algorithm which picks a node for a pod with filter and score
//! plugins.

use std::collections::HashMap;

use log::error;

use crate::core::pod::Pod;
use crate::core::scheduler::interface::{PodSchedulingAlgorithm, ScheduleError};
use crate::core::scheduler::plugin::{PluginType, PLUGIN_REGISTRY};
use crate::core::snapshot::NodeInfo;

pub const DEFAULT_SCHEDULER_NAME: &str = "default_scheduler";
pub const SCHEDULER_NAME_LABEL: &str = "scheduler_name";

pub struct KubeScheduler {
    // Profiles are scheduling profiles that kube-scheduler supports. Pods can
    // choose to be scheduled under a particular profile by setting its associated
    // scheduler name in labels. Pods that don't specify any scheduler name are scheduled
    // with the "default_scheduler" profile, if present here.
    pub config: KubeSchedulerConfig,
}

pub struct KubeSchedulerConfig {
    // Map from scheduler name to scheduler profile
    pub profiles: HashMap<String, KubeSchedulerProfile>,
}

pub struct KubeSchedulerProfile {
    pub scheduler_name: String,
    pub plugins: Plugins,
}

pub struct Plugins {
    // Each extension point is a list of enabled plugins which are registered globally in plugin registry.
    pub filter: Vec<Plugin>,
    pub score: Vec<Plugin>,
}

// Plugin specifies a plugin name and its weight when applicable.
pub struct Plugin {
    pub name: String,
    // Weight is used only for Score plugins.
    pub weight: Option<f64>,
}

pub fn default_kube_scheduler_config() -> KubeSchedulerConfig {
    let scheduler_name = DEFAULT_SCHEDULER_NAME.to_string();
    let filter = ["NodeUnschedulable", "TaintToleration", "NodeSelector", "Fit"]
        .into_iter()
        .map(|name| Plugin {
            name: name.to_string(),
            weight: None,
        })
        .collect();
    let default_profile = KubeSchedulerProfile {
        scheduler_name: scheduler_name.clone(),
        plugins: Plugins {
            filter,
            score: vec![Plugin {
                name: "LeastAllocatedResources".to_string(),
                weight: Some(1.0),
            }],
        },
    };
    KubeSchedulerConfig {
        profiles: HashMap::from([(scheduler_name, default_profile)]),
    }
}

impl Default for KubeScheduler {
    fn default() -> Self {
        Self::new(default_kube_scheduler_config())
    }
}

impl KubeScheduler {
    pub fn new(config: KubeSchedulerConfig) -> Self {
        Self { config }
    }

    fn profile(&self, pod: &Pod) -> Option<&KubeSchedulerProfile> {
        let pod_scheduler = pod
            .metadata
            .labels
            .get(SCHEDULER_NAME_LABEL)
            .map(|name| name.as_str())
            .unwrap_or(DEFAULT_SCHEDULER_NAME);
        self.config
            .profiles
            .get(pod_scheduler)
            .or_else(|| self.config.profiles.get(DEFAULT_SCHEDULER_NAME))
    }

    fn filter<'a>(
        &self,
        profile: &KubeSchedulerProfile,
        pod: &Pod,
        nodes: Vec<&'a NodeInfo>,
        failed_plugins: &mut Vec<String>,
    ) -> Vec<&'a NodeInfo> {
        let mut filtered_nodes = nodes;

        for filter in profile.plugins.filter.iter() {
            match PLUGIN_REGISTRY.get(&filter.name as &str) {
                Some(PluginType::FilterPlugin(filter_plugin)) => {
                    let before = filtered_nodes.len();
                    filtered_nodes = filter_plugin.filter(pod, filtered_nodes);
                    if filtered_nodes.len() < before {
                        failed_plugins.push(filter.name.clone());
                    }
                }
                _ => error!("{:?} plugin is not registered as filter plugin", filter.name),
            }
            if filtered_nodes.is_empty() {
                break;
            }
        }

        filtered_nodes
    }
}

impl PodSchedulingAlgorithm for KubeScheduler {
    fn schedule_one(&self, pod: &Pod, nodes: &[&NodeInfo]) -> Result<String, ScheduleError> {
        if nodes.is_empty() {
            return Err(ScheduleError::NoNodesInCluster);
        }
        let profile = match self.profile(pod) {
            Some(profile) => profile,
            None => return Err(ScheduleError::NoNodesInCluster),
        };

        let mut failed_plugins = vec![];
        let filtered_nodes = self.filter(profile, pod, nodes.to_vec(), &mut failed_plugins);
        if filtered_nodes.is_empty() {
            return Err(ScheduleError::NoSufficientNodes { failed_plugins });
        }

        let mut node_scores: Vec<f64> = vec![0.0; filtered_nodes.len()];
        for scorer in profile.plugins.score.iter() {
            match PLUGIN_REGISTRY.get(&scorer.name as &str) {
                Some(PluginType::ScorePlugin(score_plugin)) => {
                    let weight = scorer.weight.unwrap_or(1.0);
                    for (idx, node) in filtered_nodes.iter().enumerate() {
                        node_scores[idx] += score_plugin.score(pod, node) * weight;
                    }
                }
                _ => error!("{:?} plugin is not registered as score plugin", scorer.name),
            }
        }

        // Ties are resolved in favor of the first node in the given order.
        let mut best_idx = 0;
        for (idx, score) in node_scores.iter().enumerate() {
            if *score > node_scores[best_idx] {
                best_idx = idx;
            }
        }

        Ok(filtered_nodes[best_idx].name().to_string())
    }

    fn check_node(&self, pod: &Pod, node: &NodeInfo) -> Result<(), String> {
        let profile = match self.profile(pod) {
            Some(profile) => profile,
            None => return Err("NoSchedulerProfile".to_string()),
        };
        for filter in profile.plugins.filter.iter() {
            if let Some(PluginType::FilterPlugin(filter_plugin)) =
                PLUGIN_REGISTRY.get(&filter.name as &str)
            {
                if !filter_plugin.fits(pod, node) {
                    return Err(filter.name.clone());
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::core::node::Node;
    use crate::core::pod::Pod;
    use crate::core::scheduler::interface::{PodSchedulingAlgorithm, ScheduleError};
    use crate::core::scheduler::kube_scheduler::KubeScheduler;
    use crate::core::snapshot::NodeInfo;

    #[test]
    fn test_no_nodes_no_schedule() {
        let scheduler = KubeScheduler::default();
        let pod = Pod::new("pod_1".to_string(), 4000, 16000);
        assert_eq!(
            scheduler.schedule_one(&pod, &[]).err().unwrap(),
            ScheduleError::NoNodesInCluster
        );
    }

    #[test]
    fn test_no_sufficient_nodes_for_scheduling() {
        let scheduler = KubeScheduler::default();
        let pod = Pod::new("pod_1".to_string(), 6000, 12884901888);
        let node = NodeInfo::new(Node::new("node1".to_string(), 3000, 8589934592));
        assert_eq!(
            scheduler.schedule_one(&pod, &[&node]).err().unwrap(),
            ScheduleError::NoSufficientNodes {
                failed_plugins: vec!["Fit".to_string()]
            }
        );
        assert_eq!(scheduler.check_node(&pod, &node), Err("Fit".to_string()));
    }

    #[test]
    fn test_correct_pod_scheduling() {
        let _ = env_logger::try_init();

        let scheduler = KubeScheduler::default();
        let pod = Pod::new("pod_1".to_string(), 6000, 12884901888);
        let node1 = NodeInfo::new(Node::new("node1".to_string(), 8000, 14589934592));
        let node2 = NodeInfo::new(Node::new("node2".to_string(), 7000, 20589934592));
        let node3 = NodeInfo::new(Node::new("node3".to_string(), 6000, 100589934592));
        // scores
        // node1: ((8000 - 6000) * 100 / 8000 + (14589934592 - 12884901888) * 100 / 14589934592) / 2 = 18.34
        // node2: ((7000 - 6000) * 100 / 7000 + (20589934592 - 12884901888) * 100 / 20589934592) / 2 = 25.85
        // node3: ((6000 - 6000) * 100 / 6000 + (100589934592 - 12884901888) * 100 / 100589934592) / 2 = 43.59
        // node3 - max score - choose it for scheduling
        assert_eq!(
            scheduler
                .schedule_one(&pod, &[&node1, &node2, &node3])
                .unwrap(),
            "node3"
        );
    }
}
