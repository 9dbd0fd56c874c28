//! Config fields definitions for provisioning request simulation

use serde::Deserialize;

use crate::autoscaler::cluster_autoscaler::ClusterAutoscalerConfig;
use crate::core::node::Node;
use crate::metrics::printer::MetricsPrinterConfig;
use crate::provreq::ProvisioningRequestConfig;

#[derive(Debug, Deserialize, PartialEq)]
pub struct SimulationConfig {
    pub sim_name: String,
    #[serde(default)]
    pub seed: u64,
    /// If not set default output of logs is stdout/stderr
    pub logs_filepath: Option<String>,
    #[serde(default = "scheduling_cycle_interval_default")]
    pub scheduling_cycle_interval: f64, // in seconds
    /// Delay of autoscaler requests to persistent storage, e.g. node removal.
    #[serde(default)]
    pub ca_to_ps_network_delay: f64,
    /// Time from scale-up decision until a new node joins the cluster.
    #[serde(default = "node_provisioning_time_default")]
    pub node_provisioning_time: f64,
    pub default_cluster: Option<Vec<NodeGroup>>,
    #[serde(default)]
    pub cluster_autoscaler: ClusterAutoscalerConfig,
    #[serde(default)]
    pub provisioning_request: ProvisioningRequestConfig,
    pub metrics_printer: Option<MetricsPrinterConfig>,
}

fn scheduling_cycle_interval_default() -> f64 {
    1.0
}

fn node_provisioning_time_default() -> f64 {
    30.0
}

#[derive(Clone, Default, Debug, Deserialize, PartialEq)]
pub struct NodeGroup {
    // If node count is not none and node's metadata has name, then it's taken as a prefix of all nodes
    // in a group.
    // If node count is none or 1 and node's metadata has name, then it's a single node and its name is set
    // to metadata name.
    // If metadata has got no name, then prefix default_node(_<idx>)? is used.
    pub node_count: Option<u64>,
    pub node_template: Node,
}

impl NodeGroup {
    /// Nodes of the group named according to the rules above. `total_nodes` is the counter of
    /// nodes created so far for prefixed names.
    pub fn nodes(&self, total_nodes: &mut u64) -> Vec<Node> {
        let node_count = self.node_count.unwrap_or(1);
        let template_name = &self.node_template.metadata.name;
        if node_count == 1 && !template_name.is_empty() {
            return vec![self.node_template.clone()];
        }
        let name_prefix = if template_name.is_empty() {
            "default_node"
        } else {
            template_name.as_str()
        };
        (0..node_count)
            .map(|_| {
                let mut node = self.node_template.clone();
                node.metadata.name = format!("{}_{}", name_prefix, total_nodes);
                *total_nodes += 1;
                node
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::config::{NodeGroup, SimulationConfig};
    use crate::core::node::Node;

    #[test]
    fn test_config_defaults() {
        let config: SimulationConfig = serde_yaml::from_str(
            r#"
sim_name: "provreq"
"#,
        )
        .unwrap();
        assert_eq!(config.seed, 0);
        assert_eq!(config.scheduling_cycle_interval, 1.0);
        assert!(config.cluster_autoscaler.enabled);
        assert_eq!(config.cluster_autoscaler.scan_interval, 10.0);
        assert!(config.provisioning_request.enabled);
        assert_eq!(config.provisioning_request.initial_backoff_time, 60.0);
        assert_eq!(config.provisioning_request.max_backoff_time, 600.0);
        assert_eq!(config.provisioning_request.max_backoff_cache_size, 1000);
        assert_eq!(config.provisioning_request.reservation_time, 600.0);
        assert_eq!(config.provisioning_request.expiration_time, 604800.0);
        assert_eq!(config.provisioning_request.terminal_retention_time, 604800.0);
        assert_eq!(config.provisioning_request.max_updated_per_loop, 20);
        assert_eq!(config.provisioning_request.max_ignored_pod_events, 50);
        assert_eq!(config.provisioning_request.processor_instance, "");
        assert_eq!(config.provisioning_request.request_timeout, 4.0);
    }

    #[test]
    fn test_node_group_naming() {
        let mut total = 0;
        let single = NodeGroup {
            node_count: None,
            node_template: Node::new("master".to_string(), 1, 1),
        };
        assert_eq!(single.nodes(&mut total)[0].metadata.name, "master");

        let prefixed = NodeGroup {
            node_count: Some(2),
            node_template: Node::new("worker".to_string(), 1, 1),
        };
        let names: Vec<String> = prefixed
            .nodes(&mut total)
            .into_iter()
            .map(|node| node.metadata.name)
            .collect();
        assert_eq!(names, vec!["worker_0", "worker_1"]);

        let unnamed = NodeGroup {
            node_count: Some(1),
            node_template: Node::new("".to_string(), 1, 1),
        };
        assert_eq!(unnamed.nodes(&mut total)[0].metadata.name, "default_node_2");
    }
}
