//! Simulation component which runs the autoscaler loop every `scan_interval` seconds.
//!
//! The loop reads the cluster state from persistent storage directly, so it is always in sync.
//! Its decisions travel back as `CreateNodeRequest` and `RemoveNodeRequest` events. A new node
//! appears in storage after `node_provisioning_time`, until then the loop accounts it as upcoming.
//! There is no guarantee that pods which triggered scale-up are placed onto the new nodes, the
//! scheduler decides on its own.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

use dslab_core::{log_debug, log_error, log_info, Event, EventHandler, SimulationContext};
use serde::Deserialize;

use crate::autoscaler::interface::{AutoscalerError, NodeGroup};
use crate::autoscaler::static_autoscaler::StaticAutoscaler;
use crate::cast_box;
use crate::config::SimulationConfig;
use crate::core::common::SimComponentId;
use crate::core::events::{CreateNodeRequest, RemoveNodeRequest, RunClusterAutoscalerCycle};
use crate::core::persistent_storage::StorageData;
use crate::metrics::collector::MetricsCollector;

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ClusterAutoscalerConfig {
    #[serde(default = "enabled_default")]
    pub enabled: bool,
    #[serde(default = "scan_interval_default")]
    pub scan_interval: f64,
    #[serde(default)]
    pub node_groups: Vec<NodeGroup>,
    #[serde(default = "scale_down_enabled_default")]
    pub scale_down_enabled: bool,
    /// Fraction in interval [0, 1] to define threshold of resource utilization to make scale down
    /// decisions.
    #[serde(default = "scale_down_utilization_threshold_default")]
    pub scale_down_utilization_threshold: f64,
    /// Unschedulable pods younger than this do not trigger scale-up, unless they consume a
    /// ProvisioningRequest.
    #[serde(default)]
    pub new_pod_scale_up_delay: f64,
    /// Limit of nodes in the cluster including upcoming ones.
    #[serde(default = "max_node_count_default")]
    pub max_node_count: u64,
}

impl Default for ClusterAutoscalerConfig {
    fn default() -> Self {
        Self {
            enabled: enabled_default(),
            scan_interval: scan_interval_default(),
            node_groups: Default::default(),
            scale_down_enabled: scale_down_enabled_default(),
            scale_down_utilization_threshold: scale_down_utilization_threshold_default(),
            new_pod_scale_up_delay: 0.0,
            max_node_count: max_node_count_default(),
        }
    }
}

fn enabled_default() -> bool {
    true
}
fn scan_interval_default() -> f64 {
    10.0
} // 10 seconds
fn scale_down_enabled_default() -> bool {
    true
}
fn scale_down_utilization_threshold_default() -> f64 {
    0.5
}
fn max_node_count_default() -> u64 {
    u64::MAX
}

pub struct ClusterAutoscaler {
    persistent_storage: SimComponentId,
    autoscaler: StaticAutoscaler,

    ctx: SimulationContext,
    config: Rc<SimulationConfig>,

    metrics_collector: Rc<RefCell<MetricsCollector>>,
}

impl ClusterAutoscaler {
    pub fn new(
        persistent_storage: SimComponentId,
        storage_data: Rc<RefCell<StorageData>>,
        ctx: SimulationContext,
        config: Rc<SimulationConfig>,
        metrics_collector: Rc<RefCell<MetricsCollector>>,
    ) -> Result<Self, AutoscalerError> {
        let autoscaler = StaticAutoscaler::new(
            storage_data,
            &config.cluster_autoscaler,
            &config.provisioning_request,
        )?;
        Ok(Self {
            persistent_storage,
            autoscaler,
            ctx,
            config,
            metrics_collector,
        })
    }

    pub fn id(&self) -> SimComponentId {
        self.ctx.id()
    }

    pub fn autoscaler(&self) -> &StaticAutoscaler {
        &self.autoscaler
    }

    pub fn start(&mut self) {
        log_info!(
            self.ctx,
            "Cluster autoscaler started running every {} seconds",
            self.config.cluster_autoscaler.scan_interval
        );
        self.ctx.emit_self_now(RunClusterAutoscalerCycle {});
    }

    /// Loop takes no simulated time. Its wall time is recorded as a metric.
    fn run_cluster_autoscaler_cycle(&mut self, event_time: f64) {
        let started = Instant::now();
        let result = self.autoscaler.run_once(event_time);
        let duration = started.elapsed().as_secs_f64();

        match result {
            Ok(result) => {
                for node in result.scaled_up_nodes() {
                    log_debug!(self.ctx, "Scaling up new node {}", node.metadata.name);
                    self.ctx.emit(
                        CreateNodeRequest { node: node.clone() },
                        self.persistent_storage,
                        self.config.ca_to_ps_network_delay + self.config.node_provisioning_time,
                    );
                }
                for node_name in result.scaled_down_nodes.iter() {
                    log_debug!(self.ctx, "Scaling down node {}", node_name);
                    self.ctx.emit(
                        RemoveNodeRequest {
                            node_name: node_name.clone(),
                        },
                        self.persistent_storage,
                        self.config.ca_to_ps_network_delay,
                    );
                }
                if let Some(key) = result.injected.as_ref() {
                    log_debug!(self.ctx, "Injected pods of ProvisioningRequest {}", key);
                }
                self.metrics_collector
                    .borrow_mut()
                    .record_autoscaler_loop(&result, duration);
            }
            Err(err) => {
                log_error!(self.ctx, "Autoscaler loop failed: {}", err);
                self.metrics_collector
                    .borrow_mut()
                    .metrics
                    .autoscaler_loop_errors += 1;
            }
        }

        self.ctx.emit_self(
            RunClusterAutoscalerCycle {},
            self.config.cluster_autoscaler.scan_interval,
        );
    }
}

impl EventHandler for ClusterAutoscaler {
    fn on(&mut self, event: Event) {
        cast_box!(match event.data {
            RunClusterAutoscalerCycle {} => {
                self.run_cluster_autoscaler_cycle(event.time);
            }
        })
    }
}
