//! Implementation of scheduler component which is responsible for scheduling pods for nodes.
//!
//! Every `scheduling_cycle_interval` seconds the scheduler takes pending pods from persistent
//! storage in creation order and binds each one to the best node that fits. Pods which fit nowhere
//! get `PodScheduled=False` with `Unschedulable` reason, which makes them visible to the
//! autoscaler.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

use dslab_core::{log_debug, log_error, Event, EventHandler, SimulationContext};

use crate::cast_box;
use crate::config::SimulationConfig;
use crate::core::events::RunSchedulingCycle;
use crate::core::node::Node;
use crate::core::persistent_storage::StorageData;
use crate::core::scheduler::hinting::schedule_anywhere;
use crate::core::scheduler::interface::PodSchedulingAlgorithm;
use crate::core::snapshot::ClusterSnapshot;
use crate::metrics::collector::MetricsCollector;

pub struct Scheduler {
    storage_data: Rc<RefCell<StorageData>>,
    /// Rebuilt from storage at the start of every cycle.
    snapshot: ClusterSnapshot,

    ctx: SimulationContext,
    config: Rc<SimulationConfig>,

    metrics_collector: Rc<RefCell<MetricsCollector>>,
}

/// What a single scheduling cycle did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SchedulingCycleStats {
    pub scheduled: usize,
    pub unschedulable: usize,
}

impl Scheduler {
    pub fn new(
        storage_data: Rc<RefCell<StorageData>>,
        scheduler_algorithm: Box<dyn PodSchedulingAlgorithm>,
        ctx: SimulationContext,
        config: Rc<SimulationConfig>,
        metrics_collector: Rc<RefCell<MetricsCollector>>,
    ) -> Self {
        Self {
            storage_data,
            snapshot: ClusterSnapshot::new(scheduler_algorithm),
            ctx,
            config,
            metrics_collector,
        }
    }

    pub fn start(&mut self) {
        self.ctx.emit_self_now(RunSchedulingCycle {});
    }

    pub fn set_scheduler_algorithm(
        &mut self,
        scheduler_algorithm: Box<dyn PodSchedulingAlgorithm>,
    ) {
        self.snapshot = ClusterSnapshot::new(scheduler_algorithm);
    }

    /// Binds as many pending pods as possible at time `now`.
    pub fn schedule_pending_pods(&mut self, now: f64) -> SchedulingCycleStats {
        let (nodes, scheduled_pods, pending_pods) = {
            let storage = self.storage_data.borrow();
            let nodes: Vec<Node> = storage.nodes.values().cloned().collect();
            (nodes, storage.scheduled_pods(), storage.pending_pods())
        };
        self.snapshot.initialize(nodes, scheduled_pods);

        let mut stats = SchedulingCycleStats::default();
        for pod in pending_pods.into_iter() {
            let pod_key = pod.metadata.key();
            match self
                .snapshot
                .schedule_pod_on_any_node_matching(&pod, &schedule_anywhere)
            {
                Ok(node_name) => {
                    if !self
                        .storage_data
                        .borrow_mut()
                        .bind_pod(&pod_key, &node_name, now)
                    {
                        log_error!(self.ctx, "Failed to bind pod {} to {}", pod_key, node_name);
                        continue;
                    }
                    log_debug!(
                        self.ctx,
                        "Pod {:?} has been assigned a Node {:?}",
                        pod_key,
                        node_name
                    );
                    stats.scheduled += 1;
                    let mut metrics_collector = self.metrics_collector.borrow_mut();
                    metrics_collector.metrics.pods_scheduled += 1;
                    metrics_collector
                        .increment_pod_time_to_schedule(now - pod.metadata.creation_timestamp);
                }
                Err(err) if err.is_internal() => {
                    log_error!(self.ctx, "Failed to schedule pod {}: {}", pod_key, err);
                }
                Err(err) => {
                    if !pod.is_unschedulable() {
                        log_debug!(self.ctx, "Pod {} is unschedulable: {}", pod_key, err);
                    }
                    self.storage_data
                        .borrow_mut()
                        .set_pod_unschedulable(&pod_key, now);
                    stats.unschedulable += 1;
                }
            }
        }
        stats
    }

    fn run_scheduling_cycle(&mut self, event_time: f64) {
        let cycle_start_time = Instant::now();
        self.schedule_pending_pods(event_time);

        let elapsed = cycle_start_time.elapsed();
        let next_cycle_delay =
            f64::max(elapsed.as_secs_f64(), self.config.scheduling_cycle_interval);

        self.ctx.emit_self(RunSchedulingCycle {}, next_cycle_delay);
    }
}

impl EventHandler for Scheduler {
    fn on(&mut self, event: Event) {
        cast_box!(match event.data {
            RunSchedulingCycle {} => {
                self.run_scheduling_cycle(event.time);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use dslab_core::Simulation;

    use crate::core::node::Node;
    use crate::core::persistent_storage::StorageData;
    use crate::core::pod::Pod;
    use crate::core::scheduler::kube_scheduler::KubeScheduler;
    use crate::core::scheduler::scheduler::{SchedulingCycleStats, Scheduler};
    use crate::metrics::collector::MetricsCollector;
    use crate::test_util::helpers::default_test_simulation_config;

    fn create_scheduler(
        storage_data: Rc<RefCell<StorageData>>,
        metrics_collector: Rc<RefCell<MetricsCollector>>,
    ) -> Scheduler {
        let mut fake_sim = Simulation::new(0);
        Scheduler::new(
            storage_data,
            Box::new(KubeScheduler::default()),
            fake_sim.create_context("scheduler"),
            Rc::new(default_test_simulation_config(None)),
            metrics_collector,
        )
    }

    fn pod(name: &str, cpu: u32, created: f64) -> Pod {
        let mut pod = Pod::new(name.to_string(), cpu, 100);
        pod.metadata.creation_timestamp = created;
        pod
    }

    #[test]
    fn test_pods_are_bound_in_creation_order() {
        let storage = Rc::new(RefCell::new(StorageData::default()));
        let metrics = Rc::new(RefCell::new(MetricsCollector::new()));
        {
            let mut storage = storage.borrow_mut();
            storage.add_node(Node::new("node1".to_string(), 1000, 1000));
            storage.add_pod(pod("late", 600, 2.0));
            storage.add_pod(pod("early", 600, 1.0));
        }
        let mut scheduler = create_scheduler(storage.clone(), metrics.clone());

        let stats = scheduler.schedule_pending_pods(5.0);
        assert_eq!(
            stats,
            SchedulingCycleStats {
                scheduled: 1,
                unschedulable: 1
            }
        );
        let storage = storage.borrow();
        assert_eq!(storage.pods["default/early"].status.assigned_node, "node1");
        assert!(storage.pods["default/late"].is_unschedulable());
        assert_eq!(metrics.borrow().metrics.pods_scheduled, 1);
        assert_eq!(metrics.borrow().pod_time_to_schedule_stats.mean(), 4.0);
    }

    #[test]
    fn test_bound_pods_keep_their_resources() {
        let storage = Rc::new(RefCell::new(StorageData::default()));
        let metrics = Rc::new(RefCell::new(MetricsCollector::new()));
        let mut scheduler = create_scheduler(storage.clone(), metrics);
        storage
            .borrow_mut()
            .add_node(Node::new("node1".to_string(), 1000, 1000));
        storage.borrow_mut().add_pod(pod("first", 700, 0.0));
        assert_eq!(scheduler.schedule_pending_pods(1.0).scheduled, 1);

        storage.borrow_mut().add_pod(pod("second", 700, 1.0));
        assert_eq!(scheduler.schedule_pending_pods(2.0).unschedulable, 1);

        storage
            .borrow_mut()
            .add_node(Node::new("node2".to_string(), 1000, 1000));
        assert_eq!(scheduler.schedule_pending_pods(3.0).scheduled, 1);
        assert_eq!(
            storage.borrow().pods["default/second"].status.assigned_node,
            "node2"
        );
    }
}
