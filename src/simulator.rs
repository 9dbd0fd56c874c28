//! Represents entry point for simulator and its components wiring.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

use dslab_core::simulation::Simulation;
use log::info;

use crate::autoscaler::cluster_autoscaler::ClusterAutoscaler;
use crate::autoscaler::interface::AutoscalerError;
use crate::config::SimulationConfig;
use crate::core::common::SimComponentId;
use crate::core::events::{CreateNodeRequest, CreatePodRequest, CreateProvisioningRequest};
use crate::core::node::Node;
use crate::core::persistent_storage::{PersistentStorage, StorageData};
use crate::core::scheduler::interface::PodSchedulingAlgorithm;
use crate::core::scheduler::kube_scheduler::KubeScheduler;
use crate::core::scheduler::scheduler::Scheduler;
use crate::metrics::collector::MetricsCollector;
use crate::simulation_callbacks::SimulationCallbacks;
use crate::trace::interface::Trace;

pub struct ProvreqSimulation {
    pub config: Rc<SimulationConfig>,
    pub sim: Simulation,

    pub persistent_storage: Rc<RefCell<PersistentStorage>>,
    pub scheduler: Rc<RefCell<Scheduler>>,
    /// None if autoscaling is disabled.
    pub cluster_autoscaler: Option<Rc<RefCell<ClusterAutoscaler>>>,

    pub metrics_collector: Rc<RefCell<MetricsCollector>>,

    started: bool,
}

impl ProvreqSimulation {
    pub fn new(config: Rc<SimulationConfig>) -> Result<Self, AutoscalerError> {
        info!(
            "Creating provisioning request simulation {:?} with config: {:?}",
            config.sim_name, config
        );

        let mut sim = Simulation::new(config.seed);
        let metrics_collector = Rc::new(RefCell::new(MetricsCollector::new()));
        let storage_data = Rc::new(RefCell::new(StorageData::default()));

        // Register simulator components
        let persistent_storage_component_name = "persistent_storage";
        let scheduler_component_name = "scheduler";
        let cluster_autoscaler_component_name = "cluster_autoscaler";

        let persistent_storage_context = sim.create_context(persistent_storage_component_name);
        let persistent_storage = Rc::new(RefCell::new(PersistentStorage::new(
            storage_data.clone(),
            persistent_storage_context,
            metrics_collector.clone(),
        )));
        let persistent_storage_id = sim.add_handler(
            persistent_storage_component_name,
            persistent_storage.clone(),
        );

        let scheduler_context = sim.create_context(scheduler_component_name);
        let scheduler = Rc::new(RefCell::new(Scheduler::new(
            storage_data.clone(),
            Box::new(KubeScheduler::default()),
            scheduler_context,
            config.clone(),
            metrics_collector.clone(),
        )));
        sim.add_handler(scheduler_component_name, scheduler.clone());

        let mut cluster_autoscaler = None;
        if config.cluster_autoscaler.enabled {
            let cluster_autoscaler_context =
                sim.create_context(cluster_autoscaler_component_name);
            let component = Rc::new(RefCell::new(ClusterAutoscaler::new(
                persistent_storage_id,
                storage_data,
                cluster_autoscaler_context,
                config.clone(),
                metrics_collector.clone(),
            )?));
            sim.add_handler(cluster_autoscaler_component_name, component.clone());
            cluster_autoscaler = Some(component);
        }

        let mut simulation = ProvreqSimulation {
            config,
            sim,
            persistent_storage,
            scheduler,
            cluster_autoscaler,
            metrics_collector,
            started: false,
        };
        simulation.initialize_default_cluster();
        Ok(simulation)
    }

    pub fn persistent_storage_id(&self) -> SimComponentId {
        self.persistent_storage.borrow().id()
    }

    pub fn storage_data(&self) -> Rc<RefCell<StorageData>> {
        self.persistent_storage.borrow().storage_data()
    }

    /// Pushes all trace events to the simulation queue. Must be called at time zero, so event
    /// delays are equal to trace timestamps.
    pub fn initialize(&mut self, trace: &mut dyn Trace) {
        // Client context for submitting trace events to persistent storage.
        let client = self.sim.create_context("client");
        let persistent_storage_id = self.persistent_storage_id();

        let events = trace.convert_to_simulator_events();
        let now = self.sim.time();
        let mut metrics_collector = self.metrics_collector.borrow_mut();
        for (ts, event) in events.into_iter() {
            if event.downcast_ref::<CreateNodeRequest>().is_some() {
                metrics_collector.metrics.total_nodes_in_trace += 1;
            } else if event.downcast_ref::<CreatePodRequest>().is_some() {
                metrics_collector.metrics.total_pods_in_trace += 1;
            } else if event.downcast_ref::<CreateProvisioningRequest>().is_some() {
                metrics_collector
                    .metrics
                    .total_provisioning_requests_in_trace += 1;
            }
            client.emit(event, persistent_storage_id, f64::max(ts - now, 0.0));
        }
    }

    /// Adds the node to persistent storage immediately, bypassing events.
    pub fn add_node(&mut self, node: Node) {
        let node_name = node.metadata.name.clone();
        if !self.storage_data().borrow_mut().add_node(node) {
            log::warn!("Node {:?} already exists", node_name);
        }
    }

    fn initialize_default_cluster(&mut self) {
        let node_groups = match self.config.default_cluster.as_ref() {
            Some(node_groups) => node_groups.clone(),
            None => return,
        };
        let mut total_nodes = 0;
        for node_group in node_groups.iter() {
            for node in node_group.nodes(&mut total_nodes) {
                self.add_node(node);
            }
        }
    }

    pub fn set_scheduler_algorithm(
        &mut self,
        scheduler_algorithm: Box<dyn PodSchedulingAlgorithm>,
    ) {
        self.scheduler
            .borrow_mut()
            .set_scheduler_algorithm(scheduler_algorithm)
    }

    fn start_components(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        self.scheduler.borrow_mut().start();
        if let Some(cluster_autoscaler) = self.cluster_autoscaler.as_ref() {
            cluster_autoscaler.borrow_mut().start();
        }
    }

    pub fn run_with_callbacks(&mut self, mut callbacks: Box<dyn SimulationCallbacks>) {
        self.start_components();

        callbacks.on_simulation_start(self);

        let t = Instant::now();
        while callbacks.on_step(self) {
            if !self.sim.step() {
                break;
            }
        }
        let duration = t.elapsed().as_secs_f64();
        info!(
            "Processed {} events in {:.2?}s ({:.0} events/s)",
            self.sim.event_count(),
            duration,
            self.sim.event_count() as f64 / duration
        );
        info!("Finished at {}", self.sim.time());

        callbacks.on_simulation_finish(self);
    }

    pub fn step(&mut self) {
        self.start_components();
        self.sim.step();
    }

    /// Returns `true` if there could be more pending events and `false` otherwise.
    pub fn step_for_duration(&mut self, duration: f64) -> bool {
        self.start_components();
        self.sim.step_for_duration(duration)
    }
}
