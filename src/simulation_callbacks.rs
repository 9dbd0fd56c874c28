//! Simulation callbacks interface and implementations to define how simulator should behave on start,
//! step, finish and when it should stop running.

use log::{error, info};

use crate::metrics::printer::print_metrics;
use crate::provreq::conditions::{is_true, ConditionType};
use crate::simulator::ProvreqSimulation;

pub trait SimulationCallbacks {
    /// Runs before starting a simulation run.
    fn on_simulation_start(&mut self, _sim: &mut ProvreqSimulation) {}

    /// Runs on each step of a simulation run, returns false if the simulation must be stopped.
    fn on_step(&mut self, _sim: &mut ProvreqSimulation) -> bool {
        true
    }

    /// Runs upon the completion of a simulation run, returns results of this run.
    fn on_simulation_finish(&mut self, _sim: &mut ProvreqSimulation) {}
}

fn print_if_configured(sim: &mut ProvreqSimulation) {
    if let Some(printer_config) = sim.config.metrics_printer.as_ref() {
        if let Err(err) = print_metrics(sim.metrics_collector.clone(), printer_config) {
            error!(
                "Failed to print metrics to {:?}: {}",
                printer_config.output_file, err
            );
        }
    }
}

/// Runs until simulation time reaches the deadline.
pub struct RunUntilDeadlineCallbacks {
    deadline_time: f64,
}

impl RunUntilDeadlineCallbacks {
    pub fn new(deadline_time: f64) -> Self {
        Self { deadline_time }
    }
}

impl SimulationCallbacks for RunUntilDeadlineCallbacks {
    fn on_step(&mut self, sim: &mut ProvreqSimulation) -> bool {
        sim.sim.time() < self.deadline_time
    }

    fn on_simulation_finish(&mut self, sim: &mut ProvreqSimulation) {
        print_if_configured(sim);
    }
}

/// Returns true if every provisioning request of the trace was created or rejected and reached
/// `Provisioned=True` or `Failed=True`.
fn all_provisioning_requests_settled(sim: &ProvreqSimulation) -> bool {
    let (created, rejected, total) = {
        let collector = sim.metrics_collector.borrow();
        let metrics = &collector.metrics;
        (
            metrics.provisioning_requests_created,
            metrics.provisioning_requests_rejected,
            metrics.total_provisioning_requests_in_trace,
        )
    };
    if created + rejected < total {
        return false;
    }
    let storage_data = sim.storage_data();
    let storage = storage_data.borrow();
    let settled = storage
        .provisioning_requests
        .values()
        .filter(|pr| {
            is_true(pr.conditions(), ConditionType::Provisioned)
                || is_true(pr.conditions(), ConditionType::Failed)
        })
        .count();
    info!(
        "{} out of {} provisioning requests are settled",
        settled,
        storage.provisioning_requests.len()
    );
    settled == storage.provisioning_requests.len()
}

/// Runs until all provisioning requests from the trace are provisioned or failed, checking every
/// `check_interval` seconds, but not longer than the deadline.
pub struct RunUntilProvisioningRequestsSettledCallbacks {
    deadline_time: f64,
    check_interval: f64,
    next_check_time: f64,
}

impl RunUntilProvisioningRequestsSettledCallbacks {
    pub fn new(deadline_time: f64, check_interval: f64) -> Self {
        Self {
            deadline_time,
            check_interval,
            next_check_time: check_interval,
        }
    }
}

impl SimulationCallbacks for RunUntilProvisioningRequestsSettledCallbacks {
    fn on_step(&mut self, sim: &mut ProvreqSimulation) -> bool {
        let now = sim.sim.time();
        if now >= self.deadline_time {
            return false;
        }
        if now >= self.next_check_time {
            self.next_check_time = now + self.check_interval;
            return !all_provisioning_requests_settled(sim);
        }
        true
    }

    fn on_simulation_finish(&mut self, sim: &mut ProvreqSimulation) {
        print_if_configured(sim);
    }
}
