//! Implements centralized storage for metrics. Any component may access this component to
//! report metrics about pods, nodes, provisioning requests, etc.

use average::{concatenate, Estimate, Max, Mean, Min, Variance};
use serde::Serialize;

use crate::autoscaler::static_autoscaler::AutoscalerLoopResult;

concatenate!(
    Estimator,
    [Min, min],
    [Max, max],
    [Mean, mean],
    [Variance, population_variance]
);

#[derive(Debug, Default)]
pub struct EstimatorWrapper {
    estimator: Estimator,
}

impl std::fmt::Debug for Estimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Estimator")
            .field("min", &self.min())
            .field("max", &self.max())
            .field("mean", &self.mean())
            .field("population_variance", &self.population_variance())
            .finish()
    }
}

impl EstimatorWrapper {
    pub fn new() -> Self {
        Self {
            estimator: Estimator::new(),
        }
    }

    pub fn add(&mut self, value: f64) {
        self.estimator.add(value);
    }

    pub fn count(&self) -> u64 {
        self.estimator.mean.len()
    }

    pub fn min(&self) -> f64 {
        self.estimator.min()
    }

    pub fn max(&self) -> f64 {
        self.estimator.max()
    }

    pub fn mean(&self) -> f64 {
        self.estimator.mean()
    }

    pub fn population_variance(&self) -> f64 {
        self.estimator.population_variance()
    }
}

impl PartialEq for EstimatorWrapper {
    fn eq(&self, other: &Self) -> bool {
        self.min() == other.min()
            && self.max() == other.max()
            && self.mean() == other.mean()
            && self.population_variance() == other.population_variance()
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct Metrics {
    /// The number of created nodes in trace. Calculated before simulation starts.
    pub total_nodes_in_trace: u64,
    /// The number of created pods in trace. Calculated before simulation starts.
    pub total_pods_in_trace: u64,
    /// The number of created provisioning requests in trace. Calculated before simulation starts.
    pub total_provisioning_requests_in_trace: u64,

    pub pods_created: u64,
    /// Bindings made by the scheduler, a pod rebound after node removal counts twice.
    pub pods_scheduled: u64,
    pub nodes_removed: u64,

    pub provisioning_requests_created: u64,
    /// Requests which failed schema validation on creation.
    pub provisioning_requests_rejected: u64,
    pub provisioning_requests_injected: u64,
    pub provisioning_requests_provisioned: u64,
    /// Number of failed capacity checks.
    pub provisioning_requests_capacity_not_found: u64,
    pub provisioning_requests_failed: u64,
    pub provisioning_requests_booking_expired: u64,
    pub provisioning_requests_deleted: u64,
    /// Sum over loops of pods bound into the snapshot to keep booked capacity.
    pub booked_pods: u64,
    pub ignored_pod_events: u64,

    // Auto scaler metrics
    /// Total number of scaled up nodes
    pub total_scaled_up_nodes: u64,
    /// Total number of scaled down nodes
    pub total_scaled_down_nodes: u64,
    pub autoscaler_loops: u64,
    pub autoscaler_loop_errors: u64,
    pub scale_up_errors: u64,
}

#[derive(Debug, Default)]
pub struct MetricsCollector {
    pub metrics: Metrics,

    /// Estimations for the wall time of a single autoscaler loop in seconds.
    pub autoscaler_loop_duration_stats: EstimatorWrapper,

    /// Estimations for the time from pod creation to its binding.
    pub pod_time_to_schedule_stats: EstimatorWrapper,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            metrics: Default::default(),
            autoscaler_loop_duration_stats: EstimatorWrapper::new(),
            pod_time_to_schedule_stats: EstimatorWrapper::new(),
        }
    }

    pub fn increment_pod_time_to_schedule(&mut self, value: f64) {
        self.pod_time_to_schedule_stats.add(value);
    }

    pub fn record_autoscaler_loop(&mut self, result: &AutoscalerLoopResult, duration: f64) {
        self.autoscaler_loop_duration_stats.add(duration);

        let metrics = &mut self.metrics;
        metrics.autoscaler_loops += 1;
        metrics.total_scaled_up_nodes += result.scaled_up_nodes().len() as u64;
        metrics.total_scaled_down_nodes += result.scaled_down_nodes.len() as u64;
        if result.scale_up.error.is_some() {
            metrics.scale_up_errors += 1;
        }
        if result.injected.is_some() {
            metrics.provisioning_requests_injected += 1;
        }
        metrics.booked_pods += result.booked_pods as u64;
        metrics.ignored_pod_events += result.ignored_pod_events.len() as u64;
        metrics.provisioning_requests_booking_expired += result.refresh.booking_expired as u64;
        metrics.provisioning_requests_deleted += result.refresh.deleted as u64;
        metrics.provisioning_requests_provisioned += result.transitions.provisioned as u64;
        metrics.provisioning_requests_capacity_not_found +=
            result.transitions.capacity_not_found as u64;
        metrics.provisioning_requests_failed += result.transitions.failed as u64;
    }
}

#[cfg(test)]
mod tests {
    use crate::metrics::collector::EstimatorWrapper;

    #[test]
    fn test_estimator_wrapper() {
        let mut estimator = EstimatorWrapper::new();
        for value in [1.0, 2.0, 3.0, 6.0] {
            estimator.add(value);
        }
        assert_eq!(estimator.count(), 4);
        assert_eq!(estimator.min(), 1.0);
        assert_eq!(estimator.max(), 6.0);
        assert_eq!(estimator.mean(), 3.0);
        assert_eq!(estimator.population_variance(), 3.5);
    }
}
