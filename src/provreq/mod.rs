pub mod backoff;
pub mod besteffortatomic;
pub mod booker;
pub mod checkcapacity;
pub mod client;
pub mod conditions;
pub mod enforcer;
pub mod filter;
pub mod injector;
pub mod orchestrator;
pub mod pods;
pub mod processor;
pub mod provisioning_request;

use serde::Deserialize;

/// Settings of the ProvisioningRequest control loop. Durations are in seconds.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ProvisioningRequestConfig {
    #[serde(default = "enabled_default")]
    pub enabled: bool,
    /// First retry delay after `Provisioned=False`.
    #[serde(default = "initial_backoff_time_default")]
    pub initial_backoff_time: f64,
    #[serde(default = "max_backoff_time_default")]
    pub max_backoff_time: f64,
    #[serde(default = "max_backoff_cache_size_default")]
    pub max_backoff_cache_size: usize,
    /// Time from `Provisioned=True` until the booking expires.
    #[serde(default = "reservation_time_default")]
    pub reservation_time: f64,
    /// Time from creation until a never provisioned request fails.
    #[serde(default = "expiration_time_default")]
    pub expiration_time: f64,
    /// Time a terminal request is kept before deletion.
    #[serde(default = "terminal_retention_time_default")]
    pub terminal_retention_time: f64,
    #[serde(default = "max_updated_per_loop_default")]
    pub max_updated_per_loop: usize,
    #[serde(default = "max_ignored_pod_events_default")]
    pub max_ignored_pod_events: usize,
    #[serde(default)]
    pub processor_instance: String,
    /// Deadline of a single store write call.
    #[serde(default = "request_timeout_default")]
    pub request_timeout: f64,
}

fn enabled_default() -> bool {
    true
}

fn initial_backoff_time_default() -> f64 {
    60.0
}

fn max_backoff_time_default() -> f64 {
    600.0
}

fn max_backoff_cache_size_default() -> usize {
    1000
}

fn reservation_time_default() -> f64 {
    600.0
}

fn expiration_time_default() -> f64 {
    604800.0
}

fn terminal_retention_time_default() -> f64 {
    604800.0
}

fn max_updated_per_loop_default() -> usize {
    20
}

fn max_ignored_pod_events_default() -> usize {
    filter::DEFAULT_MAX_IGNORED_POD_EVENTS
}

fn request_timeout_default() -> f64 {
    4.0
}

impl Default for ProvisioningRequestConfig {
    fn default() -> Self {
        Self {
            enabled: enabled_default(),
            initial_backoff_time: initial_backoff_time_default(),
            max_backoff_time: max_backoff_time_default(),
            max_backoff_cache_size: max_backoff_cache_size_default(),
            reservation_time: reservation_time_default(),
            expiration_time: expiration_time_default(),
            terminal_retention_time: terminal_retention_time_default(),
            max_updated_per_loop: max_updated_per_loop_default(),
            max_ignored_pod_events: max_ignored_pod_events_default(),
            processor_instance: String::new(),
            request_timeout: request_timeout_default(),
        }
    }
}
