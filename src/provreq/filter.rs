//! Removes pods consuming ProvisioningRequests from the unschedulable pods list so that generic
//! scale-up never acts on them.

use std::cell::RefCell;
use std::rc::Rc;

use log::info;

use crate::autoscaler::interface::{AutoscalerError, AutoscalingContext, PodListProcessor};
use crate::core::pod::Pod;
use crate::provreq::provisioning_request::provisioning_request_name;

pub const DEFAULT_MAX_IGNORED_POD_EVENTS: usize = 50;
pub const IGNORED_IN_SCALE_UP_REASON: &str = "ProvisioningRequestIgnoredInScaleUp";

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    pub object: String,
    pub reason: String,
    pub message: String,
}

/// Sink of user visible events attached to objects.
pub trait EventManager {
    fn pod_event(&mut self, pod: &Pod, reason: &str, message: &str);
}

/// Logs events and keeps them for inspection.
#[derive(Default)]
pub struct RecordingEventManager {
    pub events: Vec<RecordedEvent>,
}

impl EventManager for RecordingEventManager {
    fn pod_event(&mut self, pod: &Pod, reason: &str, message: &str) {
        info!("Event on pod {}: {}: {}", pod.metadata.key(), reason, message);
        self.events.push(RecordedEvent {
            object: pod.metadata.key(),
            reason: reason.to_string(),
            message: message.to_string(),
        });
    }
}

pub struct ProvisioningRequestPodsFilter {
    event_manager: Rc<RefCell<dyn EventManager>>,
    max_ignored_pod_events: usize,
}

impl ProvisioningRequestPodsFilter {
    pub fn new(event_manager: Rc<RefCell<dyn EventManager>>, max_ignored_pod_events: usize) -> Self {
        Self {
            event_manager,
            max_ignored_pod_events,
        }
    }

    pub fn filter(&mut self, unschedulable_pods: Vec<Pod>) -> Vec<Pod> {
        let mut events_left = self.max_ignored_pod_events;
        let mut result = Vec::with_capacity(unschedulable_pods.len());
        for pod in unschedulable_pods.into_iter() {
            let pr_name = match provisioning_request_name(&pod).map(str::to_string) {
                Some(name) => name,
                None => {
                    result.push(pod);
                    continue;
                }
            };
            if events_left > 0 {
                let message = format!(
                    "Unschedulable pod didn't trigger scale-up, because it's consuming ProvisioningRequest {}/{}",
                    pod.metadata.namespace, pr_name
                );
                self.event_manager
                    .borrow_mut()
                    .pod_event(&pod, IGNORED_IN_SCALE_UP_REASON, &message);
                events_left -= 1;
            }
        }
        result
    }
}

impl PodListProcessor for ProvisioningRequestPodsFilter {
    fn process(
        &mut self,
        _ctx: &mut AutoscalingContext,
        unschedulable_pods: Vec<Pod>,
    ) -> Result<Vec<Pod>, AutoscalerError> {
        Ok(self.filter(unschedulable_pods))
    }
}
