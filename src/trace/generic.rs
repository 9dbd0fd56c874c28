//! Represents generic format for the trace that is simplified and convenient.

use std::mem::swap;

use serde::Deserialize;

use crate::core::common::SimulationEvent;
use crate::core::events::{
    CreateNodeRequest, CreatePodRequest, CreatePodTemplateRequest, CreateProvisioningRequest,
    RemoveNodeRequest, RemovePodRequest,
};
use crate::core::node::Node;
use crate::core::pod::{Pod, PodTemplate};
use crate::provreq::provisioning_request::ProvisioningRequest;
use crate::trace::interface::Trace;

/// GenericTrace consists of timestamp-ordered events representing creation and removal of
/// cluster objects, but in the format corresponding to this trace.
/// These events differ from events which are emitted by simulator's components, so to get such
/// events GenericTrace implements Trace.
#[derive(Debug, Default, Deserialize, PartialEq)]
pub struct GenericTrace {
    pub events: Vec<TraceEvent>,
}

#[derive(Debug, Deserialize, PartialEq)]
pub struct TraceEvent {
    pub timestamp: f64, // in seconds
    pub event_type: TraceEventType,
}

// Enums deserialize using YAML's !tag syntax to identify the variant name.
#[derive(Debug, Deserialize, PartialEq)]
pub enum TraceEventType {
    CreateNode { node: Node },
    RemoveNode { node_name: String },
    CreatePod { pod: Pod },
    RemovePod { namespace: String, pod_name: String },
    CreatePodTemplate { pod_template: PodTemplate },
    CreateProvisioningRequest { request: ProvisioningRequest },
}

impl Trace for GenericTrace {
    // Called once to convert and move events.
    fn convert_to_simulator_events(&mut self) -> Vec<(f64, Box<dyn SimulationEvent>)> {
        let mut events: Vec<TraceEvent> = vec![];
        swap(&mut events, &mut self.events);

        let mut converted_events: Vec<(f64, Box<dyn SimulationEvent>)> =
            Vec::with_capacity(events.len());
        for event in events {
            let converted: Box<dyn SimulationEvent> = match event.event_type {
                TraceEventType::CreateNode { node } => Box::new(CreateNodeRequest { node }),
                TraceEventType::RemoveNode { node_name } => {
                    Box::new(RemoveNodeRequest { node_name })
                }
                TraceEventType::CreatePod { pod } => Box::new(CreatePodRequest { pod }),
                TraceEventType::RemovePod {
                    namespace,
                    pod_name,
                } => Box::new(RemovePodRequest {
                    namespace,
                    pod_name,
                }),
                TraceEventType::CreatePodTemplate { pod_template } => {
                    Box::new(CreatePodTemplateRequest { pod_template })
                }
                TraceEventType::CreateProvisioningRequest { request } => {
                    Box::new(CreateProvisioningRequest { request })
                }
            };
            converted_events.push((event.timestamp, converted));
        }
        // Stable, so events with equal timestamps keep trace order.
        converted_events.sort_by(|lhs, rhs| lhs.0.total_cmp(&rhs.0));

        converted_events
    }
}
