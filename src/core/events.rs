//! Events which are emitted with different simulation components' handlers and semantically
//! are `SimulationEvent`s defined in `common.rs`.

extern crate self as dslab_provreq;

use dslab_provreq_derive::IsSimulationEvent;

use serde::Serialize;

use crate::core::node::Node;
use crate::core::pod::{Pod, PodTemplate};
use crate::provreq::provisioning_request::ProvisioningRequest;

/// Event from trace client or cluster autoscaler to persistent storage with request to create
/// a node. Cluster autoscaler emits it with node provisioning delay.
#[derive(Serialize, Clone, IsSimulationEvent)]
pub struct CreateNodeRequest {
    pub node: Node,
}

/// Event from trace client or cluster autoscaler to persistent storage to inform that node should
/// be removed from a cluster. Pods bound to the node become pending again.
#[derive(Serialize, Clone, IsSimulationEvent)]
pub struct RemoveNodeRequest {
    pub node_name: String,
}

/// Event from trace client to persistent storage with request to create a pod. Created pods are
/// picked up by scheduler on its next cycle.
#[derive(Serialize, Clone, IsSimulationEvent)]
pub struct CreatePodRequest {
    pub pod: Pod,
}

/// Event from trace client to persistent storage to remove a pod with its node binding.
#[derive(Serialize, Clone, IsSimulationEvent)]
pub struct RemovePodRequest {
    pub namespace: String,
    pub pod_name: String,
}

/// Event from trace client to persistent storage with a pod template referenced by
/// provisioning requests.
#[derive(Serialize, Clone, IsSimulationEvent)]
pub struct CreatePodTemplateRequest {
    pub pod_template: PodTemplate,
}

/// Event from trace client to persistent storage with a new provisioning request.
/// Requests which fail schema validation are rejected.
#[derive(Serialize, Clone, IsSimulationEvent)]
pub struct CreateProvisioningRequest {
    pub request: ProvisioningRequest,
}

/// Event from scheduler to itself to run pod scheduling cycle.
#[derive(Serialize, Clone, IsSimulationEvent)]
pub struct RunSchedulingCycle {}

/// Event from cluster autoscaler to itself to simulate working interval.
#[derive(Serialize, Clone, IsSimulationEvent)]
pub struct RunClusterAutoscalerCycle {}

// Expect event.data to be Box<Box<dyn SimulationEvent>> to downcast it first and then extract a real type.
#[macro_export]
macro_rules! cast_box {
    ( match $event:ident.data { $( $type:ident { $($tt:tt)* } => { $($expr:tt)* } )+ } ) => {
        if let Ok(boxed_event) = $event.data.clone().downcast::<Box<dyn $crate::core::common::SimulationEvent>>() {
            $(
                if boxed_event.is::<$type>() {
                    if let Ok(__value) = boxed_event.downcast::<$type>() {
                        let $type { $($tt)* } = *__value;
                        $($expr)*
                    }
                } else
            )*
            {
                log::error!(
                    "unhandled event: {}",
                    serde_json::to_string(&boxed_event).unwrap_or_default()
                );
            }
        } else {
            // Fallback to normal cast! if data.event is already Box<dyn SimulationEvent>.
            dslab_core::cast!(match $event.data { $( $type { $($tt)* } => { $($expr)* } )+ } );
        }
    }
}
