//! Types shared by the autoscaler loop, its pod list processors and scale-up orchestrators.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::node::Node;
use crate::core::pod::Pod;
use crate::core::scheduler::hinting::HintingSimulator;
use crate::core::snapshot::{ClusterSnapshot, SchedulingError};

pub const CLUSTER_AUTOSCALER_ORIGIN_LABEL: &str = "cluster autoscaler";
pub const ORIGIN_LABEL: &str = "origin";
pub const NODE_GROUP_LABEL: &str = "node_group";

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct NodeGroup {
    /// Max number of nodes that can exist simultaneously for the node group.
    #[serde(default = "max_count_default")]
    pub max_count: u64,
    #[serde(default)]
    pub current_count: u64,
    /// For monotonically incrementing counter used in unique scaled up node names.
    #[serde(default)]
    pub total_allocated: u64,
    pub node_template: Node,
}

fn max_count_default() -> u64 {
    u64::MAX
}

impl NodeGroup {
    pub fn name(&self) -> &str {
        &self.node_template.metadata.name
    }

    pub fn has_quota(&self) -> bool {
        self.current_count < self.max_count
    }

    /// Creates a node from the template and accounts it in the group.
    pub fn allocate_node(&mut self) -> Node {
        self.current_count += 1;
        self.total_allocated += 1;
        let mut node = self.node_template.clone();
        node.metadata.name = format!("{}_{}", node.metadata.name, self.total_allocated);
        node.reset_allocatable();
        node
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum AutoscaleAction {
    ScaleUp(Node),
    /// Scale down action with node name as string
    ScaleDown(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum AutoscalerErrorKind {
    /// Unexpected state of the autoscaler or its simulations.
    InternalError,
    /// Failed call to object storage.
    ApiCallError,
    /// Failed call to node groups.
    CloudProviderError,
}

#[derive(Clone, Debug, PartialEq, Error)]
#[error("{kind:?}: {message}")]
pub struct AutoscalerError {
    pub kind: AutoscalerErrorKind,
    pub message: String,
}

impl AutoscalerError {
    pub fn new(kind: AutoscalerErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(AutoscalerErrorKind::InternalError, message)
    }

    pub fn api_call(message: impl Into<String>) -> Self {
        Self::new(AutoscalerErrorKind::ApiCallError, message)
    }
}

impl From<SchedulingError> for AutoscalerError {
    fn from(err: SchedulingError) -> Self {
        AutoscalerError::internal(err.to_string())
    }
}

/// Outcome of a scale-up attempt. Ordered by priority used when several attempts are combined.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum ScaleUpResult {
    NotTried,
    NotNeeded,
    NoOptionsAvailable,
    Error,
    Successful,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ScaleUpStatus {
    pub result: ScaleUpResult,
    pub scale_up_actions: Vec<AutoscaleAction>,
    pub pods_triggered_scale_up: Vec<Pod>,
    pub pods_remain_unschedulable: Vec<Pod>,
    pub error: Option<AutoscalerError>,
}

impl ScaleUpStatus {
    pub fn new(result: ScaleUpResult) -> Self {
        Self {
            result,
            scale_up_actions: vec![],
            pods_triggered_scale_up: vec![],
            pods_remain_unschedulable: vec![],
            error: None,
        }
    }

    pub fn not_tried() -> Self {
        Self::new(ScaleUpResult::NotTried)
    }

    pub fn from_error(error: AutoscalerError) -> Self {
        Self {
            error: Some(error),
            ..Self::new(ScaleUpResult::Error)
        }
    }

    /// Combines statuses of independent attempts: actions and pods are concatenated, the result
    /// with the highest priority wins.
    pub fn merge(mut self, other: ScaleUpStatus) -> ScaleUpStatus {
        if other.result > self.result {
            self.result = other.result;
        }
        self.scale_up_actions.extend(other.scale_up_actions);
        self.pods_triggered_scale_up
            .extend(other.pods_triggered_scale_up);
        self.pods_remain_unschedulable
            .extend(other.pods_remain_unschedulable);
        if self.error.is_none() {
            self.error = other.error;
        }
        self
    }
}

/// Everything a single autoscaler loop iteration works with.
pub struct AutoscalingContext<'a> {
    pub snapshot: &'a mut ClusterSnapshot,
    pub hinting_simulator: &'a mut HintingSimulator,
    pub node_groups: &'a mut BTreeMap<String, NodeGroup>,
    pub max_node_count: u64,
    pub now: f64,
}

impl AutoscalingContext<'_> {
    /// How many nodes may be added without exceeding `max_node_count`.
    pub fn node_budget(&self) -> u64 {
        self.max_node_count
            .saturating_sub(self.snapshot.node_count() as u64)
    }
}

/// Transforms the list of unschedulable pods before scale-up. Processors run in order and may
/// modify the snapshot.
pub trait PodListProcessor {
    fn process(
        &mut self,
        ctx: &mut AutoscalingContext,
        unschedulable_pods: Vec<Pod>,
    ) -> Result<Vec<Pod>, AutoscalerError>;
}

/// Decides on scale-up for unschedulable pods.
pub trait ScaleUpOrchestrator {
    fn scale_up(&mut self, ctx: &mut AutoscalingContext, unschedulable_pods: &[Pod])
        -> ScaleUpStatus;
}
