//! Type definitions for node specification and state used in persistent storage and trace formats

use serde::{Deserialize, Serialize};

use crate::core::common::{ObjectMeta, RuntimeResources};

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum TaintEffect {
    NoSchedule,
    PreferNoSchedule,
    NoExecute,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Taint {
    pub key: String,
    #[serde(default)]
    pub value: String,
    pub effect: TaintEffect,
}

#[derive(Default, Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct NodeSpec {
    #[serde(default)]
    pub taints: Vec<Taint>,
    /// Cordoned node, no new pods are placed on it.
    #[serde(default)]
    pub unschedulable: bool,
}

#[derive(Default, Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct NodeStatus {
    // How much resources left, defaults to capacity while node is created.
    #[serde(default)]
    pub allocatable: RuntimeResources,
    // Total amount of resources
    pub capacity: RuntimeResources,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Node {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: NodeSpec,
    pub status: NodeStatus,
}

impl Node {
    pub fn new(name: String, cpu: u32, ram: u64) -> Self {
        Self {
            metadata: ObjectMeta {
                name,
                ..Default::default()
            },
            spec: Default::default(),
            status: NodeStatus {
                allocatable: RuntimeResources { cpu, ram },
                capacity: RuntimeResources { cpu, ram },
            },
        }
    }

    /// Nodes read from traces and configs usually have only capacity set.
    pub fn reset_allocatable(&mut self) {
        self.status.allocatable = self.status.capacity;
    }
}
