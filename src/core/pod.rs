//! Type definition for Pod and PodTemplate primitives in k8s cluster

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::common::{ConditionStatus, ObjectMeta, RuntimeResources};
use crate::core::node::{Taint, TaintEffect};

#[derive(Default, Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct ResourceRequirements {
    #[serde(default)]
    pub limits: Option<RuntimeResources>,
    #[serde(default)]
    pub requests: Option<RuntimeResources>,
}

#[derive(Default, Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct Container {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub resources: ResourceRequirements,
}

#[derive(Default, Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum TolerationOperator {
    #[default]
    Equal,
    Exists,
}

#[derive(Default, Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct Toleration {
    /// Empty key with `Exists` operator tolerates everything.
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub operator: TolerationOperator,
    #[serde(default)]
    pub value: String,
    /// None matches all effects.
    #[serde(default)]
    pub effect: Option<TaintEffect>,
}

impl Toleration {
    pub fn tolerates(&self, taint: &Taint) -> bool {
        if let Some(effect) = self.effect {
            if effect != taint.effect {
                return false;
            }
        }
        match self.operator {
            TolerationOperator::Exists => self.key.is_empty() || self.key == taint.key,
            TolerationOperator::Equal => self.key == taint.key && self.value == taint.value,
        }
    }
}

#[derive(Default, Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct PodSpec {
    #[serde(default)]
    pub containers: Vec<Container>,
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,
    #[serde(default)]
    pub tolerations: Vec<Toleration>,
}

impl PodSpec {
    /// Sum of container requests. Containers without requests contribute nothing.
    pub fn requests(&self) -> RuntimeResources {
        self.containers
            .iter()
            .filter_map(|container| container.resources.requests.as_ref())
            .fold(RuntimeResources::default(), |total, requests| {
                total.saturating_add(requests)
            })
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub enum PodConditionType {
    // Pod is scheduled to a node. False with `Unschedulable` reason marks pods the autoscaler
    // should help.
    PodScheduled,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct PodCondition {
    pub status: ConditionStatus,
    pub condition_type: PodConditionType,
    #[serde(default)]
    pub reason: String,
    // Last event time the condition transit from one status to another.
    pub last_transition_time: f64,
}

#[derive(Default, Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct PodStatus {
    #[serde(default)]
    pub conditions: Vec<PodCondition>,
    #[serde(default)]
    pub assigned_node: String,
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct Pod {
    pub metadata: ObjectMeta,
    pub spec: PodSpec,
    #[serde(default)]
    pub status: PodStatus,
}

pub const UNSCHEDULABLE_REASON: &str = "Unschedulable";

impl Pod {
    pub fn new(name: String, cpu: u32, ram: u64) -> Self {
        let resources = RuntimeResources { cpu, ram };
        Self {
            metadata: ObjectMeta {
                name,
                namespace: "default".to_string(),
                ..Default::default()
            },
            spec: PodSpec {
                containers: vec![Container {
                    name: "main".to_string(),
                    resources: ResourceRequirements {
                        limits: Some(resources),
                        requests: Some(resources),
                    },
                }],
                ..Default::default()
            },
            status: Default::default(),
        }
    }

    pub fn requests(&self) -> RuntimeResources {
        self.spec.requests()
    }

    pub fn is_scheduled(&self) -> bool {
        !self.status.assigned_node.is_empty()
    }

    pub fn is_unschedulable(&self) -> bool {
        match self.get_condition(PodConditionType::PodScheduled) {
            Some(condition) => {
                condition.status == ConditionStatus::False
                    && condition.reason == UNSCHEDULABLE_REASON
            }
            None => false,
        }
    }

    pub fn update_condition(
        &mut self,
        status: ConditionStatus,
        condition_type: PodConditionType,
        reason: &str,
        last_transition_time: f64,
    ) {
        let conditions = &mut self.status.conditions;
        match conditions
            .iter_mut()
            .find(|elem| elem.condition_type == condition_type)
        {
            Some(condition) => {
                if condition.status != status {
                    condition.last_transition_time = last_transition_time;
                }
                condition.status = status;
                condition.reason = reason.to_string();
            }
            None => {
                conditions.push(PodCondition {
                    status,
                    condition_type,
                    reason: reason.to_string(),
                    last_transition_time,
                });
            }
        }
    }

    // Ref to condition if it exists else None.
    pub fn get_condition(&self, condition_type: PodConditionType) -> Option<&PodCondition> {
        self.status
            .conditions
            .iter()
            .find(|c| c.condition_type == condition_type)
    }
}

#[derive(Default, Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct PodTemplateSpec {
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: PodSpec,
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct PodTemplate {
    pub metadata: ObjectMeta,
    pub template: PodTemplateSpec,
}

#[cfg(test)]
mod tests {
    use crate::core::common::ConditionStatus;
    use crate::core::node::{Taint, TaintEffect};
    use crate::core::pod::{Pod, PodConditionType, Toleration, TolerationOperator};

    #[test]
    fn test_update_condition_keeps_transition_time_for_same_status() {
        let mut pod = Pod::new("pod".to_string(), 100, 100);
        pod.update_condition(
            ConditionStatus::False,
            PodConditionType::PodScheduled,
            "Unschedulable",
            5.0,
        );
        pod.update_condition(
            ConditionStatus::False,
            PodConditionType::PodScheduled,
            "Unschedulable",
            15.0,
        );
        assert_eq!(pod.status.conditions.len(), 1);
        assert_eq!(
            pod.get_condition(PodConditionType::PodScheduled)
                .unwrap()
                .last_transition_time,
            5.0
        );
        assert!(pod.is_unschedulable());
    }

    #[test]
    fn test_toleration_matching() {
        let taint = Taint {
            key: "gpu".to_string(),
            value: "true".to_string(),
            effect: TaintEffect::NoSchedule,
        };
        let equal = Toleration {
            key: "gpu".to_string(),
            value: "true".to_string(),
            ..Default::default()
        };
        let wrong_effect = Toleration {
            key: "gpu".to_string(),
            operator: TolerationOperator::Exists,
            effect: Some(TaintEffect::NoExecute),
            ..Default::default()
        };
        let everything = Toleration {
            operator: TolerationOperator::Exists,
            ..Default::default()
        };
        assert!(equal.tolerates(&taint));
        assert!(!wrong_effect.tolerates(&taint));
        assert!(everything.tolerates(&taint));
    }
}
