//! Type definitions for ProvisioningRequest objects, the annotations that bind synthetic pods to
//! them and schema validation applied on create.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::common::{ConditionStatus, ObjectMeta};
use crate::core::pod::{Pod, PodTemplate};

pub const API_VERSION: &str = "autoscaling.x-k8s.io/v1";
pub const KIND: &str = "ProvisioningRequest";

pub const CHECK_CAPACITY_CLASS: &str = "check-capacity.autoscaling.x-k8s.io";
pub const BEST_EFFORT_ATOMIC_SCALE_UP_CLASS: &str =
    "best-effort-atomic-scale-up.autoscaling.x-k8s.io";

/// Annotation with the name of the ProvisioningRequest consumed by a pod.
pub const PROVISIONING_REQUEST_POD_ANNOTATION_KEY: &str =
    "autoscaling.x-k8s.io/consume-provisioning-request";
/// Older variant of `PROVISIONING_REQUEST_POD_ANNOTATION_KEY`, accepted on read.
pub const DEPRECATED_PROVISIONING_REQUEST_POD_ANNOTATION_KEY: &str =
    "cluster-autoscaler.kubernetes.io/consume-provisioning-request";
pub const PROVISIONING_CLASS_POD_ANNOTATION_KEY: &str =
    "autoscaling.x-k8s.io/provisioning-class-name";

pub const PROCESSOR_INSTANCE_PARAMETER: &str = "processorInstance";
pub const NO_RETRY_PARAMETER: &str = "noRetry";

pub const MAX_POD_SETS: usize = 32;
pub const MAX_PARAMETERS: usize = 100;
pub const MAX_PARAMETER_VALUE_LENGTH: usize = 255;
pub const MAX_CLASS_DETAILS: usize = 64;
pub const MAX_CLASS_DETAIL_VALUE_LENGTH: usize = 32768;
pub const MAX_CLASS_NAME_LENGTH: usize = 253;

#[derive(Default, Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct PodTemplateReference {
    pub name: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct PodSet {
    pub pod_template_ref: PodTemplateReference,
    pub count: i32,
}

#[derive(Default, Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ProvisioningRequestSpec {
    pub provisioning_class_name: String,
    pub pod_sets: Vec<PodSet>,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: ConditionStatus,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    pub last_transition_time: f64,
    #[serde(default)]
    pub observed_generation: i64,
}

#[derive(Default, Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ProvisioningRequestStatus {
    /// Keyed by `condition_type`, at most one entry per type.
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub provisioning_class_details: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ProvisioningRequest {
    pub metadata: ObjectMeta,
    pub spec: ProvisioningRequestSpec,
    #[serde(default)]
    pub status: ProvisioningRequestStatus,
}

impl ProvisioningRequest {
    pub fn new(
        namespace: &str,
        name: &str,
        class_name: &str,
        pod_sets: Vec<(&str, i32)>,
    ) -> Self {
        let mut metadata = ObjectMeta::new(namespace, name);
        metadata.uid = format!("{}/{}", namespace, name);
        Self {
            metadata,
            spec: ProvisioningRequestSpec {
                provisioning_class_name: class_name.to_string(),
                pod_sets: pod_sets
                    .into_iter()
                    .map(|(template, count)| PodSet {
                        pod_template_ref: PodTemplateReference {
                            name: template.to_string(),
                        },
                        count,
                    })
                    .collect(),
                parameters: Default::default(),
            },
            status: Default::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn namespace(&self) -> &str {
        &self.metadata.namespace
    }

    pub fn key(&self) -> String {
        self.metadata.key()
    }

    pub fn class_name(&self) -> &str {
        &self.spec.provisioning_class_name
    }

    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.spec.parameters.get(key).map(|value| value.as_str())
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.status.conditions
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validate(self)
    }
}

/// ProvisioningRequest with pod templates referenced by its pod sets. A template which could
/// not be found is missing from `pod_templates`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisioningRequestWithTemplates {
    pub request: ProvisioningRequest,
    pub pod_templates: Vec<PodTemplate>,
}

impl ProvisioningRequestWithTemplates {
    pub fn new(request: ProvisioningRequest, pod_templates: Vec<PodTemplate>) -> Self {
        Self {
            request,
            pod_templates,
        }
    }

    pub fn name(&self) -> &str {
        self.request.name()
    }

    pub fn namespace(&self) -> &str {
        self.request.namespace()
    }

    pub fn key(&self) -> String {
        self.request.key()
    }

    pub fn uid(&self) -> &str {
        &self.request.metadata.uid
    }

    pub fn class_name(&self) -> &str {
        self.request.class_name()
    }

    pub fn conditions(&self) -> &[Condition] {
        self.request.conditions()
    }

    pub fn creation_timestamp(&self) -> f64 {
        self.request.metadata.creation_timestamp
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningClass {
    CheckCapacity,
    BestEffortAtomicScaleUp,
    Unknown,
}

impl fmt::Display for ProvisioningClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProvisioningClass::CheckCapacity => CHECK_CAPACITY_CLASS,
            ProvisioningClass::BestEffortAtomicScaleUp => BEST_EFFORT_ATOMIC_SCALE_UP_CLASS,
            ProvisioningClass::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

impl ProvisioningClass {
    /// Resolves the class of the request as seen by an autoscaler running with the given
    /// processor instance. Requests addressed to another instance resolve to `Unknown`.
    ///
    /// With a non-empty instance only check-capacity requests are handled: those carrying the
    /// instance in the `processorInstance` parameter, or with the instance used as a literal
    /// prefix of the class name.
    pub fn resolve(pr: &ProvisioningRequest, processor_instance: &str) -> ProvisioningClass {
        let class_name = pr.class_name();
        let instance_parameter = pr.parameter(PROCESSOR_INSTANCE_PARAMETER).unwrap_or("");

        if processor_instance.is_empty() {
            return match class_name {
                CHECK_CAPACITY_CLASS if instance_parameter.is_empty() => {
                    ProvisioningClass::CheckCapacity
                }
                BEST_EFFORT_ATOMIC_SCALE_UP_CLASS => ProvisioningClass::BestEffortAtomicScaleUp,
                _ => ProvisioningClass::Unknown,
            };
        }

        if class_name == CHECK_CAPACITY_CLASS && instance_parameter == processor_instance {
            return ProvisioningClass::CheckCapacity;
        }
        match class_name.strip_prefix(processor_instance) {
            Some(CHECK_CAPACITY_CLASS) => ProvisioningClass::CheckCapacity,
            _ => ProvisioningClass::Unknown,
        }
    }

    pub fn is_supported(&self) -> bool {
        *self != ProvisioningClass::Unknown
    }
}

pub fn is_supported_class(pr: &ProvisioningRequest, processor_instance: &str) -> bool {
    ProvisioningClass::resolve(pr, processor_instance).is_supported()
}

/// Name of the ProvisioningRequest consumed by the pod, read from the current or deprecated
/// annotation key.
pub fn provisioning_request_name(pod: &Pod) -> Option<&str> {
    let annotations = &pod.metadata.annotations;
    annotations
        .get(PROVISIONING_REQUEST_POD_ANNOTATION_KEY)
        .or_else(|| annotations.get(DEPRECATED_PROVISIONING_REQUEST_POD_ANNOTATION_KEY))
        .map(|name| name.as_str())
}

pub fn is_provisioning_request_pod(pod: &Pod) -> bool {
    provisioning_request_name(pod).is_some()
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("metadata.name must not be empty")]
    EmptyName,
    #[error("spec.provisioningClassName {0:?} is not a valid DNS subdomain")]
    InvalidClassName(String),
    #[error("spec.podSets must contain between 1 and {max} items, got {got}")]
    InvalidPodSetsLength { got: usize, max: usize },
    #[error("spec.podSets[{index}].podTemplateRef.name must not be empty")]
    EmptyPodTemplateRef { index: usize },
    #[error("spec.podSets[{index}].count must be at least 1, got {count}")]
    InvalidPodSetCount { index: usize, count: i32 },
    #[error("spec.parameters must contain at most {max} entries, got {got}")]
    TooManyParameters { got: usize, max: usize },
    #[error("spec.parameters[{key}] is longer than {max} characters")]
    ParameterTooLong { key: String, max: usize },
    #[error("status.provisioningClassDetails must contain at most {max} entries, got {got}")]
    TooManyClassDetails { got: usize, max: usize },
    #[error("status.provisioningClassDetails[{key}] is longer than {max} characters")]
    ClassDetailTooLong { key: String, max: usize },
}

fn is_dns_subdomain(value: &str) -> bool {
    if value.is_empty() || value.len() > MAX_CLASS_NAME_LENGTH {
        return false;
    }
    value.split('.').all(|label| {
        let bytes = label.as_bytes();
        !bytes.is_empty()
            && bytes
                .iter()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
            && bytes[0] != b'-'
            && bytes[bytes.len() - 1] != b'-'
    })
}

pub fn validate(pr: &ProvisioningRequest) -> Result<(), ValidationError> {
    if pr.metadata.name.is_empty() {
        return Err(ValidationError::EmptyName);
    }
    if !is_dns_subdomain(pr.class_name()) {
        return Err(ValidationError::InvalidClassName(pr.class_name().to_string()));
    }

    let pod_sets = &pr.spec.pod_sets;
    if pod_sets.is_empty() || pod_sets.len() > MAX_POD_SETS {
        return Err(ValidationError::InvalidPodSetsLength {
            got: pod_sets.len(),
            max: MAX_POD_SETS,
        });
    }
    for (index, pod_set) in pod_sets.iter().enumerate() {
        if pod_set.pod_template_ref.name.is_empty() {
            return Err(ValidationError::EmptyPodTemplateRef { index });
        }
        if pod_set.count < 1 {
            return Err(ValidationError::InvalidPodSetCount {
                index,
                count: pod_set.count,
            });
        }
    }

    let parameters = &pr.spec.parameters;
    if parameters.len() > MAX_PARAMETERS {
        return Err(ValidationError::TooManyParameters {
            got: parameters.len(),
            max: MAX_PARAMETERS,
        });
    }
    if let Some((key, _)) = parameters
        .iter()
        .find(|(_, value)| value.chars().count() > MAX_PARAMETER_VALUE_LENGTH)
    {
        return Err(ValidationError::ParameterTooLong {
            key: key.clone(),
            max: MAX_PARAMETER_VALUE_LENGTH,
        });
    }

    let details = &pr.status.provisioning_class_details;
    if details.len() > MAX_CLASS_DETAILS {
        return Err(ValidationError::TooManyClassDetails {
            got: details.len(),
            max: MAX_CLASS_DETAILS,
        });
    }
    if let Some((key, _)) = details
        .iter()
        .find(|(_, value)| value.chars().count() > MAX_CLASS_DETAIL_VALUE_LENGTH)
    {
        return Err(ValidationError::ClassDetailTooLong {
            key: key.clone(),
            max: MAX_CLASS_DETAIL_VALUE_LENGTH,
        });
    }

    Ok(())
}
