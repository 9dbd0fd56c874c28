//! Materialization of ProvisioningRequest pod sets into pods used in scheduling simulations.

use thiserror::Error;

use crate::core::common::{ObjectMeta, OwnerReference};
use crate::core::pod::{Pod, PodSpec, PodTemplate};
use crate::provreq::provisioning_request::{
    ProvisioningRequestWithTemplates, API_VERSION, KIND, PROVISIONING_CLASS_POD_ANNOTATION_KEY,
    PROVISIONING_REQUEST_POD_ANNOTATION_KEY,
};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MaterializeError {
    #[error("missing pod templates, {referenced} templates were referenced, {missing:?} are missing")]
    MissingPodTemplates {
        referenced: usize,
        missing: Vec<String>,
    },
    #[error("pod template {template} is invalid: {reason}")]
    InvalidPodTemplate { template: String, reason: String },
    #[error("pod set {index} has invalid count {count}")]
    InvalidPodSetCount { index: usize, count: i32 },
}

/// Expands pod sets of the request into pods. Pod `j` of pod set `i` is named
/// `<request name>-<i>-<j>` and gets uid `<namespace>/<pod name>`, so repeated calls produce
/// pods with equal identities.
pub fn pods_for_provisioning_request(
    pr: &ProvisioningRequestWithTemplates,
) -> Result<Vec<Pod>, MaterializeError> {
    let pod_sets = &pr.request.spec.pod_sets;
    let mut templates: Vec<&PodTemplate> = Vec::with_capacity(pod_sets.len());
    let mut missing: Vec<String> = vec![];
    for pod_set in pod_sets.iter() {
        let name = &pod_set.pod_template_ref.name;
        match pr
            .pod_templates
            .iter()
            .find(|template| &template.metadata.name == name)
        {
            Some(template) => templates.push(template),
            None => missing.push(name.clone()),
        }
    }
    if !missing.is_empty() || pod_sets.len() != pr.pod_templates.len() {
        return Err(MaterializeError::MissingPodTemplates {
            referenced: pod_sets.len(),
            missing,
        });
    }

    let mut pods = vec![];
    for (set_idx, (pod_set, template)) in pod_sets.iter().zip(templates).enumerate() {
        if pod_set.count < 1 {
            return Err(MaterializeError::InvalidPodSetCount {
                index: set_idx,
                count: pod_set.count,
            });
        }
        if template.template.spec.containers.is_empty() {
            return Err(MaterializeError::InvalidPodTemplate {
                template: template.metadata.name.clone(),
                reason: "no containers".to_string(),
            });
        }
        for replica_idx in 0..pod_set.count {
            pods.push(populate_pod(pr, template, set_idx, replica_idx as usize));
        }
    }
    Ok(pods)
}

fn pod_spec_from_template(template: &PodTemplate) -> PodSpec {
    let mut spec = template.template.spec.clone();
    for container in spec.containers.iter_mut() {
        if container.resources.requests.is_none() {
            container.resources.requests = container.resources.limits;
        }
    }
    spec
}

fn populate_pod(
    pr: &ProvisioningRequestWithTemplates,
    template: &PodTemplate,
    set_idx: usize,
    replica_idx: usize,
) -> Pod {
    let request = &pr.request;
    let generate_name = format!("{}-", request.name());
    let name = format!("{}{}-{}", generate_name, set_idx, replica_idx);

    let mut metadata = ObjectMeta {
        uid: format!("{}/{}", request.namespace(), name),
        name,
        generate_name,
        namespace: request.namespace().to_string(),
        labels: template.template.metadata.labels.clone(),
        annotations: template.template.metadata.annotations.clone(),
        creation_timestamp: request.metadata.creation_timestamp,
        ..Default::default()
    };
    metadata.owner_references.push(OwnerReference {
        api_version: API_VERSION.to_string(),
        kind: KIND.to_string(),
        name: request.name().to_string(),
        uid: request.metadata.uid.clone(),
        controller: true,
    });
    metadata.annotations.insert(
        PROVISIONING_REQUEST_POD_ANNOTATION_KEY.to_string(),
        request.name().to_string(),
    );
    metadata.annotations.insert(
        PROVISIONING_CLASS_POD_ANNOTATION_KEY.to_string(),
        request.class_name().to_string(),
    );

    Pod {
        metadata,
        spec: pod_spec_from_template(template),
        status: Default::default(),
    }
}
