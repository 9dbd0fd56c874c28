//! Dispatches pods of ProvisioningRequests to the orchestrator of their provisioning class.

use std::collections::BTreeMap;
use std::rc::Rc;

use log::{debug, warn};

use crate::autoscaler::interface::{
    AutoscalerError, AutoscalingContext, ScaleUpOrchestrator, ScaleUpStatus,
};
use crate::core::pod::Pod;
use crate::provreq::client::{ProvisioningRequestStore, StoreError};
use crate::provreq::provisioning_request::{
    provisioning_request_name, ProvisioningClass, ProvisioningRequestWithTemplates, KIND,
};

/// Scale-up logic of a single provisioning class.
pub trait ProvisioningClassOrchestrator {
    fn supports(&self, class: ProvisioningClass) -> bool;

    /// Handles pods which all belong to one ProvisioningRequest.
    fn provision(&mut self, ctx: &mut AutoscalingContext, unschedulable_pods: &[Pod])
        -> ScaleUpStatus;
}

/// Finds the ProvisioningRequest owning the pods. All pods must share namespace and controller
/// reference. Returns `None` for an empty pod list or a request missing from the store.
pub fn provisioning_request_for_pods(
    store: &dyn ProvisioningRequestStore,
    pods: &[Pod],
) -> Result<Option<ProvisioningRequestWithTemplates>, AutoscalerError> {
    let first = match pods.first() {
        Some(pod) => pod,
        None => return Ok(None),
    };
    let owner = match first.metadata.controller_ref() {
        Some(owner) if owner.kind == KIND => owner,
        _ => {
            return Err(AutoscalerError::internal(format!(
                "pod {} is not owned by a ProvisioningRequest",
                first.metadata.key()
            )))
        }
    };
    for pod in pods.iter() {
        let same_owner = pod
            .metadata
            .controller_ref()
            .map(|other| other.kind == owner.kind && other.name == owner.name)
            .unwrap_or(false);
        if pod.metadata.namespace != first.metadata.namespace || !same_owner {
            return Err(AutoscalerError::internal(format!(
                "pods {} and {} belong to different ProvisioningRequests",
                first.metadata.key(),
                pod.metadata.key()
            )));
        }
    }

    match store.get(&first.metadata.namespace, &owner.name) {
        Ok(pr) => Ok(Some(pr)),
        Err(StoreError::NotFound { key, .. }) => {
            warn!("ProvisioningRequest {} of unschedulable pods not found", key);
            Ok(None)
        }
        Err(err) => Err(AutoscalerError::api_call(err.to_string())),
    }
}

pub struct ProvisioningRequestOrchestrator {
    store: Rc<dyn ProvisioningRequestStore>,
    processor_instance: String,
    classes: Vec<Box<dyn ProvisioningClassOrchestrator>>,
}

impl ProvisioningRequestOrchestrator {
    pub fn new(
        store: Rc<dyn ProvisioningRequestStore>,
        processor_instance: &str,
        classes: Vec<Box<dyn ProvisioningClassOrchestrator>>,
    ) -> Self {
        Self {
            store,
            processor_instance: processor_instance.to_string(),
            classes,
        }
    }
}

impl ScaleUpOrchestrator for ProvisioningRequestOrchestrator {
    fn scale_up(
        &mut self,
        ctx: &mut AutoscalingContext,
        unschedulable_pods: &[Pod],
    ) -> ScaleUpStatus {
        let mut pods_by_request: BTreeMap<(String, String), Vec<Pod>> = BTreeMap::new();
        for pod in unschedulable_pods.iter() {
            if let Some(name) = provisioning_request_name(pod) {
                pods_by_request
                    .entry((pod.metadata.namespace.clone(), name.to_string()))
                    .or_default()
                    .push(pod.clone());
            }
        }

        let mut status = ScaleUpStatus::not_tried();
        for ((namespace, name), pods) in pods_by_request.into_iter() {
            let pr = match self.store.get(&namespace, &name) {
                Ok(pr) => pr,
                Err(err) => {
                    warn!(
                        "Failed to get ProvisioningRequest {}/{}: {}",
                        namespace, name, err
                    );
                    status = status.merge(ScaleUpStatus::from_error(AutoscalerError::api_call(
                        err.to_string(),
                    )));
                    continue;
                }
            };
            let class = ProvisioningClass::resolve(&pr.request, &self.processor_instance);
            match self.classes.iter_mut().find(|orchestrator| orchestrator.supports(class)) {
                Some(orchestrator) => {
                    status = status.merge(orchestrator.provision(ctx, &pods));
                }
                None => {
                    debug!(
                        "No orchestrator for class {:?} of ProvisioningRequest {}",
                        pr.class_name(),
                        pr.key()
                    );
                }
            }
        }
        status
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use crate::autoscaler::interface::{AutoscalerErrorKind, ScaleUpOrchestrator, ScaleUpResult};
    use crate::provreq::orchestrator::provisioning_request_for_pods;
    use crate::provreq::pods::pods_for_provisioning_request;
    use crate::provreq::provisioning_request::{ProvisioningRequest, CHECK_CAPACITY_CLASS};
    use crate::test_util::helpers::{
        default_autoscaler_fixture, provreq_orchestrator, test_pod_template,
        FakeProvisioningRequestStore,
    };

    fn store() -> Rc<FakeProvisioningRequestStore> {
        let store = FakeProvisioningRequestStore::default();
        store.add_pod_template(test_pod_template("default", "t", 100, 100));
        store.add(ProvisioningRequest::new(
            "default",
            "a",
            CHECK_CAPACITY_CLASS,
            vec![("t", 2)],
        ));
        store.add(ProvisioningRequest::new(
            "default",
            "b",
            CHECK_CAPACITY_CLASS,
            vec![("t", 1)],
        ));
        store.add(ProvisioningRequest::new(
            "default",
            "other",
            "other.example.com",
            vec![("t", 1)],
        ));
        Rc::new(store)
    }

    #[test]
    fn test_pods_of_single_request() {
        let store = store();
        let a = pods_for_provisioning_request(&store.get_with_templates("default", "a")).unwrap();
        let pr = provisioning_request_for_pods(store.as_ref(), &a)
            .unwrap()
            .unwrap();
        assert_eq!(pr.name(), "a");
        assert!(provisioning_request_for_pods(store.as_ref(), &[])
            .unwrap()
            .is_none());

        let mut mixed = a.clone();
        mixed.extend(
            pods_for_provisioning_request(&store.get_with_templates("default", "b")).unwrap(),
        );
        let err = provisioning_request_for_pods(store.as_ref(), &mixed).unwrap_err();
        assert_eq!(err.kind, AutoscalerErrorKind::InternalError);
    }

    #[test]
    fn test_unsupported_class_is_not_tried() {
        let store = store();
        let pods =
            pods_for_provisioning_request(&store.get_with_templates("default", "other")).unwrap();
        let mut fixture = default_autoscaler_fixture();
        let mut orchestrator = provreq_orchestrator(store.clone(), "");
        let status = fixture.with_context(10.0, |ctx| orchestrator.scale_up(ctx, &pods));
        assert_eq!(status.result, ScaleUpResult::NotTried);
        assert!(store
            .get_request("default", "other")
            .status
            .conditions
            .is_empty());
    }
}
