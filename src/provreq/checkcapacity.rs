//! Check-capacity provisioning class: verifies on a fork of the cluster snapshot that all pods of
//! a ProvisioningRequest fit into the cluster as it is now. Never scales the cluster up.

use std::rc::Rc;

use log::{error, info, warn};

use crate::autoscaler::interface::{AutoscalerError, AutoscalingContext, ScaleUpResult, ScaleUpStatus};
use crate::core::common::ConditionStatus;
use crate::core::pod::Pod;
use crate::core::scheduler::hinting::schedule_anywhere;
use crate::provreq::client::ProvisioningRequestStore;
use crate::provreq::conditions::{
    add_or_update_condition, ConditionType, ACCEPTED_MSG, ACCEPTED_REASON, CAPACITY_IS_FOUND_MSG,
    CAPACITY_IS_FOUND_REASON, CAPACITY_IS_NOT_FOUND_MSG, CAPACITY_IS_NOT_FOUND_REASON,
    NO_RETRY_CAPACITY_IS_NOT_FOUND_MSG,
};
use crate::provreq::orchestrator::{provisioning_request_for_pods, ProvisioningClassOrchestrator};
use crate::provreq::provisioning_request::{
    ProvisioningClass, ProvisioningRequest, NO_RETRY_PARAMETER,
};

pub struct CheckCapacityOrchestrator {
    store: Rc<dyn ProvisioningRequestStore>,
    processor_instance: String,
}

impl CheckCapacityOrchestrator {
    pub fn new(store: Rc<dyn ProvisioningRequestStore>, processor_instance: &str) -> Self {
        Self {
            store,
            processor_instance: processor_instance.to_string(),
        }
    }

    /// Writes the outcome of a capacity miss, honoring the `noRetry` parameter.
    fn capacity_not_found(pr: &mut ProvisioningRequest, now: f64) {
        match pr.parameter(NO_RETRY_PARAMETER) {
            Some("true") => {
                add_or_update_condition(
                    pr,
                    ConditionType::Failed,
                    ConditionStatus::True,
                    CAPACITY_IS_NOT_FOUND_REASON,
                    NO_RETRY_CAPACITY_IS_NOT_FOUND_MSG,
                    now,
                );
                return;
            }
            Some("false") | None => {}
            Some(value) => error!(
                "Ignoring parameter {} with invalid value {:?} in ProvisioningRequest {}, supported values are \"true\" and \"false\"",
                NO_RETRY_PARAMETER,
                value,
                pr.key()
            ),
        }
        add_or_update_condition(
            pr,
            ConditionType::Provisioned,
            ConditionStatus::False,
            CAPACITY_IS_NOT_FOUND_REASON,
            CAPACITY_IS_NOT_FOUND_MSG,
            now,
        );
    }
}

impl ProvisioningClassOrchestrator for CheckCapacityOrchestrator {
    fn supports(&self, class: ProvisioningClass) -> bool {
        class == ProvisioningClass::CheckCapacity
    }

    fn provision(
        &mut self,
        ctx: &mut AutoscalingContext,
        unschedulable_pods: &[Pod],
    ) -> ScaleUpStatus {
        let pr = match provisioning_request_for_pods(self.store.as_ref(), unschedulable_pods) {
            Ok(Some(pr)) => pr,
            Ok(None) => return ScaleUpStatus::not_tried(),
            Err(err) => return ScaleUpStatus::from_error(err),
        };
        if ProvisioningClass::resolve(&pr.request, &self.processor_instance)
            != ProvisioningClass::CheckCapacity
        {
            return ScaleUpStatus::from_error(AutoscalerError::internal(format!(
                "ProvisioningRequest {} has class {:?}, expected check-capacity",
                pr.key(),
                pr.class_name()
            )));
        }

        let mut request = pr.request;
        add_or_update_condition(
            &mut request,
            ConditionType::Accepted,
            ConditionStatus::True,
            ACCEPTED_REASON,
            ACCEPTED_MSG,
            ctx.now,
        );

        let placed = {
            let mut snapshot = ctx.snapshot.fork_scope();
            ctx.hinting_simulator.try_schedule_pods(
                &mut snapshot,
                unschedulable_pods,
                &schedule_anywhere,
                true,
            )
        };
        let placements = match placed {
            Ok((placements, _)) => placements,
            Err(err) => {
                error!(
                    "Error checking capacity for ProvisioningRequest {}: {}",
                    request.key(),
                    err
                );
                return ScaleUpStatus::from_error(AutoscalerError::from(err));
            }
        };

        let mut status;
        if placements.len() == unschedulable_pods.len() {
            info!(
                "Capacity for ProvisioningRequest {} is found",
                request.key()
            );
            add_or_update_condition(
                &mut request,
                ConditionType::Provisioned,
                ConditionStatus::True,
                CAPACITY_IS_FOUND_REASON,
                CAPACITY_IS_FOUND_MSG,
                ctx.now,
            );
            status = ScaleUpStatus::new(ScaleUpResult::Successful);
            status.pods_triggered_scale_up = unschedulable_pods.to_vec();
        } else {
            info!(
                "Capacity for ProvisioningRequest {} is not found, {} of {} pods fit",
                request.key(),
                placements.len(),
                unschedulable_pods.len()
            );
            Self::capacity_not_found(&mut request, ctx.now);
            status = ScaleUpStatus::new(ScaleUpResult::NoOptionsAvailable);
            status.pods_remain_unschedulable = unschedulable_pods.to_vec();
        }

        if let Err(err) = self.store.update(&request) {
            warn!(
                "Failed to update ProvisioningRequest {}: {}",
                request.key(),
                err
            );
            return ScaleUpStatus::from_error(AutoscalerError::internal(format!(
                "error during ScaleUp: failed to update ProvisioningRequest {}: {}",
                request.key(),
                err
            )));
        }
        status
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use crate::autoscaler::interface::ScaleUpResult;
    use crate::core::common::ConditionStatus;
    use crate::core::node::Node;
    use crate::core::pod::Pod;
    use crate::provreq::checkcapacity::CheckCapacityOrchestrator;
    use crate::provreq::conditions::{
        get_condition, is_true, ConditionType, CAPACITY_IS_FOUND_REASON,
        CAPACITY_IS_NOT_FOUND_MSG, CAPACITY_IS_NOT_FOUND_REASON,
        NO_RETRY_CAPACITY_IS_NOT_FOUND_MSG,
    };
    use crate::provreq::orchestrator::ProvisioningClassOrchestrator;
    use crate::provreq::pods::pods_for_provisioning_request;
    use crate::provreq::provisioning_request::{
        ProvisioningRequest, CHECK_CAPACITY_CLASS, NO_RETRY_PARAMETER,
    };
    use crate::test_util::helpers::{
        test_pod_template, AutoscalerFixture, FakeProvisioningRequestStore,
    };

    fn fixture() -> AutoscalerFixture {
        let mut pod = Pod::new("running".to_string(), 300, 500);
        pod.status.assigned_node = "n1".to_string();
        AutoscalerFixture::new(
            vec![
                Node::new("n1".to_string(), 1000, 2048),
                Node::new("n2".to_string(), 1000, 2048),
            ],
            vec![pod],
        )
    }

    fn setup(cpu: u32, count: i32, no_retry: Option<&str>) -> (Rc<FakeProvisioningRequestStore>, Vec<Pod>) {
        let store = FakeProvisioningRequestStore::default();
        store.add_pod_template(test_pod_template("default", "t", cpu, 500));
        let mut pr = ProvisioningRequest::new("default", "p", CHECK_CAPACITY_CLASS, vec![("t", count)]);
        if let Some(value) = no_retry {
            pr.spec
                .parameters
                .insert(NO_RETRY_PARAMETER.to_string(), value.to_string());
        }
        store.add(pr);
        let pods = pods_for_provisioning_request(&store.get_with_templates("default", "p")).unwrap();
        (Rc::new(store), pods)
    }

    #[test]
    fn test_capacity_is_found() {
        let (store, pods) = setup(500, 2, None);
        let mut fixture = fixture();
        let mut orchestrator = CheckCapacityOrchestrator::new(store.clone(), "");
        let status = fixture.with_context(5.0, |ctx| orchestrator.provision(ctx, &pods));
        assert_eq!(status.result, ScaleUpResult::Successful);

        let pr = store.get_request("default", "p");
        assert!(is_true(&pr.status.conditions, ConditionType::Accepted));
        let provisioned = get_condition(&pr.status.conditions, ConditionType::Provisioned).unwrap();
        assert_eq!(provisioned.status, ConditionStatus::True);
        assert_eq!(provisioned.reason, CAPACITY_IS_FOUND_REASON);
        assert_eq!(provisioned.last_transition_time, 5.0);

        // The fork is always reverted.
        assert_eq!(fixture.snapshot.fork_depth(), 0);
        assert!(fixture.snapshot.pod_location("default", "p-0-0").is_none());
    }

    #[test]
    fn test_capacity_is_not_found() {
        let (store, pods) = setup(1500, 1, None);
        let mut fixture = fixture();
        let mut orchestrator = CheckCapacityOrchestrator::new(store.clone(), "");
        let status = fixture.with_context(5.0, |ctx| orchestrator.provision(ctx, &pods));
        assert_eq!(status.result, ScaleUpResult::NoOptionsAvailable);

        let pr = store.get_request("default", "p");
        let provisioned = get_condition(&pr.status.conditions, ConditionType::Provisioned).unwrap();
        assert_eq!(provisioned.status, ConditionStatus::False);
        assert_eq!(provisioned.reason, CAPACITY_IS_NOT_FOUND_REASON);
        assert_eq!(provisioned.message, CAPACITY_IS_NOT_FOUND_MSG);
        assert!(!is_true(&pr.status.conditions, ConditionType::Failed));
    }

    #[test]
    fn test_no_retry_fails_request() {
        let (store, pods) = setup(1500, 1, Some("true"));
        let mut fixture = fixture();
        let mut orchestrator = CheckCapacityOrchestrator::new(store.clone(), "");
        fixture.with_context(5.0, |ctx| orchestrator.provision(ctx, &pods));

        let pr = store.get_request("default", "p");
        let failed = get_condition(&pr.status.conditions, ConditionType::Failed).unwrap();
        assert_eq!(failed.status, ConditionStatus::True);
        assert_eq!(failed.message, NO_RETRY_CAPACITY_IS_NOT_FOUND_MSG);
        assert!(get_condition(&pr.status.conditions, ConditionType::Provisioned).is_none());
    }

    #[test]
    fn test_invalid_no_retry_is_ignored() {
        let (store, pods) = setup(1500, 1, Some("maybe"));
        let mut fixture = fixture();
        let mut orchestrator = CheckCapacityOrchestrator::new(store.clone(), "");
        fixture.with_context(5.0, |ctx| orchestrator.provision(ctx, &pods));

        let pr = store.get_request("default", "p");
        assert!(!is_true(&pr.status.conditions, ConditionType::Failed));
        let provisioned = get_condition(&pr.status.conditions, ConditionType::Provisioned).unwrap();
        assert_eq!(provisioned.status, ConditionStatus::False);
    }

    #[test]
    fn test_failed_update_is_an_error() {
        let (store, pods) = setup(500, 1, None);
        store.set_call_latency(10.0);
        let mut fixture = fixture();
        let mut orchestrator = CheckCapacityOrchestrator::new(store.clone(), "");
        let status = fixture.with_context(5.0, |ctx| orchestrator.provision(ctx, &pods));
        assert_eq!(status.result, ScaleUpResult::Error);
        assert!(status.error.is_some());
        assert!(store.get_request("default", "p").status.conditions.is_empty());
    }
}
