//! Best-effort-atomic provisioning class: requests a scale-up only if a single node group can
//! host all pods of the ProvisioningRequest which do not fit into the cluster already. The
//! request is admitted as soon as the scale-up is requested.

use std::collections::HashSet;
use std::rc::Rc;

use log::{error, info, warn};

use crate::autoscaler::estimator::{best_option, estimate_node_groups};
use crate::autoscaler::interface::{
    AutoscaleAction, AutoscalerError, AutoscalingContext, ScaleUpResult, ScaleUpStatus,
};
use crate::core::common::ConditionStatus;
use crate::core::pod::Pod;
use crate::core::scheduler::hinting::schedule_anywhere;
use crate::provreq::client::ProvisioningRequestStore;
use crate::provreq::conditions::{
    add_or_update_condition, ConditionType, ACCEPTED_MSG, ACCEPTED_REASON, CAPACITY_IS_FOUND_MSG,
    CAPACITY_IS_FOUND_REASON, CAPACITY_IS_NOT_FOUND_MSG, CAPACITY_IS_NOT_FOUND_REASON,
    CAPACITY_IS_PROVISIONED_MSG, CAPACITY_IS_PROVISIONED_REASON, FAILED_TO_CHECK_CAPACITY_MSG,
    FAILED_TO_CHECK_CAPACITY_REASON,
};
use crate::provreq::orchestrator::{provisioning_request_for_pods, ProvisioningClassOrchestrator};
use crate::provreq::provisioning_request::{ProvisioningClass, ProvisioningRequest};

pub struct BestEffortAtomicOrchestrator {
    store: Rc<dyn ProvisioningRequestStore>,
    processor_instance: String,
}

enum Plan {
    /// Everything fits into existing nodes.
    NotNeeded,
    ScaleUp { node_group: String, node_count: u64 },
    NoOptions,
}

impl BestEffortAtomicOrchestrator {
    pub fn new(store: Rc<dyn ProvisioningRequestStore>, processor_instance: &str) -> Self {
        Self {
            store,
            processor_instance: processor_instance.to_string(),
        }
    }

    fn persist(&self, pr: &ProvisioningRequest) -> Result<(), AutoscalerError> {
        self.store.update(pr).map(|_| ()).map_err(|err| {
            warn!("Failed to update ProvisioningRequest {}: {}", pr.key(), err);
            AutoscalerError::internal(format!(
                "failed to update ProvisioningRequest {}: {}",
                pr.key(),
                err
            ))
        })
    }

    /// Simulates on a fork: places what fits into the cluster, then looks for one node group
    /// able to host all the rest.
    fn plan(ctx: &mut AutoscalingContext, pods: &[Pod]) -> Result<Plan, AutoscalerError> {
        let node_budget = ctx.node_budget();
        let mut snapshot = ctx.snapshot.fork_scope();
        let (placements, _) =
            ctx.hinting_simulator
                .try_schedule_pods(&mut snapshot, pods, &schedule_anywhere, false)?;
        let placed: HashSet<String> = placements
            .iter()
            .map(|placement| placement.pod.metadata.key())
            .collect();
        let remaining: Vec<Pod> = pods
            .iter()
            .filter(|pod| !placed.contains(&pod.metadata.key()))
            .cloned()
            .collect();
        if remaining.is_empty() {
            return Ok(Plan::NotNeeded);
        }

        let estimates = estimate_node_groups(&mut snapshot, ctx.node_groups, &remaining, node_budget)?;
        let atomic = estimates
            .into_iter()
            .filter(|estimate| estimate.scheduled_pods.len() == remaining.len())
            .collect();
        Ok(match best_option(atomic) {
            Some(estimate) => Plan::ScaleUp {
                node_group: estimate.node_group,
                node_count: estimate.node_count,
            },
            None => Plan::NoOptions,
        })
    }
}

impl ProvisioningClassOrchestrator for BestEffortAtomicOrchestrator {
    fn supports(&self, class: ProvisioningClass) -> bool {
        class == ProvisioningClass::BestEffortAtomicScaleUp
    }

    fn provision(
        &mut self,
        ctx: &mut AutoscalingContext,
        unschedulable_pods: &[Pod],
    ) -> ScaleUpStatus {
        if unschedulable_pods.is_empty() {
            return ScaleUpStatus::not_tried();
        }
        let pr = match provisioning_request_for_pods(self.store.as_ref(), unschedulable_pods) {
            Ok(Some(pr)) => pr,
            Ok(None) => return ScaleUpStatus::not_tried(),
            Err(err) => return ScaleUpStatus::from_error(err),
        };
        if ProvisioningClass::resolve(&pr.request, &self.processor_instance)
            != ProvisioningClass::BestEffortAtomicScaleUp
        {
            return ScaleUpStatus::not_tried();
        }

        let mut request = pr.request;
        let now = ctx.now;
        add_or_update_condition(
            &mut request,
            ConditionType::Accepted,
            ConditionStatus::True,
            ACCEPTED_REASON,
            ACCEPTED_MSG,
            now,
        );

        let plan = match Self::plan(ctx, unschedulable_pods) {
            Ok(plan) => plan,
            Err(err) => {
                error!(
                    "Error during scale-up simulation for ProvisioningRequest {}: {}",
                    request.key(),
                    err
                );
                add_or_update_condition(
                    &mut request,
                    ConditionType::Provisioned,
                    ConditionStatus::False,
                    FAILED_TO_CHECK_CAPACITY_REASON,
                    FAILED_TO_CHECK_CAPACITY_MSG,
                    now,
                );
                // Already logged by persist.
                let _ = self.persist(&request);
                return ScaleUpStatus::from_error(err);
            }
        };

        match plan {
            Plan::NotNeeded => {
                info!(
                    "Pods of ProvisioningRequest {} fit without scale-up",
                    request.key()
                );
                add_or_update_condition(
                    &mut request,
                    ConditionType::Provisioned,
                    ConditionStatus::True,
                    CAPACITY_IS_FOUND_REASON,
                    CAPACITY_IS_FOUND_MSG,
                    now,
                );
                if let Err(err) = self.persist(&request) {
                    return ScaleUpStatus::from_error(AutoscalerError::internal(format!(
                        "capacity available, but failed to admit workload: {}",
                        err.message
                    )));
                }
                ScaleUpStatus::new(ScaleUpResult::NotNeeded)
            }
            Plan::NoOptions => {
                info!(
                    "No node group can host all pods of ProvisioningRequest {}",
                    request.key()
                );
                add_or_update_condition(
                    &mut request,
                    ConditionType::Provisioned,
                    ConditionStatus::False,
                    CAPACITY_IS_NOT_FOUND_REASON,
                    CAPACITY_IS_NOT_FOUND_MSG,
                    now,
                );
                // Already logged by persist.
                let _ = self.persist(&request);
                let mut status = ScaleUpStatus::new(ScaleUpResult::NoOptionsAvailable);
                status.pods_remain_unschedulable = unschedulable_pods.to_vec();
                status
            }
            Plan::ScaleUp {
                node_group,
                node_count,
            } => {
                let group = match ctx.node_groups.get_mut(&node_group) {
                    Some(group) => group,
                    None => {
                        return ScaleUpStatus::from_error(AutoscalerError::internal(format!(
                            "node group {} disappeared during scale-up",
                            node_group
                        )))
                    }
                };
                let mut status = ScaleUpStatus::new(ScaleUpResult::Successful);
                for _ in 0..node_count {
                    status
                        .scale_up_actions
                        .push(AutoscaleAction::ScaleUp(group.allocate_node()));
                }
                status.pods_triggered_scale_up = unschedulable_pods.to_vec();
                info!(
                    "Scaling up {} nodes of group {} for ProvisioningRequest {}",
                    node_count,
                    node_group,
                    request.key()
                );

                add_or_update_condition(
                    &mut request,
                    ConditionType::Provisioned,
                    ConditionStatus::True,
                    CAPACITY_IS_PROVISIONED_REASON,
                    CAPACITY_IS_PROVISIONED_MSG,
                    now,
                );
                if let Err(err) = self.persist(&request) {
                    status.error = Some(AutoscalerError::internal(format!(
                        "scale up requested, but failed to admit workload: {}",
                        err.message
                    )));
                }
                status
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use crate::autoscaler::interface::{AutoscaleAction, NodeGroup, ScaleUpResult};
    use crate::core::node::Node;
    use crate::core::pod::Pod;
    use crate::provreq::besteffortatomic::BestEffortAtomicOrchestrator;
    use crate::provreq::conditions::{
        get_condition, is_true, ConditionType, CAPACITY_IS_FOUND_REASON,
        CAPACITY_IS_NOT_FOUND_REASON, CAPACITY_IS_PROVISIONED_REASON,
    };
    use crate::provreq::orchestrator::ProvisioningClassOrchestrator;
    use crate::provreq::pods::pods_for_provisioning_request;
    use crate::provreq::provisioning_request::{
        ProvisioningRequest, BEST_EFFORT_ATOMIC_SCALE_UP_CLASS,
    };
    use crate::test_util::helpers::{
        test_pod_template, AutoscalerFixture, FakeProvisioningRequestStore,
    };

    fn setup(cpu: u32, count: i32) -> (Rc<FakeProvisioningRequestStore>, Vec<Pod>) {
        let store = FakeProvisioningRequestStore::default();
        store.add_pod_template(test_pod_template("default", "t", cpu, 100));
        store.add(ProvisioningRequest::new(
            "default",
            "p",
            BEST_EFFORT_ATOMIC_SCALE_UP_CLASS,
            vec![("t", count)],
        ));
        let pods = pods_for_provisioning_request(&store.get_with_templates("default", "p")).unwrap();
        (Rc::new(store), pods)
    }

    fn fixture(max_count: u64) -> AutoscalerFixture {
        let mut fixture =
            AutoscalerFixture::new(vec![Node::new("n1".to_string(), 1000, 4096)], vec![]);
        fixture.node_groups.insert(
            "group".to_string(),
            NodeGroup {
                max_count,
                current_count: 0,
                total_allocated: 0,
                node_template: Node::new("group".to_string(), 1000, 4096),
            },
        );
        fixture
    }

    fn provisioned_reason(store: &FakeProvisioningRequestStore) -> String {
        let pr = store.get_request("default", "p");
        assert!(is_true(&pr.status.conditions, ConditionType::Accepted));
        get_condition(&pr.status.conditions, ConditionType::Provisioned)
            .unwrap()
            .reason
            .clone()
    }

    #[test]
    fn test_fits_without_scale_up() {
        let (store, pods) = setup(400, 2);
        let mut fixture = fixture(5);
        let mut orchestrator = BestEffortAtomicOrchestrator::new(store.clone(), "");
        let status = fixture.with_context(1.0, |ctx| orchestrator.provision(ctx, &pods));
        assert_eq!(status.result, ScaleUpResult::NotNeeded);
        assert!(status.scale_up_actions.is_empty());
        assert_eq!(provisioned_reason(&store), CAPACITY_IS_FOUND_REASON);
        assert_eq!(fixture.snapshot.fork_depth(), 0);
    }

    #[test]
    fn test_atomic_scale_up() {
        let (store, pods) = setup(600, 4);
        let mut fixture = fixture(5);
        let mut orchestrator = BestEffortAtomicOrchestrator::new(store.clone(), "");
        let status = fixture.with_context(1.0, |ctx| orchestrator.provision(ctx, &pods));
        assert_eq!(status.result, ScaleUpResult::Successful);
        // One pod fits into n1, three new nodes host the rest.
        assert_eq!(status.scale_up_actions.len(), 3);
        assert!(matches!(
            &status.scale_up_actions[0],
            AutoscaleAction::ScaleUp(node) if node.metadata.name == "group_1"
        ));
        assert_eq!(fixture.node_groups["group"].current_count, 3);
        assert_eq!(provisioned_reason(&store), CAPACITY_IS_PROVISIONED_REASON);
        assert_eq!(fixture.snapshot.node_count(), 1);
    }

    #[test]
    fn test_partial_scale_up_is_refused() {
        let (store, pods) = setup(600, 4);
        let mut fixture = fixture(2);
        let mut orchestrator = BestEffortAtomicOrchestrator::new(store.clone(), "");
        let status = fixture.with_context(1.0, |ctx| orchestrator.provision(ctx, &pods));
        assert_eq!(status.result, ScaleUpResult::NoOptionsAvailable);
        assert!(status.scale_up_actions.is_empty());
        assert_eq!(fixture.node_groups["group"].current_count, 0);
        assert_eq!(provisioned_reason(&store), CAPACITY_IS_NOT_FOUND_REASON);
    }

    #[test]
    fn test_failed_update_keeps_no_options_result() {
        let (store, pods) = setup(600, 4);
        store.set_call_latency(10.0);
        let mut fixture = fixture(2);
        let mut orchestrator = BestEffortAtomicOrchestrator::new(store.clone(), "");
        let status = fixture.with_context(1.0, |ctx| orchestrator.provision(ctx, &pods));
        assert_eq!(status.result, ScaleUpResult::NoOptionsAvailable);
        assert!(status.error.is_none());
        assert_eq!(status.pods_remain_unschedulable.len(), 4);
        // Nothing was written, the next loop tries again.
        assert!(store
            .get_request("default", "p")
            .status
            .conditions
            .is_empty());
    }
}
