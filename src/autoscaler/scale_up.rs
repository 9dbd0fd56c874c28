//! Scale-up for regular unschedulable pods. Node groups are picked greedily: the option which
//! helps most pods wins, and the rest of the pods are tried again against remaining quota.

use std::collections::HashSet;

use log::{debug, info};

use crate::autoscaler::estimator::{best_option, estimate_node_groups};
use crate::autoscaler::interface::{
    AutoscaleAction, AutoscalerError, AutoscalingContext, ScaleUpOrchestrator, ScaleUpResult,
    ScaleUpStatus,
};
use crate::core::pod::Pod;

#[derive(Default)]
pub struct GenericScaleUpOrchestrator {}

impl GenericScaleUpOrchestrator {
    pub fn new() -> Self {
        Self {}
    }
}

impl ScaleUpOrchestrator for GenericScaleUpOrchestrator {
    fn scale_up(
        &mut self,
        ctx: &mut AutoscalingContext,
        unschedulable_pods: &[Pod],
    ) -> ScaleUpStatus {
        if unschedulable_pods.is_empty() {
            return ScaleUpStatus::new(ScaleUpResult::NotNeeded);
        }

        let mut remaining: Vec<Pod> = unschedulable_pods.to_vec();
        let mut actions: Vec<AutoscaleAction> = vec![];
        let mut triggered: Vec<Pod> = vec![];
        let mut node_budget = ctx.node_budget();

        while !remaining.is_empty() && node_budget > 0 {
            let estimates =
                match estimate_node_groups(ctx.snapshot, ctx.node_groups, &remaining, node_budget) {
                    Ok(estimates) => estimates,
                    Err(err) => return ScaleUpStatus::from_error(AutoscalerError::from(err)),
                };
            let best = match best_option(estimates) {
                Some(best) => best,
                None => break,
            };
            let group = match ctx.node_groups.get_mut(&best.node_group) {
                Some(group) => group,
                None => {
                    return ScaleUpStatus::from_error(AutoscalerError::internal(format!(
                        "node group {} disappeared during scale-up",
                        best.node_group
                    )))
                }
            };
            info!(
                "Scaling up {} nodes of group {} for {} pods",
                best.node_count,
                best.node_group,
                best.scheduled_pods.len()
            );
            for _ in 0..best.node_count {
                actions.push(AutoscaleAction::ScaleUp(group.allocate_node()));
            }
            node_budget = node_budget.saturating_sub(best.node_count);

            let helped: HashSet<String> = best
                .scheduled_pods
                .iter()
                .map(|pod| pod.metadata.key())
                .collect();
            let (helped_pods, rest): (Vec<Pod>, Vec<Pod>) = remaining
                .into_iter()
                .partition(|pod| helped.contains(&pod.metadata.key()));
            triggered.extend(helped_pods);
            remaining = rest;
        }

        if actions.is_empty() {
            debug!(
                "No node group can help any of {} unschedulable pods",
                unschedulable_pods.len()
            );
            let mut status = ScaleUpStatus::new(ScaleUpResult::NoOptionsAvailable);
            status.pods_remain_unschedulable = remaining;
            return status;
        }
        let mut status = ScaleUpStatus::new(ScaleUpResult::Successful);
        status.scale_up_actions = actions;
        status.pods_triggered_scale_up = triggered;
        status.pods_remain_unschedulable = remaining;
        status
    }
}
