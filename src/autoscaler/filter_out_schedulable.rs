//! Drops unschedulable pods which fit into the cluster as the autoscaler sees it, including nodes
//! that are still being provisioned. Pods that fit are bound in the snapshot, so pods processed
//! later compete for the remaining space only.

use std::collections::HashSet;

use log::debug;

use crate::autoscaler::interface::{AutoscalerError, AutoscalingContext, PodListProcessor};
use crate::core::pod::Pod;
use crate::core::scheduler::hinting::schedule_anywhere;

#[derive(Default)]
pub struct FilterOutSchedulablePodListProcessor {}

impl FilterOutSchedulablePodListProcessor {
    pub fn new() -> Self {
        Self {}
    }
}

impl PodListProcessor for FilterOutSchedulablePodListProcessor {
    fn process(
        &mut self,
        ctx: &mut AutoscalingContext,
        unschedulable_pods: Vec<Pod>,
    ) -> Result<Vec<Pod>, AutoscalerError> {
        if unschedulable_pods.is_empty() {
            return Ok(unschedulable_pods);
        }
        let (placements, overflowing) = ctx.hinting_simulator.try_schedule_pods(
            ctx.snapshot,
            &unschedulable_pods,
            &schedule_anywhere,
            false,
        )?;
        if overflowing > 0 {
            debug!(
                "{} controllers had too many different unschedulable pods to cache",
                overflowing
            );
        }
        let schedulable: HashSet<String> = placements
            .iter()
            .map(|placement| placement.pod.metadata.key())
            .collect();
        debug!(
            "Filtered out {} of {} unschedulable pods which fit into existing or upcoming nodes",
            schedulable.len(),
            unschedulable_pods.len()
        );
        Ok(unschedulable_pods
            .into_iter()
            .filter(|pod| !schedulable.contains(&pod.metadata.key()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use crate::autoscaler::filter_out_schedulable::FilterOutSchedulablePodListProcessor;
    use crate::autoscaler::interface::PodListProcessor;
    use crate::core::pod::Pod;
    use crate::test_util::helpers::default_autoscaler_fixture;

    #[test]
    fn test_keeps_only_pods_which_do_not_fit() {
        let mut fixture = default_autoscaler_fixture();
        let pods = vec![
            Pod::new("a".to_string(), 800, 100),
            Pod::new("b".to_string(), 800, 100),
            Pod::new("c".to_string(), 800, 100),
            Pod::new("huge".to_string(), 1500, 100),
        ];
        let mut processor = FilterOutSchedulablePodListProcessor::new();
        let left = fixture
            .with_context(0.0, |ctx| processor.process(ctx, pods))
            .unwrap();
        let names: Vec<&str> = left.iter().map(|pod| pod.metadata.name.as_str()).collect();
        assert_eq!(names, vec!["c", "huge"]);
        assert!(fixture.snapshot.pod_location("default", "a").is_some());
        assert!(fixture.snapshot.pod_location("default", "b").is_some());
    }
}
