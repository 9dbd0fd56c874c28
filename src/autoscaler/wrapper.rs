//! Scale-up orchestrator which serves both regular pods and pods of ProvisioningRequests. When
//! both kinds are pending, loops alternate between them so neither kind starves.

use log::debug;

use crate::autoscaler::interface::{AutoscalingContext, ScaleUpOrchestrator, ScaleUpStatus};
use crate::core::pod::Pod;
use crate::provreq::provisioning_request::is_provisioning_request_pod;

pub struct WrapperOrchestrator {
    /// Which kind of pods goes first the next time both kinds are pending.
    scale_up_regular_pods: bool,
    pods_orchestrator: Box<dyn ScaleUpOrchestrator>,
    provreq_orchestrator: Box<dyn ScaleUpOrchestrator>,
}

impl WrapperOrchestrator {
    pub fn new(
        pods_orchestrator: Box<dyn ScaleUpOrchestrator>,
        provreq_orchestrator: Box<dyn ScaleUpOrchestrator>,
    ) -> Self {
        Self {
            scale_up_regular_pods: false,
            pods_orchestrator,
            provreq_orchestrator,
        }
    }
}

impl ScaleUpOrchestrator for WrapperOrchestrator {
    fn scale_up(
        &mut self,
        ctx: &mut AutoscalingContext,
        unschedulable_pods: &[Pod],
    ) -> ScaleUpStatus {
        let (provreq_pods, regular_pods): (Vec<Pod>, Vec<Pod>) = unschedulable_pods
            .iter()
            .cloned()
            .partition(is_provisioning_request_pod);

        if provreq_pods.is_empty() {
            self.scale_up_regular_pods = true;
            return self.pods_orchestrator.scale_up(ctx, &regular_pods);
        }
        if regular_pods.is_empty() {
            self.scale_up_regular_pods = false;
            return self.provreq_orchestrator.scale_up(ctx, &provreq_pods);
        }

        let regular_turn = self.scale_up_regular_pods;
        self.scale_up_regular_pods = !regular_turn;
        if regular_turn {
            debug!(
                "Scaling up {} regular pods, {} ProvisioningRequest pods wait",
                regular_pods.len(),
                provreq_pods.len()
            );
            self.pods_orchestrator.scale_up(ctx, &regular_pods)
        } else {
            debug!(
                "Scaling up {} ProvisioningRequest pods, {} regular pods wait",
                provreq_pods.len(),
                regular_pods.len()
            );
            self.provreq_orchestrator.scale_up(ctx, &provreq_pods)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use crate::autoscaler::interface::{
        AutoscalingContext, ScaleUpOrchestrator, ScaleUpResult, ScaleUpStatus,
    };
    use crate::autoscaler::wrapper::WrapperOrchestrator;
    use crate::core::pod::Pod;
    use crate::provreq::provisioning_request::PROVISIONING_REQUEST_POD_ANNOTATION_KEY;
    use crate::test_util::helpers::default_autoscaler_fixture;

    struct Recorder {
        name: &'static str,
        calls: Rc<RefCell<Vec<(&'static str, usize)>>>,
    }

    impl ScaleUpOrchestrator for Recorder {
        fn scale_up(&mut self, _ctx: &mut AutoscalingContext, pods: &[Pod]) -> ScaleUpStatus {
            self.calls.borrow_mut().push((self.name, pods.len()));
            ScaleUpStatus::new(ScaleUpResult::NotNeeded)
        }
    }

    fn provreq_pod(name: &str) -> Pod {
        let mut pod = Pod::new(name.to_string(), 100, 100);
        pod.metadata.annotations.insert(
            PROVISIONING_REQUEST_POD_ANNOTATION_KEY.to_string(),
            "pr".to_string(),
        );
        pod
    }

    #[test]
    fn test_alternates_between_kinds() {
        let calls = Rc::new(RefCell::new(vec![]));
        let mut wrapper = WrapperOrchestrator::new(
            Box::new(Recorder {
                name: "regular",
                calls: calls.clone(),
            }),
            Box::new(Recorder {
                name: "provreq",
                calls: calls.clone(),
            }),
        );
        let mixed = vec![
            Pod::new("a".to_string(), 100, 100),
            provreq_pod("b"),
            provreq_pod("c"),
        ];
        let mut fixture = default_autoscaler_fixture();
        fixture.with_context(0.0, |ctx| {
            wrapper.scale_up(ctx, &mixed);
            wrapper.scale_up(ctx, &mixed);
            wrapper.scale_up(ctx, &mixed[1..]);
            wrapper.scale_up(ctx, &mixed);
            wrapper.scale_up(ctx, &mixed[..1]);
            wrapper.scale_up(ctx, &mixed);
        });
        assert_eq!(
            *calls.borrow(),
            vec![
                ("provreq", 2),
                ("regular", 1),
                ("provreq", 2),
                ("provreq", 2),
                ("regular", 1),
                ("regular", 1),
            ]
        );
    }
}
