//! Tells the autoscaler loop to run scale-up even when its heuristics would skip it.

use crate::core::pod::Pod;
use crate::provreq::provisioning_request::is_provisioning_request_pod;

/// True if at least one pod consumes a ProvisioningRequest.
pub fn should_force_scale_up(unschedulable_pods: &[Pod]) -> bool {
    unschedulable_pods.iter().any(is_provisioning_request_pod)
}

#[cfg(test)]
mod tests {
    use crate::core::pod::Pod;
    use crate::provreq::enforcer::should_force_scale_up;
    use crate::provreq::provisioning_request::DEPRECATED_PROVISIONING_REQUEST_POD_ANNOTATION_KEY;

    #[test]
    fn test_should_force_scale_up() {
        let regular = Pod::new("regular".to_string(), 1, 1);
        assert!(!should_force_scale_up(&[]));
        assert!(!should_force_scale_up(&[regular.clone()]));

        let mut consuming = Pod::new("consuming".to_string(), 1, 1);
        consuming.metadata.annotations.insert(
            DEPRECATED_PROVISIONING_REQUEST_POD_ANNOTATION_KEY.to_string(),
            "pr".to_string(),
        );
        assert!(should_force_scale_up(&[regular, consuming]));
    }
}
