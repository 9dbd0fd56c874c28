//! Picks one ProvisioningRequest per autoscaler loop and appends its pods to the unschedulable
//! pods list. Requests which did not get capacity are retried with exponential backoff.

use std::rc::Rc;

use log::{debug, warn};

use crate::autoscaler::interface::{AutoscalerError, AutoscalingContext, PodListProcessor};
use crate::core::common::ConditionStatus;
use crate::core::pod::Pod;
use crate::provreq::backoff::BackoffCache;
use crate::provreq::client::ProvisioningRequestStore;
use crate::provreq::conditions::{
    add_or_update_condition, get_condition, is_true, ConditionType, FAILED_TO_CREATE_PODS_MSG,
    FAILED_TO_CREATE_PODS_REASON,
};
use crate::provreq::pods::pods_for_provisioning_request;
use crate::provreq::provisioning_request::{is_supported_class, ProvisioningRequestWithTemplates};
use crate::provreq::ProvisioningRequestConfig;

pub struct ProvisioningRequestPodsInjector {
    store: Rc<dyn ProvisioningRequestStore>,
    initial_backoff_time: f64,
    max_backoff_time: f64,
    backoff: BackoffCache,
    processor_instance: String,

    /// Time of the last attempt to inject pods of some request.
    last_process_time: Option<f64>,
    /// Key of the request injected by the last `process` call.
    last_injected: Option<String>,
}

impl ProvisioningRequestPodsInjector {
    pub fn new(store: Rc<dyn ProvisioningRequestStore>, config: &ProvisioningRequestConfig) -> Self {
        Self {
            store,
            initial_backoff_time: config.initial_backoff_time,
            max_backoff_time: config.max_backoff_time,
            backoff: BackoffCache::new(config.max_backoff_cache_size),
            processor_instance: config.processor_instance.clone(),
            last_process_time: None,
            last_injected: None,
        }
    }

    pub fn last_process_time(&self) -> Option<f64> {
        self.last_process_time
    }

    pub fn last_injected(&self) -> Option<&str> {
        self.last_injected.as_deref()
    }

    /// Current retry delay of the request with the given uid.
    pub fn backoff_delay(&mut self, uid: &str) -> Option<f64> {
        self.backoff.get(uid)
    }

    fn is_available_for_injection(&mut self, pr: &ProvisioningRequestWithTemplates, now: f64) -> bool {
        let provisioned = match get_condition(pr.conditions(), ConditionType::Provisioned) {
            Some(condition) => condition,
            None => return true,
        };
        if provisioned.status != ConditionStatus::False {
            return false;
        }

        let delay = self
            .backoff
            .get(pr.uid())
            .unwrap_or(self.initial_backoff_time);
        if provisioned.last_transition_time + delay <= now {
            self.backoff
                .add(pr.uid(), f64::min(2.0 * delay, self.max_backoff_time));
            return true;
        }
        false
    }

    fn mark_failed(&self, pr: &ProvisioningRequestWithTemplates, message: &str, now: f64) {
        let mut request = pr.request.clone();
        add_or_update_condition(
            &mut request,
            ConditionType::Failed,
            ConditionStatus::True,
            FAILED_TO_CREATE_PODS_REASON,
            message,
            now,
        );
        if let Err(err) = self.store.update(&request) {
            warn!(
                "Failed to update ProvisioningRequest {}: {}",
                request.key(),
                err
            );
        }
    }

    /// Appends pods of the first request available for injection.
    pub fn process(
        &mut self,
        mut unschedulable_pods: Vec<Pod>,
        now: f64,
    ) -> Result<Vec<Pod>, AutoscalerError> {
        self.last_injected = None;
        let requests = self
            .store
            .list()
            .map_err(|err| AutoscalerError::api_call(err.to_string()))?;

        for pr in requests.iter() {
            if !is_supported_class(&pr.request, &self.processor_instance) {
                continue;
            }
            let conditions = pr.conditions();
            if is_true(conditions, ConditionType::Failed)
                || is_true(conditions, ConditionType::Provisioned)
            {
                self.backoff.remove(pr.uid());
                continue;
            }
            if !self.is_available_for_injection(pr, now) {
                continue;
            }

            self.last_process_time = Some(now);
            match pods_for_provisioning_request(pr) {
                Ok(pods) => {
                    debug!(
                        "Injecting {} pods of ProvisioningRequest {}",
                        pods.len(),
                        pr.key()
                    );
                    unschedulable_pods.extend(pods);
                    self.last_injected = Some(pr.key());
                    return Ok(unschedulable_pods);
                }
                Err(err) => {
                    warn!(
                        "Failed to create pods for ProvisioningRequest {}: {}",
                        pr.key(),
                        err
                    );
                    let message = format!("{}: {}", FAILED_TO_CREATE_PODS_MSG, err);
                    self.mark_failed(pr, &message, now);
                }
            }
        }
        Ok(unschedulable_pods)
    }
}

impl PodListProcessor for ProvisioningRequestPodsInjector {
    fn process(
        &mut self,
        ctx: &mut AutoscalingContext,
        unschedulable_pods: Vec<Pod>,
    ) -> Result<Vec<Pod>, AutoscalerError> {
        ProvisioningRequestPodsInjector::process(self, unschedulable_pods, ctx.now)
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use crate::core::common::ConditionStatus;
    use crate::provreq::conditions::{
        add_or_update_condition, get_condition, ConditionType, CAPACITY_IS_FOUND_REASON,
        CAPACITY_IS_NOT_FOUND_REASON, FAILED_TO_CREATE_PODS_REASON,
    };
    use crate::provreq::injector::ProvisioningRequestPodsInjector;
    use crate::provreq::provisioning_request::{
        ProvisioningRequest, BEST_EFFORT_ATOMIC_SCALE_UP_CLASS, CHECK_CAPACITY_CLASS,
    };
    use crate::provreq::ProvisioningRequestConfig;
    use crate::test_util::helpers::{test_pod_template, FakeProvisioningRequestStore};

    fn store_with(requests: Vec<ProvisioningRequest>) -> Rc<FakeProvisioningRequestStore> {
        let store = FakeProvisioningRequestStore::default();
        store.add_pod_template(test_pod_template("default", "t", 100, 100));
        for pr in requests {
            store.add(pr);
        }
        Rc::new(store)
    }

    fn request(name: &str, class_name: &str, created: f64) -> ProvisioningRequest {
        let mut pr = ProvisioningRequest::new("default", name, class_name, vec![("t", 2)]);
        pr.metadata.creation_timestamp = created;
        pr
    }

    #[test]
    fn test_injects_exactly_one_request() {
        let store = store_with(vec![
            request("a", CHECK_CAPACITY_CLASS, 1.0),
            request("b", BEST_EFFORT_ATOMIC_SCALE_UP_CLASS, 2.0),
            request("c", "unknown.class", 0.0),
        ]);
        let mut injector =
            ProvisioningRequestPodsInjector::new(store.clone(), &ProvisioningRequestConfig::default());
        let pods = injector.process(vec![], 10.0).unwrap();
        assert_eq!(pods.len(), 2);
        assert!(pods.iter().all(|pod| pod.metadata.name.starts_with("a-")));
        assert_eq!(injector.last_injected(), Some("default/a"));
        assert_eq!(injector.last_process_time(), Some(10.0));
    }

    #[test]
    fn test_skips_provisioned_and_failed() {
        let mut provisioned = request("a", CHECK_CAPACITY_CLASS, 1.0);
        add_or_update_condition(
            &mut provisioned,
            ConditionType::Provisioned,
            ConditionStatus::True,
            CAPACITY_IS_FOUND_REASON,
            "",
            0.0,
        );
        let mut failed = request("b", CHECK_CAPACITY_CLASS, 2.0);
        add_or_update_condition(
            &mut failed,
            ConditionType::Failed,
            ConditionStatus::True,
            "",
            "",
            0.0,
        );
        let store = store_with(vec![provisioned, failed]);
        let mut injector =
            ProvisioningRequestPodsInjector::new(store, &ProvisioningRequestConfig::default());
        assert!(injector.process(vec![], 10.0).unwrap().is_empty());
        assert_eq!(injector.last_process_time(), None);
    }

    #[test]
    fn test_backoff_doubles_up_to_max() {
        let mut pr = request("a", CHECK_CAPACITY_CLASS, 0.0);
        add_or_update_condition(
            &mut pr,
            ConditionType::Provisioned,
            ConditionStatus::False,
            CAPACITY_IS_NOT_FOUND_REASON,
            "",
            0.0,
        );
        let uid = pr.metadata.uid.clone();
        let store = store_with(vec![pr]);
        let mut injector =
            ProvisioningRequestPodsInjector::new(store.clone(), &ProvisioningRequestConfig::default());

        assert!(injector.process(vec![], 59.0).unwrap().is_empty());
        assert_eq!(injector.process(vec![], 60.0).unwrap().len(), 2);
        assert_eq!(injector.backoff_delay(&uid), Some(120.0));

        let mut expected = 120.0;
        let mut failed_at = 60.0;
        for _ in 0..5 {
            store.set_provisioned_false(&uid, failed_at);
            assert!(injector.process(vec![], failed_at + expected - 1.0).unwrap().is_empty());
            assert_eq!(injector.process(vec![], failed_at + expected).unwrap().len(), 2);
            failed_at += expected;
            expected = f64::min(expected * 2.0, 600.0);
            assert_eq!(injector.backoff_delay(&uid), Some(expected));
        }
    }

    #[test]
    fn test_missing_template_fails_request() {
        let pr = ProvisioningRequest::new(
            "default",
            "broken",
            CHECK_CAPACITY_CLASS,
            vec![("t", 1), ("missing", 1)],
        );
        let store = store_with(vec![pr, request("ok", CHECK_CAPACITY_CLASS, 5.0)]);
        let mut injector =
            ProvisioningRequestPodsInjector::new(store.clone(), &ProvisioningRequestConfig::default());

        let pods = injector.process(vec![], 10.0).unwrap();
        assert!(pods.iter().all(|pod| pod.metadata.name.starts_with("ok-")));

        let broken = store.get_request("default", "broken");
        let failed = get_condition(&broken.status.conditions, ConditionType::Failed).unwrap();
        assert_eq!(failed.status, ConditionStatus::True);
        assert_eq!(failed.reason, FAILED_TO_CREATE_PODS_REASON);
        assert!(failed.message.contains("missing"));
    }
}
