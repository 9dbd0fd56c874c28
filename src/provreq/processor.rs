//! Ages ProvisioningRequests: expires bookings, fails requests which were never provisioned in
//! time and deletes requests provisioned or failed too long ago.

use std::rc::Rc;

use log::{debug, info, warn};

use crate::autoscaler::interface::AutoscalerError;
use crate::core::common::ConditionStatus;
use crate::provreq::client::ProvisioningRequestStore;
use crate::provreq::conditions::{
    add_or_update_condition, get_condition, is_true, ConditionType,
    CAPACITY_RESERVATION_TIME_EXPIRED_MSG, CAPACITY_RESERVATION_TIME_EXPIRED_REASON, EXPIRED_MSG,
    EXPIRED_REASON,
};
use crate::provreq::provisioning_request::{is_supported_class, ProvisioningRequest};
use crate::provreq::ProvisioningRequestConfig;

/// What a single `refresh` changed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RefreshStats {
    pub booking_expired: usize,
    pub failed: usize,
    pub deleted: usize,
}

pub struct ProvReqProcessor {
    store: Rc<dyn ProvisioningRequestStore>,
    max_updated: usize,
    reservation_time: f64,
    expiration_time: f64,
    terminal_retention_time: f64,
    processor_instance: String,
}

impl ProvReqProcessor {
    pub fn new(store: Rc<dyn ProvisioningRequestStore>, config: &ProvisioningRequestConfig) -> Self {
        Self {
            store,
            max_updated: config.max_updated_per_loop,
            reservation_time: config.reservation_time,
            expiration_time: config.expiration_time,
            terminal_retention_time: config.terminal_retention_time,
            processor_instance: config.processor_instance.clone(),
        }
    }

    pub fn refresh(&mut self, now: f64) -> Result<RefreshStats, AutoscalerError> {
        let requests = self
            .store
            .list()
            .map_err(|err| AutoscalerError::api_call(err.to_string()))?;

        let mut expired: Vec<ProvisioningRequest> = vec![];
        let mut failed: Vec<ProvisioningRequest> = vec![];
        for pr in requests.iter() {
            if expired.len() + failed.len() >= self.max_updated {
                debug!(
                    "Reached limit of {} updated ProvisioningRequests per loop",
                    self.max_updated
                );
                break;
            }
            if !is_supported_class(&pr.request, &self.processor_instance) {
                continue;
            }
            let conditions = pr.conditions();
            if is_true(conditions, ConditionType::BookingExpired)
                || is_true(conditions, ConditionType::Failed)
            {
                continue;
            }
            match get_condition(conditions, ConditionType::Provisioned) {
                Some(provisioned) if provisioned.status == ConditionStatus::True => {
                    if provisioned.last_transition_time + self.reservation_time < now {
                        expired.push(pr.request.clone());
                    }
                }
                _ => {
                    if pr.creation_timestamp() + self.expiration_time < now {
                        failed.push(pr.request.clone());
                    }
                }
            }
        }

        let mut stats = RefreshStats::default();
        for mut pr in expired.into_iter() {
            add_or_update_condition(
                &mut pr,
                ConditionType::BookingExpired,
                ConditionStatus::True,
                CAPACITY_RESERVATION_TIME_EXPIRED_REASON,
                CAPACITY_RESERVATION_TIME_EXPIRED_MSG,
                now,
            );
            if self.persist(&pr) {
                info!("Booking of ProvisioningRequest {} expired", pr.key());
                stats.booking_expired += 1;
            }
        }
        for mut pr in failed.into_iter() {
            add_or_update_condition(
                &mut pr,
                ConditionType::Failed,
                ConditionStatus::True,
                EXPIRED_REASON,
                EXPIRED_MSG,
                now,
            );
            if self.persist(&pr) {
                info!("ProvisioningRequest {} expired", pr.key());
                stats.failed += 1;
            }
        }

        stats.deleted = self.delete_old_requests(now)?;
        Ok(stats)
    }

    fn persist(&self, pr: &ProvisioningRequest) -> bool {
        match self.store.update(pr) {
            Ok(_) => true,
            Err(err) => {
                warn!("Failed to update ProvisioningRequest {}: {}", pr.key(), err);
                false
            }
        }
    }

    /// Time the retention period of the request is counted from: the `Failed=True` transition,
    /// otherwise the `Provisioned=True` transition.
    fn retained_since(pr: &ProvisioningRequest) -> Option<f64> {
        let conditions = pr.conditions();
        [ConditionType::Failed, ConditionType::Provisioned]
            .into_iter()
            .filter_map(|condition_type| get_condition(conditions, condition_type))
            .find(|condition| condition.status == ConditionStatus::True)
            .map(|condition| condition.last_transition_time)
    }

    fn delete_old_requests(&self, now: f64) -> Result<usize, AutoscalerError> {
        let requests = self
            .store
            .list()
            .map_err(|err| AutoscalerError::api_call(err.to_string()))?;

        let mut deleted = 0;
        for pr in requests.iter() {
            if !is_supported_class(&pr.request, &self.processor_instance) {
                continue;
            }
            let since = match Self::retained_since(&pr.request) {
                Some(since) => since,
                None => continue,
            };
            if since + self.terminal_retention_time >= now {
                continue;
            }
            match self.store.delete(&pr.request) {
                Ok(()) => {
                    info!("Deleted ProvisioningRequest {}", pr.key());
                    deleted += 1;
                }
                Err(err) => warn!(
                    "Failed to delete ProvisioningRequest {}: {}",
                    pr.key(),
                    err
                ),
            }
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use crate::core::common::ConditionStatus;
    use crate::provreq::conditions::{
        add_or_update_condition, get_condition, is_true, ConditionType, CAPACITY_IS_FOUND_REASON,
        EXPIRED_REASON,
    };
    use crate::provreq::processor::{ProvReqProcessor, RefreshStats};
    use crate::provreq::provisioning_request::{ProvisioningRequest, CHECK_CAPACITY_CLASS};
    use crate::provreq::ProvisioningRequestConfig;
    use crate::test_util::helpers::FakeProvisioningRequestStore;

    const DAY: f64 = 86400.0;

    fn request(name: &str, created: f64) -> ProvisioningRequest {
        let mut pr = ProvisioningRequest::new("default", name, CHECK_CAPACITY_CLASS, vec![("t", 1)]);
        pr.metadata.creation_timestamp = created;
        pr
    }

    fn provisioned_at(name: &str, at: f64) -> ProvisioningRequest {
        let mut pr = request(name, 1.0);
        add_or_update_condition(
            &mut pr,
            ConditionType::Provisioned,
            ConditionStatus::True,
            CAPACITY_IS_FOUND_REASON,
            "",
            at,
        );
        pr
    }

    #[test]
    fn test_booking_expires_after_reservation_time() {
        let store = Rc::new(FakeProvisioningRequestStore::default());
        store.add(provisioned_at("p", 100.0));
        let mut processor =
            ProvReqProcessor::new(store.clone(), &ProvisioningRequestConfig::default());

        assert_eq!(processor.refresh(700.0).unwrap(), RefreshStats::default());
        let stats = processor.refresh(700.5).unwrap();
        assert_eq!(stats.booking_expired, 1);

        let pr = store.get_request("default", "p");
        assert!(is_true(&pr.status.conditions, ConditionType::BookingExpired));
        assert!(is_true(&pr.status.conditions, ConditionType::Provisioned));

        // Retention is counted from provisioning time.
        assert_eq!(processor.refresh(100.0 + 7.0 * DAY).unwrap().deleted, 0);
        assert_eq!(processor.refresh(700.0 + 7.0 * DAY).unwrap().deleted, 1);
        assert!(store.try_get_request("default", "p").is_none());
    }

    #[test]
    fn test_never_provisioned_request_fails() {
        let store = Rc::new(FakeProvisioningRequestStore::default());
        store.add(request("old", 0.0));
        store.add(request("young", 10.0));
        let mut processor =
            ProvReqProcessor::new(store.clone(), &ProvisioningRequestConfig::default());

        let stats = processor.refresh(7.0 * DAY + 5.0).unwrap();
        assert_eq!(stats.failed, 1);
        let old = store.get_request("default", "old");
        let failed = get_condition(&old.status.conditions, ConditionType::Failed).unwrap();
        assert_eq!(failed.reason, EXPIRED_REASON);
        assert_eq!(failed.last_transition_time, 7.0 * DAY + 5.0);
        assert!(store.get_request("default", "young").status.conditions.is_empty());
    }

    #[test]
    fn test_updates_are_limited_per_loop() {
        let store = Rc::new(FakeProvisioningRequestStore::default());
        for i in 0..5 {
            store.add(request(&format!("pr-{}", i), i as f64));
        }
        let config = ProvisioningRequestConfig {
            max_updated_per_loop: 2,
            ..Default::default()
        };
        let mut processor = ProvReqProcessor::new(store.clone(), &config);
        let now = 8.0 * DAY;
        assert_eq!(processor.refresh(now).unwrap().failed, 2);
        assert!(is_true(
            &store.get_request("default", "pr-1").status.conditions,
            ConditionType::Failed
        ));
        assert!(!is_true(
            &store.get_request("default", "pr-2").status.conditions,
            ConditionType::Failed
        ));
        assert_eq!(processor.refresh(now).unwrap().failed, 2);
        assert_eq!(processor.refresh(now).unwrap().failed, 1);
    }

    #[test]
    fn test_provisioned_request_is_deleted_with_booking_still_reserved() {
        let store = Rc::new(FakeProvisioningRequestStore::default());
        store.add(provisioned_at("p", 10.0));
        let config = ProvisioningRequestConfig {
            reservation_time: 30.0 * DAY,
            ..Default::default()
        };
        let mut processor = ProvReqProcessor::new(store.clone(), &config);
        assert_eq!(processor.refresh(10.0 + 7.0 * DAY).unwrap(), RefreshStats::default());
        assert!(store.try_get_request("default", "p").is_some());

        let stats = processor.refresh(10.0 + 7.0 * DAY + 1.0).unwrap();
        assert_eq!(stats.booking_expired, 0);
        assert_eq!(stats.deleted, 1);
        assert!(store.try_get_request("default", "p").is_none());
    }

    #[test]
    fn test_deletion_does_not_wait_for_update_budget() {
        let store = Rc::new(FakeProvisioningRequestStore::default());
        for i in 0..3 {
            store.add(provisioned_at(&format!("pr-{}", i), 0.0));
        }
        let config = ProvisioningRequestConfig {
            max_updated_per_loop: 1,
            ..Default::default()
        };
        let mut processor = ProvReqProcessor::new(store.clone(), &config);
        let stats = processor.refresh(7.0 * DAY + 1.0).unwrap();
        assert_eq!(stats.booking_expired, 1);
        assert_eq!(stats.deleted, 3);
    }
}
