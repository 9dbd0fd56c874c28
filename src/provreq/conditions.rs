//! Condition types, canonical reasons and messages of ProvisioningRequest conditions and the
//! only mutator of the condition list.

use std::fmt;
use std::str::FromStr;

use log::warn;

use crate::core::common::ConditionStatus;
use crate::provreq::provisioning_request::{
    is_supported_class, Condition, ProvisioningRequest, ProvisioningRequestWithTemplates,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConditionType {
    /// Request passed validation and is handled by the autoscaler.
    Accepted,
    /// Capacity was found or provisioned for the request.
    Provisioned,
    /// Capacity reserved for the request is not booked anymore.
    BookingExpired,
    /// Request will not be processed anymore.
    Failed,
}

impl ConditionType {
    pub const ALL: [ConditionType; 4] = [
        ConditionType::Accepted,
        ConditionType::Provisioned,
        ConditionType::BookingExpired,
        ConditionType::Failed,
    ];
}

impl AsRef<str> for ConditionType {
    fn as_ref(&self) -> &str {
        match self {
            ConditionType::Accepted => "Accepted",
            ConditionType::Provisioned => "Provisioned",
            ConditionType::BookingExpired => "BookingExpired",
            ConditionType::Failed => "Failed",
        }
    }
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

impl FromStr for ConditionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConditionType::ALL
            .into_iter()
            .find(|condition_type| condition_type.as_ref() == s)
            .ok_or_else(|| format!("unknown condition type {:?}", s))
    }
}

pub const ACCEPTED_REASON: &str = "Accepted";
pub const ACCEPTED_MSG: &str = "ProvisioningRequest is accepted by ClusterAutoscaler";
pub const CAPACITY_IS_FOUND_REASON: &str = "CapacityIsFound";
pub const CAPACITY_IS_FOUND_MSG: &str = "Capacity is found in the cluster";
pub const CAPACITY_IS_NOT_FOUND_REASON: &str = "CapacityIsNotFound";
pub const CAPACITY_IS_NOT_FOUND_MSG: &str = "Capacity is not found, CA will try to find it later.";
pub const NO_RETRY_CAPACITY_IS_NOT_FOUND_MSG: &str = "CA could not find requested capacity";
pub const CAPACITY_IS_PROVISIONED_REASON: &str = "CapacityIsProvisioned";
pub const CAPACITY_IS_PROVISIONED_MSG: &str = "Capacity is provisioned";
pub const FAILED_TO_CHECK_CAPACITY_REASON: &str = "FailedToCheckCapacity";
pub const FAILED_TO_CHECK_CAPACITY_MSG: &str = "Failed to check capacity";
pub const FAILED_TO_CREATE_PODS_REASON: &str = "FailedToCreatePods";
pub const FAILED_TO_CREATE_PODS_MSG: &str = "Failed to create pods";
pub const FAILED_TO_BOOK_CAPACITY_REASON: &str = "FailedToBookCapacity";
pub const FAILED_TO_BOOK_CAPACITY_MSG: &str =
    "Couldn't create pods, the ProvisioningRequest will not be booked";
pub const CAPACITY_RESERVATION_TIME_EXPIRED_REASON: &str = "CapacityReservationTimeExpired";
pub const CAPACITY_RESERVATION_TIME_EXPIRED_MSG: &str = "Capacity reservation time is expired";
pub const EXPIRED_REASON: &str = "Expired";
pub const EXPIRED_MSG: &str = "ProvisioningRequest is expired";

pub fn get_condition<'a>(
    conditions: &'a [Condition],
    condition_type: ConditionType,
) -> Option<&'a Condition> {
    conditions
        .iter()
        .find(|condition| condition.condition_type == condition_type.as_ref())
}

pub fn has_condition_status(
    conditions: &[Condition],
    condition_type: ConditionType,
    status: ConditionStatus,
) -> bool {
    get_condition(conditions, condition_type)
        .map(|condition| condition.status == status)
        .unwrap_or(false)
}

pub fn is_true(conditions: &[Condition], condition_type: ConditionType) -> bool {
    has_condition_status(conditions, condition_type, ConditionStatus::True)
}

/// Failed, or provisioned and with expired booking.
pub fn is_terminal(conditions: &[Condition]) -> bool {
    is_true(conditions, ConditionType::Failed)
        || (is_true(conditions, ConditionType::Provisioned)
            && is_true(conditions, ConditionType::BookingExpired))
}

/// Provisioned request of a class handled by this processor instance whose capacity is still
/// reserved.
pub fn should_book_capacity(pr: &ProvisioningRequestWithTemplates, processor_instance: &str) -> bool {
    let conditions = pr.conditions();
    is_supported_class(&pr.request, processor_instance)
        && is_true(conditions, ConditionType::Provisioned)
        && !is_true(conditions, ConditionType::Failed)
        && !is_true(conditions, ConditionType::BookingExpired)
}

/// Sets the condition of the given type, overwriting an existing entry in place or appending a
/// new one. Unknown condition types are ignored. Every field of the entry, the transition time
/// included, is taken from the arguments.
pub fn add_or_update_condition(
    pr: &mut ProvisioningRequest,
    condition_type: impl AsRef<str>,
    status: ConditionStatus,
    reason: &str,
    message: &str,
    now: f64,
) {
    let condition_type = condition_type.as_ref();
    if ConditionType::from_str(condition_type).is_err() {
        warn!(
            "Ignoring condition {:?} of ProvisioningRequest {}: unknown type",
            condition_type,
            pr.key()
        );
        return;
    }

    let generation = pr.metadata.generation;
    let conditions = &mut pr.status.conditions;
    match conditions
        .iter_mut()
        .find(|condition| condition.condition_type == condition_type)
    {
        Some(condition) => {
            condition.last_transition_time = now;
            condition.status = status;
            condition.reason = reason.to_string();
            condition.message = message.to_string();
            condition.observed_generation = generation;
        }
        None => conditions.push(Condition {
            condition_type: condition_type.to_string(),
            status,
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: now,
            observed_generation: generation,
        }),
    }
}
