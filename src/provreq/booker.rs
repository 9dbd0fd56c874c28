//! Books capacity of provisioned ProvisioningRequests: their pods are bound into the live cluster
//! snapshot at the start of every loop so that scale-down sees nodes hosting them as used.

use std::rc::Rc;

use log::{debug, error, warn};

use crate::autoscaler::interface::{AutoscalerError, AutoscalingContext, PodListProcessor};
use crate::core::common::ConditionStatus;
use crate::core::pod::Pod;
use crate::core::scheduler::hinting::{schedule_anywhere, HintingSimulator};
use crate::core::snapshot::ClusterSnapshot;
use crate::provreq::client::ProvisioningRequestStore;
use crate::provreq::conditions::{
    add_or_update_condition, should_book_capacity, ConditionType, FAILED_TO_BOOK_CAPACITY_MSG,
    FAILED_TO_BOOK_CAPACITY_REASON,
};
use crate::provreq::pods::pods_for_provisioning_request;

pub struct CapacityBooker {
    store: Rc<dyn ProvisioningRequestStore>,
    processor_instance: String,
    booked_pods: usize,
}

impl CapacityBooker {
    pub fn new(store: Rc<dyn ProvisioningRequestStore>, processor_instance: &str) -> Self {
        Self {
            store,
            processor_instance: processor_instance.to_string(),
            booked_pods: 0,
        }
    }

    /// Number of pods bound by the last `book` call.
    pub fn booked_pods(&self) -> usize {
        self.booked_pods
    }

    /// Binds pods of every provisioned request with unexpired booking into the snapshot.
    pub fn book(
        &mut self,
        snapshot: &mut ClusterSnapshot,
        hinting_simulator: &mut HintingSimulator,
        now: f64,
    ) -> Result<(), AutoscalerError> {
        self.booked_pods = 0;
        let requests = self
            .store
            .list()
            .map_err(|err| AutoscalerError::api_call(err.to_string()))?;

        let mut pods: Vec<Pod> = vec![];
        for pr in requests.iter() {
            if !should_book_capacity(pr, &self.processor_instance) {
                continue;
            }
            match pods_for_provisioning_request(pr) {
                Ok(pr_pods) => pods.extend(pr_pods),
                Err(err) => {
                    warn!(
                        "Failed to book capacity for ProvisioningRequest {}: {}",
                        pr.key(),
                        err
                    );
                    let mut request = pr.request.clone();
                    add_or_update_condition(
                        &mut request,
                        ConditionType::Failed,
                        ConditionStatus::True,
                        FAILED_TO_BOOK_CAPACITY_REASON,
                        &format!("{}: {}", FAILED_TO_BOOK_CAPACITY_MSG, err),
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
            }
        }
        if pods.is_empty() {
            return Ok(());
        }

        match hinting_simulator.try_schedule_pods(snapshot, &pods, &schedule_anywhere, false) {
            Ok((placements, _)) => {
                self.booked_pods = placements.len();
                debug!("Booked {} of {} pods", placements.len(), pods.len());
            }
            Err(err) => error!("Error during capacity booking: {}", err),
        }
        Ok(())
    }
}

impl PodListProcessor for CapacityBooker {
    fn process(
        &mut self,
        ctx: &mut AutoscalingContext,
        unschedulable_pods: Vec<Pod>,
    ) -> Result<Vec<Pod>, AutoscalerError> {
        self.book(ctx.snapshot, ctx.hinting_simulator, ctx.now)?;
        Ok(unschedulable_pods)
    }
}
