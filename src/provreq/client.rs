//! Access to ProvisioningRequest objects and their pod templates. Reads are served from a cache
//! which is refreshed with `sync`, writes go to the storage and update the cache.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use log::{debug, warn};
use thiserror::Error;

use crate::core::persistent_storage::StorageData;
use crate::core::pod::PodTemplate;
use crate::provreq::provisioning_request::{
    ProvisioningRequest, ProvisioningRequestWithTemplates, ValidationError,
};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("{kind} {key} not found")]
    NotFound { kind: &'static str, key: String },
    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: &'static str, key: String },
    #[error("invalid object: {0}")]
    Invalid(#[from] ValidationError),
    #[error("request did not finish in {timeout}s")]
    Timeout { timeout: f64 },
    #[error("conflict on {key}: {message}")]
    Conflict { key: String, message: String },
}

/// Read and write access to ProvisioningRequests used by every part of the control loop.
pub trait ProvisioningRequestStore {
    /// All requests with their pod templates attached, one per pod set, ordered by creation time,
    /// namespace and name. A template which cannot be found is left out.
    fn list(&self) -> Result<Vec<ProvisioningRequestWithTemplates>, StoreError>;

    fn get(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ProvisioningRequestWithTemplates, StoreError>;

    /// Persists status of the request and returns the stored object.
    fn update(&self, pr: &ProvisioningRequest) -> Result<ProvisioningRequest, StoreError>;

    fn delete(&self, pr: &ProvisioningRequest) -> Result<(), StoreError>;
}

#[derive(Default)]
struct Cache {
    requests: BTreeMap<String, ProvisioningRequest>,
    pod_templates: BTreeMap<String, PodTemplate>,
}

/// Store over in-memory persistent storage.
pub struct ProvisioningRequestClient {
    storage_data: Rc<RefCell<StorageData>>,
    cache: RefCell<Cache>,
    /// Simulated duration of write calls.
    call_latency: f64,
    request_timeout: f64,
}

impl ProvisioningRequestClient {
    pub fn new(storage_data: Rc<RefCell<StorageData>>, request_timeout: f64) -> Self {
        let client = Self {
            storage_data,
            cache: Default::default(),
            call_latency: 0.0,
            request_timeout,
        };
        client.sync();
        client
    }

    pub fn set_call_latency(&mut self, call_latency: f64) {
        self.call_latency = call_latency;
    }

    /// Refreshes the cache from storage.
    pub fn sync(&self) {
        let storage = self.storage_data.borrow();
        let mut cache = self.cache.borrow_mut();
        cache.requests = storage.provisioning_requests.clone();
        cache.pod_templates = storage.pod_templates.clone();
    }

    fn check_deadline(&self) -> Result<(), StoreError> {
        if self.call_latency > self.request_timeout {
            return Err(StoreError::Timeout {
                timeout: self.request_timeout,
            });
        }
        Ok(())
    }

    fn with_templates(cache: &Cache, pr: &ProvisioningRequest) -> ProvisioningRequestWithTemplates {
        let mut pod_templates = vec![];
        for pod_set in pr.spec.pod_sets.iter() {
            let key = format!("{}/{}", pr.namespace(), pod_set.pod_template_ref.name);
            match cache.pod_templates.get(&key) {
                Some(template) => pod_templates.push(template.clone()),
                None => debug!(
                    "PodTemplate {} of ProvisioningRequest {} not found",
                    key,
                    pr.key()
                ),
            }
        }
        ProvisioningRequestWithTemplates::new(pr.clone(), pod_templates)
    }
}

impl ProvisioningRequestStore for ProvisioningRequestClient {
    fn list(&self) -> Result<Vec<ProvisioningRequestWithTemplates>, StoreError> {
        let cache = self.cache.borrow();
        let mut result: Vec<ProvisioningRequestWithTemplates> = cache
            .requests
            .values()
            .map(|pr| Self::with_templates(&cache, pr))
            .collect();
        result.sort_by(|lhs, rhs| {
            lhs.creation_timestamp()
                .total_cmp(&rhs.creation_timestamp())
                .then_with(|| lhs.namespace().cmp(rhs.namespace()))
                .then_with(|| lhs.name().cmp(rhs.name()))
        });
        Ok(result)
    }

    fn get(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ProvisioningRequestWithTemplates, StoreError> {
        let cache = self.cache.borrow();
        let key = format!("{}/{}", namespace, name);
        match cache.requests.get(&key) {
            Some(pr) => Ok(Self::with_templates(&cache, pr)),
            None => Err(StoreError::NotFound {
                kind: "ProvisioningRequest",
                key,
            }),
        }
    }

    fn update(&self, pr: &ProvisioningRequest) -> Result<ProvisioningRequest, StoreError> {
        self.check_deadline()?;
        pr.validate()?;

        let key = pr.key();
        let mut storage = self.storage_data.borrow_mut();
        let stored = storage
            .provisioning_requests
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound {
                kind: "ProvisioningRequest",
                key: key.clone(),
            })?;
        if stored.metadata.uid != pr.metadata.uid {
            return Err(StoreError::Conflict {
                key,
                message: format!(
                    "uid {:?} does not match stored uid {:?}",
                    pr.metadata.uid, stored.metadata.uid
                ),
            });
        }
        // Spec is immutable, only status is persisted.
        stored.status = pr.status.clone();
        let stored = stored.clone();
        self.cache
            .borrow_mut()
            .requests
            .insert(key, stored.clone());
        Ok(stored)
    }

    fn delete(&self, pr: &ProvisioningRequest) -> Result<(), StoreError> {
        self.check_deadline()?;
        let key = pr.key();
        self.cache.borrow_mut().requests.remove(&key);
        match self
            .storage_data
            .borrow_mut()
            .provisioning_requests
            .remove(&key)
        {
            Some(_) => Ok(()),
            None => {
                warn!("ProvisioningRequest {} is already deleted", key);
                Err(StoreError::NotFound {
                    kind: "ProvisioningRequest",
                    key,
                })
            }
        }
    }
}
