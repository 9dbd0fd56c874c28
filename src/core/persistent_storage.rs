//! Implementation of persistent storage for saving all information about kubernetes objects.
//! In k8s etcd plays this role, in our simulator it is a component which implements simple
//! in-memory key-value storage.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use dslab_core::{log_debug, log_info, log_warn, Event, EventHandler, SimulationContext};

use crate::cast_box;
use crate::core::common::ConditionStatus;
use crate::core::events::{
    CreateNodeRequest, CreatePodRequest, CreatePodTemplateRequest, CreateProvisioningRequest,
    RemoveNodeRequest, RemovePodRequest,
};
use crate::core::node::Node;
use crate::core::pod::{Pod, PodConditionType, PodTemplate, UNSCHEDULABLE_REASON};
use crate::metrics::collector::MetricsCollector;
use crate::provreq::provisioning_request::ProvisioningRequest;

/// Objects of the cluster. Pods, pod templates and provisioning requests are keyed by
/// `<namespace>/<name>`, nodes by name.
#[derive(Default, Debug)]
pub struct StorageData {
    pub nodes: BTreeMap<String, Node>,
    pub pods: BTreeMap<String, Pod>,
    pub pod_templates: BTreeMap<String, PodTemplate>,
    pub provisioning_requests: BTreeMap<String, ProvisioningRequest>,
    // Monotonic counter used to stamp uids of created objects.
    next_uid: u64,
}

impl StorageData {
    pub fn add_node(&mut self, mut node: Node) -> bool {
        if self.nodes.contains_key(&node.metadata.name) {
            return false;
        }
        node.reset_allocatable();
        self.nodes.insert(node.metadata.name.clone(), node);
        true
    }

    /// Removes the node and unbinds pods which were running on it. Returns names of unbound pods.
    pub fn remove_node(&mut self, node_name: &str) -> Option<Vec<String>> {
        self.nodes.remove(node_name)?;
        let mut unbound = vec![];
        for (key, pod) in self.pods.iter_mut() {
            if pod.status.assigned_node == node_name {
                pod.status.assigned_node.clear();
                pod.status.conditions.clear();
                unbound.push(key.clone());
            }
        }
        Some(unbound)
    }

    pub fn add_pod(&mut self, pod: Pod) -> bool {
        let key = pod.metadata.key();
        if self.pods.contains_key(&key) {
            return false;
        }
        self.pods.insert(key, pod);
        true
    }

    pub fn remove_pod(&mut self, namespace: &str, name: &str) -> Option<Pod> {
        self.pods.remove(&format!("{}/{}", namespace, name))
    }

    pub fn add_pod_template(&mut self, pod_template: PodTemplate) -> bool {
        let key = pod_template.metadata.key();
        if self.pod_templates.contains_key(&key) {
            return false;
        }
        self.pod_templates.insert(key, pod_template);
        true
    }

    /// Stores a new provisioning request, filling uid, generation and creation time when they are
    /// not set.
    pub fn add_provisioning_request(&mut self, mut request: ProvisioningRequest, now: f64) -> bool {
        let key = request.key();
        if self.provisioning_requests.contains_key(&key) {
            return false;
        }
        if request.metadata.uid.is_empty() {
            self.next_uid += 1;
            request.metadata.uid = format!("provreq-{}", self.next_uid);
        }
        if request.metadata.generation == 0 {
            request.metadata.generation = 1;
        }
        if request.metadata.creation_timestamp == 0.0 {
            request.metadata.creation_timestamp = now;
        }
        self.provisioning_requests.insert(key, request);
        true
    }

    /// Binds a pending pod to the node and marks it scheduled. Returns false if the pod or the
    /// node does not exist or the pod is already bound.
    pub fn bind_pod(&mut self, pod_key: &str, node_name: &str, now: f64) -> bool {
        if !self.nodes.contains_key(node_name) {
            return false;
        }
        match self.pods.get_mut(pod_key) {
            Some(pod) if !pod.is_scheduled() => {
                pod.status.assigned_node = node_name.to_string();
                pod.update_condition(
                    ConditionStatus::True,
                    PodConditionType::PodScheduled,
                    "",
                    now,
                );
                true
            }
            _ => false,
        }
    }

    /// Marks a pending pod as one no node can host.
    pub fn set_pod_unschedulable(&mut self, pod_key: &str, now: f64) -> bool {
        match self.pods.get_mut(pod_key) {
            Some(pod) if !pod.is_scheduled() => {
                pod.update_condition(
                    ConditionStatus::False,
                    PodConditionType::PodScheduled,
                    UNSCHEDULABLE_REASON,
                    now,
                );
                true
            }
            _ => false,
        }
    }

    /// Pods which are bound to nodes.
    pub fn scheduled_pods(&self) -> Vec<Pod> {
        self.pods
            .values()
            .filter(|pod| pod.is_scheduled())
            .cloned()
            .collect()
    }

    /// Pods which are not bound to nodes, in creation order.
    pub fn pending_pods(&self) -> Vec<Pod> {
        let mut pods: Vec<Pod> = self
            .pods
            .values()
            .filter(|pod| !pod.is_scheduled())
            .cloned()
            .collect();
        pods.sort_by(|lhs, rhs| {
            lhs.metadata
                .creation_timestamp
                .total_cmp(&rhs.metadata.creation_timestamp)
                .then_with(|| lhs.metadata.key().cmp(&rhs.metadata.key()))
        });
        pods
    }
}

pub struct PersistentStorage {
    storage_data: Rc<RefCell<StorageData>>,

    ctx: SimulationContext,
    metrics_collector: Rc<RefCell<MetricsCollector>>,
}

impl PersistentStorage {
    pub fn new(
        storage_data: Rc<RefCell<StorageData>>,
        ctx: SimulationContext,
        metrics_collector: Rc<RefCell<MetricsCollector>>,
    ) -> Self {
        Self {
            storage_data,
            ctx,
            metrics_collector,
        }
    }

    pub fn id(&self) -> u32 {
        self.ctx.id()
    }

    pub fn storage_data(&self) -> Rc<RefCell<StorageData>> {
        self.storage_data.clone()
    }

    fn create_node(&mut self, node: Node) {
        let node_name = node.metadata.name.clone();
        if self.storage_data.borrow_mut().add_node(node) {
            log_debug!(self.ctx, "Node {:?} is added to the cluster", node_name);
        } else {
            log_warn!(self.ctx, "Node {:?} already exists", node_name);
        }
    }

    fn remove_node(&mut self, node_name: String) {
        let unbound = self.storage_data.borrow_mut().remove_node(&node_name);
        match unbound {
            Some(pods) => {
                self.metrics_collector.borrow_mut().metrics.nodes_removed += 1;
                log_debug!(
                    self.ctx,
                    "Node {:?} is removed, {} pods become pending",
                    node_name,
                    pods.len()
                );
            }
            None => log_warn!(self.ctx, "Node {:?} to remove does not exist", node_name),
        }
    }

    fn create_provisioning_request(&mut self, mut request: ProvisioningRequest) {
        request.metadata.set_default_namespace();
        let key = request.key();
        if let Err(err) = request.validate() {
            self.metrics_collector
                .borrow_mut()
                .metrics
                .provisioning_requests_rejected += 1;
            log_warn!(self.ctx, "Rejecting ProvisioningRequest {}: {}", key, err);
            return;
        }
        request.status = Default::default();
        let now = self.ctx.time();
        if self
            .storage_data
            .borrow_mut()
            .add_provisioning_request(request, now)
        {
            self.metrics_collector
                .borrow_mut()
                .metrics
                .provisioning_requests_created += 1;
            log_info!(self.ctx, "ProvisioningRequest {} is created", key);
        } else {
            log_warn!(self.ctx, "ProvisioningRequest {} already exists", key);
        }
    }
}

impl EventHandler for PersistentStorage {
    fn on(&mut self, event: Event) {
        cast_box!(match event.data {
            CreateNodeRequest { node } => {
                self.create_node(node);
            }
            RemoveNodeRequest { node_name } => {
                self.remove_node(node_name);
            }
            CreatePodRequest { pod } => {
                let mut pod = pod;
                pod.metadata.set_default_namespace();
                let key = pod.metadata.key();
                if pod.metadata.creation_timestamp == 0.0 {
                    pod.metadata.creation_timestamp = event.time;
                }
                if self.storage_data.borrow_mut().add_pod(pod) {
                    self.metrics_collector.borrow_mut().metrics.pods_created += 1;
                    log_debug!(self.ctx, "Pod {} is created", key);
                } else {
                    log_warn!(self.ctx, "Pod {} already exists", key);
                }
            }
            RemovePodRequest {
                namespace,
                pod_name,
            } => {
                if self
                    .storage_data
                    .borrow_mut()
                    .remove_pod(&namespace, &pod_name)
                    .is_none()
                {
                    log_warn!(
                        self.ctx,
                        "Pod {}/{} to remove does not exist",
                        namespace,
                        pod_name
                    );
                }
            }
            CreatePodTemplateRequest { pod_template } => {
                let mut pod_template = pod_template;
                pod_template.metadata.set_default_namespace();
                let key = pod_template.metadata.key();
                if !self
                    .storage_data
                    .borrow_mut()
                    .add_pod_template(pod_template)
                {
                    log_warn!(self.ctx, "PodTemplate {} already exists", key);
                }
            }
            CreateProvisioningRequest { request } => {
                self.create_provisioning_request(request);
            }
        })
    }
}
