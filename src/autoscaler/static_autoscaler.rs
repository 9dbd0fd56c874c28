//! A single iteration of the autoscaler over the cluster state read from persistent storage.
//!
//! Every `run_once` rebuilds the snapshot from stored nodes and scheduled pods plus nodes which
//! were requested but did not join the cluster yet. Then:
//!   1) ProvisioningRequests are aged by the lifecycle processor.
//!   2) Capacity of provisioned requests is booked in the snapshot.
//!   3) Unschedulable pods which fit into the snapshot are dropped.
//!   4) Pods consuming ProvisioningRequests are dropped.
//!   5) Pods of at most one unprovisioned request are injected.
//!   6) Scale-up runs for what is left, scale-down runs when nothing was scaled up.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::rc::Rc;

use log::{debug, info, warn};

use crate::autoscaler::cluster_autoscaler::ClusterAutoscalerConfig;
use crate::autoscaler::filter_out_schedulable::FilterOutSchedulablePodListProcessor;
use crate::autoscaler::interface::{
    AutoscaleAction, AutoscalerError, AutoscalerErrorKind, AutoscalingContext, NodeGroup,
    PodListProcessor, ScaleUpOrchestrator, ScaleUpResult, ScaleUpStatus,
    CLUSTER_AUTOSCALER_ORIGIN_LABEL, NODE_GROUP_LABEL, ORIGIN_LABEL,
};
use crate::autoscaler::scale_down::ScaleDownPlanner;
use crate::autoscaler::scale_up::GenericScaleUpOrchestrator;
use crate::autoscaler::wrapper::WrapperOrchestrator;
use crate::core::common::ConditionStatus;
use crate::core::node::Node;
use crate::core::persistent_storage::StorageData;
use crate::core::pod::Pod;
use crate::core::scheduler::hinting::HintingSimulator;
use crate::core::snapshot::ClusterSnapshot;
use crate::provreq::besteffortatomic::BestEffortAtomicOrchestrator;
use crate::provreq::booker::CapacityBooker;
use crate::provreq::checkcapacity::CheckCapacityOrchestrator;
use crate::provreq::client::{ProvisioningRequestClient, ProvisioningRequestStore};
use crate::provreq::conditions::{get_condition, is_true, ConditionType};
use crate::provreq::enforcer::should_force_scale_up;
use crate::provreq::filter::{ProvisioningRequestPodsFilter, RecordedEvent, RecordingEventManager};
use crate::provreq::injector::ProvisioningRequestPodsInjector;
use crate::provreq::orchestrator::ProvisioningRequestOrchestrator;
use crate::provreq::processor::{ProvReqProcessor, RefreshStats};
use crate::provreq::ProvisioningRequestConfig;

/// Condition changes of ProvisioningRequests observed by a loop.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProvisioningRequestTransitions {
    /// Requests which became `Provisioned=True`.
    pub provisioned: usize,
    /// New `Provisioned=False` writes, one per failed capacity check.
    pub capacity_not_found: usize,
    /// Requests which became `Failed=True`.
    pub failed: usize,
}

#[derive(Debug)]
pub struct AutoscalerLoopResult {
    pub scale_up: ScaleUpStatus,
    pub scaled_down_nodes: Vec<String>,
    pub unschedulable_pods: usize,
    pub refresh: RefreshStats,
    pub booked_pods: usize,
    /// Key of the request whose pods were injected by this loop.
    pub injected: Option<String>,
    pub ignored_pod_events: Vec<RecordedEvent>,
    pub transitions: ProvisioningRequestTransitions,
}

impl AutoscalerLoopResult {
    fn new() -> Self {
        Self {
            scale_up: ScaleUpStatus::not_tried(),
            scaled_down_nodes: vec![],
            unschedulable_pods: 0,
            refresh: Default::default(),
            booked_pods: 0,
            injected: None,
            ignored_pod_events: vec![],
            transitions: Default::default(),
        }
    }

    pub fn scaled_up_nodes(&self) -> Vec<&Node> {
        self.scale_up
            .scale_up_actions
            .iter()
            .filter_map(|action| match action {
                AutoscaleAction::ScaleUp(node) => Some(node),
                AutoscaleAction::ScaleDown(_) => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
struct ObservedRequest {
    provisioned: Option<(ConditionStatus, f64)>,
    failed: bool,
}

/// Parts of the loop which exist only with ProvisioningRequests enabled.
struct ProvisioningRequestProcessors {
    client: Rc<ProvisioningRequestClient>,
    processor: ProvReqProcessor,
    booker: CapacityBooker,
    filter: ProvisioningRequestPodsFilter,
    injector: ProvisioningRequestPodsInjector,
    event_manager: Rc<RefCell<RecordingEventManager>>,
    observed: HashMap<String, ObservedRequest>,
}

impl ProvisioningRequestProcessors {
    fn new(client: Rc<ProvisioningRequestClient>, config: &ProvisioningRequestConfig) -> Self {
        let store: Rc<dyn ProvisioningRequestStore> = client.clone();
        let event_manager = Rc::new(RefCell::new(RecordingEventManager::default()));
        Self {
            processor: ProvReqProcessor::new(store.clone(), config),
            booker: CapacityBooker::new(store.clone(), &config.processor_instance),
            filter: ProvisioningRequestPodsFilter::new(
                event_manager.clone(),
                config.max_ignored_pod_events,
            ),
            injector: ProvisioningRequestPodsInjector::new(store, config),
            event_manager,
            observed: Default::default(),
            client,
        }
    }

    /// Counts condition changes since the previous call.
    fn observe(&mut self) -> ProvisioningRequestTransitions {
        let mut transitions = ProvisioningRequestTransitions::default();
        let requests = match self.client.list() {
            Ok(requests) => requests,
            Err(err) => {
                warn!("Failed to list ProvisioningRequests: {}", err);
                return transitions;
            }
        };
        let mut seen: HashSet<String> = HashSet::with_capacity(requests.len());
        for pr in requests.iter() {
            let current = ObservedRequest {
                provisioned: get_condition(pr.conditions(), ConditionType::Provisioned)
                    .map(|condition| (condition.status, condition.last_transition_time)),
                failed: is_true(pr.conditions(), ConditionType::Failed),
            };
            let previous = self.observed.get(pr.uid());
            let previous_status = previous
                .and_then(|observed| observed.provisioned)
                .map(|(status, _)| status);
            match current.provisioned {
                Some((ConditionStatus::True, _)) if previous_status != Some(ConditionStatus::True) => {
                    transitions.provisioned += 1;
                }
                Some((ConditionStatus::False, _))
                    if previous.map(|observed| observed.provisioned) != Some(current.provisioned) =>
                {
                    transitions.capacity_not_found += 1;
                }
                _ => {}
            }
            if current.failed && !previous.map(|observed| observed.failed).unwrap_or(false) {
                transitions.failed += 1;
            }
            seen.insert(pr.uid().to_string());
            self.observed.insert(pr.uid().to_string(), current);
        }
        self.observed.retain(|uid, _| seen.contains(uid));
        transitions
    }
}

pub struct StaticAutoscaler {
    storage_data: Rc<RefCell<StorageData>>,
    snapshot: ClusterSnapshot,
    hinting_simulator: HintingSimulator,
    node_groups: BTreeMap<String, NodeGroup>,
    /// Nodes requested by scale-up which are not in storage yet.
    upcoming_nodes: BTreeMap<String, Node>,
    max_node_count: u64,
    new_pod_scale_up_delay: f64,
    scale_down_enabled: bool,

    filter_out_schedulable: FilterOutSchedulablePodListProcessor,
    provreq: Option<ProvisioningRequestProcessors>,
    scale_up_orchestrator: Box<dyn ScaleUpOrchestrator>,
    scale_down_planner: ScaleDownPlanner,
}

fn all_pods_are_new(pods: &[Pod], now: f64, new_pod_scale_up_delay: f64) -> bool {
    new_pod_scale_up_delay > 0.0
        && pods
            .iter()
            .all(|pod| pod.metadata.creation_timestamp + new_pod_scale_up_delay > now)
}

impl StaticAutoscaler {
    pub fn new(
        storage_data: Rc<RefCell<StorageData>>,
        config: &ClusterAutoscalerConfig,
        provreq_config: &ProvisioningRequestConfig,
    ) -> Result<Self, AutoscalerError> {
        let mut node_groups: BTreeMap<String, NodeGroup> = Default::default();
        for node_group in config.node_groups.iter() {
            let name = node_group.name().to_string();
            if name.is_empty() {
                return Err(AutoscalerError::new(
                    AutoscalerErrorKind::CloudProviderError,
                    "node group template must have a name",
                ));
            }
            let mut group = node_group.clone();
            group.current_count = 0;
            group.total_allocated = 0;
            group.node_template.reset_allocatable();
            let labels = &mut group.node_template.metadata.labels;
            labels.insert(
                ORIGIN_LABEL.to_string(),
                CLUSTER_AUTOSCALER_ORIGIN_LABEL.to_string(),
            );
            labels.insert(NODE_GROUP_LABEL.to_string(), name.clone());
            if node_groups.insert(name.clone(), group).is_some() {
                return Err(AutoscalerError::new(
                    AutoscalerErrorKind::CloudProviderError,
                    format!("node group {} is defined twice", name),
                ));
            }
        }

        let mut scale_up_orchestrator: Box<dyn ScaleUpOrchestrator> =
            Box::new(GenericScaleUpOrchestrator::new());
        let mut provreq = None;
        if provreq_config.enabled {
            let client = Rc::new(ProvisioningRequestClient::new(
                storage_data.clone(),
                provreq_config.request_timeout,
            ));
            let store: Rc<dyn ProvisioningRequestStore> = client.clone();
            let instance = provreq_config.processor_instance.as_str();
            let provreq_orchestrator = ProvisioningRequestOrchestrator::new(
                store.clone(),
                instance,
                vec![
                    Box::new(CheckCapacityOrchestrator::new(store.clone(), instance)),
                    Box::new(BestEffortAtomicOrchestrator::new(store, instance)),
                ],
            );
            scale_up_orchestrator = Box::new(WrapperOrchestrator::new(
                scale_up_orchestrator,
                Box::new(provreq_orchestrator),
            ));
            provreq = Some(ProvisioningRequestProcessors::new(client, provreq_config));
        }

        Ok(Self {
            storage_data,
            snapshot: ClusterSnapshot::default(),
            hinting_simulator: HintingSimulator::new(),
            node_groups,
            upcoming_nodes: Default::default(),
            max_node_count: config.max_node_count,
            new_pod_scale_up_delay: config.new_pod_scale_up_delay,
            scale_down_enabled: config.scale_down_enabled,
            filter_out_schedulable: FilterOutSchedulablePodListProcessor::new(),
            provreq,
            scale_up_orchestrator,
            scale_down_planner: ScaleDownPlanner::new(config.scale_down_utilization_threshold),
        })
    }

    /// Cluster state as seen by the last loop.
    pub fn snapshot(&self) -> &ClusterSnapshot {
        &self.snapshot
    }

    pub fn node_groups(&self) -> &BTreeMap<String, NodeGroup> {
        &self.node_groups
    }

    pub fn upcoming_nodes(&self) -> impl Iterator<Item = &Node> {
        self.upcoming_nodes.values()
    }

    /// Time of the last loop which selected a ProvisioningRequest for injection.
    pub fn last_injection_time(&self) -> Option<f64> {
        self.provreq
            .as_ref()
            .and_then(|provreq| provreq.injector.last_process_time())
    }

    fn refresh_snapshot(&mut self) {
        let storage = self.storage_data.borrow();
        self.upcoming_nodes
            .retain(|name, _| !storage.nodes.contains_key(name));
        let mut nodes: Vec<Node> = storage.nodes.values().cloned().collect();
        nodes.extend(self.upcoming_nodes.values().cloned());
        self.snapshot.initialize(nodes, storage.scheduled_pods());
    }

    pub fn run_once(&mut self, now: f64) -> Result<AutoscalerLoopResult, AutoscalerError> {
        let mut result = AutoscalerLoopResult::new();

        if let Some(provreq) = self.provreq.as_mut() {
            provreq.client.sync();
            match provreq.processor.refresh(now) {
                Ok(stats) => result.refresh = stats,
                Err(err) => warn!("Failed to refresh ProvisioningRequests: {}", err),
            }
        }

        self.refresh_snapshot();
        let unschedulable: Vec<Pod> = self
            .storage_data
            .borrow()
            .pending_pods()
            .into_iter()
            .filter(|pod| pod.is_unschedulable())
            .collect();
        result.unschedulable_pods = unschedulable.len();

        let mut ctx = AutoscalingContext {
            snapshot: &mut self.snapshot,
            hinting_simulator: &mut self.hinting_simulator,
            node_groups: &mut self.node_groups,
            max_node_count: self.max_node_count,
            now,
        };

        if let Some(provreq) = self.provreq.as_mut() {
            if let Err(err) = provreq.booker.book(ctx.snapshot, ctx.hinting_simulator, now) {
                warn!("Failed to book capacity: {}", err);
            }
            result.booked_pods = provreq.booker.booked_pods();
        }

        let mut pods = self.filter_out_schedulable.process(&mut ctx, unschedulable)?;
        if let Some(provreq) = self.provreq.as_mut() {
            pods = provreq.filter.process(&mut ctx, pods)?;
            pods = PodListProcessor::process(&mut provreq.injector, &mut ctx, pods)?;
            result.injected = provreq.injector.last_injected().map(str::to_string);
        }

        let status = if pods.is_empty() {
            ScaleUpStatus::new(ScaleUpResult::NotNeeded)
        } else if !should_force_scale_up(&pods)
            && all_pods_are_new(&pods, now, self.new_pod_scale_up_delay)
        {
            debug!(
                "All {} unschedulable pods are younger than {}s, skipping scale-up",
                pods.len(),
                self.new_pod_scale_up_delay
            );
            ScaleUpStatus::not_tried()
        } else {
            self.scale_up_orchestrator.scale_up(&mut ctx, &pods)
        };
        if let Some(err) = status.error.as_ref() {
            warn!("Scale-up failed: {}", err);
        }

        for node in status.scale_up_actions.iter().filter_map(|action| match action {
            AutoscaleAction::ScaleUp(node) => Some(node),
            AutoscaleAction::ScaleDown(_) => None,
        }) {
            self.upcoming_nodes
                .insert(node.metadata.name.clone(), node.clone());
        }

        if self.scale_down_enabled
            && status.result != ScaleUpResult::Successful
            && self.upcoming_nodes.is_empty()
        {
            match self.scale_down_planner.plan(&mut ctx) {
                Ok(nodes) => result.scaled_down_nodes = nodes,
                Err(err) => warn!("Scale-down failed: {}", err),
            }
        }
        result.scale_up = status;
        self.hinting_simulator.drop_old_hints();

        if let Some(provreq) = self.provreq.as_mut() {
            result.ignored_pod_events = provreq.event_manager.borrow_mut().events.drain(..).collect();
            result.transitions = provreq.observe();
        }

        if !result.scale_up.scale_up_actions.is_empty() || !result.scaled_down_nodes.is_empty() {
            info!(
                "Autoscaler loop at {}: {} nodes scaled up, {} nodes scaled down",
                now,
                result.scale_up.scale_up_actions.len(),
                result.scaled_down_nodes.len()
            );
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use crate::autoscaler::cluster_autoscaler::ClusterAutoscalerConfig;
    use crate::autoscaler::interface::{NodeGroup, ScaleUpResult};
    use crate::autoscaler::static_autoscaler::StaticAutoscaler;
    use crate::core::common::ConditionStatus;
    use crate::core::node::Node;
    use crate::core::persistent_storage::StorageData;
    use crate::core::pod::{Pod, PodConditionType, UNSCHEDULABLE_REASON};

    fn unschedulable_pod(name: &str, cpu: u32, created: f64) -> Pod {
        let mut pod = Pod::new(name.to_string(), cpu, 100);
        pod.metadata.creation_timestamp = created;
        pod.update_condition(
            ConditionStatus::False,
            PodConditionType::PodScheduled,
            UNSCHEDULABLE_REASON,
            created,
        );
        pod
    }

    fn autoscaler_config() -> ClusterAutoscalerConfig {
        ClusterAutoscalerConfig {
            node_groups: vec![NodeGroup {
                max_count: 5,
                current_count: 0,
                total_allocated: 0,
                node_template: Node::new("group".to_string(), 1000, 1000),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_rejects_duplicate_node_groups() {
        let mut config = autoscaler_config();
        config.node_groups.push(config.node_groups[0].clone());
        let storage = Rc::new(RefCell::new(StorageData::default()));
        assert!(StaticAutoscaler::new(storage, &config, &Default::default()).is_err());
    }

    #[test]
    fn test_upcoming_nodes_are_not_requested_twice() {
        let storage = Rc::new(RefCell::new(StorageData::default()));
        storage
            .borrow_mut()
            .add_pod(unschedulable_pod("p", 800, 0.0));
        let mut autoscaler =
            StaticAutoscaler::new(storage.clone(), &autoscaler_config(), &Default::default())
                .unwrap();

        let first = autoscaler.run_once(10.0).unwrap();
        assert_eq!(first.scale_up.result, ScaleUpResult::Successful);
        let names: Vec<&str> = first
            .scaled_up_nodes()
            .iter()
            .map(|node| node.metadata.name.as_str())
            .collect();
        assert_eq!(names, vec!["group_1"]);

        // The pod still waits for the node, which is accounted as upcoming.
        let second = autoscaler.run_once(20.0).unwrap();
        assert_eq!(second.scale_up.result, ScaleUpResult::NotNeeded);
        assert_eq!(autoscaler.upcoming_nodes().count(), 1);

        let node = first.scaled_up_nodes()[0].clone();
        storage.borrow_mut().add_node(node);
        autoscaler.run_once(30.0).unwrap();
        assert_eq!(autoscaler.upcoming_nodes().count(), 0);
        assert_eq!(autoscaler.node_groups()["group"].current_count, 1);
    }

    #[test]
    fn test_new_pods_wait_for_scale_up_delay() {
        let storage = Rc::new(RefCell::new(StorageData::default()));
        storage
            .borrow_mut()
            .add_pod(unschedulable_pod("p", 800, 100.0));
        let mut config = autoscaler_config();
        config.new_pod_scale_up_delay = 30.0;
        let mut autoscaler = StaticAutoscaler::new(storage, &config, &Default::default()).unwrap();

        assert_eq!(
            autoscaler.run_once(110.0).unwrap().scale_up.result,
            ScaleUpResult::NotTried
        );
        assert_eq!(
            autoscaler.run_once(140.0).unwrap().scale_up.result,
            ScaleUpResult::Successful
        );
    }

    #[test]
    fn test_scale_down_of_empty_autoscaled_node() {
        let storage = Rc::new(RefCell::new(StorageData::default()));
        let mut config = autoscaler_config();
        config.scale_down_enabled = true;
        let mut autoscaler =
            StaticAutoscaler::new(storage.clone(), &config, &Default::default()).unwrap();
        storage
            .borrow_mut()
            .add_pod(unschedulable_pod("p", 800, 0.0));
        let scaled_up = autoscaler.run_once(10.0).unwrap();
        let node = scaled_up.scaled_up_nodes()[0].clone();
        storage.borrow_mut().add_node(node);
        storage.borrow_mut().remove_pod("default", "p");

        let result = autoscaler.run_once(20.0).unwrap();
        assert_eq!(result.scaled_down_nodes, vec!["group_1".to_string()]);
        assert_eq!(autoscaler.node_groups()["group"].current_count, 0);
    }
}
