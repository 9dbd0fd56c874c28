//! Builders and fakes shared by unit tests and integration tests.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::autoscaler::interface::{AutoscalingContext, NodeGroup};
use crate::config::SimulationConfig;
use crate::core::common::{ConditionStatus, ObjectMeta};
use crate::core::node::Node;
use crate::core::persistent_storage::StorageData;
use crate::core::pod::{Pod, PodSpec, PodTemplate, PodTemplateSpec};
use crate::core::scheduler::hinting::HintingSimulator;
use crate::core::snapshot::ClusterSnapshot;
use crate::provreq::besteffortatomic::BestEffortAtomicOrchestrator;
use crate::provreq::checkcapacity::CheckCapacityOrchestrator;
use crate::provreq::client::{ProvisioningRequestClient, ProvisioningRequestStore, StoreError};
use crate::provreq::conditions::{
    add_or_update_condition, ConditionType, CAPACITY_IS_NOT_FOUND_MSG,
    CAPACITY_IS_NOT_FOUND_REASON,
};
use crate::provreq::orchestrator::ProvisioningRequestOrchestrator;
use crate::provreq::provisioning_request::{
    ProvisioningRequest, ProvisioningRequestWithTemplates,
};

pub fn default_test_simulation_config(with_suffix: Option<&str>) -> SimulationConfig {
    let mut default = r#"
    sim_name: "test_provreq"
    seed: 123
    scheduling_cycle_interval: 1.0
    ca_to_ps_network_delay: 0.050
    node_provisioning_time: 30.0
    "#
    .to_string();

    if let Some(suffix) = with_suffix {
        default.push_str(suffix);
    }

    serde_yaml::from_str::<SimulationConfig>(&default).unwrap()
}

/// Pod template with a single container requesting `cpu` millicores and `ram` bytes.
pub fn test_pod_template(namespace: &str, name: &str, cpu: u32, ram: u64) -> PodTemplate {
    let pod = Pod::new("".to_string(), cpu, ram);
    PodTemplate {
        metadata: ObjectMeta::new(namespace, name),
        template: PodTemplateSpec {
            metadata: Default::default(),
            spec: PodSpec {
                containers: pod.spec.containers,
                ..Default::default()
            },
        },
    }
}

/// ProvisioningRequest store over its own in-memory storage. Every mutation made through the
/// helper methods is visible to the next read.
pub struct FakeProvisioningRequestStore {
    storage_data: Rc<RefCell<StorageData>>,
    client: RefCell<ProvisioningRequestClient>,
}

impl Default for FakeProvisioningRequestStore {
    fn default() -> Self {
        let storage_data = Rc::new(RefCell::new(StorageData::default()));
        let client = ProvisioningRequestClient::new(storage_data.clone(), 4.0);
        Self {
            storage_data,
            client: RefCell::new(client),
        }
    }
}

impl FakeProvisioningRequestStore {
    pub fn storage_data(&self) -> Rc<RefCell<StorageData>> {
        self.storage_data.clone()
    }

    pub fn add(&self, pr: ProvisioningRequest) {
        assert!(self
            .storage_data
            .borrow_mut()
            .add_provisioning_request(pr, 0.0));
        self.client.borrow().sync();
    }

    pub fn add_pod_template(&self, pod_template: PodTemplate) {
        assert!(self.storage_data.borrow_mut().add_pod_template(pod_template));
        self.client.borrow().sync();
    }

    /// Writes `Provisioned=False` to the request with the given uid, as a failed capacity check
    /// at time `at` would.
    pub fn set_provisioned_false(&self, uid: &str, at: f64) {
        {
            let mut storage = self.storage_data.borrow_mut();
            let pr = storage
                .provisioning_requests
                .values_mut()
                .find(|pr| pr.metadata.uid == uid)
                .expect("request with given uid must exist");
            add_or_update_condition(
                pr,
                ConditionType::Provisioned,
                ConditionStatus::False,
                CAPACITY_IS_NOT_FOUND_REASON,
                CAPACITY_IS_NOT_FOUND_MSG,
                at,
            );
        }
        self.client.borrow().sync();
    }

    pub fn set_call_latency(&self, call_latency: f64) {
        self.client.borrow_mut().set_call_latency(call_latency);
    }

    pub fn try_get_request(&self, namespace: &str, name: &str) -> Option<ProvisioningRequest> {
        self.storage_data
            .borrow()
            .provisioning_requests
            .get(&format!("{}/{}", namespace, name))
            .cloned()
    }

    pub fn get_request(&self, namespace: &str, name: &str) -> ProvisioningRequest {
        self.try_get_request(namespace, name)
            .expect("request must exist")
    }

    pub fn get_with_templates(&self, namespace: &str, name: &str) -> ProvisioningRequestWithTemplates {
        self.client.borrow().get(namespace, name).unwrap()
    }
}

impl ProvisioningRequestStore for FakeProvisioningRequestStore {
    fn list(&self) -> Result<Vec<ProvisioningRequestWithTemplates>, StoreError> {
        self.client.borrow().list()
    }

    fn get(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ProvisioningRequestWithTemplates, StoreError> {
        self.client.borrow().get(namespace, name)
    }

    fn update(&self, pr: &ProvisioningRequest) -> Result<ProvisioningRequest, StoreError> {
        self.client.borrow().update(pr)
    }

    fn delete(&self, pr: &ProvisioningRequest) -> Result<(), StoreError> {
        self.client.borrow().delete(pr)
    }
}

/// Owns everything an `AutoscalingContext` borrows.
pub struct AutoscalerFixture {
    pub snapshot: ClusterSnapshot,
    pub hinting_simulator: HintingSimulator,
    pub node_groups: BTreeMap<String, NodeGroup>,
    pub max_node_count: u64,
}

impl AutoscalerFixture {
    pub fn new(nodes: Vec<Node>, scheduled_pods: Vec<Pod>) -> Self {
        let mut snapshot = ClusterSnapshot::default();
        snapshot.initialize(nodes, scheduled_pods);
        Self {
            snapshot,
            hinting_simulator: HintingSimulator::new(),
            node_groups: Default::default(),
            max_node_count: 100,
        }
    }

    pub fn add_node_group(&mut self, name: &str, cpu: u32, ram: u64, max_count: u64) {
        self.node_groups.insert(
            name.to_string(),
            NodeGroup {
                max_count,
                current_count: 0,
                total_allocated: 0,
                node_template: Node::new(name.to_string(), cpu, ram),
            },
        );
    }

    pub fn with_context<R>(
        &mut self,
        now: f64,
        f: impl FnOnce(&mut AutoscalingContext) -> R,
    ) -> R {
        let mut ctx = AutoscalingContext {
            snapshot: &mut self.snapshot,
            hinting_simulator: &mut self.hinting_simulator,
            node_groups: &mut self.node_groups,
            max_node_count: self.max_node_count,
            now,
        };
        f(&mut ctx)
    }
}

/// Two empty nodes of 1000 millicores and 2048 bytes of memory and a node group of the same
/// shape.
pub fn default_autoscaler_fixture() -> AutoscalerFixture {
    let mut fixture = AutoscalerFixture::new(
        vec![
            Node::new("n1".to_string(), 1000, 2048),
            Node::new("n2".to_string(), 1000, 2048),
        ],
        vec![],
    );
    fixture.add_node_group("group", 1000, 2048, 10);
    fixture
}

/// Class dispatcher with orchestrators of all supported classes.
pub fn provreq_orchestrator(
    store: Rc<FakeProvisioningRequestStore>,
    processor_instance: &str,
) -> ProvisioningRequestOrchestrator {
    ProvisioningRequestOrchestrator::new(
        store.clone(),
        processor_instance,
        vec![
            Box::new(CheckCapacityOrchestrator::new(
                store.clone(),
                processor_instance,
            )),
            Box::new(BestEffortAtomicOrchestrator::new(store, processor_instance)),
        ],
    )
}
