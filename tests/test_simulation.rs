use std::rc::Rc;

use dslab_provreq::config::SimulationConfig;
use dslab_provreq::core::common::ConditionStatus;
use dslab_provreq::metrics::printer::{MetricsPrinterConfig, OutputFormat};
use dslab_provreq::provreq::conditions::{
    get_condition, ConditionType, CAPACITY_IS_FOUND_REASON, CAPACITY_IS_PROVISIONED_REASON,
};
use dslab_provreq::simulation_callbacks::{
    RunUntilDeadlineCallbacks, RunUntilProvisioningRequestsSettledCallbacks,
};
use dslab_provreq::simulator::ProvreqSimulation;
use dslab_provreq::trace::generic::GenericTrace;

const CONFIG: &str = r#"
sim_name: "e2e"
seed: 7
scheduling_cycle_interval: 1.0
ca_to_ps_network_delay: 0.05
node_provisioning_time: 30.0
default_cluster:
- node_count: 2
  node_template:
    metadata:
      name: base
    status:
      capacity:
        cpu: 1000
        ram: 2048
cluster_autoscaler:
  scan_interval: 10.0
  node_groups:
  - max_count: 4
    node_template:
      metadata:
        name: group
      status:
        capacity:
          cpu: 2000
          ram: 4096
"#;

const TRACE: &str = r#"
events:
- timestamp: 0
  event_type:
    !CreatePodTemplate
      pod_template:
        metadata:
          name: worker
        template:
          spec:
            containers:
            - resources:
                limits:
                  cpu: 600
                  ram: 500
- timestamp: 1
  event_type:
    !CreateProvisioningRequest
      request:
        metadata:
          name: check
        spec:
          provisioning_class_name: check-capacity.autoscaling.x-k8s.io
          pod_sets:
          - pod_template_ref:
              name: worker
            count: 1
- timestamp: 2
  event_type:
    !CreateProvisioningRequest
      request:
        metadata:
          name: atomic
        spec:
          provisioning_class_name: best-effort-atomic-scale-up.autoscaling.x-k8s.io
          pod_sets:
          - pod_template_ref:
              name: worker
            count: 3
- timestamp: 2
  event_type:
    !CreateProvisioningRequest
      request:
        metadata:
          name: invalid
        spec:
          provisioning_class_name: Not_A_Class
          pod_sets:
          - pod_template_ref:
              name: worker
            count: 1
- timestamp: 3
  event_type:
    !CreatePod
      pod:
        metadata:
          name: big
        spec:
          containers:
          - resources:
              requests:
                cpu: 1500
                ram: 100
"#;

fn create_simulation(config: SimulationConfig) -> ProvreqSimulation {
    let mut trace: GenericTrace = serde_yaml::from_str(TRACE).unwrap();
    let mut simulation = ProvreqSimulation::new(Rc::new(config)).unwrap();
    simulation.initialize(&mut trace);
    simulation
}

#[test]
fn test_provisioning_requests_in_simulation() {
    let _ = env_logger::try_init();

    let output_file = std::env::temp_dir().join("dslab_provreq_e2e_metrics.json");
    let mut config: SimulationConfig = serde_yaml::from_str(CONFIG).unwrap();
    config.metrics_printer = Some(MetricsPrinterConfig {
        format: OutputFormat::JSON,
        output_file: output_file.clone(),
    });
    let mut simulation = create_simulation(config);
    assert_eq!(simulation.storage_data().borrow().nodes.len(), 2);

    simulation.run_with_callbacks(Box::new(RunUntilDeadlineCallbacks::new(300.0)));

    let storage_data = simulation.storage_data();
    let storage = storage_data.borrow();

    let check = &storage.provisioning_requests["default/check"];
    let provisioned = get_condition(check.conditions(), ConditionType::Provisioned).unwrap();
    assert_eq!(provisioned.status, ConditionStatus::True);
    assert_eq!(provisioned.reason, CAPACITY_IS_FOUND_REASON);

    let atomic = &storage.provisioning_requests["default/atomic"];
    let provisioned = get_condition(atomic.conditions(), ConditionType::Provisioned).unwrap();
    assert_eq!(provisioned.status, ConditionStatus::True);
    assert_eq!(provisioned.reason, CAPACITY_IS_PROVISIONED_REASON);

    assert!(!storage.provisioning_requests.contains_key("default/invalid"));

    // Regular pod got a node of the autoscaled group.
    let big = &storage.pods["default/big"];
    assert!(big.status.assigned_node.starts_with("group_"));
    assert!(storage.nodes.len() >= 4);

    let collector = simulation.metrics_collector.borrow();
    let metrics = &collector.metrics;
    assert_eq!(metrics.total_provisioning_requests_in_trace, 3);
    assert_eq!(metrics.provisioning_requests_created, 2);
    assert_eq!(metrics.provisioning_requests_rejected, 1);
    assert_eq!(metrics.provisioning_requests_provisioned, 2);
    assert_eq!(metrics.pods_created, 1);
    assert_eq!(metrics.pods_scheduled, 1);
    assert!(metrics.total_scaled_up_nodes >= 2);
    assert!(metrics.provisioning_requests_injected >= 2);
    assert!(metrics.booked_pods > 0);
    assert_eq!(metrics.autoscaler_loop_errors, 0);
    assert!(metrics.autoscaler_loops >= 30);

    let printed: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&output_file).unwrap()).unwrap();
    assert_eq!(printed["counters"]["provisioning_requests_provisioned"], 2);
}

#[test]
fn test_run_until_provisioning_requests_settled() {
    let config: SimulationConfig = serde_yaml::from_str(CONFIG).unwrap();
    let mut simulation = create_simulation(config);

    simulation.run_with_callbacks(Box::new(
        RunUntilProvisioningRequestsSettledCallbacks::new(10000.0, 20.0),
    ));

    // Both requests are provisioned within the first minute.
    assert!(simulation.sim.time() <= 60.0);
    assert_eq!(
        simulation
            .metrics_collector
            .borrow()
            .metrics
            .provisioning_requests_provisioned,
        2
    );
}

#[test]
fn test_autoscaler_can_be_disabled() {
    let mut config: SimulationConfig = serde_yaml::from_str(CONFIG).unwrap();
    config.cluster_autoscaler.enabled = false;
    let mut simulation = create_simulation(config);
    assert!(simulation.cluster_autoscaler.is_none());

    simulation.run_with_callbacks(Box::new(RunUntilDeadlineCallbacks::new(100.0)));

    let storage_data = simulation.storage_data();
    let storage = storage_data.borrow();
    assert!(storage.pods["default/big"].is_unschedulable());
    assert!(storage.provisioning_requests["default/check"]
        .conditions()
        .is_empty());
    assert_eq!(storage.nodes.len(), 2);
}
