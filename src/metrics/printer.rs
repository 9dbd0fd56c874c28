use std::cell::RefCell;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::rc::Rc;

use prettytable::{row, Table};
use serde::{Deserialize, Serialize};

use crate::metrics::collector::{EstimatorWrapper, Metrics, MetricsCollector};

#[derive(Debug, Default, Deserialize, PartialEq)]
pub enum OutputFormat {
    #[default]
    JSON,
    PrettyTable,
}

#[derive(Debug, Default, Deserialize, PartialEq)]
pub struct MetricsPrinterConfig {
    #[serde(default)]
    pub format: OutputFormat,
    pub output_file: PathBuf,
}

pub fn print_metrics(
    collector: Rc<RefCell<MetricsCollector>>,
    config: &MetricsPrinterConfig,
) -> std::io::Result<()> {
    let mut metrics_file = File::create(&config.output_file)?;
    match config.format {
        OutputFormat::PrettyTable => {
            print_metrics_as_pretty_table(&collector.borrow(), &mut metrics_file)
        }
        OutputFormat::JSON => print_metrics_as_json(&collector.borrow(), &mut metrics_file),
    }
}

fn counters(metrics: &Metrics) -> Vec<(&'static str, u64)> {
    vec![
        ("Total nodes in trace", metrics.total_nodes_in_trace),
        ("Total pods in trace", metrics.total_pods_in_trace),
        (
            "Total provisioning requests in trace",
            metrics.total_provisioning_requests_in_trace,
        ),
        ("Pods created", metrics.pods_created),
        ("Pods scheduled", metrics.pods_scheduled),
        ("Nodes removed", metrics.nodes_removed),
        (
            "Provisioning requests created",
            metrics.provisioning_requests_created,
        ),
        (
            "Provisioning requests rejected",
            metrics.provisioning_requests_rejected,
        ),
        (
            "Provisioning requests injected",
            metrics.provisioning_requests_injected,
        ),
        (
            "Provisioning requests provisioned",
            metrics.provisioning_requests_provisioned,
        ),
        (
            "Provisioning requests capacity not found",
            metrics.provisioning_requests_capacity_not_found,
        ),
        (
            "Provisioning requests failed",
            metrics.provisioning_requests_failed,
        ),
        (
            "Provisioning requests booking expired",
            metrics.provisioning_requests_booking_expired,
        ),
        (
            "Provisioning requests deleted",
            metrics.provisioning_requests_deleted,
        ),
        ("Booked pods", metrics.booked_pods),
        ("Ignored pod events", metrics.ignored_pod_events),
        ("Total scaled up nodes", metrics.total_scaled_up_nodes),
        ("Total scaled down nodes", metrics.total_scaled_down_nodes),
        ("Autoscaler loops", metrics.autoscaler_loops),
        ("Autoscaler loop errors", metrics.autoscaler_loop_errors),
        ("Scale up errors", metrics.scale_up_errors),
    ]
}

pub fn print_metrics_as_pretty_table(
    collector: &MetricsCollector,
    output: &mut dyn Write,
) -> std::io::Result<()> {
    let mut aggregated_table = Table::new();
    aggregated_table.add_row(row!["Metric", "Count"]);
    for (name, value) in counters(&collector.metrics) {
        aggregated_table.add_row(row![name, value]);
    }

    let mut stats_table = Table::new();
    stats_table.add_row(row!["Metric", "Min", "Max", "Mean", "Variance"]);
    for (name, stats) in [
        (
            "Autoscaler loop duration",
            &collector.autoscaler_loop_duration_stats,
        ),
        ("Pod time to schedule", &collector.pod_time_to_schedule_stats),
    ] {
        stats_table.add_row(row![
            name,
            stats.min(),
            stats.max(),
            stats.mean(),
            stats.population_variance()
        ]);
    }

    aggregated_table.print(&mut *output)?;
    stats_table.print(&mut *output)?;
    Ok(())
}

#[derive(Serialize)]
struct MetricsJSON<'a> {
    counters: &'a Metrics,
    timings: Timings,
}

#[derive(Serialize)]
struct Timings {
    autoscaler_loop_duration: TimingsStats,
    pod_time_to_schedule: TimingsStats,
}

#[derive(Serialize)]
struct TimingsStats {
    min: f64,
    max: f64,
    mean: f64,
    variance: f64,
}

impl From<&EstimatorWrapper> for TimingsStats {
    fn from(stats: &EstimatorWrapper) -> Self {
        Self {
            min: stats.min(),
            max: stats.max(),
            mean: stats.mean(),
            variance: stats.population_variance(),
        }
    }
}

pub fn print_metrics_as_json(
    collector: &MetricsCollector,
    output: &mut dyn Write,
) -> std::io::Result<()> {
    let metrics = MetricsJSON {
        counters: &collector.metrics,
        timings: Timings {
            autoscaler_loop_duration: (&collector.autoscaler_loop_duration_stats).into(),
            pod_time_to_schedule: (&collector.pod_time_to_schedule_stats).into(),
        },
    };

    let serialized_json = serde_json::to_string_pretty(&metrics)?;
    output.write_all(serialized_json.as_bytes())
}

#[cfg(test)]
mod tests {
    use crate::metrics::collector::MetricsCollector;
    use crate::metrics::printer::{print_metrics_as_json, print_metrics_as_pretty_table};

    #[test]
    fn test_json_output() {
        let mut collector = MetricsCollector::new();
        collector.metrics.provisioning_requests_provisioned = 3;
        collector.increment_pod_time_to_schedule(2.0);

        let mut output: Vec<u8> = vec![];
        print_metrics_as_json(&collector, &mut output).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&output).unwrap();
        assert_eq!(value["counters"]["provisioning_requests_provisioned"], 3);
        assert_eq!(value["timings"]["pod_time_to_schedule"]["mean"], 2.0);
    }

    #[test]
    fn test_pretty_table_output() {
        let collector = MetricsCollector::new();
        let mut output: Vec<u8> = vec![];
        print_metrics_as_pretty_table(&collector, &mut output).unwrap();
        let text = String::from_utf8(output).unwrap();
        assert!(text.contains("Provisioning requests injected"));
        assert!(text.contains("Autoscaler loop duration"));
    }
}
