//! Dataset assembly metrics.

use crate::metrics::{phase_metric, MetricDoc, MetricType, PhaseMetrics};

pub struct AssemblyMetrics;

impl AssemblyMetrics {
    pub fn record_partition_rows(partition: &'static str, rows: usize) {
        ::metrics::gauge!(phase_metric!(gauge, "assembly", "rows"), "partition" => partition)
            .set(rows as f64);
    }

    pub fn record_runs(loaded: usize, excluded: usize) {
        ::metrics::counter!(phase_metric!(counter, "assembly", "runs_loaded"))
            .increment(loaded as u64);
        ::metrics::counter!(phase_metric!(counter, "assembly", "runs_excluded"))
            .increment(excluded as u64);
    }
}

impl PhaseMetrics for AssemblyMetrics {
    fn register_metrics() {
        let _ = ::metrics::counter!(phase_metric!(counter, "assembly", "runs_loaded"));
        let _ = ::metrics::counter!(phase_metric!(counter, "assembly", "runs_excluded"));
    }

    fn phase_name() -> &'static str {
        "assembly"
    }

    fn metrics_documentation() -> Vec<MetricDoc> {
        vec![
            MetricDoc {
                name: phase_metric!(gauge, "assembly", "rows"),
                metric_type: MetricType::Gauge,
                help: "Rows written to each forecast-horizon partition",
                labels: vec!["partition"],
            },
            MetricDoc {
                name: phase_metric!(counter, "assembly", "runs_loaded"),
                metric_type: MetricType::Counter,
                help: "Feature tables joined with their targets",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(counter, "assembly", "runs_excluded"),
                metric_type: MetricType::Counter,
                help: "Feature tables skipped for lack of a target table",
                labels: vec![],
            },
        ]
    }
}
