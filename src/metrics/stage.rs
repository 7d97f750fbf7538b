//! Per-stage dispatch metrics.

use std::time::Duration;

use crate::metrics::{phase_metric, MetricDoc, MetricType, PhaseMetrics};
use crate::pipeline::dispatcher::{BatchReport, Stage};

pub struct StageMetrics;

impl StageMetrics {
    pub fn record_duration(stage: Stage, elapsed: Duration) {
        ::metrics::histogram!(
            phase_metric!(histogram, "stage", "duration_seconds"),
            "stage" => stage.name()
        )
        .record(elapsed.as_secs_f64());
    }

    pub fn record_batch(report: &BatchReport) {
        ::metrics::counter!(
            phase_metric!(counter, "stage", "items"),
            "stage" => report.stage.name(),
            "outcome" => "succeeded"
        )
        .increment(report.succeeded as u64);
        ::metrics::counter!(
            phase_metric!(counter, "stage", "items"),
            "stage" => report.stage.name(),
            "outcome" => "failed"
        )
        .increment(report.failed.len() as u64);
        Self::record_duration(report.stage, report.elapsed);
    }
}

impl PhaseMetrics for StageMetrics {
    fn register_metrics() {
        for stage in Stage::ALL {
            let _ = ::metrics::histogram!(
                phase_metric!(histogram, "stage", "duration_seconds"),
                "stage" => stage.name()
            );
        }
    }

    fn phase_name() -> &'static str {
        "stage"
    }

    fn metrics_documentation() -> Vec<MetricDoc> {
        vec![
            MetricDoc {
                name: phase_metric!(counter, "stage", "items"),
                metric_type: MetricType::Counter,
                help: "Work items dispatched, by stage and outcome",
                labels: vec!["stage", "outcome"],
            },
            MetricDoc {
                name: phase_metric!(histogram, "stage", "duration_seconds"),
                metric_type: MetricType::Histogram,
                help: "Wall-clock duration of each stage",
                labels: vec!["stage"],
            },
        ]
    }
}
