//! Registers every phase's metrics and flags naming conflicts.

use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::metrics::{MetricDoc, PhaseMetrics};

pub fn register_all_metrics() {
    let mut all_metrics = HashMap::new();

    register_phase_metrics::<super::stage::StageMetrics>(&mut all_metrics);
    register_phase_metrics::<super::assembly::AssemblyMetrics>(&mut all_metrics);

    info!(
        "Registered {} total metrics across all phases",
        all_metrics.len()
    );
    for doc in all_metrics.values() {
        debug!(
            metric = doc.name,
            kind = ?doc.metric_type,
            labels = ?doc.labels,
            phase = extract_phase_from_metric_name(doc.name),
            "{}",
            doc.help
        );
    }
}

fn register_phase_metrics<T: PhaseMetrics>(all_metrics: &mut HashMap<&'static str, MetricDoc>) {
    T::register_metrics();
    let phase_name = T::phase_name();

    for doc in T::metrics_documentation() {
        if all_metrics.contains_key(doc.name) {
            warn!(
                "Metric name conflict detected: '{}' is defined twice (second time by '{}')",
                doc.name, phase_name
            );
        } else {
            all_metrics.insert(doc.name, doc);
        }
    }
}

/// "wofs_stage_items_total" -> "stage"
fn extract_phase_from_metric_name(metric_name: &str) -> &str {
    metric_name
        .strip_prefix("wofs_")
        .and_then(|rest| rest.split('_').next())
        .unwrap_or("unknown")
}
