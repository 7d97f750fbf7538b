//! Metrics for the pipeline stages.
//!
//! Each area of the pipeline owns its metric names in a submodule; the
//! registry validates them at startup so naming conflicts surface early.

pub mod assembly;
pub mod registry;
pub mod stage;

pub use assembly::AssemblyMetrics;
pub use stage::StageMetrics;

use std::net::SocketAddr;
use std::sync::{Once, OnceLock};
use tracing::{info, warn};

static INIT: Once = Once::new();
static HANDLE: OnceLock<metrics_exporter_prometheus::PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder and register every metric.
///
/// Idempotent. The HTTP listener only starts when `listen` is set; otherwise
/// the recorder still collects so [`render`] can snapshot a run.
pub fn init_metrics(listen: Option<SocketAddr>) {
    INIT.call_once(|| {
        let mut builder = metrics_exporter_prometheus::PrometheusBuilder::new();
        if let Some(addr) = listen {
            builder = builder.with_http_listener(addr);
            info!("Prometheus HTTP exporter started at http://{}/metrics", addr);
        }

        let installed = if listen.is_some() {
            builder.install().map(|()| None)
        } else {
            builder.install_recorder().map(Some)
        };

        match installed {
            Ok(handle) => {
                if let Some(handle) = handle {
                    if HANDLE.set(handle).is_err() {
                        warn!("Prometheus handle was already stored");
                    }
                }
                registry::register_all_metrics();
                info!("All pipeline metrics registered successfully");
            }
            Err(e) => warn!("Failed to install Prometheus recorder: {}", e),
        }
    });
}

/// Prometheus text snapshot, when the in-process recorder is installed.
pub fn render() -> Option<String> {
    HANDLE.get().map(|handle| handle.render())
}

/// Metrics owned by one area of the pipeline.
pub trait PhaseMetrics {
    /// Pre-register every metric so it shows up before its first sample.
    fn register_metrics();

    fn phase_name() -> &'static str;

    fn metrics_documentation() -> Vec<MetricDoc>;
}

#[derive(Debug, Clone)]
pub struct MetricDoc {
    pub name: &'static str,
    pub metric_type: MetricType,
    pub help: &'static str,
    pub labels: Vec<&'static str>,
}

#[derive(Debug, Clone)]
pub enum MetricType {
    Counter,
    Histogram,
    Gauge,
}

/// Builds metric names following `wofs_{phase}_{name}[_total]`.
macro_rules! phase_metric {
    (counter, $phase:literal, $name:literal) => {
        concat!("wofs_", $phase, "_", $name, "_total")
    };
    (histogram, $phase:literal, $name:literal) => {
        concat!("wofs_", $phase, "_", $name)
    };
    (gauge, $phase:literal, $name:literal) => {
        concat!("wofs_", $phase, "_", $name)
    };
}

pub(crate) use phase_metric;

#[cfg(test)]
mod tests {
    #[test]
    fn metric_names_follow_convention() {
        assert_eq!(
            phase_metric!(counter, "stage", "items"),
            "wofs_stage_items_total"
        );
        assert_eq!(
            phase_metric!(histogram, "stage", "duration_seconds"),
            "wofs_stage_duration_seconds"
        );
        assert_eq!(phase_metric!(gauge, "assembly", "rows"), "wofs_assembly_rows");
    }
}
