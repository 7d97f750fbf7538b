//! Seams to the external collaborators.
//!
//! Tracking, feature engineering, report gridding and object matching are
//! owned by other systems; the pipeline only sequences them. Every port except
//! the notifier is blocking because it runs on the dispatcher's worker threads.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::Path;

use crate::domain::{GriddedDataset, LabelGrid, MatchParams, ReportRequest};
use crate::pipeline::work_items::FeatureWorkItem;

/// Identifies ensemble storm tracks in one 30-minute summary file.
pub trait EnsembleTracker: Send + Sync {
    /// Must leave the track file at `output` on success.
    fn identify(&self, summary_file: &Path, output: &Path) -> anyhow::Result<()>;
}

/// Computes the ML features for one work item and writes its MLDATA table.
pub trait FeatureEngine: Send + Sync {
    fn extract(&self, item: &FeatureWorkItem, run_type: &str) -> anyhow::Result<()>;
}

/// Reads the ensemble storm-track label grid out of a track file.
pub trait TrackGridReader: Send + Sync {
    fn read_tracks(&self, track_file: &Path) -> anyhow::Result<LabelGrid>;
}

/// Grids observed storm reports onto the forecast grid.
pub trait StormReportSource: Send + Sync {
    fn grid_reports(&self, request: &ReportRequest) -> anyhow::Result<GriddedDataset>;
}

/// One-to-one spatial-temporal object matcher.
///
/// Returns the forecast labels that found a partner. Implementations must be
/// deterministic for identical inputs.
pub trait ObjectMatcher: Send + Sync {
    fn match_objects(
        &self,
        forecast: &LabelGrid,
        observed: &LabelGrid,
        params: &MatchParams,
    ) -> anyhow::Result<BTreeSet<i32>>;
}

/// Fire-and-forget sink for stage completion messages.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str) -> anyhow::Result<()>;
}
