//! Builds the per-track target table by matching tracks to storm reports.

use polars::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

use crate::app::ports::{ObjectMatcher, TrackGridReader};
use crate::config::MatchingConfig;
use crate::naming::SummaryFile;
use crate::pipeline::completion::PendingFile;
use crate::pipeline::reports::ReportGridder;
use crate::pipeline::table_io::write_feather_atomic;

/// `{hazard}_{distance in km}km`, e.g. `hail_severe_15km` for 5 grid points at 3 km.
pub fn target_column_name(hazard: &str, min_dist: u32, grid_spacing_km: u32) -> String {
    format!("{}_{}km", hazard, min_dist * grid_spacing_km)
}

#[derive(Clone)]
pub struct TargetBuilder {
    reader: Arc<dyn TrackGridReader>,
    gridder: ReportGridder,
    matcher: Arc<dyn ObjectMatcher>,
    matching: MatchingConfig,
}

impl TargetBuilder {
    pub fn new(
        reader: Arc<dyn TrackGridReader>,
        gridder: ReportGridder,
        matcher: Arc<dyn ObjectMatcher>,
        matching: MatchingConfig,
    ) -> Self {
        Self {
            reader,
            gridder,
            matcher,
            matching,
        }
    }

    /// One row per track label (ascending), one 0/1 column per hazard and distance.
    pub fn build(&self, track: &SummaryFile) -> anyhow::Result<DataFrame> {
        let tracks = self.reader.read_tracks(&track.path)?;
        if !tracks.is_consistent() {
            anyhow::bail!(
                "track grid of {} has shape {:?} but {} values",
                track,
                tracks.shape,
                tracks.values.len()
            );
        }
        let labels = tracks.labels();
        let reports = self.gridder.reports_to_grid(track, &tracks);

        let mut columns = Vec::with_capacity(reports.layers.len() * self.matching.min_dists.len());
        for layer in &reports.layers {
            for &min_dist in &self.matching.min_dists {
                let name = target_column_name(&layer.name, min_dist, self.matching.grid_spacing_km);
                let matched = if layer.grid.has_objects() && !labels.is_empty() {
                    self.matcher
                        .match_objects(&tracks, &layer.grid, &self.matching.params_for(min_dist))?
                } else {
                    BTreeSet::new()
                };
                let values: Vec<i64> = labels
                    .iter()
                    .map(|label| i64::from(matched.contains(label)))
                    .collect();
                columns.push(Series::new(&name, values));
            }
        }
        Ok(DataFrame::new(columns)?)
    }

    pub fn write(&self, pending: &PendingFile) -> anyhow::Result<()> {
        let mut targets = self.build(&pending.origin)?;
        debug!("Saving {}...", pending.destination);
        write_feather_atomic(&mut targets, &pending.destination.path)?;
        Ok(())
    }
}
