//! Puts observed storm reports on the forecast grid of one track file.

use std::sync::Arc;
use tracing::{error, info, warn};

use crate::app::ports::StormReportSource;
use crate::config::ReportWindow;
use crate::domain::{GriddedDataset, HazardLayer, LabelGrid, ReportRequest};
use crate::naming::SummaryFile;

#[derive(Clone)]
pub struct ReportGridder {
    source: Arc<dyn StormReportSource>,
    window: ReportWindow,
    hazards: Vec<String>,
}

impl ReportGridder {
    pub fn new(source: Arc<dyn StormReportSource>, window: ReportWindow, hazards: Vec<String>) -> Self {
        Self {
            source,
            window,
            hazards,
        }
    }

    /// Gridded reports for the track's initialization, one layer per
    /// configured hazard, in configured order.
    ///
    /// Never fails: when the reports cannot be obtained every layer is empty,
    /// which turns into all-zero target columns downstream.
    pub fn reports_to_grid(&self, track: &SummaryFile, tracks: &LabelGrid) -> GriddedDataset {
        match self.fetch(track, tracks) {
            Ok(dataset) => self.align(track, dataset, &tracks.shape),
            Err(e) => {
                info!("Unable to process storm reports for {}!", track);
                error!(error = ?e, "Storm report retrieval failed");
                self.empty(&tracks.shape)
            }
        }
    }

    fn fetch(&self, track: &SummaryFile, tracks: &LabelGrid) -> anyhow::Result<GriddedDataset> {
        let request = ReportRequest {
            track_file: track.path.clone(),
            init_time: track.name.init_timestamp()?,
            forecast_length_minutes: self.window.forecast_length_minutes,
            err_window_minutes: self.window.err_window_minutes,
            shape: tracks.shape.clone(),
            hazards: self.hazards.clone(),
        };
        self.source.grid_reports(&request)
    }

    fn align(&self, track: &SummaryFile, mut dataset: GriddedDataset, shape: &[usize]) -> GriddedDataset {
        let layers = self
            .hazards
            .iter()
            .map(|hazard| {
                let position = dataset.layers.iter().position(|l| &l.name == hazard);
                let grid = match position.map(|i| dataset.layers.swap_remove(i)) {
                    Some(layer) if layer.grid.shape == shape && layer.grid.is_consistent() => {
                        layer.grid
                    }
                    Some(layer) => {
                        warn!(
                            track = %track,
                            hazard = %hazard,
                            expected = ?shape,
                            got = ?layer.grid.shape,
                            "Report layer does not match the track grid, treating as empty"
                        );
                        LabelGrid::empty(shape)
                    }
                    None => {
                        warn!(track = %track, hazard = %hazard, "Report source returned no layer");
                        LabelGrid::empty(shape)
                    }
                };
                HazardLayer {
                    name: hazard.clone(),
                    grid,
                }
            })
            .collect();
        GriddedDataset { layers }
    }

    fn empty(&self, shape: &[usize]) -> GriddedDataset {
        GriddedDataset {
            layers: self
                .hazards
                .iter()
                .map(|hazard| HazardLayer {
                    name: hazard.clone(),
                    grid: LabelGrid::empty(shape),
                })
                .collect(),
        }
    }
}
