//! Joins every run's features with its targets and writes the training datasets.

use polars::prelude::*;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::ForecastTiming;
use crate::constants::{BASELINE_MARKER, DATASET_PREFIX, FORECAST_TIME_INDEX, METADATA_COLUMNS};
use crate::error::{AssemblyError, Result};
use crate::metrics::AssemblyMetrics;
use crate::naming::{FileTag, SummaryFile};
use crate::pipeline::table_io::{read_feather, write_feather_atomic};

/// A forecast-time-index range written as its own pair of datasets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Horizon {
    pub name: &'static str,
    pub first: i8,
    pub last: i8,
}

impl Horizon {
    pub fn contains(&self, index: i8) -> bool {
        (self.first..=self.last).contains(&index)
    }
}

/// Index 12 belongs to both horizons.
pub const HORIZONS: [Horizon; 2] = [
    Horizon {
        name: "first_hour",
        first: 0,
        last: 12,
    },
    Horizon {
        name: "second_hour",
        first: 12,
        last: 36,
    },
];

#[derive(Debug, Clone, Serialize)]
pub struct PartitionSummary {
    pub name: &'static str,
    pub rows: usize,
    pub baseline_path: PathBuf,
    pub data_path: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AssemblySummary {
    pub runs_loaded: usize,
    pub runs_excluded: usize,
    pub partitions: Vec<PartitionSummary>,
}

/// All runs stacked, plus the names of the columns that came from target tables.
#[derive(Debug, Clone)]
pub struct CombinedRuns {
    pub frame: DataFrame,
    pub target_columns: Vec<String>,
    pub runs_loaded: usize,
    pub runs_excluded: usize,
}

#[derive(Debug, Clone)]
pub struct Assembler {
    output_dir: PathBuf,
    timing: ForecastTiming,
}

impl Assembler {
    pub fn new(output_dir: impl Into<PathBuf>, timing: ForecastTiming) -> Self {
        Self {
            output_dir: output_dir.into(),
            timing,
        }
    }

    pub fn baseline_path(&self, horizon: &Horizon) -> PathBuf {
        self.output_dir
            .join(format!("{}__{}__baseline_data.feather", DATASET_PREFIX, horizon.name))
    }

    pub fn data_path(&self, horizon: &Horizon) -> PathBuf {
        self.output_dir
            .join(format!("{}__{}__data.feather", DATASET_PREFIX, horizon.name))
    }

    /// Rebuild all four datasets from the `MLDATA` tables in `ml_files`.
    pub fn assemble(&self, ml_files: &[SummaryFile]) -> Result<AssemblySummary> {
        let Some(combined) = self.combine(ml_files)? else {
            warn!("No feature tables with targets to assemble, nothing written");
            return Ok(AssemblySummary {
                runs_excluded: ml_files.len(),
                ..AssemblySummary::default()
            });
        };
        AssemblyMetrics::record_runs(combined.runs_loaded, combined.runs_excluded);
        fs::create_dir_all(&self.output_dir)?;

        let (baseline_columns, data_columns) = split_columns(&combined.frame, &combined.target_columns);
        let mut partitions = Vec::with_capacity(HORIZONS.len());
        for horizon in &HORIZONS {
            let part = partition(&combined.frame, horizon)?;

            let baseline_path = self.baseline_path(horizon);
            let mut baseline = part.select(baseline_columns.iter().map(String::as_str))?;
            write_feather_atomic(&mut baseline, &baseline_path)?;

            let data_path = self.data_path(horizon);
            let mut data = part.select(data_columns.iter().map(String::as_str))?;
            write_feather_atomic(&mut data, &data_path)?;

            info!(
                partition = horizon.name,
                rows = part.height(),
                baseline_columns = baseline_columns.len(),
                data_columns = data_columns.len(),
                "Wrote {} and {}",
                baseline_path.display(),
                data_path.display()
            );
            AssemblyMetrics::record_partition_rows(horizon.name, part.height());
            partitions.push(PartitionSummary {
                name: horizon.name,
                rows: part.height(),
                baseline_path,
                data_path,
            });
        }

        Ok(AssemblySummary {
            runs_loaded: combined.runs_loaded,
            runs_excluded: combined.runs_excluded,
            partitions,
        })
    }

    /// Stack every run that has a target table, in the order given.
    pub fn combine(&self, ml_files: &[SummaryFile]) -> Result<Option<CombinedRuns>> {
        let mut frames = Vec::with_capacity(ml_files.len());
        let mut target_columns: Vec<String> = Vec::new();
        let mut runs_excluded = 0;

        for ml_file in ml_files {
            let target_file = ml_file.retag(FileTag::MlTargets);
            if !target_file.exists() {
                warn!(
                    features = %ml_file,
                    "No target table at {}, excluding run",
                    target_file.path.display()
                );
                runs_excluded += 1;
                continue;
            }
            let (frame, targets) = self.load_run(ml_file, &target_file)?;
            for column in targets {
                if !target_columns.contains(&column) {
                    target_columns.push(column);
                }
            }
            frames.push(frame.lazy());
        }

        if frames.is_empty() {
            return Ok(None);
        }
        let runs_loaded = frames.len();
        let frame = concat_lf_diagonal(frames, UnionArgs::default())?.collect()?;
        debug!(rows = frame.height(), columns = frame.width(), "Combined runs");

        Ok(Some(CombinedRuns {
            frame,
            target_columns,
            runs_loaded,
            runs_excluded,
        }))
    }

    fn load_run(&self, ml_file: &SummaryFile, target_file: &SummaryFile) -> Result<(DataFrame, Vec<String>)> {
        let features = read_feather(&ml_file.path)?;
        let targets = read_feather(&target_file.path)?;

        if features.height() != targets.height() {
            return Err(AssemblyError::RowMismatch {
                run: ml_file.path.clone(),
                feature_rows: features.height(),
                target_rows: targets.height(),
            }
            .into());
        }
        let target_names: Vec<String> = targets
            .get_column_names()
            .into_iter()
            .map(str::to_string)
            .collect();
        if let Some(column) = target_names
            .iter()
            .find(|name| features.get_column_index(name).is_some())
        {
            return Err(AssemblyError::DuplicateColumn {
                run: ml_file.path.clone(),
                column: column.clone(),
            }
            .into());
        }

        let mut frame = features.hstack(targets.get_columns())?;
        let index = forecast_time_index(ml_file.name.time_index, self.timing.window_steps());
        let rows = frame.height();
        frame.with_column(Series::new(FORECAST_TIME_INDEX, vec![index; rows]))?;
        Ok((frame, target_names))
    }
}

/// Position of a track file's window start, in time steps from initialization.
pub fn forecast_time_index(time_index: u8, window_steps: u8) -> i8 {
    (i16::from(time_index) - i16::from(window_steps)) as i8
}

/// Rows whose forecast time index falls inside `horizon`.
pub fn partition(df: &DataFrame, horizon: &Horizon) -> Result<DataFrame> {
    let mask: BooleanChunked = df
        .column(FORECAST_TIME_INDEX)?
        .i8()?
        .into_iter()
        .map(|index| index.is_some_and(|i| horizon.contains(i)))
        .collect();
    Ok(df.filter(&mask)?)
}

/// Baseline columns (probability maxima, metadata, targets) and data columns
/// (everything but the probability maxima).
pub fn split_columns(df: &DataFrame, target_columns: &[String]) -> (Vec<String>, Vec<String>) {
    let names: Vec<String> = df
        .get_column_names()
        .into_iter()
        .map(str::to_string)
        .collect();

    let mut baseline: Vec<String> = names
        .iter()
        .filter(|name| name.contains(BASELINE_MARKER))
        .cloned()
        .collect();
    for meta in METADATA_COLUMNS {
        if names.iter().any(|name| name == meta) {
            baseline.push(meta.to_string());
        } else {
            warn!(column = meta, "Metadata column missing from the features, skipping");
        }
    }
    for target in target_columns {
        if names.contains(target) && !baseline.contains(target) {
            baseline.push(target.clone());
        }
    }

    let data = names
        .into_iter()
        .filter(|name| !name.contains(BASELINE_MARKER))
        .collect();
    (baseline, data)
}

/// Where the four assembled datasets land for a given output directory.
pub fn dataset_paths(output_dir: &Path) -> Vec<PathBuf> {
    let assembler = Assembler::new(output_dir, ForecastTiming::default());
    HORIZONS
        .iter()
        .flat_map(|h| [assembler.baseline_path(h), assembler.data_path(h)])
        .collect()
}
