//! Data shapes exchanged with the external collaborators.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

/// A labeled object grid: 0 is background, every other value is an object label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelGrid {
    pub shape: Vec<usize>,
    pub values: Vec<i32>,
}

impl LabelGrid {
    pub fn new(shape: Vec<usize>, values: Vec<i32>) -> Self {
        Self { shape, values }
    }

    pub fn empty(shape: &[usize]) -> Self {
        let len = shape.iter().product();
        Self {
            shape: shape.to_vec(),
            values: vec![0; len],
        }
    }

    /// Distinct object labels in ascending order, background excluded.
    pub fn labels(&self) -> Vec<i32> {
        self.values
            .iter()
            .copied()
            .filter(|&v| v != 0)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn has_objects(&self) -> bool {
        self.values.iter().any(|&v| v != 0)
    }

    /// Shape and value count agree.
    pub fn is_consistent(&self) -> bool {
        self.shape.iter().product::<usize>() == self.values.len()
    }
}

/// One gridded hazard (e.g. tornado reports) aligned to the forecast grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HazardLayer {
    pub name: String,
    pub grid: LabelGrid,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GriddedDataset {
    pub layers: Vec<HazardLayer>,
}

/// What the storm-report source is asked to grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRequest {
    pub track_file: PathBuf,
    pub init_time: NaiveDateTime,
    pub forecast_length_minutes: u32,
    pub err_window_minutes: u32,
    pub shape: Vec<usize>,
    pub hazards: Vec<String>,
}

/// Tolerances for one object-matching pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchParams {
    pub min_dist_max: u32,
    pub cent_dist_max: f64,
    pub time_max: u32,
    pub score_thresh: f64,
    pub one_to_one: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_sorted_unique_and_skip_background() {
        let grid = LabelGrid::new(vec![2, 4], vec![0, 7, 7, 0, 3, 0, 12, 3]);
        assert_eq!(grid.labels(), vec![3, 7, 12]);
        assert!(grid.has_objects());
        assert!(grid.is_consistent());
    }

    #[test]
    fn empty_grid_has_no_labels() {
        let grid = LabelGrid::empty(&[3, 3]);
        assert_eq!(grid.values.len(), 9);
        assert!(grid.labels().is_empty());
        assert!(!grid.has_objects());
    }
}
