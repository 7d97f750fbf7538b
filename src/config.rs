use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::constants::DEFAULT_ADHOC_TIME;
use crate::domain::MatchParams;
use crate::error::{PipelineError, Result};

/// Everything a pipeline invocation needs, loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Root of the `{date}/{time}/` summary file tree.
    pub base_path: PathBuf,
    /// Where the four assembled datasets are written.
    pub output_dir: PathBuf,
    pub log_dir: PathBuf,
    pub dates: DateSelection,
    pub n_jobs: usize,
    pub run_type: String,
    pub timing: ForecastTiming,
    pub matching: MatchingConfig,
    pub reports: ReportWindow,
    pub feature_profiles: FeatureProfiles,
    pub collaborators: CollaboratorCommands,
    pub notifications: NotificationConfig,
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("/work/mflora/SummaryFiles"),
            output_dir: PathBuf::from("/work/mflora/ML_DATA/DATA"),
            log_dir: PathBuf::from("logs"),
            dates: DateSelection::default(),
            n_jobs: 30,
            run_type: "rto".to_string(),
            timing: ForecastTiming::default(),
            matching: MatchingConfig::default(),
            reports: ReportWindow::default(),
            feature_profiles: FeatureProfiles::default(),
            collaborators: CollaboratorCommands::default(),
            notifications: NotificationConfig::default(),
            metrics_addr: None,
        }
    }
}

/// Which run dates and initialization times to scan.
///
/// `None` means "list the directory": dates from the base path, times from
/// each date directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DateSelection {
    pub dates: Option<Vec<String>>,
    pub times: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastTiming {
    /// Minutes between summary files.
    pub dt_minutes: u32,
    /// Length of the window a track file summarizes.
    pub duration_minutes: u32,
    /// Last forecast time index processed.
    pub n_time_steps: u8,
}

impl Default for ForecastTiming {
    fn default() -> Self {
        Self {
            dt_minutes: 5,
            duration_minutes: 30,
            n_time_steps: 36,
        }
    }
}

impl ForecastTiming {
    /// Number of time steps spanned by one track window.
    pub fn window_steps(&self) -> u8 {
        (self.duration_minutes / self.dt_minutes) as u8
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Minimum matching distances, in grid points.
    pub min_dists: Vec<u32>,
    pub cent_dist_max: f64,
    pub time_max: u32,
    pub score_thresh: f64,
    pub grid_spacing_km: u32,
    /// Hazard layers requested from the storm-report source, in column order.
    pub hazards: Vec<String>,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            min_dists: vec![1, 3, 5, 10],
            cent_dist_max: 15.0,
            time_max: 0,
            score_thresh: 0.2,
            grid_spacing_km: 3,
            hazards: vec![
                "tornado_severe".to_string(),
                "wind_severe".to_string(),
                "hail_severe".to_string(),
            ],
        }
    }
}

impl MatchingConfig {
    pub fn params_for(&self, min_dist_max: u32) -> MatchParams {
        MatchParams {
            min_dist_max,
            cent_dist_max: self.cent_dist_max,
            time_max: self.time_max,
            score_thresh: self.score_thresh,
            one_to_one: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportWindow {
    pub forecast_length_minutes: u32,
    pub err_window_minutes: u32,
}

impl Default for ReportWindow {
    fn default() -> Self {
        Self {
            forecast_length_minutes: 30,
            err_window_minutes: 15,
        }
    }
}

/// Feature-engine configuration files, chosen by the run date's year.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureProfiles {
    pub default: PathBuf,
    pub by_year: Vec<YearProfile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearProfile {
    pub years: Vec<u16>,
    pub path: PathBuf,
}

impl Default for FeatureProfiles {
    fn default() -> Self {
        Self {
            default: PathBuf::from("ml_config.yml"),
            by_year: vec![
                YearProfile {
                    years: vec![2017],
                    path: PathBuf::from("ml_config_2017.yml"),
                },
                YearProfile {
                    years: vec![2018, 2019],
                    path: PathBuf::from("ml_config_2018-19.yml"),
                },
            ],
        }
    }
}

impl FeatureProfiles {
    pub fn for_year(&self, year: Option<u16>) -> &Path {
        year.and_then(|y| self.by_year.iter().find(|p| p.years.contains(&y)))
            .map(|p| p.path.as_path())
            .unwrap_or(self.default.as_path())
    }
}

/// An external program and its leading arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollaboratorCommands {
    pub tracker: Option<CommandSpec>,
    pub feature_engine: Option<CommandSpec>,
    pub track_reader: Option<CommandSpec>,
    pub storm_reports: Option<CommandSpec>,
    pub matcher: Option<CommandSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Send a message when each stage completes (scheduled runs).
    pub on_stage_complete: bool,
    pub webhook_url: Option<String>,
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        let config: PipelineConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Restrict the run to explicit dates, as an operator re-running a few days would.
    ///
    /// Ad-hoc runs default to the 2200 initialization only and never notify.
    pub fn ad_hoc(mut self, dates: Vec<String>) -> Self {
        self.dates.dates = Some(dates);
        if self.dates.times.is_none() {
            self.dates.times = Some(vec![DEFAULT_ADHOC_TIME.to_string()]);
        }
        self.notifications.on_stage_complete = false;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.n_jobs == 0 {
            return Err(PipelineError::Config("n_jobs must be at least 1".into()));
        }
        let t = &self.timing;
        if t.dt_minutes == 0 || t.duration_minutes % t.dt_minutes != 0 {
            return Err(PipelineError::Config(format!(
                "duration_minutes ({}) must be a positive multiple of dt_minutes ({})",
                t.duration_minutes, t.dt_minutes
            )));
        }
        if t.duration_minutes / t.dt_minutes > u32::from(t.n_time_steps) {
            return Err(PipelineError::Config(format!(
                "a {}-minute window does not fit in {} time steps",
                t.duration_minutes, t.n_time_steps
            )));
        }
        if t.n_time_steps > 99 {
            return Err(PipelineError::Config(
                "n_time_steps must fit the two-digit time index".into(),
            ));
        }
        if self.matching.min_dists.is_empty() {
            return Err(PipelineError::Config("matching.min_dists is empty".into()));
        }
        if self.matching.hazards.is_empty() {
            return Err(PipelineError::Config("matching.hazards is empty".into()));
        }
        if let Some(dates) = &self.dates.dates {
            if let Some(bad) = dates.iter().find(|d| !is_digits(d, 8)) {
                return Err(PipelineError::Config(format!(
                    "date '{bad}' is not YYYYMMDD"
                )));
            }
        }
        if let Some(times) = &self.dates.times {
            if let Some(bad) = times.iter().find(|t| !is_digits(t, 4)) {
                return Err(PipelineError::Config(format!("time '{bad}' is not HHMM")));
            }
        }
        Ok(())
    }
}

fn is_digits(s: &str, len: usize) -> bool {
    s.len() == len && s.bytes().all(|b| b.is_ascii_digit())
}
