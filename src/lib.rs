//! Builds the WoFS-ML-Severe training datasets from ensemble summary files.
//!
//! The pipeline runs four stages over a `{date}/{time}/` tree of summary
//! files: ensemble storm-track identification, ML feature extraction,
//! matching tracks to storm reports, and assembling the final datasets.
//! Each stage only processes files whose output does not exist yet.

pub mod app;
pub mod config;
pub mod constants;
pub mod domain;
pub mod error;
pub mod infra;
pub mod logging;
pub mod metrics;
pub mod naming;
pub mod pipeline;

pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use pipeline::{Collaborators, MlDataPipeline, PipelineReport};
