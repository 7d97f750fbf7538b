use std::path::PathBuf;
use thiserror::Error;

use crate::naming::FileTag;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Table error: {0}")]
    Table(#[from] polars::error::PolarsError),

    #[error("Invalid glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    FileName(#[from] FileNameError),

    #[error("Worker pool error: {0}")]
    WorkerPool(String),

    #[error(transparent)]
    Assembly(#[from] AssemblyError),
}

/// Violations of the `wofs_{TAG}_{II}_{YYYYMMDD}_{HHMM}_{HHMM}.{ext}` grammar.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FileNameError {
    #[error("'{0}' does not follow the summary file naming grammar")]
    Grammar(String),

    #[error("unknown file type tag '{0}'")]
    UnknownTag(String),

    #[error("unknown file extension '{0}'")]
    UnknownExtension(String),

    #[error("path '{}' has no usable file name", .0.display())]
    NoFileName(PathBuf),

    #[error("invalid initialization time '{0}'")]
    InitTime(String),
}

/// Structural failure while grouping the files for one feature work item.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkItemError {
    #[error("no {tag} file at time index {time_index:02} in {}", .dir.display())]
    MissingSibling {
        tag: FileTag,
        time_index: u8,
        dir: PathBuf,
    },
}

/// Integrity failures while building the combined datasets.
#[derive(Error, Debug)]
pub enum AssemblyError {
    #[error(
        "row mismatch for {}: {feature_rows} feature rows vs {target_rows} target rows",
        .run.display()
    )]
    RowMismatch {
        run: PathBuf,
        feature_rows: usize,
        target_rows: usize,
    },

    #[error("duplicate column '{column}' between feature and target tables of {}", .run.display())]
    DuplicateColumn { run: PathBuf, column: String },
}

pub type Result<T> = std::result::Result<T, PipelineError>;
