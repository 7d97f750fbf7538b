//! Constants shared by the pipeline stages.
//!
//! File naming tokens live on [`crate::naming::FileTag`]; everything else that
//! is fixed by the on-disk layout or the downstream training code is here.

/// Run-time directory that sits next to the forecast times and never holds summary files.
pub const BASEMAP_DIR: &str = "basemap";

/// Date-directory entries containing this marker are bookkeeping files, not run dates.
pub const DATE_LISTING_EXCLUDE: &str = ".txt";

/// Initialization time used when dates are given explicitly and no times are.
pub const DEFAULT_ADHOC_TIME: &str = "2200";

/// Variable holding the ensemble storm-track labels inside a track file.
pub const TRACK_VARIABLE: &str = "w_up__ensemble_tracks";

/// Column attached to every assembled row.
pub const FORECAST_TIME_INDEX: &str = "forecast_time_index";

/// Feature-name marker for the probability-maximum baseline features.
pub const BASELINE_MARKER: &str = "__prob_max";

/// Metadata columns carried into both the baseline and full datasets.
pub const METADATA_COLUMNS: [&str; 6] = [
    FORECAST_TIME_INDEX,
    "Run Date",
    "Initialization Time",
    "obj_centroid_x",
    "obj_centroid_y",
    "label",
];

/// Prefix of the assembled dataset file names.
pub const DATASET_PREFIX: &str = "wofs_ml_severe";

/// Log file written under the configured log directory.
pub const LOG_FILE_NAME: &str = "data_pipeline.log";
