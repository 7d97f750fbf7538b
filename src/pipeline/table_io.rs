//! Feather (Arrow IPC) table reads and atomic writes.

use polars::prelude::*;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::Result;

pub fn read_feather(path: &Path) -> Result<DataFrame> {
    let file = File::open(path)?;
    Ok(IpcReader::new(file).finish()?)
}

/// Write `df` next to `path` under a hidden temporary name, then rename.
///
/// Readers never observe a half-written table, and the completion check
/// never mistakes one for a finished output.
pub fn write_feather_atomic(df: &mut DataFrame, path: &Path) -> Result<()> {
    let tmp = temp_path(path);
    let written: Result<()> = File::create(&tmp)
        .map_err(Into::into)
        .and_then(|mut file| IpcWriter::new(&mut file).finish(df).map_err(Into::into))
        .and_then(|()| fs::rename(&tmp, path).map_err(Into::into));

    if written.is_err() && tmp.exists() {
        if let Err(e) = fs::remove_file(&tmp) {
            warn!(path = %tmp.display(), error = %e, "Could not remove temporary table");
        }
    }
    written
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4()))
}
