//! Groups the summary files one feature extraction needs.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::config::{FeatureProfiles, ForecastTiming};
use crate::error::{Result, WorkItemError};
use crate::naming::{FileTag, SummaryFile};
use crate::pipeline::discovery::files_in;
use crate::pipeline::dispatcher::WorkUnit;

/// Everything the feature engine reads for one track window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureWorkItem {
    pub track_file: PathBuf,
    pub env_file: PathBuf,
    pub svr_file: PathBuf,
    /// Ensemble files covering the whole window, in time order.
    pub ens_files: Vec<PathBuf>,
    /// Feature-engine configuration chosen from the run year.
    pub profile: PathBuf,
    /// The `MLDATA` table this item produces.
    pub output: PathBuf,
}

impl WorkUnit for FeatureWorkItem {
    fn label(&self) -> String {
        self.track_file.display().to_string()
    }

    fn output_path(&self) -> &Path {
        &self.output
    }
}

/// Year of a `{date}/{time}` run directory, from the date component.
pub fn run_year(run_dir: &Path) -> Option<u16> {
    run_dir
        .parent()
        .and_then(|date| date.file_name())
        .and_then(|name| name.to_str())
        .and_then(|name| name.get(..4))
        .and_then(|year| year.parse().ok())
}

/// Work items of one run directory whose `MLDATA` output does not exist yet.
///
/// A time index missing any sibling is logged and skipped; the rest of the
/// run still proceeds.
pub fn build_for_directory(
    run_dir: &Path,
    timing: &ForecastTiming,
    profiles: &FeatureProfiles,
) -> Result<Vec<FeatureWorkItem>> {
    let profile = profiles.for_year(run_year(run_dir)).to_path_buf();
    let window = timing.window_steps();
    let mut items = Vec::new();

    for t in 0..=timing.n_time_steps.saturating_sub(window) {
        match item_at(run_dir, t, window, &profile)? {
            Ok(item) => {
                if item.output.exists() {
                    debug!("{} already exists!...", item.output.display());
                } else {
                    items.push(item);
                }
            }
            Err(missing) => warn!(error = %missing, "Skipping feature window"),
        }
    }
    Ok(items)
}

fn item_at(
    run_dir: &Path,
    t: u8,
    window: u8,
    profile: &Path,
) -> Result<std::result::Result<FeatureWorkItem, WorkItemError>> {
    let track = match first_file(run_dir, FileTag::EnsembleTracks, t + window)? {
        Ok(file) => file,
        Err(e) => return Ok(Err(e)),
    };
    let env = match first_file(run_dir, FileTag::Environment, t)? {
        Ok(file) => file,
        Err(e) => return Ok(Err(e)),
    };
    let svr = env.retag(FileTag::Severe);
    if !svr.exists() {
        return Ok(Err(WorkItemError::MissingSibling {
            tag: FileTag::Severe,
            time_index: t,
            dir: run_dir.to_path_buf(),
        }));
    }

    let mut ens_files = Vec::with_capacity(usize::from(window) + 1);
    for step in t..=t + window {
        match first_file(run_dir, FileTag::Ensemble, step)? {
            Ok(file) => ens_files.push(file.path),
            Err(e) => return Ok(Err(e)),
        }
    }

    Ok(Ok(FeatureWorkItem {
        output: track.retag(FileTag::MlData).path,
        track_file: track.path,
        env_file: env.path,
        svr_file: svr.path,
        ens_files,
        profile: profile.to_path_buf(),
    }))
}

fn first_file(
    run_dir: &Path,
    tag: FileTag,
    time_index: u8,
) -> Result<std::result::Result<SummaryFile, WorkItemError>> {
    Ok(files_in(run_dir, tag, Some(time_index))?
        .into_iter()
        .next()
        .ok_or_else(|| WorkItemError::MissingSibling {
            tag,
            time_index,
            dir: run_dir.to_path_buf(),
        }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use tempfile::tempdir;

    fn valid_time(index: u8) -> String {
        let minutes = 22 * 60 + u32::from(index) * 5;
        format!("{:02}{:02}", (minutes / 60) % 24, minutes % 60)
    }

    fn touch(dir: &Path, tag: &str, index: u8, ext: &str) {
        let name = format!("wofs_{}_{:02}_20220504_2200_{}.{}", tag, index, valid_time(index), ext);
        File::create(dir.join(name)).unwrap();
    }

    fn small_timing() -> ForecastTiming {
        ForecastTiming {
            dt_minutes: 5,
            duration_minutes: 10,
            n_time_steps: 3,
        }
    }

    fn populated_run(root: &Path) -> PathBuf {
        let run = root.join("20220504/2200");
        fs::create_dir_all(&run).unwrap();
        for t in 0..=3 {
            touch(&run, "ENS", t, "nc");
            touch(&run, "ENV", t, "nc");
            touch(&run, "SVR", t, "nc");
            touch(&run, "ENSEMBLETRACKS", t, "nc");
        }
        run
    }

    #[test]
    fn builds_one_item_per_window() {
        let root = tempdir().unwrap();
        let run = populated_run(root.path());

        let items =
            build_for_directory(&run, &small_timing(), &FeatureProfiles::default()).unwrap();
        assert_eq!(items.len(), 2);

        let first = &items[0];
        assert!(first.track_file.ends_with("wofs_ENSEMBLETRACKS_02_20220504_2200_2210.nc"));
        assert!(first.env_file.ends_with("wofs_ENV_00_20220504_2200_2200.nc"));
        assert!(first.svr_file.ends_with("wofs_SVR_00_20220504_2200_2200.nc"));
        assert_eq!(first.ens_files.len(), 3);
        assert!(first.output.ends_with("wofs_MLDATA_02_20220504_2200_2210.feather"));
        assert_eq!(first.profile, PathBuf::from("ml_config.yml"));
    }

    #[test]
    fn skips_windows_with_existing_output_or_missing_siblings() {
        let root = tempdir().unwrap();
        let run = populated_run(root.path());
        touch(&run, "MLDATA", 2, "feather");
        fs::remove_file(run.join(format!("wofs_ENS_03_20220504_2200_{}.nc", valid_time(3)))).unwrap();

        let items =
            build_for_directory(&run, &small_timing(), &FeatureProfiles::default()).unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn year_comes_from_date_directory() {
        assert_eq!(run_year(Path::new("/data/20170516/1900")), Some(2017));
        assert_eq!(run_year(Path::new("2200")), None);
    }
}
