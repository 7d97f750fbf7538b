//! Enumerates run directories and summary files under the base path.

use glob::Pattern;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::DateSelection;
use crate::constants::{BASEMAP_DIR, DATE_LISTING_EXCLUDE};
use crate::error::Result;
use crate::naming::{FileTag, SummaryFile};

#[derive(Debug, Clone)]
pub struct WorkDiscovery {
    base_path: PathBuf,
    selection: DateSelection,
}

impl WorkDiscovery {
    pub fn new(base_path: impl Into<PathBuf>, selection: DateSelection) -> Self {
        Self {
            base_path: base_path.into(),
            selection,
        }
    }

    /// Run dates to scan: the explicit list, or every non-bookkeeping entry of the base path.
    pub fn dates(&self) -> Result<Vec<String>> {
        if let Some(dates) = &self.selection.dates {
            return Ok(dates.clone());
        }
        let mut dates: Vec<String> = list_dir_names(&self.base_path)?
            .into_iter()
            .filter(|name| !name.contains(DATE_LISTING_EXCLUDE))
            .collect();
        dates.sort();
        Ok(dates)
    }

    fn times_for(&self, date_dir: &Path) -> Result<Vec<String>> {
        let times = match &self.selection.times {
            Some(times) => times.clone(),
            None => {
                let mut times = list_dir_names(date_dir)?;
                times.sort();
                times
            }
        };
        Ok(times.into_iter().filter(|t| t != BASEMAP_DIR).collect())
    }

    /// Every `{base}/{date}/{time}` directory that exists.
    pub fn run_directories(&self) -> Result<Vec<PathBuf>> {
        let mut dirs = Vec::new();
        for date in self.dates()? {
            let date_dir = self.base_path.join(&date);
            if !date_dir.is_dir() {
                info!(dir = %date_dir.display(), "Run date directory does not exist!");
                continue;
            }
            for time in self.times_for(&date_dir)? {
                let run_dir = date_dir.join(&time);
                if run_dir.is_dir() {
                    dirs.push(run_dir);
                } else {
                    info!(dir = %run_dir.display(), "Run directory does not exist!");
                }
            }
        }
        Ok(dirs)
    }

    /// Every file carrying `tag` across all run directories.
    pub fn files(&self, tag: FileTag) -> Result<Vec<SummaryFile>> {
        let mut files = Vec::new();
        for dir in self.run_directories()? {
            let found = files_in(&dir, tag, None)?;
            if found.is_empty() {
                info!(
                    "Files of form: {}/wofs_{}_* do not exist!",
                    dir.display(),
                    tag
                );
            }
            files.extend(found);
        }
        Ok(files)
    }
}

/// Files in one run directory carrying `tag`, optionally at a single time index.
///
/// Names that match the glob but not the grammar (or carry another tag that
/// shares the prefix, like `ENS` and `ENSEMBLETRACKS`) are skipped.
pub fn files_in(dir: &Path, tag: FileTag, time_index: Option<u8>) -> Result<Vec<SummaryFile>> {
    let prefix = match time_index {
        Some(index) => format!("wofs_{}_{:02}_*", tag, index),
        None => format!("wofs_{}_*", tag),
    };
    let pattern = format!(
        "{}/{}",
        Pattern::escape(&dir.to_string_lossy()),
        prefix
    );

    let mut files = Vec::new();
    for entry in glob::glob(&pattern)? {
        let path = match entry {
            Ok(path) => path,
            Err(e) => {
                debug!(error = %e, "Unreadable entry while globbing {}", pattern);
                continue;
            }
        };
        match SummaryFile::from_path(&path) {
            Ok(file) if file.name.tag == tag => files.push(file),
            Ok(_) => {}
            Err(e) => debug!(path = %path.display(), error = %e, "Skipping unparseable file"),
        }
    }
    Ok(files)
}

fn list_dir_names(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::tempdir;

    fn touch(dir: &Path, name: &str) {
        fs::create_dir_all(dir).unwrap();
        File::create(dir.join(name)).unwrap();
    }

    #[test]
    fn lists_dates_skipping_bookkeeping_files() {
        let root = tempdir().unwrap();
        fs::create_dir_all(root.path().join("20220504/2200")).unwrap();
        fs::create_dir_all(root.path().join("20220505/2300")).unwrap();
        touch(root.path(), "processed_dates.txt");

        let discovery = WorkDiscovery::new(root.path(), DateSelection::default());
        assert_eq!(discovery.dates().unwrap(), vec!["20220504", "20220505"]);
    }

    #[test]
    fn run_directories_skip_basemap_and_missing_times() {
        let root = tempdir().unwrap();
        fs::create_dir_all(root.path().join("20220504/2200")).unwrap();
        fs::create_dir_all(root.path().join("20220504/basemap")).unwrap();

        let listed = WorkDiscovery::new(root.path(), DateSelection::default());
        assert_eq!(
            listed.run_directories().unwrap(),
            vec![root.path().join("20220504/2200")]
        );

        let explicit = WorkDiscovery::new(
            root.path(),
            DateSelection {
                dates: Some(vec!["20220504".into(), "20220601".into()]),
                times: Some(vec!["2200".into(), "2300".into()]),
            },
        );
        assert_eq!(
            explicit.run_directories().unwrap(),
            vec![root.path().join("20220504/2200")]
        );
    }

    #[test]
    fn files_filter_on_parsed_tag() {
        let root = tempdir().unwrap();
        let run = root.path().join("20220504/2200");
        touch(&run, "wofs_ENS_05_20220504_2200_2225.nc");
        touch(&run, "wofs_ENSEMBLETRACKS_05_20220504_2200_2225.nc");
        touch(&run, "wofs_ENS_notes.txt");

        let discovery = WorkDiscovery::new(root.path(), DateSelection::default());
        let ens = discovery.files(FileTag::Ensemble).unwrap();
        assert_eq!(ens.len(), 1);
        assert_eq!(ens[0].name.tag, FileTag::Ensemble);

        let tracks = discovery.files(FileTag::EnsembleTracks).unwrap();
        assert_eq!(tracks.len(), 1);

        assert!(discovery.files(FileTag::MlData).unwrap().is_empty());
    }

    #[test]
    fn files_in_selects_one_time_index() {
        let root = tempdir().unwrap();
        touch(root.path(), "wofs_ENV_04_20220504_2200_2220.nc");
        touch(root.path(), "wofs_ENV_05_20220504_2200_2225.nc");

        let found = files_in(root.path(), FileTag::Environment, Some(5)).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name.time_index, 5);
    }
}
