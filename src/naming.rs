//! The summary file naming grammar.
//!
//! Every file the pipeline reads or writes is named
//! `wofs_{TAG}_{II}_{YYYYMMDD}_{HHMM}_{HHMM}.{nc|feather}`: a type tag, the
//! zero-padded forecast time index, the run date, the initialization time and
//! the valid time. Stage transitions are expressed as [`SummaryFileName::retag`],
//! which swaps the tag and, for tabular destinations, the extension.

use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::FileNameError;

static FILE_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^wofs_([0-9A-Z]+)_(\d{2})_(\d{8})_(\d{4})_(\d{4})\.([a-z]+)$")
        .expect("summary file name regex is valid")
});

/// Content-type token encoded in a summary file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FileTag {
    #[serde(rename = "30M")]
    ThirtyMinute,
    #[serde(rename = "ENSEMBLETRACKS")]
    EnsembleTracks,
    #[serde(rename = "ENV")]
    Environment,
    #[serde(rename = "SVR")]
    Severe,
    #[serde(rename = "ENS")]
    Ensemble,
    #[serde(rename = "MLDATA")]
    MlData,
    #[serde(rename = "MLTARGETS")]
    MlTargets,
}

impl FileTag {
    pub const ALL: [FileTag; 7] = [
        FileTag::ThirtyMinute,
        FileTag::EnsembleTracks,
        FileTag::Environment,
        FileTag::Severe,
        FileTag::Ensemble,
        FileTag::MlData,
        FileTag::MlTargets,
    ];

    pub fn token(self) -> &'static str {
        match self {
            FileTag::ThirtyMinute => "30M",
            FileTag::EnsembleTracks => "ENSEMBLETRACKS",
            FileTag::Environment => "ENV",
            FileTag::Severe => "SVR",
            FileTag::Ensemble => "ENS",
            FileTag::MlData => "MLDATA",
            FileTag::MlTargets => "MLTARGETS",
        }
    }

    /// Tabular stages write feather tables instead of gridded NetCDF.
    pub fn is_tabular(self) -> bool {
        matches!(self, FileTag::MlData | FileTag::MlTargets)
    }

    pub fn extension(self) -> Extension {
        if self.is_tabular() {
            Extension::Feather
        } else {
            Extension::NetCdf
        }
    }
}

impl fmt::Display for FileTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for FileTag {
    type Err = FileNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FileTag::ALL
            .into_iter()
            .find(|tag| tag.token() == s)
            .ok_or_else(|| FileNameError::UnknownTag(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Extension {
    NetCdf,
    Feather,
}

impl Extension {
    pub fn as_str(self) -> &'static str {
        match self {
            Extension::NetCdf => "nc",
            Extension::Feather => "feather",
        }
    }
}

impl FromStr for Extension {
    type Err = FileNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nc" => Ok(Extension::NetCdf),
            "feather" => Ok(Extension::Feather),
            other => Err(FileNameError::UnknownExtension(other.to_string())),
        }
    }
}

/// Parsed form of a summary file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SummaryFileName {
    pub tag: FileTag,
    pub time_index: u8,
    pub valid_date: String,
    pub init_time: String,
    pub valid_time: String,
    pub extension: Extension,
}

impl SummaryFileName {
    pub fn parse(name: &str) -> Result<Self, FileNameError> {
        let caps = FILE_NAME_RE
            .captures(name)
            .ok_or_else(|| FileNameError::Grammar(name.to_string()))?;

        let time_index = caps[2]
            .parse::<u8>()
            .map_err(|_| FileNameError::Grammar(name.to_string()))?;

        Ok(Self {
            tag: caps[1].parse()?,
            time_index,
            valid_date: caps[3].to_string(),
            init_time: caps[4].to_string(),
            valid_time: caps[5].to_string(),
            extension: caps[6].parse()?,
        })
    }

    /// The name of the file the next stage derives from this one.
    pub fn retag(&self, tag: FileTag) -> Self {
        Self {
            tag,
            extension: tag.extension(),
            ..self.clone()
        }
    }

    /// Timestamp the storm-report window is anchored on.
    pub fn init_timestamp(&self) -> Result<NaiveDateTime, FileNameError> {
        let stamp = format!("{}{}", self.valid_date, self.init_time);
        NaiveDateTime::parse_from_str(&stamp, "%Y%m%d%H%M")
            .map_err(|_| FileNameError::InitTime(stamp))
    }
}

impl fmt::Display for SummaryFileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "wofs_{}_{:02}_{}_{}_{}.{}",
            self.tag,
            self.time_index,
            self.valid_date,
            self.init_time,
            self.valid_time,
            self.extension.as_str()
        )
    }
}

/// A summary file on disk together with its parsed name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SummaryFile {
    pub path: PathBuf,
    pub name: SummaryFileName,
}

impl SummaryFile {
    pub fn from_path(path: impl Into<PathBuf>) -> Result<Self, FileNameError> {
        let path = path.into();
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| FileNameError::NoFileName(path.clone()))?;
        let name = SummaryFileName::parse(file_name)?;
        Ok(Self { path, name })
    }

    /// Sibling file in the same run directory under a different tag.
    pub fn retag(&self, tag: FileTag) -> Self {
        let name = self.name.retag(tag);
        let path = self.dir().join(name.to_string());
        Self { path, name }
    }

    pub fn dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new(""))
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }
}

impl fmt::Display for SummaryFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}
