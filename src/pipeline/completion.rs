//! The idempotency gate: which origin files still lack their next-stage output.

use std::path::Path;
use tracing::debug;

use crate::error::Result;
use crate::naming::{FileTag, SummaryFile};
use crate::pipeline::discovery::WorkDiscovery;
use crate::pipeline::dispatcher::WorkUnit;

/// An origin file whose destination does not exist yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFile {
    pub origin: SummaryFile,
    pub destination: SummaryFile,
}

impl WorkUnit for PendingFile {
    fn label(&self) -> String {
        self.origin.path.display().to_string()
    }

    fn output_path(&self) -> &Path {
        &self.destination.path
    }
}

/// Discover every `origin` file and keep those whose `destination` is missing.
///
/// Must be called right before each dispatch; the filesystem is the only record
/// of what earlier (possibly interrupted) runs completed.
pub fn files_to_run(
    discovery: &WorkDiscovery,
    origin: FileTag,
    destination: FileTag,
) -> Result<Vec<PendingFile>> {
    let files = discovery.files(origin)?;
    Ok(pending(files, destination))
}

/// The subset of `files` whose `destination` sibling does not exist.
pub fn pending(files: Vec<SummaryFile>, destination: FileTag) -> Vec<PendingFile> {
    files
        .into_iter()
        .filter_map(|origin| {
            if !origin.exists() {
                debug!(path = %origin.path.display(), "Expected origin file is gone, excluding");
                return None;
            }
            let destination = origin.retag(destination);
            if destination.exists() {
                return None;
            }
            debug!(
                "{} does not exist, but {} does!",
                destination.path.display(),
                origin.path.display()
            );
            Some(PendingFile {
                origin,
                destination,
            })
        })
        .collect()
}
