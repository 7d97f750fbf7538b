//! Ports backed by external programs speaking JSON over stdin/stdout.
//!
//! The request is written to the child's stdin as one JSON document; ports
//! that return data expect one JSON document on stdout. A non-zero exit
//! status is an error carrying the child's stderr.

use anyhow::{bail, Context};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeSet;
use std::io::{ErrorKind, Write};
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::debug;

use crate::app::ports::{
    EnsembleTracker, FeatureEngine, ObjectMatcher, StormReportSource, TrackGridReader,
};
use crate::config::CommandSpec;
use crate::constants::TRACK_VARIABLE;
use crate::domain::{GriddedDataset, LabelGrid, MatchParams, ReportRequest};
use crate::pipeline::work_items::FeatureWorkItem;

#[derive(Debug, Clone)]
pub struct CommandRunner {
    spec: CommandSpec,
}

impl CommandRunner {
    pub fn new(spec: CommandSpec) -> Self {
        Self { spec }
    }

    /// Run the program once with `request` on stdin and return its stdout.
    pub fn run<Req: Serialize>(&self, request: &Req) -> anyhow::Result<Vec<u8>> {
        let payload = serde_json::to_vec(request)?;
        debug!(program = %self.spec.program, bytes = payload.len(), "Invoking collaborator");

        let mut child = Command::new(&self.spec.program)
            .args(&self.spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to execute {}", self.spec.program))?;

        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(&payload) {
                Ok(()) => {}
                // The program may answer without reading its input.
                Err(e) if e.kind() == ErrorKind::BrokenPipe => {}
                Err(e) => return Err(e).context("Failed to write request to collaborator"),
            }
        }

        let output = child.wait_with_output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "{} failed with {}: {}",
                self.spec.program,
                output.status,
                stderr.trim()
            );
        }
        Ok(output.stdout)
    }

    pub fn call<Req: Serialize, Resp: DeserializeOwned>(&self, request: &Req) -> anyhow::Result<Resp> {
        let stdout = self.run(request)?;
        serde_json::from_slice(&stdout)
            .with_context(|| format!("{} returned malformed JSON", self.spec.program))
    }
}

pub struct CommandTracker(pub CommandRunner);

impl EnsembleTracker for CommandTracker {
    fn identify(&self, summary_file: &Path, output: &Path) -> anyhow::Result<()> {
        self.0
            .run(&json!({ "summary_file": summary_file, "output": output }))
            .map(|_| ())
    }
}

pub struct CommandFeatureEngine(pub CommandRunner);

impl FeatureEngine for CommandFeatureEngine {
    fn extract(&self, item: &FeatureWorkItem, run_type: &str) -> anyhow::Result<()> {
        self.0
            .run(&json!({ "item": item, "run_type": run_type }))
            .map(|_| ())
    }
}

pub struct CommandTrackReader(pub CommandRunner);

impl TrackGridReader for CommandTrackReader {
    fn read_tracks(&self, track_file: &Path) -> anyhow::Result<LabelGrid> {
        let grid: LabelGrid = self
            .0
            .call(&json!({ "track_file": track_file, "variable": TRACK_VARIABLE }))?;
        if !grid.is_consistent() {
            bail!("track grid for {} has inconsistent shape", track_file.display());
        }
        Ok(grid)
    }
}

pub struct CommandReportSource(pub CommandRunner);

impl StormReportSource for CommandReportSource {
    fn grid_reports(&self, request: &ReportRequest) -> anyhow::Result<GriddedDataset> {
        self.0.call(request)
    }
}

pub struct CommandMatcher(pub CommandRunner);

impl ObjectMatcher for CommandMatcher {
    fn match_objects(
        &self,
        forecast: &LabelGrid,
        observed: &LabelGrid,
        params: &MatchParams,
    ) -> anyhow::Result<BTreeSet<i32>> {
        self.0.call(&json!({
            "forecast": forecast,
            "observed": observed,
            "params": params,
        }))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn shell(script: &str) -> CommandRunner {
        CommandRunner::new(CommandSpec {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
        })
    }

    #[test]
    fn parses_json_response() {
        let reader = CommandTrackReader(shell(
            r#"cat > /dev/null; printf '{"shape":[1,3],"values":[0,4,4]}'"#,
        ));
        let grid = reader.read_tracks(Path::new("tracks.nc")).unwrap();
        assert_eq!(grid.labels(), vec![4]);
    }

    #[test]
    fn request_reaches_stdin() {
        let echo = shell("cat");
        let back: serde_json::Value = echo.call(&json!({ "run_type": "rto" })).unwrap();
        assert_eq!(back["run_type"], "rto");
    }

    #[test]
    fn failure_carries_stderr() {
        let err = shell("echo 'no reports for 20220504' >&2; exit 3")
            .run(&json!({}))
            .unwrap_err();
        assert!(err.to_string().contains("no reports for 20220504"));
    }

    #[test]
    fn matcher_decodes_label_set() {
        let matcher = CommandMatcher(shell("cat > /dev/null; echo '[7, 2, 7]'"));
        let grid = LabelGrid::empty(&[1, 1]);
        let params = MatchParams {
            min_dist_max: 1,
            cent_dist_max: 15.0,
            time_max: 0,
            score_thresh: 0.2,
            one_to_one: true,
        };
        let matched = matcher.match_objects(&grid, &grid, &params).unwrap();
        assert_eq!(matched.into_iter().collect::<Vec<_>>(), vec![2, 7]);
    }
}
