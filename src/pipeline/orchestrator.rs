//! Runs the four stages in order: tracks, features, targets, datasets.

use chrono::{DateTime, Local};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::app::ports::{
    EnsembleTracker, FeatureEngine, Notifier, ObjectMatcher, StormReportSource, TrackGridReader,
};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::metrics::StageMetrics;
use crate::naming::FileTag;
use crate::pipeline::assembler::{Assembler, AssemblySummary};
use crate::pipeline::completion::{files_to_run, PendingFile};
use crate::pipeline::discovery::WorkDiscovery;
use crate::pipeline::dispatcher::{BatchReport, Dispatcher, Stage};
use crate::pipeline::reports::ReportGridder;
use crate::pipeline::targets::TargetBuilder;
use crate::pipeline::work_items::{build_for_directory, FeatureWorkItem};

/// The external systems each stage delegates to.
#[derive(Clone)]
pub struct Collaborators {
    pub tracker: Arc<dyn EnsembleTracker>,
    pub features: Arc<dyn FeatureEngine>,
    pub track_reader: Arc<dyn TrackGridReader>,
    pub reports: Arc<dyn StormReportSource>,
    pub matcher: Arc<dyn ObjectMatcher>,
    pub notifier: Arc<dyn Notifier>,
}

/// Outcome of a full pipeline invocation.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Local>,
    pub stages: Vec<BatchReport>,
    pub assembly: AssemblySummary,
    pub elapsed: Duration,
}

impl PipelineReport {
    pub fn failed_items(&self) -> usize {
        self.stages.iter().map(|s| s.failed.len()).sum()
    }
}

pub struct MlDataPipeline {
    config: PipelineConfig,
    discovery: WorkDiscovery,
    dispatcher: Dispatcher,
    collaborators: Collaborators,
}

impl MlDataPipeline {
    /// Fails if `config` does not pass [`PipelineConfig::validate`].
    pub fn new(config: PipelineConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;
        let discovery = WorkDiscovery::new(config.base_path.clone(), config.dates.clone());
        let dispatcher = Dispatcher::new(config.n_jobs);
        Ok(Self {
            config,
            discovery,
            dispatcher,
            collaborators,
        })
    }

    /// Run every stage once. Each stage re-derives its work from the
    /// filesystem, so an interrupted run picks up where it stopped.
    pub async fn run(&self) -> Result<PipelineReport> {
        let run_id = Uuid::new_v4();
        let span = info_span!("pipeline", run_id = %run_id);

        async move {
            let started_at = Local::now();
            let start = Instant::now();
            info!("{}", "=".repeat(50));
            info!("============= STARTING A NEW DATA PIPELINE =============");

            info!("========== IDENTIFYING THE ENSEMBLE STORM TRACKS =======");
            let tracks = self.identify_ensemble_tracks().await?;

            info!("======== EXTRACTING THE ML FEATURE USING THE TRACKS =====");
            let features = self.extract_ml_features().await?;

            info!("============ MATCHING TRACKS TO STORM REPORTS ===========");
            let targets = self.match_to_storm_reports().await?;

            info!("============ BUILDING THE FINAL DATASETS ===========");
            let assembly = self.concatenate_dataframes().await?;

            let report = PipelineReport {
                run_id,
                started_at,
                stages: vec![tracks, features, targets],
                assembly,
                elapsed: start.elapsed(),
            };
            info!(
                failed_items = report.failed_items(),
                elapsed_secs = report.elapsed.as_secs_f64(),
                "Data pipeline finished"
            );
            Ok(report)
        }
        .instrument(span)
        .await
    }

    /// Stage 1: one track file per 30-minute summary file lacking one.
    pub async fn identify_ensemble_tracks(&self) -> Result<BatchReport> {
        let stage = Stage::EnsembleTracks;
        let started = Local::now();

        let max_index = self.config.timing.n_time_steps;
        let pending: Vec<PendingFile> =
            files_to_run(&self.discovery, FileTag::ThirtyMinute, FileTag::EnsembleTracks)?
                .into_iter()
                .filter(|p| p.origin.name.time_index <= max_index)
                .collect();

        let tracker = Arc::clone(&self.collaborators.tracker);
        let report = self
            .dispatcher
            .dispatch(stage, pending, move |item: &PendingFile| {
                tracker.identify(&item.origin.path, &item.destination.path)
            })
            .instrument(info_span!("stage", name = stage.name()))
            .await?;

        self.stage_finished(
            started,
            "Re-processing of the Ensemble Storm Track files is complete!",
        )
        .await;
        Ok(report)
    }

    /// Stage 2: one feature table per complete track window lacking one.
    pub async fn extract_ml_features(&self) -> Result<BatchReport> {
        let stage = Stage::MlFeatures;
        let started = Local::now();

        let mut items: Vec<FeatureWorkItem> = Vec::new();
        for run_dir in self.discovery.run_directories()? {
            match build_for_directory(&run_dir, &self.config.timing, &self.config.feature_profiles) {
                Ok(found) => items.extend(found),
                Err(e) => {
                    error!(dir = %run_dir.display(), error = %e, "Files were not available or had issues");
                }
            }
        }
        if items.is_empty() {
            info!(stage = %stage, "Every feature table already exists");
            return Ok(BatchReport::empty(stage));
        }

        let engine = Arc::clone(&self.collaborators.features);
        let run_type = self.config.run_type.clone();
        let report = self
            .dispatcher
            .dispatch(stage, items, move |item: &FeatureWorkItem| {
                engine.extract(item, &run_type)
            })
            .instrument(info_span!("stage", name = stage.name()))
            .await?;

        self.stage_finished(started, "ML feature extraction is finished!")
            .await;
        Ok(report)
    }

    /// Stage 3: one target table per track file lacking one.
    pub async fn match_to_storm_reports(&self) -> Result<BatchReport> {
        let stage = Stage::StormReportMatching;
        let started = Local::now();

        let pending = files_to_run(&self.discovery, FileTag::EnsembleTracks, FileTag::MlTargets)?;
        if pending.is_empty() {
            info!(stage = %stage, "Every target table already exists");
            return Ok(BatchReport::empty(stage));
        }

        let gridder = ReportGridder::new(
            Arc::clone(&self.collaborators.reports),
            self.config.reports.clone(),
            self.config.matching.hazards.clone(),
        );
        let builder = TargetBuilder::new(
            Arc::clone(&self.collaborators.track_reader),
            gridder,
            Arc::clone(&self.collaborators.matcher),
            self.config.matching.clone(),
        );
        let report = self
            .dispatcher
            .dispatch(stage, pending, move |item: &PendingFile| builder.write(item))
            .instrument(info_span!("stage", name = stage.name()))
            .await?;

        self.stage_finished(started, "Matching to storm reports is finished!")
            .await;
        Ok(report)
    }

    /// Stage 4: rebuild the four training datasets from scratch.
    pub async fn concatenate_dataframes(&self) -> Result<AssemblySummary> {
        let started = Local::now();
        let start = Instant::now();

        let ml_files = self.discovery.files(FileTag::MlData)?;
        let assembler = Assembler::new(self.config.output_dir.clone(), self.config.timing.clone());
        let summary = tokio::task::spawn_blocking(move || assembler.assemble(&ml_files))
            .instrument(info_span!("stage", name = Stage::Assembly.name()))
            .await
            .map_err(|e| PipelineError::WorkerPool(e.to_string()))??;
        StageMetrics::record_duration(Stage::Assembly, start.elapsed());

        self.stage_finished(started, "Final datasets are built!").await;
        Ok(summary)
    }

    async fn stage_finished(&self, started: DateTime<Local>, text: &str) {
        if !self.config.notifications.on_stage_complete {
            return;
        }
        let message = completion_message(text, started, Local::now());
        if let Err(e) = self.collaborators.notifier.notify(&message).await {
            warn!(error = %e, "Failed to send stage notification");
        }
    }
}

/// "text / Started at 10:05 PM, / Duration : H hours : M minutes : S seconds".
pub fn completion_message(text: &str, started: DateTime<Local>, finished: DateTime<Local>) -> String {
    let seconds = (finished - started).num_milliseconds().max(0) as f64 / 1000.0;
    let hours = (seconds / 3600.0).floor();
    let minutes = ((seconds % 3600.0) / 60.0).floor();
    let seconds = seconds % 60.0;
    format!(
        "{}\n\nStarted at {},\nDuration : {:.2} hours : {:.2} minutes : {:.2} seconds",
        text,
        started.format("%I:%M %p"),
        hours,
        minutes,
        seconds
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn completion_message_breaks_down_duration() {
        let started = Local.with_ymd_and_hms(2022, 5, 4, 22, 5, 0).unwrap();
        let finished = started + chrono::Duration::seconds(3_725);
        let message = completion_message("Final datasets are built!", started, finished);
        assert!(message.starts_with("Final datasets are built!"));
        assert!(message.contains("Started at 10:05 PM"));
        assert!(message.contains("1.00 hours : 2.00 minutes : 5.00 seconds"));
    }
}
