use anyhow::Result;
use async_trait::async_trait;
use polars::prelude::*;
use rand::seq::SliceRandom;
use rand::thread_rng;
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::tempdir;

use wofs_ml_pipeline::app::ports::{
    EnsembleTracker, FeatureEngine, Notifier, ObjectMatcher, StormReportSource, TrackGridReader,
};
use wofs_ml_pipeline::config::{DateSelection, ForecastTiming, PipelineConfig};
use wofs_ml_pipeline::domain::{GriddedDataset, HazardLayer, LabelGrid, MatchParams, ReportRequest};
use wofs_ml_pipeline::naming::{FileTag, SummaryFile};
use wofs_ml_pipeline::pipeline::completion::files_to_run;
use wofs_ml_pipeline::pipeline::discovery::WorkDiscovery;
use wofs_ml_pipeline::pipeline::reports::ReportGridder;
use wofs_ml_pipeline::pipeline::table_io::{read_feather, write_feather_atomic};
use wofs_ml_pipeline::pipeline::targets::TargetBuilder;
use wofs_ml_pipeline::pipeline::work_items::FeatureWorkItem;
use wofs_ml_pipeline::pipeline::{Dispatcher, Stage};
use wofs_ml_pipeline::{Collaborators, MlDataPipeline, PipelineError};

const DATE: &str = "20220504";
const INIT: &str = "2200";

fn valid_time(index: u8) -> String {
    let minutes = 22 * 60 + u32::from(index) * 5;
    format!("{:02}{:02}", (minutes / 60) % 24, minutes % 60)
}

fn file_name(tag: &str, index: u8, ext: &str) -> String {
    format!("wofs_{}_{:02}_{}_{}_{}.{}", tag, index, DATE, INIT, valid_time(index), ext)
}

fn touch(dir: &Path, name: &str) {
    fs::create_dir_all(dir).unwrap();
    File::create(dir.join(name)).unwrap();
}

/// A run directory with every gridded input for indices `0..=last`.
fn summary_tree(root: &Path, last: u8) -> PathBuf {
    let run = root.join(DATE).join(INIT);
    for index in 0..=last {
        for tag in ["30M", "ENV", "SVR", "ENS"] {
            touch(&run, &file_name(tag, index, "nc"));
        }
    }
    run
}

/// Objects 1..=k where k depends on the track's time index.
fn track_grid(track_file: &Path) -> LabelGrid {
    let index = SummaryFile::from_path(track_file)
        .map(|f| f.name.time_index)
        .unwrap_or(0);
    let objects = (index % 3) as i32 + 1;
    let mut values = vec![0; 8];
    for label in 1..=objects {
        values[label as usize] = label;
    }
    LabelGrid::new(vec![2, 4], values)
}

struct TouchTracker {
    calls: AtomicUsize,
}

impl EnsembleTracker for TouchTracker {
    fn identify(&self, _summary_file: &Path, output: &Path) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        File::create(output)?;
        Ok(())
    }
}

/// Writes one feature row per track object, failing for one chosen window.
struct TableFeatureEngine {
    fail_at: Option<u8>,
}

impl FeatureEngine for TableFeatureEngine {
    fn extract(&self, item: &FeatureWorkItem, run_type: &str) -> Result<()> {
        assert_eq!(run_type, "rto");
        let track = SummaryFile::from_path(&item.track_file)?;
        if Some(track.name.time_index) == self.fail_at {
            anyhow::bail!("feature extraction failed for {}", track);
        }
        let labels: Vec<i64> = track_grid(&item.track_file)
            .labels()
            .into_iter()
            .map(i64::from)
            .collect();
        let n = labels.len();
        let mut df = df!(
            "uh_2to5__prob_max" => vec![0.4f64; n],
            "comp_dz__ens_mean" => vec![45.0f64; n],
            "Run Date" => vec![DATE; n],
            "Initialization Time" => vec![INIT; n],
            "obj_centroid_x" => vec![12i64; n],
            "obj_centroid_y" => vec![30i64; n],
            "label" => labels
        )?;
        write_feather_atomic(&mut df, &item.output)?;
        Ok(())
    }
}

struct GridReader;

impl TrackGridReader for GridReader {
    fn read_tracks(&self, track_file: &Path) -> Result<LabelGrid> {
        Ok(track_grid(track_file))
    }
}

struct HailReports;

impl StormReportSource for HailReports {
    fn grid_reports(&self, request: &ReportRequest) -> Result<GriddedDataset> {
        let mut hail = LabelGrid::empty(&request.shape);
        hail.values[1] = 1;
        Ok(GriddedDataset {
            layers: vec![HazardLayer {
                name: "hail_severe".to_string(),
                grid: hail,
            }],
        })
    }
}

/// Odd labels match; label 1 only from 5 grid points up.
struct ParityMatcher;

impl ObjectMatcher for ParityMatcher {
    fn match_objects(
        &self,
        forecast: &LabelGrid,
        _observed: &LabelGrid,
        params: &MatchParams,
    ) -> Result<BTreeSet<i32>> {
        Ok(forecast
            .labels()
            .into_iter()
            .filter(|l| l % 2 == 1 && (*l != 1 || params.min_dist_max >= 5))
            .collect())
    }
}

#[derive(Default)]
struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, message: &str) -> Result<()> {
        self.messages.lock().unwrap().push(message.to_string());
        Ok(())
    }
}

fn small_config(root: &Path, out: &Path) -> PipelineConfig {
    PipelineConfig {
        base_path: root.to_path_buf(),
        output_dir: out.to_path_buf(),
        n_jobs: 2,
        dates: DateSelection {
            dates: Some(vec![DATE.to_string()]),
            times: Some(vec![INIT.to_string()]),
        },
        timing: ForecastTiming {
            dt_minutes: 5,
            duration_minutes: 10,
            n_time_steps: 4,
        },
        ..PipelineConfig::default()
    }
}

fn collaborators(
    tracker: Arc<TouchTracker>,
    fail_at: Option<u8>,
    notifier: Arc<RecordingNotifier>,
) -> Collaborators {
    Collaborators {
        tracker,
        features: Arc::new(TableFeatureEngine { fail_at }),
        track_reader: Arc::new(GridReader),
        reports: Arc::new(HailReports),
        matcher: Arc::new(ParityMatcher),
        notifier,
    }
}

fn target_builder(config: &PipelineConfig) -> TargetBuilder {
    let gridder = ReportGridder::new(
        Arc::new(HailReports),
        config.reports.clone(),
        config.matching.hazards.clone(),
    );
    TargetBuilder::new(
        Arc::new(GridReader),
        gridder,
        Arc::new(ParityMatcher),
        config.matching.clone(),
    )
}

#[test]
fn pipeline_refuses_a_config_that_skipped_validation() {
    let dir = tempdir().unwrap();
    let mut config = small_config(dir.path(), dir.path());
    config.timing.dt_minutes = 0;
    let tracker = Arc::new(TouchTracker {
        calls: AtomicUsize::new(0),
    });

    let built = MlDataPipeline::new(config, collaborators(tracker, None, Arc::default()));

    assert!(matches!(built, Err(PipelineError::Config(_))));
}

#[tokio::test]
async fn track_stage_picks_up_missing_track_and_then_goes_quiet() -> Result<()> {
    let root = tempdir()?;
    let run = root.path().join(DATE).join(INIT);
    touch(&run, "wofs_30M_05_20220504_2200_2225.nc");

    let discovery = WorkDiscovery::new(root.path(), DateSelection::default());
    let pending = files_to_run(&discovery, FileTag::ThirtyMinute, FileTag::EnsembleTracks)?;
    assert_eq!(pending.len(), 1);
    assert_eq!(
        pending[0].destination.path,
        run.join("wofs_ENSEMBLETRACKS_05_20220504_2200_2225.nc")
    );

    let out = tempdir()?;
    let mut config = small_config(root.path(), out.path());
    config.timing.n_time_steps = 36;
    config.timing.duration_minutes = 30;
    let tracker = Arc::new(TouchTracker {
        calls: AtomicUsize::new(0),
    });
    let pipeline = MlDataPipeline::new(
        config,
        collaborators(tracker.clone(), None, Arc::default()),
    )?;

    let report = pipeline.identify_ensemble_tracks().await?;
    assert_eq!(report.succeeded, 1);
    assert_eq!(tracker.calls.load(Ordering::SeqCst), 1);

    let again = files_to_run(&discovery, FileTag::ThirtyMinute, FileTag::EnsembleTracks)?;
    assert!(again.is_empty());
    Ok(())
}

#[tokio::test]
async fn one_failing_feature_item_does_not_sink_the_batch() -> Result<()> {
    let root = tempdir()?;
    let out = tempdir()?;
    let run = summary_tree(root.path(), 4);
    for index in 0..=4 {
        touch(&run, &file_name("ENSEMBLETRACKS", index, "nc"));
    }

    let tracker = Arc::new(TouchTracker {
        calls: AtomicUsize::new(0),
    });
    let pipeline = MlDataPipeline::new(
        small_config(root.path(), out.path()),
        collaborators(tracker, Some(3), Arc::default()),
    )?;

    let report = pipeline.extract_ml_features().await?;
    assert_eq!(report.stage, Stage::MlFeatures);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed.len(), 1);
    assert!(report.failed[0].item.contains("ENSEMBLETRACKS_03"));

    assert!(run.join(file_name("MLDATA", 2, "feather")).exists());
    assert!(!run.join(file_name("MLDATA", 3, "feather")).exists());
    assert!(run.join(file_name("MLDATA", 4, "feather")).exists());
    Ok(())
}

#[tokio::test]
async fn target_tables_do_not_depend_on_dispatch_order() -> Result<()> {
    let out = tempdir()?;
    let mut tables = Vec::new();

    for n_jobs in [1, 4] {
        let root = tempdir()?;
        let run = root.path().join(DATE).join(INIT);
        for index in 0..=8 {
            touch(&run, &file_name("ENSEMBLETRACKS", index, "nc"));
        }
        let config = small_config(root.path(), out.path());
        let discovery = WorkDiscovery::new(root.path(), config.dates.clone());

        let mut pending = files_to_run(&discovery, FileTag::EnsembleTracks, FileTag::MlTargets)?;
        pending.shuffle(&mut thread_rng());

        let builder = target_builder(&config);
        let report = Dispatcher::new(n_jobs)
            .dispatch(Stage::StormReportMatching, pending, move |item| builder.write(item))
            .await?;
        assert_eq!(report.succeeded, 9);

        let mut by_index = Vec::new();
        for index in 0..=8 {
            by_index.push(read_feather(&run.join(file_name("MLTARGETS", index, "feather")))?);
        }
        tables.push(by_index);
    }

    for (first, second) in tables[0].iter().zip(&tables[1]) {
        assert!(first.equals(second));
    }
    let hail_15km: Vec<Option<i64>> = tables[0][2]
        .column("hail_severe_15km")?
        .i64()?
        .into_iter()
        .collect();
    assert_eq!(hail_15km, vec![Some(1), Some(0), Some(1)]);
    let hail_3km: Vec<Option<i64>> = tables[0][2]
        .column("hail_severe_3km")?
        .i64()?
        .into_iter()
        .collect();
    assert_eq!(hail_3km, vec![Some(0), Some(0), Some(1)]);
    Ok(())
}

#[tokio::test]
async fn full_run_builds_datasets_and_rerun_is_a_no_op() -> Result<()> {
    let root = tempdir()?;
    let out = tempdir()?;
    summary_tree(root.path(), 4);

    let tracker = Arc::new(TouchTracker {
        calls: AtomicUsize::new(0),
    });
    let notifier = Arc::new(RecordingNotifier::default());
    let mut config = small_config(root.path(), out.path());
    config.notifications.on_stage_complete = true;
    let pipeline = MlDataPipeline::new(
        config,
        collaborators(tracker.clone(), None, notifier.clone()),
    )?;

    let report = pipeline.run().await?;
    assert_eq!(report.failed_items(), 0);
    assert_eq!(report.stages[0].succeeded, 5);
    assert_eq!(report.stages[1].succeeded, 3);
    assert_eq!(report.stages[2].succeeded, 5);
    assert_eq!(report.assembly.runs_loaded, 3);
    assert_eq!(notifier.messages.lock().unwrap().len(), 4);

    // Feature windows start at indices 0, 1 and 2: all in the first hour.
    let rows: Vec<usize> = report.assembly.partitions.iter().map(|p| p.rows).collect();
    assert_eq!(rows, vec![3 + 1 + 2, 0]);

    let first_hour = read_feather(&out.path().join("wofs_ml_severe__first_hour__data.feather"))?;
    let targets = first_hour.column("hail_severe_15km")?.i64()?;
    let labels = first_hour.column("label")?.i64()?;
    assert_eq!(targets.len(), labels.len());
    let baseline =
        read_feather(&out.path().join("wofs_ml_severe__first_hour__baseline_data.feather"))?;
    assert!(baseline.column("uh_2to5__prob_max").is_ok());
    assert!(baseline.column("comp_dz__ens_mean").is_err());

    let rerun = pipeline.run().await?;
    assert_eq!(tracker.calls.load(Ordering::SeqCst), 5);
    assert!(rerun.stages.iter().all(|s| s.attempted() == 0));
    assert_eq!(rerun.assembly.partitions[0].rows, 6);
    Ok(())
}
