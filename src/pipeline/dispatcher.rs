//! Fans one stage's work items out to a bounded pool of workers.
//!
//! Every item either succeeds (its output exists afterwards) or fails with a
//! recorded reason; failures never escape the batch. A failed item's output is
//! removed so the next completion check schedules it again.

use rayon::prelude::*;
use serde::Serialize;
use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::error::{PipelineError, Result};
use crate::metrics::StageMetrics;

/// One independent unit of stage work with a single output file.
pub trait WorkUnit: Send + Sync + 'static {
    /// Human-readable identity for logs and batch reports.
    fn label(&self) -> String;

    /// The file this item writes; no two items in a batch may share it.
    fn output_path(&self) -> &Path;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Stage {
    EnsembleTracks,
    MlFeatures,
    StormReportMatching,
    Assembly,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::EnsembleTracks,
        Stage::MlFeatures,
        Stage::StormReportMatching,
        Stage::Assembly,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Stage::EnsembleTracks => "ensemble_tracks",
            Stage::MlFeatures => "ml_features",
            Stage::StormReportMatching => "storm_report_matching",
            Stage::Assembly => "assembly",
        }
    }

    /// Heavy compute stages use the thread pool; matching mixes report
    /// retrieval with compute and runs as gated blocking tasks.
    pub fn dispatch_mode(self) -> DispatchMode {
        match self {
            Stage::StormReportMatching => DispatchMode::TaskParallel,
            _ => DispatchMode::ProcessPool,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// A dedicated rayon pool of `n_jobs` threads.
    ProcessPool,
    /// Blocking tokio tasks, at most `n_jobs` in flight.
    TaskParallel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Succeeded,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    pub item: String,
    pub reason: String,
}

/// What happened to every item of one stage.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub stage: Stage,
    pub succeeded: usize,
    pub failed: Vec<ItemFailure>,
    pub elapsed: Duration,
}

impl BatchReport {
    pub fn empty(stage: Stage) -> Self {
        Self {
            stage,
            succeeded: 0,
            failed: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    pub fn attempted(&self) -> usize {
        self.succeeded + self.failed.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Dispatcher {
    n_jobs: usize,
}

impl Dispatcher {
    pub fn new(n_jobs: usize) -> Self {
        Self {
            n_jobs: n_jobs.max(1),
        }
    }

    /// Run `job` on every item and wait for all of them.
    ///
    /// Only failing to build the worker pool is an error; item failures and
    /// panics are collected into the report.
    pub async fn dispatch<I, F>(&self, stage: Stage, items: Vec<I>, job: F) -> Result<BatchReport>
    where
        I: WorkUnit,
        F: Fn(&I) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let start = Instant::now();
        let (items, mut failed) = reject_colliding_outputs(items);
        info!(
            stage = %stage,
            items = items.len(),
            workers = self.n_jobs,
            "Dispatching work items"
        );

        let job = Arc::new(job);
        let outcomes = if items.is_empty() {
            Vec::new()
        } else {
            match stage.dispatch_mode() {
                DispatchMode::ProcessPool => self.run_pool(items, job).await?,
                DispatchMode::TaskParallel => self.run_tasks(items, job).await?,
            }
        };

        let mut succeeded = 0;
        for (item, outcome) in outcomes {
            match outcome {
                ItemOutcome::Succeeded => succeeded += 1,
                ItemOutcome::Failed(reason) => failed.push(ItemFailure { item, reason }),
            }
        }
        failed.sort_by(|a, b| a.item.cmp(&b.item));

        let report = BatchReport {
            stage,
            succeeded,
            failed,
            elapsed: start.elapsed(),
        };
        StageMetrics::record_batch(&report);
        info!(
            stage = %stage,
            succeeded = report.succeeded,
            failed = report.failed.len(),
            elapsed_secs = report.elapsed.as_secs_f64(),
            "Stage batch finished"
        );
        Ok(report)
    }

    async fn run_pool<I, F>(&self, items: Vec<I>, job: Arc<F>) -> Result<Vec<(String, ItemOutcome)>>
    where
        I: WorkUnit,
        F: Fn(&I) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let n_jobs = self.n_jobs;
        tokio::task::spawn_blocking(move || -> Result<Vec<(String, ItemOutcome)>> {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(n_jobs)
                .thread_name(|i| format!("wofs-worker-{i}"))
                .build()
                .map_err(|e| PipelineError::WorkerPool(e.to_string()))?;
            Ok(pool.install(|| {
                items
                    .par_iter()
                    .map(|item| (item.label(), execute(item, job.as_ref())))
                    .collect()
            }))
        })
        .await
        .map_err(|e| PipelineError::WorkerPool(e.to_string()))?
    }

    async fn run_tasks<I, F>(&self, items: Vec<I>, job: Arc<F>) -> Result<Vec<(String, ItemOutcome)>>
    where
        I: WorkUnit,
        F: Fn(&I) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.n_jobs));
        let mut handles: JoinSet<(String, ItemOutcome)> = JoinSet::new();

        for item in items {
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|e| PipelineError::WorkerPool(e.to_string()))?;
            let job = Arc::clone(&job);
            handles.spawn_blocking(move || {
                let _permit = permit;
                (item.label(), execute(&item, job.as_ref()))
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = handles.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => return Err(PipelineError::WorkerPool(e.to_string())),
            }
        }
        Ok(outcomes)
    }
}

/// Keep the first item for each output path; later claimants fail.
fn reject_colliding_outputs<I: WorkUnit>(items: Vec<I>) -> (Vec<I>, Vec<ItemFailure>) {
    let mut claimed: HashSet<PathBuf> = HashSet::new();
    let mut accepted = Vec::with_capacity(items.len());
    let mut rejected = Vec::new();

    for item in items {
        if claimed.insert(item.output_path().to_path_buf()) {
            accepted.push(item);
        } else {
            let reason = format!(
                "output {} is already claimed by another item",
                item.output_path().display()
            );
            warn!(item = %item.label(), "{}", reason);
            rejected.push(ItemFailure {
                item: item.label(),
                reason,
            });
        }
    }
    (accepted, rejected)
}

fn execute<I, F>(item: &I, job: &F) -> ItemOutcome
where
    I: WorkUnit,
    F: Fn(&I) -> anyhow::Result<()>,
{
    capture_panic_traces();
    let output = item.output_path();
    let reason = match panic::catch_unwind(AssertUnwindSafe(|| job(item))) {
        Ok(Ok(())) if output.exists() => return ItemOutcome::Succeeded,
        Ok(Ok(())) => {
            let reason = format!("completed without producing {}", output.display());
            error!(item = %item.label(), "{}", reason);
            reason
        }
        Ok(Err(e)) => {
            error!(item = %item.label(), error = ?e, "Work item failed");
            format!("{e:#}")
        }
        Err(payload) => {
            let reason = format!("panicked: {}", panic_message(payload.as_ref()));
            let trace = take_panic_trace().map(|t| t.to_string()).unwrap_or_default();
            error!(item = %item.label(), backtrace = %trace, "Work item {}", reason);
            reason
        }
    };

    if output.exists() {
        if let Err(e) = fs::remove_file(output) {
            warn!(path = %output.display(), error = %e, "Could not remove partial output");
        }
    }
    ItemOutcome::Failed(reason)
}

thread_local! {
    static PANIC_TRACE: RefCell<Option<Backtrace>> = const { RefCell::new(None) };
}

static TRACE_HOOK: Once = Once::new();

/// Chain a panic hook that keeps the panicking thread's backtrace for `execute`.
fn capture_panic_traces() {
    TRACE_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            PANIC_TRACE.with(|slot| *slot.borrow_mut() = Some(Backtrace::force_capture()));
            previous(info);
        }));
    });
}

fn take_panic_trace() -> Option<Backtrace> {
    PANIC_TRACE.with(|slot| slot.borrow_mut().take())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
