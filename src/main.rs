use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use wofs_ml_pipeline::app::ports::Notifier;
use wofs_ml_pipeline::config::CommandSpec;
use wofs_ml_pipeline::infra::command::{
    CommandFeatureEngine, CommandMatcher, CommandReportSource, CommandRunner, CommandTrackReader,
    CommandTracker,
};
use wofs_ml_pipeline::infra::notifier::{LogNotifier, WebhookNotifier};
use wofs_ml_pipeline::{logging, metrics, Collaborators, MlDataPipeline, PipelineConfig};

#[derive(Parser)]
#[command(name = "wofs_ml_pipeline")]
#[command(about = "Build the WoFS-ML-Severe training datasets from summary files")]
#[command(version)]
struct Cli {
    /// Pipeline configuration (TOML)
    #[arg(long, short, default_value = "pipeline.toml")]
    config: PathBuf,

    /// Process only these run dates (comma-separated YYYYMMDD); disables notifications
    #[arg(long, value_delimiter = ',')]
    dates: Option<Vec<String>>,

    /// Number of parallel workers
    #[arg(long)]
    n_jobs: Option<usize>,
}

fn required(spec: &Option<CommandSpec>, name: &str) -> anyhow::Result<CommandRunner> {
    spec.clone()
        .map(CommandRunner::new)
        .with_context(|| format!("collaborators.{name} is not configured"))
}

fn collaborators(config: &PipelineConfig) -> anyhow::Result<Collaborators> {
    let commands = &config.collaborators;
    let notifier: Arc<dyn Notifier> = match &config.notifications.webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone())?),
        None => Arc::new(LogNotifier),
    };

    Ok(Collaborators {
        tracker: Arc::new(CommandTracker(required(&commands.tracker, "tracker")?)),
        features: Arc::new(CommandFeatureEngine(required(
            &commands.feature_engine,
            "feature_engine",
        )?)),
        track_reader: Arc::new(CommandTrackReader(required(
            &commands.track_reader,
            "track_reader",
        )?)),
        reports: Arc::new(CommandReportSource(required(
            &commands.storm_reports,
            "storm_reports",
        )?)),
        matcher: Arc::new(CommandMatcher(required(&commands.matcher, "matcher")?)),
        notifier,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let mut config = PipelineConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(dates) = cli.dates {
        config = config.ad_hoc(dates);
    }
    if let Some(n_jobs) = cli.n_jobs {
        config.n_jobs = n_jobs;
    }
    config.validate()?;

    logging::init_logging(&config.log_dir);
    metrics::init_metrics(config.metrics_addr);

    let collaborators = collaborators(&config)?;
    let pipeline = MlDataPipeline::new(config, collaborators)?;

    match pipeline.run().await {
        Ok(report) => {
            for stage in &report.stages {
                info!(
                    stage = %stage.stage,
                    succeeded = stage.succeeded,
                    failed = stage.failed.len(),
                    "Stage summary"
                );
                for failure in &stage.failed {
                    warn!(stage = %stage.stage, item = %failure.item, "{}", failure.reason);
                }
            }
            for partition in &report.assembly.partitions {
                info!(partition = partition.name, rows = partition.rows, "Dataset written");
            }
            if let Some(snapshot) = metrics::render() {
                debug!(metrics = %snapshot, "Run metrics");
            }
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Data pipeline failed");
            Err(e.into())
        }
    }
}
