use std::fs;
use std::path::Path;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::constants::LOG_FILE_NAME;

const DEFAULT_DIRECTIVE: &str = "wofs_ml_pipeline=info";

/// Console output plus a daily-rolling JSON log under `log_dir`.
///
/// `RUST_LOG` directives are honored on top of the crate's `info` default.
pub fn init_logging(log_dir: &Path) {
    if let Err(e) = fs::create_dir_all(log_dir) {
        eprintln!("Could not create log directory {}: {}", log_dir.display(), e);
    }

    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_NAME);
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer().json().with_writer(non_blocking_writer);
    let console_layer = fmt::layer().with_target(false).with_writer(std::io::stdout);

    let filter = match DEFAULT_DIRECTIVE.parse::<Directive>() {
        Ok(directive) => EnvFilter::from_default_env().add_directive(directive),
        Err(_) => EnvFilter::from_default_env(),
    };

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init();
    if installed.is_err() {
        return;
    }

    // Dropping the guard would stop the background writer before exit.
    std::mem::forget(guard);
}
