//! Tracing setup: console output, plus `latest.log` when a log directory is configured.

use std::fs::File;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const LOG_FILE_NAME: &str = "latest.log";

/// Installs the global subscriber. `RUST_LOG` wins over `log_level`. Keep the
/// returned guard alive until exit so buffered file lines are flushed.
pub fn init_logging(log_level: &str, log_dir: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(log_level))?;

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let (writer, guard) = tracing_appender::non_blocking(open_log_file(dir)?);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();

    if let Some(dir) = log_dir {
        tracing::info!(path = %dir.join(LOG_FILE_NAME).display(), "logging to file");
    }
    Ok(guard)
}

/// Creates `dir` if needed and truncates the log file of the previous run.
pub fn open_log_file(dir: &Path) -> std::io::Result<File> {
    std::fs::create_dir_all(dir)?;
    File::create(dir.join(LOG_FILE_NAME))
}
