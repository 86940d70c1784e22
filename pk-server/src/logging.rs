use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Start logging. With a log directory, JSON lines go to a daily rolling file
/// and the returned guard must be held until exit so buffered lines are flushed.
/// Otherwise logs go to stdout.
///
/// The level comes from `RUST_LOG`, defaulting to `info`.
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let Some(directory) = &config.directory else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .try_init()
            .map_err(|e| anyhow::anyhow!("Initializing logging: {e}"))?;
        return Ok(None);
    };

    std::fs::create_dir_all(directory)?;
    let file_appender = tracing_appender::rolling::daily(directory, &config.file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .json()
        .with_writer(non_blocking)
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Initializing logging: {e}"))?;
    Ok(Some(guard))
}
