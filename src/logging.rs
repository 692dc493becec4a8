use crate::config;
use anyhow::{Context, Result};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging to both console and file.
/// Log files go to `config::LOG_DIR` with daily rotation; the filter comes
/// from `RUST_LOG` and defaults to `info`.
pub fn init_logging() -> Result<()> {
    std::fs::create_dir_all(config::LOG_DIR)
        .with_context(|| format!("Failed to create log directory {}", config::LOG_DIR))?;

    let file_appender =
        RollingFileAppender::new(Rotation::DAILY, config::LOG_DIR, config::LOG_FILE_PREFIX);

    tracing_subscriber::registry()
        .with(
            // Console
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true)
                .with_ansi(true),
        )
        .with(
            // File, JSON lines
            tracing_subscriber::fmt::layer()
                .with_writer(file_appender)
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true)
                .with_ansi(false)
                .json(),
        )
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(())
}
