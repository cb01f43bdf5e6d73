//! Logging initialization: console output plus an optional rolling file.

use std::path::PathBuf;

use anyhow::Result;
use once_cell::sync::OnceCell;
use tracing::info;
use tracing_appender::{non_blocking, non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{
    fmt, fmt::time::ChronoUtc, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry,
};

pub use crate::infrastructure::config::LoggingConfig;

// Keeps the non-blocking file writer alive for the process lifetime.
static LOG_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

fn log_directory() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(std::path::Path::to_path_buf))
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_default())
        .join("logs")
}

/// Initialize the global subscriber. The `RUST_LOG` environment variable
/// overrides the configured level. Calling twice is tolerated so tests and
/// embedding applications do not fight over the global.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    let timer = ChronoUtc::new("%Y-%m-%d %H:%M:%S%.3f".to_owned());
    let console = fmt::layer().with_target(true).with_timer(timer.clone());

    let file_layer = if config.file_output {
        let dir = log_directory();
        std::fs::create_dir_all(&dir)?;
        let appender = rolling::daily(&dir, "result-harvester.log");
        let (writer, guard) = non_blocking(appender);
        let _ = LOG_GUARD.set(guard);
        Some(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_timer(timer),
        )
    } else {
        None
    };

    let result = Registry::default()
        .with(filter)
        .with(console)
        .with(file_layer)
        .try_init();

    if result.is_ok() {
        info!(level = %config.level, file_output = config.file_output, "logging initialized");
    }
    Ok(())
}
