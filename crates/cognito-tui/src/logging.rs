//! File logging for the terminal client
//!
//! The terminal UI owns the screen, so logs go to
//! `<data_local_dir>/cognito/logs/cognito.log` instead of stderr.

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_FILTER: &str = "info,cognito=debug,cognito_core=debug";

pub fn log_file_path() -> Option<PathBuf> {
    dirs::data_local_dir().map(|dir| dir.join("cognito").join("logs").join("cognito.log"))
}

/// Install the global subscriber. Keep the returned guard alive for the
/// lifetime of the program or buffered lines are lost on exit.
pub fn init_logging() -> Option<WorkerGuard> {
    let path = log_file_path()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok()?;
    }

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .ok()?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let subscriber = tracing_subscriber::registry().with(filter).with(
        fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .with_file(true)
            .with_line_number(true),
    );

    tracing::subscriber::set_global_default(subscriber).ok()?;
    tracing::info!("Logging initialized, writing to {:?}", path);
    Some(guard)
}
