//! File-based logging
//!
//! The binary uses stdout for its own prompt and status lines, so diagnostics
//! go to a daily rotating file instead.

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_PREFIX: &str = "melodeck";
const DEFAULT_FILTER: &str = "melodeck=debug,melodeck_lib=debug,symphonia=warn,warn";

/// Initialize logging into `log_dir/melodeck.YYYY-MM-DD`.
///
/// The level comes from `RUST_LOG` when set. Keep the returned guard alive
/// for as long as the program runs; dropping it flushes and stops the writer.
pub fn init_logging(log_dir: &Path) -> anyhow::Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let fmt_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_names(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install log subscriber: {}", e))?;

    tracing::info!(dir = ?log_dir, "Logging initialized");
    Ok(guard)
}
