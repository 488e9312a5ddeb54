//! Tracing setup for the agent and validator.
//!
//! Events go to stderr in compact form and, when a log file is configured, to
//! a size-rotated file (1 MB per file, three rotated files kept). `RUST_LOG`
//! overrides the configured level.
//!
//! ```bash
//! RUST_LOG=verssa=debug verssa run
//! ```

use std::path::Path;

use anyhow::{Context, Result, anyhow};
use file_rotate::compression::Compression;
use file_rotate::suffix::AppendCount;
use file_rotate::{ContentLimit, FileRotate};
use tracing_appender::non_blocking;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const MAX_LOG_BYTES: usize = 1_000_000;
const ROTATED_FILES: usize = 3;

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop and must be held until
/// the process is done logging.
pub fn init(level: &str, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .with_context(|| format!("invalid log level {level:?}"))?;

    let (file_layer, guard) = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create log directory {}", parent.display()))?;
            }
            let appender = FileRotate::new(
                path,
                AppendCount::new(ROTATED_FILES),
                ContentLimit::Bytes(MAX_LOG_BYTES),
                Compression::None,
                #[cfg(unix)]
                None,
            );
            let (writer, guard) = non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .with(file_layer)
        .try_init()
        .map_err(|err| anyhow!("install tracing subscriber: {err}"))?;
    Ok(guard)
}
