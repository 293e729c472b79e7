//! File logging through `tracing`.

use crate::error::{Error, Result};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

struct LogState {
    path: String,
    _guard: WorkerGuard,
}

static LOG_STATE: Lazy<Mutex<Option<LogState>>> = Lazy::new(|| Mutex::new(None));

/// Installs a global subscriber writing to `log_file`.
///
/// `level` accepts a level name or any `EnvFilter` directive and defaults to
/// `info`. Only the first successful call installs anything, later calls
/// return the path already in use.
pub fn init_tracing(log_file: impl AsRef<Path>, level: Option<&str>) -> Result<String> {
    let mut state = LOG_STATE.lock();
    if let Some(state) = state.as_ref() {
        return Ok(state.path.clone());
    }

    let log_file = log_file.as_ref();
    let file_name = log_file
        .file_name()
        .ok_or_else(|| Error::InvalidPath(log_file.to_path_buf()))?;
    let directory = log_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    std::fs::create_dir_all(directory).map_err(|e| Error::Logging(e.to_string()))?;

    let filter = EnvFilter::try_new(level.unwrap_or("info"))
        .map_err(|e| Error::Logging(format!("invalid log level: {e}")))?;

    let appender = tracing_appender::rolling::never(directory, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::fmt()
        .with_writer(writer)
        .with_env_filter(filter)
        .with_ansi(false)
        .with_thread_names(true)
        .with_target(false)
        .try_init()
        .map_err(|e| Error::Logging(e.to_string()))?;

    let path = log_file.to_string_lossy().into_owned();
    tracing::info!("Logging initialized at {}", path);

    *state = Some(LogState {
        path: path.clone(),
        _guard: guard,
    });
    Ok(path)
}
