//! Path utilities for Trellis data directories

use std::path::PathBuf;
use std::sync::OnceLock;

/// Environment variable overriding the data directory
pub const DATA_DIR_ENV: &str = "TRELLIS_DATA_DIR";

/// Global storage for custom data directory path
static DATA_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Initialize the data directory with an optional custom path.
/// Must be called early in main() before any other path functions are used.
/// If custom_path is None, uses `$TRELLIS_DATA_DIR` or ~/.trellis.
pub fn init_data_dir(custom_path: Option<PathBuf>) {
    let path = custom_path.unwrap_or_else(default_data_dir);
    // Ignore error if already set (shouldn't happen in normal usage)
    if DATA_DIR.set(path.clone()).is_err() {
        let existing = DATA_DIR
            .get()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<unknown>".to_string());
        tracing::debug!(
            path = %path.display(),
            existing = %existing,
            "Data directory already initialized"
        );
    }
}

/// `$TRELLIS_DATA_DIR` if set, else ~/.trellis
fn default_data_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(DATA_DIR_ENV).filter(|v| !v.is_empty()) {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .map(|h| h.join(".trellis"))
        .unwrap_or_else(|| PathBuf::from(".trellis"))
}

/// Get the base Trellis data directory
pub fn data_dir() -> PathBuf {
    DATA_DIR.get().cloned().unwrap_or_else(default_data_dir)
}

/// Get the logs directory (~/.trellis/logs)
pub fn logs_dir() -> PathBuf {
    data_dir().join("logs")
}

/// Get the default log file path (~/.trellis/logs/trellis.log)
pub fn log_file_path() -> PathBuf {
    logs_dir().join("trellis.log")
}
