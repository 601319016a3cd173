//! Default configuration values for NovaDE Core.
//!
//! These functions are referenced by `serde`'s `default` attribute in the
//! configuration structures, so a missing key falls back to the value below.

use super::types::{DataBridgeConfig, LoggingConfig};
use std::path::PathBuf;

/// Returns the default `LoggingConfig`, used when `[logging]` is missing.
pub(super) fn default_logging_config() -> LoggingConfig {
    LoggingConfig {
        level: default_log_level(),
        file_path: default_log_file_path(),
        format: default_log_format(),
    }
}

/// Returns the default log level (`"info"`).
pub(super) fn default_log_level() -> String {
    "info".to_string()
}

/// No log file by default.
pub(super) fn default_log_file_path() -> Option<PathBuf> {
    None
}

/// Returns the default log format (`"text"`).
pub(super) fn default_log_format() -> String {
    "text".to_string()
}

/// Returns the default `DataBridgeConfig`, used when `[data_bridge]` is missing.
pub(super) fn default_data_bridge_config() -> DataBridgeConfig {
    DataBridgeConfig {
        incr_chunk_size: default_incr_chunk_size(),
        transfer_timeout_ms: default_transfer_timeout_ms(),
        drag_finish_timeout_ms: default_drag_finish_timeout_ms(),
        primary_selection: default_primary_selection(),
    }
}

/// Largest property written in one piece; larger payloads go through INCR.
pub(super) fn default_incr_chunk_size() -> usize {
    64 * 1024
}

pub(super) fn default_transfer_timeout_ms() -> u64 {
    5_000
}

pub(super) fn default_drag_finish_timeout_ms() -> u64 {
    2_000
}

pub(super) fn default_primary_selection() -> bool {
    true
}
