//! Configuration Data Structures for NovaDE Core.
//!
//! The structs here are deserialized from `config.toml`. Every field has a
//! default from [`super::defaults`], and unknown keys are rejected through
//! `#[serde(deny_unknown_fields)]` so typos surface as parse errors instead
//! of silently falling back to defaults.
//!
//! # Key Structs
//! - [`CoreConfig`]: The root configuration structure.
//! - [`LoggingConfig`]: Settings for the tracing subscriber.
//! - [`DataBridgeConfig`]: Limits and timeouts of the X11/Wayland data bridge.

use super::defaults;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration settings for the logging subsystem.
///
/// # Examples
///
/// ```
/// use novade_core::config::LoggingConfig;
/// use std::path::PathBuf;
///
/// let log_config: LoggingConfig = toml::from_str(r#"
/// level = "debug"
/// file_path = "/var/log/novade/bridge.log"
/// format = "json"
/// "#).unwrap();
/// assert_eq!(log_config.level, "debug");
/// assert_eq!(log_config.file_path, Some(PathBuf::from("/var/log/novade/bridge.log")));
/// assert_eq!(log_config.format, "json");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Minimum level to record: "trace", "debug", "info", "warn" or "error".
    #[serde(default = "defaults::default_log_level")]
    pub level: String,
    /// Optional log file. Relative paths are resolved against the local data directory.
    #[serde(default = "defaults::default_log_file_path")]
    pub file_path: Option<PathBuf>,
    /// Output format, "text" or "json".
    #[serde(default = "defaults::default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        defaults::default_logging_config()
    }
}

/// Tunables of the clipboard and drag-and-drop bridge between X11 and Wayland.
///
/// ```
/// use novade_core::config::DataBridgeConfig;
/// use std::time::Duration;
///
/// let config = DataBridgeConfig::default();
/// assert_eq!(config.incr_chunk_size, 65536);
/// assert_eq!(config.drag_finish_timeout(), Duration::from_millis(2000));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataBridgeConfig {
    /// Payloads up to this many bytes are written as a single property;
    /// larger ones are split into INCR chunks of at most this size.
    #[serde(default = "defaults::default_incr_chunk_size")]
    pub incr_chunk_size: usize,
    /// How long a selection conversion or a stalled INCR transfer may take.
    #[serde(default = "defaults::default_transfer_timeout_ms")]
    pub transfer_timeout_ms: u64,
    /// How long a dropped drag waits for the target to finish.
    #[serde(default = "defaults::default_drag_finish_timeout_ms")]
    pub drag_finish_timeout_ms: u64,
    /// Whether the PRIMARY selection is bridged in addition to CLIPBOARD.
    #[serde(default = "defaults::default_primary_selection")]
    pub primary_selection: bool,
}

impl DataBridgeConfig {
    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_millis(self.transfer_timeout_ms)
    }

    pub fn drag_finish_timeout(&self) -> Duration {
        Duration::from_millis(self.drag_finish_timeout_ms)
    }
}

impl Default for DataBridgeConfig {
    fn default() -> Self {
        defaults::default_data_bridge_config()
    }
}

/// Root configuration structure for the NovaDE core system.
///
/// # Examples
///
/// ```
/// use novade_core::config::CoreConfig;
///
/// let loaded: CoreConfig = toml::from_str(r#"
/// [logging]
/// level = "warn"
///
/// [data_bridge]
/// transfer_timeout_ms = 1500
/// "#).unwrap();
/// assert_eq!(loaded.logging.level, "warn");
/// assert_eq!(loaded.data_bridge.transfer_timeout_ms, 1500);
/// assert!(loaded.data_bridge.primary_selection);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoreConfig {
    #[serde(default = "defaults::default_logging_config")]
    pub logging: LoggingConfig,
    #[serde(default = "defaults::default_data_bridge_config")]
    pub data_bridge: DataBridgeConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            logging: defaults::default_logging_config(),
            data_bridge: defaults::default_data_bridge_config(),
        }
    }
}
