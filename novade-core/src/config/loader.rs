//! Configuration Loading for NovaDE Core.
//!
//! [`ConfigLoader`] locates `config.toml`, deserializes it into a
//! [`CoreConfig`] and validates the result.
//!
//! ## Configuration File Location
//!
//! `ConfigLoader::load()` reads `config.toml` from the application
//! configuration directory as reported by `directories-next`
//! (`~/.config/novade` on Linux). A missing file is not an error: the
//! defaults are used instead.
//!
//! ## Validation
//!
//! - Log level and format are lowercased and checked against the known values.
//! - A relative log file path is resolved against the local data directory.
//! - The INCR chunk size must hold at least one 32-bit element and the
//!   bridge timeouts must be non-zero.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use directories_next::ProjectDirs;
use tracing::debug;

use super::types::CoreConfig;
use crate::error::{ConfigError, CoreError};

const QUALIFIER: &str = "org";
const ORGANIZATION: &str = "NovaDE";
const APPLICATION: &str = "NovaDE";
const CONFIG_FILE_NAME: &str = "config.toml";

const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const VALID_FORMATS: [&str; 2] = ["text", "json"];

/// Namespace for the configuration loading entry points.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads and validates the `CoreConfig` from the user's configuration directory.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::DirectoryUnavailable`] if no home directory can be determined.
    /// - [`ConfigError::ReadError`] if the file exists but cannot be read.
    /// - [`ConfigError::ParseError`] / [`ConfigError::ValidationError`] for bad content.
    pub fn load() -> Result<CoreConfig, CoreError> {
        let dirs = project_dirs()?;
        Self::load_from_path(&dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    /// Loads and validates the `CoreConfig` from an explicit path.
    ///
    /// A missing file yields the validated defaults, mirroring [`ConfigLoader::load`].
    pub fn load_from_path(path: &Path) -> Result<CoreConfig, CoreError> {
        match fs::read_to_string(path) {
            Ok(content) => {
                debug!(path = %path.display(), "Loading configuration");
                Self::load_from_str(&content)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "No configuration file, using defaults");
                let mut config = CoreConfig::default();
                Self::validate_config(&mut config)?;
                Ok(config)
            }
            Err(e) => Err(ConfigError::ReadError { path: path.to_path_buf(), source: e }.into()),
        }
    }

    /// Parses and validates a TOML document. Blank input yields the defaults.
    pub fn load_from_str(content: &str) -> Result<CoreConfig, CoreError> {
        let mut config: CoreConfig = if content.trim().is_empty() {
            CoreConfig::default()
        } else {
            toml::from_str(content).map_err(ConfigError::ParseError)?
        };
        Self::validate_config(&mut config)?;
        Ok(config)
    }

    /// Normalizes and checks a parsed configuration in place.
    pub fn validate_config(config: &mut CoreConfig) -> Result<(), CoreError> {
        let logging = &mut config.logging;
        logging.level = logging.level.to_lowercase();
        if !VALID_LEVELS.contains(&logging.level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log level '{}'. Must be one of: {}",
                logging.level,
                VALID_LEVELS.join(", ")
            ))
            .into());
        }
        logging.format = logging.format.to_lowercase();
        if !VALID_FORMATS.contains(&logging.format.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log format '{}'. Must be one of: {}",
                logging.format,
                VALID_FORMATS.join(", ")
            ))
            .into());
        }
        if let Some(path) = logging.file_path.as_mut() {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::ValidationError("Log file path must not be empty".to_string()).into());
            }
            if path.is_relative() {
                *path = data_local_dir()?.join(&*path);
            }
        }

        let bridge = &config.data_bridge;
        if bridge.incr_chunk_size < 4 {
            return Err(ConfigError::ValidationError(format!(
                "data_bridge.incr_chunk_size must be at least 4 bytes, got {}",
                bridge.incr_chunk_size
            ))
            .into());
        }
        if bridge.transfer_timeout_ms == 0 || bridge.drag_finish_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "data_bridge timeouts must be greater than zero".to_string(),
            )
            .into());
        }
        Ok(())
    }
}

fn project_dirs() -> Result<ProjectDirs, ConfigError> {
    ProjectDirs::from(QUALIFIER, ORGANIZATION, APPLICATION).ok_or_else(|| ConfigError::DirectoryUnavailable {
        dir_type: "Application".to_string(),
    })
}

/// The per-user, non-roaming data directory (`$XDG_DATA_HOME/novade` on Linux).
fn data_local_dir() -> Result<PathBuf, ConfigError> {
    Ok(project_dirs()?.data_local_dir().to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use tempfile::TempDir;

    #[test]
    fn test_load_from_str_empty_gives_defaults() {
        let config = ConfigLoader::load_from_str("   \n").unwrap();
        assert_eq!(config, CoreConfig::default());
    }

    #[test]
    fn test_load_from_str_normalizes_level_and_format() {
        let config = ConfigLoader::load_from_str(
            r#"
            [logging]
            level = "DEBUG"
            format = "Json"
            "#,
        )
        .unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "json");
    }

    #[rstest]
    #[case("[logging]\nlevel = \"loud\"", "Invalid log level")]
    #[case("[logging]\nformat = \"xml\"", "Invalid log format")]
    #[case("[data_bridge]\nincr_chunk_size = 3", "incr_chunk_size")]
    #[case("[data_bridge]\ntransfer_timeout_ms = 0", "timeouts")]
    #[case("[data_bridge]\ndrag_finish_timeout_ms = 0", "timeouts")]
    fn test_validation_rejects(#[case] toml: &str, #[case] needle: &str) {
        match ConfigLoader::load_from_str(toml) {
            Err(CoreError::Config(ConfigError::ValidationError(msg))) => {
                assert!(msg.contains(needle), "unexpected message: {msg}");
            }
            other => panic!("expected a validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_key_is_a_parse_error() {
        let result = ConfigLoader::load_from_str("[data_bridge]\nchunk = 12");
        assert!(matches!(result, Err(CoreError::Config(ConfigError::ParseError(_)))));
    }

    #[test]
    fn test_load_from_path_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = ConfigLoader::load_from_path(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.data_bridge, CoreConfig::default().data_bridge);
    }

    #[test]
    fn test_load_from_path_reads_bridge_section() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(
            &path,
            "[data_bridge]\nincr_chunk_size = 256\ntransfer_timeout_ms = 750\nprimary_selection = false\n",
        )
        .unwrap();
        let config = ConfigLoader::load_from_path(&path).unwrap();
        assert_eq!(config.data_bridge.incr_chunk_size, 256);
        assert_eq!(config.data_bridge.transfer_timeout_ms, 750);
        assert_eq!(config.data_bridge.drag_finish_timeout_ms, 2_000);
        assert!(!config.data_bridge.primary_selection);
    }

    #[test]
    fn test_load_from_path_directory_is_read_error() {
        let dir = TempDir::new().unwrap();
        let result = ConfigLoader::load_from_path(dir.path());
        assert!(matches!(result, Err(CoreError::Config(ConfigError::ReadError { .. }))));
    }

    #[test]
    fn test_absolute_log_path_is_kept() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("bridge.log");
        let toml = format!("[logging]\nfile_path = {:?}\n", log.display().to_string());
        let config = ConfigLoader::load_from_str(&toml).unwrap();
        assert_eq!(config.logging.file_path, Some(log));
    }

    #[test]
    fn test_relative_log_path_lands_in_local_data_dir() {
        let Some(dirs) = ProjectDirs::from(QUALIFIER, ORGANIZATION, APPLICATION) else {
            return;
        };
        let config = ConfigLoader::load_from_str("[logging]\nfile_path = \"logs/bridge.log\"\n").unwrap();
        assert_eq!(config.logging.file_path, Some(dirs.data_local_dir().join("logs/bridge.log")));
    }
}
