//! Error handling for the NovaDE core layer.
//!
//! Every fallible operation in this crate returns one of the `thiserror`
//! enums defined here. [`CoreError`] is the umbrella type handed to callers;
//! [`ConfigError`] and [`LoggingError`] carry the details of the two
//! subsystems that can fail during startup.
//!
//! # Examples
//!
//! ```rust
//! use novade_core::error::{ConfigError, CoreError};
//!
//! fn check_chunk_size(size: usize) -> Result<(), CoreError> {
//!     if size < 4 {
//!         return Err(ConfigError::ValidationError(format!("chunk size {size} is too small")).into());
//!     }
//!     Ok(())
//! }
//!
//! assert!(check_chunk_size(2).is_err());
//! ```

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Core error type for the NovaDE desktop environment.
///
/// Wraps the subsystem errors so that binaries can bubble everything up with
/// `?` and report a single error at the top.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Configuration could not be loaded, parsed or validated.
    #[error("Configuration Error: {0}")]
    Config(#[from] ConfigError),

    /// The tracing subscriber could not be installed.
    #[error("Logging Error: {0}")]
    Logging(#[from] LoggingError),

    /// A filesystem operation failed on a known path.
    #[error("Filesystem Error: {message} (Path: {path:?})")]
    Filesystem {
        message: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// General I/O errors not covered by a more specific variant.
    #[error("I/O Error: {0}")]
    Io(#[from] io::Error),

    /// A caller handed in a value the operation cannot work with.
    #[error("Invalid Input: {0}")]
    InvalidInput(String),

    /// Catch-all for unexpected internal errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

/// Error type for configuration-related operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file exists but could not be read.
    #[error("Failed to read configuration file from {path:?}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The configuration file is not valid TOML or does not match the schema.
    #[error("Failed to parse configuration file: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Parsing succeeded but a value is out of range.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    /// A base directory (XDG config/state home) could not be determined.
    #[error("Could not determine base directory for {dir_type}")]
    DirectoryUnavailable { dir_type: String },
}

/// Error type for logging setup.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// The global subscriber could not be installed.
    #[error("Failed to initialize logging: {0}")]
    InitializationFailure(String),

    /// The configured level is not a known filter directive.
    #[error("Failed to set log filter: {0}")]
    FilterError(String),

    /// The log file or its directory could not be created.
    #[error("Logging I/O error: {0}")]
    IoError(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;
    use std::io::ErrorKind;

    #[test]
    fn test_core_error_wraps_config_error() {
        let core_err: CoreError = ConfigError::ValidationError("chunk size".to_string()).into();
        assert!(matches!(core_err, CoreError::Config(ConfigError::ValidationError(_))));
        assert_eq!(
            core_err.to_string(),
            "Configuration Error: Configuration validation failed: chunk size"
        );
    }

    #[test]
    fn test_core_error_wraps_logging_error() {
        let core_err: CoreError = LoggingError::FilterError("loud".to_string()).into();
        assert_eq!(core_err.to_string(), "Logging Error: Failed to set log filter: loud");
    }

    #[test]
    fn test_filesystem_error_keeps_source() {
        let err = CoreError::Filesystem {
            message: "cannot create log directory".to_string(),
            path: PathBuf::from("/nonexistent"),
            source: io::Error::new(ErrorKind::PermissionDenied, "denied"),
        };
        let source = err.source().expect("filesystem error must expose its source");
        assert_eq!(source.to_string(), "denied");
    }

    #[test]
    fn test_config_parse_error_from_toml() {
        let toml_err = toml::from_str::<toml::Value>("this is = = not toml").unwrap_err();
        let err: ConfigError = toml_err.into();
        assert!(err.to_string().starts_with("Failed to parse configuration file"));
    }

    #[test]
    fn test_directory_unavailable_message() {
        let err = ConfigError::DirectoryUnavailable { dir_type: "Config Base".to_string() };
        assert_eq!(err.to_string(), "Could not determine base directory for Config Base");
    }
}
