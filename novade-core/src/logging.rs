//! Flexible Logging System for NovaDE Core.
//!
//! Built on the `tracing` ecosystem: a console layer (text or JSON) plus an
//! optional daily-rolling file layer from `tracing-appender`. The bridge and
//! its tests log through the plain `tracing` macros; this module only decides
//! where those records end up.

use crate::config::LoggingConfig;
use crate::error::{CoreError, LoggingError};

use std::fs;
use std::io::stdout;
use std::path::Path;
use std::sync::Mutex;

use once_cell::sync::Lazy;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Keeps the non-blocking file writer alive so buffered records get flushed.
static LOG_WORKER_GUARD: Lazy<Mutex<Option<WorkerGuard>>> = Lazy::new(|| Mutex::new(None));

/// Initializes a minimal logging setup, directing messages to `stderr`.
///
/// Intended for tests and for early startup before the configuration is
/// loaded. Honors `RUST_LOG` and defaults to `info`. Calling it when a global
/// subscriber already exists is a no-op.
pub fn init_minimal_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string()));

    let _ = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .try_init();
}

fn level_directive(level: &str) -> Result<String, LoggingError> {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        other => return Err(LoggingError::FilterError(format!("Invalid log level in config: {other}"))),
    };
    Ok(level.to_string())
}

/// Creates the file layer and the guard that must outlive it.
fn create_file_layer(log_path: &Path, format: &str) -> Result<(BoxedLayer, WorkerGuard), CoreError> {
    let directory = match log_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(directory).map_err(|source| CoreError::Filesystem {
        message: "Failed to create log directory".to_string(),
        path: directory.to_path_buf(),
        source,
    })?;
    let file_name = log_path
        .file_name()
        .ok_or_else(|| CoreError::InvalidInput(format!("Log path {log_path:?} has no file name")))?;

    let appender = tracing_appender::rolling::daily(directory, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let layer = match format {
        "json" => fmt::layer().json().with_writer(writer).with_ansi(false).boxed(),
        _ => fmt::layer().with_writer(writer).with_ansi(false).boxed(),
    };
    Ok((layer, guard))
}

/// Initializes the global logging system from a [`LoggingConfig`].
///
/// With `is_reload` set, a subscriber that is already installed is not an
/// error; the file guard is still swapped so that a changed `file_path`
/// takes effect for the new writer.
///
/// # Errors
///
/// Returns [`LoggingError::FilterError`] for an unknown level and
/// [`LoggingError::InitializationFailure`] if a subscriber is already
/// installed on a first-time setup.
pub fn init_logging(config: &LoggingConfig, is_reload: bool) -> Result<(), CoreError> {
    let directive = level_directive(&config.level)?;
    let format = config.format.to_lowercase();

    let stdout_layer = match format.as_str() {
        "json" => fmt::layer()
            .json()
            .with_writer(stdout)
            .with_ansi(false)
            .with_filter(EnvFilter::new(&directive))
            .boxed(),
        _ => fmt::layer()
            .with_writer(stdout)
            .with_ansi(atty::is(atty::Stream::Stdout))
            .with_filter(EnvFilter::new(&directive))
            .boxed(),
    };

    let mut layers: Vec<BoxedLayer> = vec![stdout_layer];
    let mut new_guard = None;
    if let Some(log_path) = &config.file_path {
        let (file_layer, guard) = create_file_layer(log_path, &format)?;
        layers.push(file_layer.with_filter(EnvFilter::new(&directive)).boxed());
        new_guard = Some(guard);
    }

    let result = Registry::default().with(layers).try_init();

    match LOG_WORKER_GUARD.lock() {
        Ok(mut slot) => *slot = new_guard,
        Err(e) => eprintln!("[ERROR] Failed to lock LOG_WORKER_GUARD: {e}. Log flushing may be affected."),
    }

    match result {
        Ok(()) => Ok(()),
        Err(e) if is_reload => {
            eprintln!("[INFO] Logging reload requested but a subscriber is already installed: {e}");
            Ok(())
        }
        Err(e) => Err(LoggingError::InitializationFailure(format!(
            "Failed to set global tracing subscriber. Was it already initialized? Error: {e}"
        ))
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_minimal_logging_is_idempotent() {
        init_minimal_logging();
        init_minimal_logging();
        tracing::info!("minimal logging initialized twice");
    }

    #[test]
    fn test_level_directive_accepts_mixed_case() {
        assert_eq!(level_directive("WARN").unwrap(), Level::WARN.to_string());
        assert!(matches!(level_directive("supertrace"), Err(LoggingError::FilterError(_))));
    }

    #[test]
    fn test_create_file_layer_creates_parent_directory() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("nested/dir/bridge.log");
        let (_layer, _guard) = create_file_layer(&nested, "json").unwrap();
        assert!(nested.parent().unwrap().is_dir());
    }

    #[test]
    fn test_create_file_layer_rejects_path_without_file_name() {
        let result = create_file_layer(Path::new("/"), "text");
        assert!(matches!(result, Err(CoreError::InvalidInput(_))));
    }

    #[test]
    fn test_init_logging_invalid_level_returns_error() {
        let config = LoggingConfig {
            level: "supertrace".to_string(),
            file_path: None,
            format: "text".to_string(),
        };
        match init_logging(&config, false) {
            Err(CoreError::Logging(LoggingError::FilterError(msg))) => {
                assert!(msg.contains("supertrace"));
            }
            other => panic!("Unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_init_logging_reload_never_fails_on_existing_subscriber() {
        init_minimal_logging();
        let config = LoggingConfig::default();
        assert!(init_logging(&config, true).is_ok());
    }
}
