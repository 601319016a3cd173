//! # NovaDE Core Library (`novade-core`)
//!
//! `novade-core` is the foundational library shared by NovaDE components. It
//! provides the pieces every service needs before it can do real work:
//!
//! - **Error Handling**: [`CoreError`] and its subsystem errors
//!   [`ConfigError`] and [`LoggingError`].
//! - **Configuration Management**: TOML-based [`CoreConfig`] loading with
//!   defaults and validation through [`ConfigLoader`], including the
//!   [`DataBridgeConfig`] consumed by the Xwayland data bridge.
//! - **Logging**: a `tracing` subscriber with console and rolling-file output.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use novade_core::config::ConfigLoader;
//! use novade_core::logging::init_logging;
//! use novade_core::error::CoreError;
//!
//! fn main() -> Result<(), CoreError> {
//!     let core_config = ConfigLoader::load()?;
//!     init_logging(&core_config.logging, false)?;
//!     tracing::info!("NovaDE Core initialized successfully.");
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;

pub use config::{ConfigLoader, CoreConfig, DataBridgeConfig, LoggingConfig};
pub use error::{ConfigError, CoreError, LoggingError};
pub use logging::{init_logging, init_minimal_logging};
