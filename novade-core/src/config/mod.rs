//! Configuration Management for NovaDE Core.
//!
//! ## Key Components:
//!
//! - [`types`]: the schema ([`CoreConfig`], [`LoggingConfig`], [`DataBridgeConfig`]).
//! - [`defaults`]: default value functions referenced from the schema.
//! - [`loader`]: [`ConfigLoader`], which finds, parses and validates `config.toml`.
//!
//! # Examples
//!
//! ```rust,ignore
//! use novade_core::config::ConfigLoader;
//!
//! match ConfigLoader::load() {
//!     Ok(config) => println!("INCR chunk size: {}", config.data_bridge.incr_chunk_size),
//!     Err(e) => {
//!         novade_core::logging::init_minimal_logging();
//!         tracing::error!("Configuration error: {}", e);
//!     }
//! }
//! ```

mod defaults;
pub mod loader;
pub mod types;

pub use loader::ConfigLoader;
pub use types::{CoreConfig, DataBridgeConfig, LoggingConfig};
