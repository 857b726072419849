//! ndn-bridge configuration
//!
//! Provides configuration for the native engine bridge:
//! - Session defaults (run timeout, get timeout, interest filter flags)
//! - Crypto settings (PRNG seed file)
//! - Logging filter
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded and merged in the following order (later overrides earlier):
//! 1. Global config (~/.ndn-bridge/config.toml)
//! 2. Project config (./ndn-bridge.toml, searched upwards)
//! 3. Environment variables (NDN_BRIDGE_*)
//!
//! # Example
//!
//! ```no_run
//! use ndn_bridge_config::ConfigLoader;
//! use std::path::Path;
//!
//! let mut loader = ConfigLoader::new();
//! let config = loader.load_from_directory(Path::new(".")).unwrap();
//! println!("run timeout: {}", config.bridge.run_timeout_ms());
//! ```

pub mod bridge;
pub mod loader;

use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid TOML syntax in {file}: {error}")]
    TomlParseError {
        file: PathBuf,
        error: toml::de::Error,
    },

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Home directory not found")]
    HomeNotFound,
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

pub use bridge::{BridgeConfig, CryptoConfig, LoggingConfig, SessionConfig};
pub use bridge::{
    DEFAULT_GET_TIMEOUT_MS, DEFAULT_INTEREST_FILTER_FLAGS, DEFAULT_INTEREST_LIFETIME_MS,
    DEFAULT_LOG_FILTER, DEFAULT_RUN_TIMEOUT_MS,
};
pub use loader::{Config, ConfigLoader};
