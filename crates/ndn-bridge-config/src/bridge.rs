//! Bridge Configuration (ndn-bridge.toml, ~/.ndn-bridge/config.toml)
//!
//! Both the project file and the global file share the same schema; the loader
//! merges them section by section.

use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default timeout for `run` when none is given; -1 runs until the engine is idle.
pub const DEFAULT_RUN_TIMEOUT_MS: i32 = -1;

/// Default timeout for blocking `get`.
pub const DEFAULT_GET_TIMEOUT_MS: i32 = 3000;

/// ACTIVE | CHILD_INHERIT
pub const DEFAULT_INTEREST_FILTER_FLAGS: i32 = 3;

/// Lifetime of an expressed interest before it times out.
pub const DEFAULT_INTEREST_LIFETIME_MS: u64 = 4000;

/// Default tracing filter directive.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    /// Session defaults
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionConfig>,

    /// Key material and PRNG settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crypto: Option<CryptoConfig>,

    /// Logging settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

/// Session defaults
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// Timeout used by `run` when the caller passes none (-1 = until idle)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_timeout_ms: Option<i32>,

    /// Timeout for blocking `get`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub get_timeout_ms: Option<i32>,

    /// Forwarding flags used by `set_interest_filter` when none are given
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interest_filter_flags: Option<i32>,

    /// Interest lifetime used by engines that honour it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interest_lifetime_ms: Option<u64>,
}

/// Key material and PRNG settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct CryptoConfig {
    /// Primary PRNG seed file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed_file: Option<PathBuf>,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// `tracing` filter directive, e.g. "ndn_bridge=debug"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

impl BridgeConfig {
    /// Load configuration from a file
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::IoError(e)
            }
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::TomlParseError {
            file: path.to_path_buf(),
            error: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn parse(content: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::TomlParseError {
            file: PathBuf::from("<string>"),
            error: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(session) = &self.session {
            if let Some(run) = session.run_timeout_ms {
                if run < -1 {
                    return Err(invalid(
                        "session.run_timeout_ms",
                        format!("must be -1 or non-negative, got {}", run),
                    ));
                }
            }
            if let Some(get) = session.get_timeout_ms {
                if get < 0 {
                    return Err(invalid(
                        "session.get_timeout_ms",
                        format!("must be non-negative, got {}", get),
                    ));
                }
            }
            if let Some(flags) = session.interest_filter_flags {
                if flags < 0 {
                    return Err(invalid(
                        "session.interest_filter_flags",
                        format!("must be non-negative, got {}", flags),
                    ));
                }
            }
            if session.interest_lifetime_ms == Some(0) {
                return Err(invalid(
                    "session.interest_lifetime_ms",
                    "must be greater than zero".to_string(),
                ));
            }
        }

        if let Some(logging) = &self.logging {
            if let Some(filter) = &logging.filter {
                if filter.trim().is_empty() {
                    return Err(invalid("logging.filter", "must not be empty".to_string()));
                }
            }
        }

        Ok(())
    }

    /// Get the global config file path (~/.ndn-bridge/config.toml)
    pub fn global_config_path() -> ConfigResult<PathBuf> {
        let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
        Ok(home.join(".ndn-bridge").join("config.toml"))
    }

    /// Merge another config into this one, field by field.
    /// Other config takes precedence for non-None values
    pub fn merge(&mut self, other: &BridgeConfig) {
        if let Some(theirs) = &other.session {
            let ours = self.session.get_or_insert_with(SessionConfig::default);
            if theirs.run_timeout_ms.is_some() {
                ours.run_timeout_ms = theirs.run_timeout_ms;
            }
            if theirs.get_timeout_ms.is_some() {
                ours.get_timeout_ms = theirs.get_timeout_ms;
            }
            if theirs.interest_filter_flags.is_some() {
                ours.interest_filter_flags = theirs.interest_filter_flags;
            }
            if theirs.interest_lifetime_ms.is_some() {
                ours.interest_lifetime_ms = theirs.interest_lifetime_ms;
            }
        }
        if let Some(theirs) = &other.crypto {
            if theirs.seed_file.is_some() {
                self.crypto.get_or_insert_with(CryptoConfig::default).seed_file =
                    theirs.seed_file.clone();
            }
        }
        if let Some(theirs) = &other.logging {
            if theirs.filter.is_some() {
                self.logging.get_or_insert_with(LoggingConfig::default).filter =
                    theirs.filter.clone();
            }
        }
    }

    pub fn run_timeout_ms(&self) -> i32 {
        self.session
            .as_ref()
            .and_then(|s| s.run_timeout_ms)
            .unwrap_or(DEFAULT_RUN_TIMEOUT_MS)
    }

    pub fn get_timeout_ms(&self) -> i32 {
        self.session
            .as_ref()
            .and_then(|s| s.get_timeout_ms)
            .unwrap_or(DEFAULT_GET_TIMEOUT_MS)
    }

    pub fn interest_filter_flags(&self) -> i32 {
        self.session
            .as_ref()
            .and_then(|s| s.interest_filter_flags)
            .unwrap_or(DEFAULT_INTEREST_FILTER_FLAGS)
    }

    pub fn interest_lifetime_ms(&self) -> u64 {
        self.session
            .as_ref()
            .and_then(|s| s.interest_lifetime_ms)
            .unwrap_or(DEFAULT_INTEREST_LIFETIME_MS)
    }

    pub fn seed_file(&self) -> Option<&Path> {
        self.crypto.as_ref().and_then(|c| c.seed_file.as_deref())
    }

    pub fn log_filter(&self) -> &str {
        self.logging
            .as_ref()
            .and_then(|l| l.filter.as_deref())
            .unwrap_or(DEFAULT_LOG_FILTER)
    }
}

fn invalid(field: &str, reason: String) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason,
    }
}
