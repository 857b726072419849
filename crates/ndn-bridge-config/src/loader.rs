//! Configuration Loader
//!
//! Handles loading and merging configuration from multiple sources with proper precedence.

use crate::bridge::{BridgeConfig, CryptoConfig, LoggingConfig, SessionConfig};
use crate::{ConfigError, ConfigResult};
use std::env;
use std::path::{Path, PathBuf};

/// Project configuration file name
pub const PROJECT_CONFIG_FILE: &str = "ndn-bridge.toml";

/// Configuration loader
///
/// Loads configuration from multiple sources and merges them with proper precedence:
/// 1. Global config (~/.ndn-bridge/config.toml) - lowest priority
/// 2. Project config (./ndn-bridge.toml) - overrides global
/// 3. Environment variables (NDN_BRIDGE_*) - overrides project
pub struct ConfigLoader {
    /// Cached global config path
    global_config_path: Option<PathBuf>,
}

/// Merged configuration result
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Effective configuration after merging
    pub bridge: BridgeConfig,

    /// Directory where ndn-bridge.toml was found
    pub project_root: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self {
            global_config_path: None,
        }
    }

    /// Create a loader that reads the global config from an explicit path
    pub fn with_global_path(path: impl Into<PathBuf>) -> Self {
        Self {
            global_config_path: Some(path.into()),
        }
    }

    /// Load configuration starting from the given directory
    ///
    /// Walks up the directory tree to find ndn-bridge.toml, merges it over the
    /// global config and applies environment overrides.
    pub fn load_from_directory(&mut self, start_dir: &Path) -> ConfigResult<Config> {
        let (project_root, project_config) = self.find_project_config(start_dir)?;

        let mut bridge = self.load_global_config()?;
        bridge.merge(&project_config);
        let bridge = self.apply_env_overrides(bridge)?;

        Ok(Config {
            bridge,
            project_root,
        })
    }

    /// Load configuration from a specific project config file
    pub fn load_from_file(&mut self, config_path: &Path) -> ConfigResult<Config> {
        let project_config = BridgeConfig::load_from_file(config_path)?;

        let mut bridge = self.load_global_config()?;
        bridge.merge(&project_config);
        let bridge = self.apply_env_overrides(bridge)?;

        Ok(Config {
            bridge,
            project_root: config_path.parent().map(|p| p.to_path_buf()),
        })
    }

    /// Find project configuration by walking up directory tree
    fn find_project_config(
        &self,
        start_dir: &Path,
    ) -> ConfigResult<(Option<PathBuf>, BridgeConfig)> {
        let mut current = start_dir.to_path_buf();

        loop {
            let config_path = current.join(PROJECT_CONFIG_FILE);

            if config_path.exists() {
                let project_config = BridgeConfig::load_from_file(&config_path)?;
                return Ok((Some(current), project_config));
            }

            match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => return Ok((None, BridgeConfig::default())),
            }
        }
    }

    /// Load global configuration; a missing file yields the defaults
    fn load_global_config(&mut self) -> ConfigResult<BridgeConfig> {
        let path = match &self.global_config_path {
            Some(path) => path.clone(),
            None => match BridgeConfig::global_config_path() {
                Ok(path) => {
                    self.global_config_path = Some(path.clone());
                    path
                }
                Err(ConfigError::HomeNotFound) => return Ok(BridgeConfig::default()),
                Err(e) => return Err(e),
            },
        };

        if !path.exists() {
            return Ok(BridgeConfig::default());
        }

        BridgeConfig::load_from_file(&path)
    }

    /// Apply environment variable overrides
    ///
    /// Recognised variables: NDN_BRIDGE_RUN_TIMEOUT_MS, NDN_BRIDGE_GET_TIMEOUT_MS,
    /// NDN_BRIDGE_SEED_FILE, NDN_BRIDGE_LOG
    fn apply_env_overrides(&self, mut config: BridgeConfig) -> ConfigResult<BridgeConfig> {
        if let Ok(value) = env::var("NDN_BRIDGE_RUN_TIMEOUT_MS") {
            let timeout = parse_env_int("NDN_BRIDGE_RUN_TIMEOUT_MS", &value)?;
            config
                .session
                .get_or_insert_with(SessionConfig::default)
                .run_timeout_ms = Some(timeout);
        }

        if let Ok(value) = env::var("NDN_BRIDGE_GET_TIMEOUT_MS") {
            let timeout = parse_env_int("NDN_BRIDGE_GET_TIMEOUT_MS", &value)?;
            config
                .session
                .get_or_insert_with(SessionConfig::default)
                .get_timeout_ms = Some(timeout);
        }

        if let Ok(value) = env::var("NDN_BRIDGE_SEED_FILE") {
            config.crypto.get_or_insert_with(CryptoConfig::default).seed_file =
                Some(PathBuf::from(value));
        }

        if let Ok(value) = env::var("NDN_BRIDGE_LOG") {
            config
                .logging
                .get_or_insert_with(LoggingConfig::default)
                .filter = Some(value);
        }

        config.validate()?;
        Ok(config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// Get the project root directory
    pub fn project_root(&self) -> Option<&Path> {
        self.project_root.as_deref()
    }

    /// Check if a project file was found
    pub fn is_project(&self) -> bool {
        self.project_root.is_some()
    }
}

fn parse_env_int(var: &str, value: &str) -> ConfigResult<i32> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        field: var.to_string(),
        reason: format!("expected an integer, got '{}'", value),
    })
}
