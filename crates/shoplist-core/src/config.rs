//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/shoplist/config.toml)
//! 3. Environment variables (SHOPLIST_* prefix)
//!
//! Environment variables take precedence over config file values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Environment variable prefix
const ENV_PREFIX: &str = "SHOPLIST";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Store base URL (e.g. https://<project>.supabase.co)
    #[serde(default)]
    pub store_url: Option<String>,

    /// Public API key for the store
    #[serde(default)]
    pub api_key: Option<String>,

    /// Base URL share links point at
    #[serde(default = "default_share_base_url")]
    pub share_base_url: String,

    /// Initial realtime reconnect delay in milliseconds
    #[serde(default = "default_reconnect_initial_ms")]
    pub reconnect_initial_ms: u64,

    /// Maximum realtime reconnect delay in milliseconds
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,

    /// Realtime heartbeat interval in seconds
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_url: None,
            api_key: None,
            share_base_url: default_share_base_url(),
            reconnect_initial_ms: default_reconnect_initial_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
            heartbeat_secs: default_heartbeat_secs(),
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (SHOPLIST_STORE_URL, SHOPLIST_API_KEY, SHOPLIST_SHARE_URL)
    /// 2. Config file (~/.config/shoplist/config.toml or SHOPLIST_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration, preferring an explicit path from the command line
    pub fn load_with_cli_override(path: Option<&PathBuf>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => Self::load(),
        }
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // SHOPLIST_STORE_URL
        if let Ok(val) = std::env::var(format!("{}_STORE_URL", ENV_PREFIX)) {
            self.store_url = if val.is_empty() { None } else { Some(val) };
        }

        // SHOPLIST_API_KEY
        if let Ok(val) = std::env::var(format!("{}_API_KEY", ENV_PREFIX)) {
            self.api_key = if val.is_empty() { None } else { Some(val) };
        }

        // SHOPLIST_SHARE_URL
        if let Ok(val) = std::env::var(format!("{}_SHARE_URL", ENV_PREFIX)) {
            if !val.is_empty() {
                self.share_base_url = val;
            }
        }
    }

    /// Save configuration to the default file
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file_path())
    }

    /// Save configuration to a specific file
    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with SHOPLIST_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("shoplist")
            .join("config.toml")
    }

    /// Whether a store is configured at all
    pub fn has_store(&self) -> bool {
        self.store_url.is_some() && self.api_key.is_some()
    }

    pub fn initial_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_initial_ms)
    }

    pub fn max_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_ms.max(self.reconnect_initial_ms))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs.max(1))
    }
}

fn default_share_base_url() -> String {
    "https://shoplist.app/list".to_string()
}

fn default_reconnect_initial_ms() -> u64 {
    1_000
}

fn default_reconnect_max_ms() -> u64 {
    30_000
}

fn default_heartbeat_secs() -> u64 {
    25
}
