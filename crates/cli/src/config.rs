//! Configuration management for the CLI

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// CLI configuration stored as JSON under the user's config directory
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    /// API endpoint URL
    pub api_url: Option<String>,
    /// Tenant sent with every request
    pub tenant_id: Option<String>,
    /// Driver identity; requests are made as a dispatcher when unset
    pub driver_id: Option<String>,
    /// Durable outbox used by `simulate` and `outbox`
    pub outbox_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).context("Failed to read config file")?;

        serde_json::from_str(&content).context("Failed to parse config file")
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::config_path()?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content).context("Failed to write config file")?;

        Ok(())
    }

    /// Overwrite the fields that were given
    pub fn merge(&mut self, other: Config) {
        if other.api_url.is_some() {
            self.api_url = other.api_url;
        }
        if other.tenant_id.is_some() {
            self.tenant_id = other.tenant_id;
        }
        if other.driver_id.is_some() {
            self.driver_id = other.driver_id;
        }
        if other.outbox_path.is_some() {
            self.outbox_path = other.outbox_path;
        }
    }

    /// Outbox file, defaulting to the config directory
    pub fn outbox_path(&self) -> Result<PathBuf> {
        match &self.outbox_path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::config_dir()?.join("outbox.json")),
        }
    }

    fn config_dir() -> Result<PathBuf> {
        let home = dirs_next::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".config").join("fleetctl"))
    }

    /// Get the configuration file path
    fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }
}
