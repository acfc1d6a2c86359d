//! Configuration Management
//!
//! Handles persistent configuration storage for tarm.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::armclient::DEFAULT_ARM_ENDPOINT;

pub const DEFAULT_EXPAND_TIMEOUT_SECS: u64 = 45;

/// User configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Tenant to request tokens for
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default = "default_arm_endpoint")]
    pub arm_endpoint: String,
    /// Deadline for a whole expansion
    #[serde(default = "default_expand_timeout_secs")]
    pub expand_timeout_secs: u64,
    /// Last expanded URL
    #[serde(default)]
    pub last_url: Option<String>,
}

fn default_arm_endpoint() -> String {
    DEFAULT_ARM_ENDPOINT.to_string()
}

fn default_expand_timeout_secs() -> u64 {
    DEFAULT_EXPAND_TIMEOUT_SECS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tenant_id: None,
            arm_endpoint: default_arm_endpoint(),
            expand_timeout_secs: DEFAULT_EXPAND_TIMEOUT_SECS,
            last_url: None,
        }
    }
}

impl Config {
    /// Directory holding config and log files
    pub fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("tarm"))
    }

    fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.json"))
    }

    /// Load configuration from disk
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };

        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(&path) {
            Ok(content) => Self::from_json(&content),
            Err(_) => Self::default(),
        }
    }

    /// Parse config text, falling back to defaults when it is invalid
    pub fn from_json(content: &str) -> Self {
        serde_json::from_str(content).unwrap_or_default()
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let Some(path) = Self::config_path() else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, content)?;

        Ok(())
    }

    /// Get effective tenant (CLI > config > environment)
    pub fn effective_tenant(&self, cli_tenant: Option<&str>) -> Option<String> {
        cli_tenant
            .map(str::to_string)
            .or_else(|| self.tenant_id.clone())
            .or_else(crate::armclient::auth::default_tenant_id)
    }

    /// Get effective expansion deadline (CLI > config)
    pub fn effective_timeout(&self, cli_timeout_secs: Option<u64>) -> Duration {
        Duration::from_secs(cli_timeout_secs.unwrap_or(self.expand_timeout_secs))
    }

    /// Remember the last expanded URL and save
    pub fn set_last_url(&mut self, url: &str) -> Result<()> {
        self.last_url = Some(url.to_string());
        self.save()
    }
}
