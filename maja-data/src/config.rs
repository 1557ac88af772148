//! Client configuration.
//!
//! Load order:
//! 1. Built-in defaults
//! 2. User override at `~/.maja/config.json` (missing keys keep their default)
//! 3. The `MAJA_API_BASE` environment variable, for the backend URL only

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Environment variable that overrides [`ClientConfig::base_url`]
pub const API_BASE_ENV: &str = "MAJA_API_BASE";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Backend root, e.g. `http://localhost:8000`
    pub base_url: String,
    pub upload_timeout_secs: u64,
    pub probe_timeout_ms: u64,
    pub progress_interval_ms: u64,
    pub max_messages: usize,
    /// Label on assistant bubbles
    pub assistant_name: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            upload_timeout_secs: 30,
            probe_timeout_ms: 5000,
            progress_interval_ms: 120,
            max_messages: 50,
            assistant_name: "Maja".to_string(),
        }
    }
}

impl ClientConfig {
    /// Defaults, merged with the user override file and the environment.
    ///
    /// A broken override file is logged and skipped.
    pub fn load() -> Self {
        let mut config = match Self::override_path() {
            Some(path) if path.exists() => match Self::load_from(&path) {
                Ok(config) => {
                    log::info!("ClientConfig: loaded user override from {:?}", path);
                    config
                }
                Err(e) => {
                    log::warn!("ClientConfig: ignoring user override: {}", e);
                    Self::default()
                }
            },
            _ => Self::default(),
        };

        config.apply_base_override(std::env::var(API_BASE_ENV).ok());
        if let Err(e) = config.validate() {
            log::warn!("ClientConfig: {}, falling back to the default backend", e);
            config.base_url = Self::default().base_url;
        }
        config
    }

    /// Read a config file; unlike [`ClientConfig::load`], failures surface.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut config: ClientConfig =
            serde_json::from_str(&contents).map_err(|source| ConfigError::Json {
                path: path.display().to_string(),
                source,
            })?;
        config.base_url = trim_base(&config.base_url);
        config.validate()?;
        Ok(config)
    }

    /// Replace the backend URL when `value` is set and not blank.
    pub fn apply_base_override(&mut self, value: Option<String>) {
        if let Some(url) = value.map(|v| trim_base(&v)).filter(|v| !v.is_empty()) {
            log::debug!("ClientConfig: backend overridden by {}: {}", API_BASE_ENV, url);
            self.base_url = url;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |source| ConfigError::InvalidUrl {
            url: self.base_url.clone(),
            source,
        };
        let url = url::Url::parse(&self.base_url).map_err(invalid)?;
        match url.scheme() {
            "http" | "https" => Ok(()),
            _ => Err(invalid(url::ParseError::RelativeUrlWithoutBase)),
        }
    }

    /// Save to the user override file.
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::override_path().ok_or(ConfigError::NoHome)?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let io_error = |source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_error)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Json {
            path: path.display().to_string(),
            source,
        })?;
        std::fs::write(path, json).map_err(io_error)
    }

    /// `~/.maja/config.json`
    pub fn override_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".maja").join("config.json"))
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs.max(1))
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms.max(1))
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms.max(10))
    }
}

fn trim_base(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}
