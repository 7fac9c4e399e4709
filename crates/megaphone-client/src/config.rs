//! Client configuration
//!
//! Loaded from `<config_dir>/megaphone/client.toml` when present, with
//! environment overrides on top:
//! - `MEGAPHONE_URL` replaces `base_url`
//! - `MEGAPHONE_DEDUP_CAPACITY` replaces `dedup_capacity`

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::transport::parse_base_url;

const DEFAULT_BASE_URL: &str = "http://localhost:3000";

/// Enough to absorb redelivery of a full read cycle on busy channels
const DEFAULT_DEDUP_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Broker base URL; reads go to `{base_url}/read/{channel}`
    pub base_url: String,
    /// Number of recent event ids kept for duplicate suppression
    pub dedup_capacity: usize,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
            user_agent: concat!("megaphone-client/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl ClientConfig {
    /// Default location of the config file
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("megaphone").join("client.toml"))
    }

    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No client config at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|err| Error::Config(format!("reading {}: {}", path.display(), err)))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|err| Error::Config(err.to_string()))
    }

    /// Apply `MEGAPHONE_URL` and `MEGAPHONE_DEDUP_CAPACITY`
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("MEGAPHONE_URL") {
            self.base_url = url;
        }
        if let Ok(capacity) = std::env::var("MEGAPHONE_DEDUP_CAPACITY") {
            match capacity.parse() {
                Ok(capacity) => self.dedup_capacity = capacity,
                Err(_) => warn!("Ignoring MEGAPHONE_DEDUP_CAPACITY={}: not a number", capacity),
            }
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.dedup_capacity == 0 {
            return Err(Error::Config("dedup_capacity must be positive".to_string()));
        }
        parse_base_url(&self.base_url)?;
        Ok(())
    }
}
