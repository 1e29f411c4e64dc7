//! Config - Pipeline Configuration
//!
//! Loaded from `pipeline.toml`; every field has a default, so an empty or
//! partial file is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::constants::{
    EVENT_BUFFER_DELAY_MS, EVENT_BUFFER_MAX_ITEMS, GATEWAY_HEARTBEAT_PATTERNS, HTTP_TIMEOUT_SECS,
    STREAM_EVENTS_CAPACITY,
};
use crate::error::Result;
use crate::eventing::BufferConfig;
use crate::services::recency::RecencyConfig;

/// Main pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PipelineConfig {
    pub buffer: BufferSettings,
    pub recency: RecencyConfig,
    pub stream: StreamSettings,
    pub api: ApiSettings,
    /// Directory for daily rolling log files; stdout only when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
}

/// Event buffer sizing
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferSettings {
    pub max_items: usize,
    pub delay_ms: u64,
}

impl Default for BufferSettings {
    fn default() -> Self {
        Self {
            max_items: EVENT_BUFFER_MAX_ITEMS,
            delay_ms: EVENT_BUFFER_DELAY_MS,
        }
    }
}

impl From<BufferSettings> for BufferConfig {
    fn from(settings: BufferSettings) -> Self {
        BufferConfig {
            max_items: settings.max_items,
            delay: Duration::from_millis(settings.delay_ms),
        }
    }
}

/// Live event stream settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    /// Subscription filter patterns; empty subscribes to everything
    pub filters: Vec<String>,
    /// Patterns whose events trigger a statistics refresh
    pub heartbeat: Vec<String>,
    /// Events kept per stream
    pub capacity: usize,
    /// Historical events requested on subscribe
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tail: Option<u32>,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            heartbeat: GATEWAY_HEARTBEAT_PATTERNS.iter().map(|p| p.to_string()).collect(),
            capacity: STREAM_EVENTS_CAPACITY,
            tail: None,
        }
    }
}

/// Backend API settings
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:1885/api/v3".to_string(),
            token: None,
            timeout_secs: HTTP_TIMEOUT_SECS,
        }
    }
}

impl std::fmt::Debug for ApiSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiSettings")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "***"))
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl PipelineConfig {
    /// Load from `path`; an empty file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        info!(path = ?path, "Loading config file");
        let value = std::fs::read_to_string(path)?;
        if value.trim().is_empty() {
            return Ok(Self::default());
        }

        let config = toml::from_str(&value).map_err(|e| {
            error!(error = %e, path = ?path, "Failed to parse config file");
            e
        })?;
        Ok(config)
    }

    /// Load from `path`, or the defaults when the file does not exist
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Write to `path`, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }
}
