//! Camera subsystem configuration.
//!
//! Sources, lowest priority first:
//! 1. built-in defaults
//! 2. a TOML file (explicit path, or `camhub.toml` in the working directory)
//! 3. environment variables

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{CameraError, Result};

/// Default configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "camhub.toml";

/// Default values.
pub mod defaults {
    pub const RETRY_COUNT: u32 = 3;
    pub const MAX_CONCURRENT_CAPTURES: usize = 2;
    pub const CAPTURE_TIMEOUT_MS: u64 = 5000;
    pub const HDR_SETTLE_MS: u64 = 100;
    pub const DEFAULT_FAMILY: &str = "OpenCV";
    pub const MOCK_DEVICES: usize = 2;
    pub const MOCK_WIDTH: u32 = 640;
    pub const MOCK_HEIGHT: u32 = 480;
}

/// Environment variable names.
pub mod env_vars {
    pub const RETRY_COUNT: &str = "CAMHUB_RETRY_COUNT";
    pub const MAX_CONCURRENT_CAPTURES: &str = "CAMHUB_MAX_CONCURRENT_CAPTURES";
    pub const CAPTURE_TIMEOUT_MS: &str = "CAMHUB_CAPTURE_TIMEOUT_MS";
    pub const DEFAULT_FAMILY: &str = "CAMHUB_DEFAULT_FAMILY";
    pub const INCLUDE_MOCKS: &str = "CAMHUB_INCLUDE_MOCKS";
    pub const LOG_JSON: &str = "CAMHUB_LOG_JSON";
}

/// Configuration shared by the camera manager and the drivers it creates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Capture attempts per call before giving up
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    /// Fleet-wide bound on simultaneous driver captures
    #[serde(default = "default_max_concurrent_captures")]
    pub max_concurrent_captures: usize,

    /// Deadline for a single driver capture
    #[serde(default = "default_capture_timeout_ms")]
    pub capture_timeout_ms: u64,

    /// Settle delay after each HDR exposure change
    #[serde(default = "default_hdr_settle_ms")]
    pub hdr_settle_ms: u64,

    /// Family used when opening without an identity
    #[serde(default = "default_family")]
    pub default_family: String,

    /// Include mock families in default discovery
    #[serde(default)]
    pub include_mocks: bool,

    /// Devices reported by each built-in mock family
    #[serde(default = "default_mock_devices")]
    pub mock_devices: usize,

    #[serde(default = "default_mock_width")]
    pub mock_width: u32,

    #[serde(default = "default_mock_height")]
    pub mock_height: u32,
}

fn default_retry_count() -> u32 {
    defaults::RETRY_COUNT
}

fn default_max_concurrent_captures() -> usize {
    defaults::MAX_CONCURRENT_CAPTURES
}

fn default_capture_timeout_ms() -> u64 {
    defaults::CAPTURE_TIMEOUT_MS
}

fn default_hdr_settle_ms() -> u64 {
    defaults::HDR_SETTLE_MS
}

fn default_family() -> String {
    defaults::DEFAULT_FAMILY.to_string()
}

fn default_mock_devices() -> usize {
    defaults::MOCK_DEVICES
}

fn default_mock_width() -> u32 {
    defaults::MOCK_WIDTH
}

fn default_mock_height() -> u32 {
    defaults::MOCK_HEIGHT
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            retry_count: default_retry_count(),
            max_concurrent_captures: default_max_concurrent_captures(),
            capture_timeout_ms: default_capture_timeout_ms(),
            hdr_settle_ms: default_hdr_settle_ms(),
            default_family: default_family(),
            include_mocks: false,
            mock_devices: default_mock_devices(),
            mock_width: default_mock_width(),
            mock_height: default_mock_height(),
        }
    }
}

impl CameraConfig {
    /// Parse a TOML document; missing keys take their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| CameraError::Configuration(format!("Invalid config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from `path`, or from [`DEFAULT_CONFIG_FILE`] when it
    /// exists, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                info!(category = "config", "Loading config from: {}", path.display());
                let content = std::fs::read_to_string(path)?;
                Self::from_toml_str(&content)?
            }
            None => match std::fs::read_to_string(DEFAULT_CONFIG_FILE) {
                Ok(content) => {
                    info!(category = "config", "Loading config from: {}", DEFAULT_CONFIG_FILE);
                    Self::from_toml_str(&content)?
                }
                Err(_) => {
                    debug!(category = "config", "No config file found, using defaults");
                    Self::default()
                }
            },
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Override fields from `CAMHUB_*` environment variables.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse(env_vars::RETRY_COUNT) {
            self.retry_count = v;
        }
        if let Some(v) = env_parse(env_vars::MAX_CONCURRENT_CAPTURES) {
            self.max_concurrent_captures = v;
        }
        if let Some(v) = env_parse(env_vars::CAPTURE_TIMEOUT_MS) {
            self.capture_timeout_ms = v;
        }
        if let Ok(family) = std::env::var(env_vars::DEFAULT_FAMILY) {
            if !family.trim().is_empty() {
                self.default_family = family.trim().to_string();
            }
        }
        if let Some(v) = env_parse(env_vars::INCLUDE_MOCKS) {
            self.include_mocks = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_captures == 0 {
            return Err(CameraError::Configuration(
                "max_concurrent_captures must be at least 1".to_string(),
            ));
        }
        if self.capture_timeout_ms == 0 {
            return Err(CameraError::Configuration(
                "capture_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn capture_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.capture_timeout_ms)
    }

    pub fn hdr_settle(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.hdr_settle_ms)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(category = "config", "Ignoring invalid value for {}: {}", name, raw);
            None
        }
    }
}

/// Whether JSON log output was requested through the environment.
pub fn json_logging_requested() -> bool {
    std::env::var(env_vars::LOG_JSON)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false)
}
