//! Configuration module for loading TOML config files.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::PanelError;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub dispatch: DispatchConfig,
    pub audience: AudienceConfig,
    pub conversation: ConversationConfig,
}

/// HTTP/WebSocket listener settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Depth of each connection's outbound frame buffer.
    pub outbound_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8000".to_string(),
            outbound_buffer: 64,
        }
    }
}

/// Dispatcher timing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Upper bound on the wait before retrying while the floor is held.
    pub busy_backoff_ms: u64,
    /// Pause after an unexpected error inside a dispatch iteration.
    pub error_backoff_ms: u64,
    /// How long a single connection may take to accept a frame.
    pub send_timeout_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            busy_backoff_ms: 100,
            error_backoff_ms: 1000,
            send_timeout_ms: 5000,
        }
    }
}

impl DispatchConfig {
    pub fn busy_backoff(&self) -> Duration {
        Duration::from_millis(self.busy_backoff_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

/// Audience-question source settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudienceConfig {
    pub submissions_path: PathBuf,
    pub clear_on_start: bool,
}

impl Default for AudienceConfig {
    fn default() -> Self {
        Self {
            submissions_path: PathBuf::from("submissions.json"),
            clear_on_start: true,
        }
    }
}

/// Scripted conversation settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    pub script_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, PanelError> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| PanelError::Config(format!("Failed to read config: {}", e)))?;

        Self::from_str(&content)
    }

    /// Load configuration from string content.
    pub fn from_str(content: &str) -> Result<Self, PanelError> {
        let config: Config = toml::from_str(content)
            .map_err(|e| PanelError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the dispatcher cannot run with.
    pub fn validate(&self) -> Result<(), PanelError> {
        if self.server.outbound_buffer == 0 {
            return Err(PanelError::Config(
                "server.outbound_buffer must be at least 1".to_string(),
            ));
        }
        if self.dispatch.busy_backoff_ms == 0 {
            return Err(PanelError::Config(
                "dispatch.busy_backoff_ms must be at least 1".to_string(),
            ));
        }
        if self.dispatch.send_timeout_ms == 0 {
            return Err(PanelError::Config(
                "dispatch.send_timeout_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
