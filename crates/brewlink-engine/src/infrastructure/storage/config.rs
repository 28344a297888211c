//! TOML-based configuration persistence for the `brewlink` tool.
//!
//! Reads and writes [`AppConfig`] to the platform-appropriate config file
//! unless an explicit path is given:
//! - Windows:  `%APPDATA%\Brewlink\config.toml`
//! - Linux:    `~/.config/brewlink/config.toml`
//! - macOS:    `~/Library/Application Support/Brewlink/config.toml`
//!
//! ```toml
//! [serial]
//! port_name = "192.168.1.50:4001"
//! baud_rate = 115200
//!
//! [link]
//! local_address = 66
//! ack_timeout_ms = 200
//! response_timeout_ms = 200
//!
//! [logging]
//! log_level = "debug"
//! ```
//!
//! Every field has a serde default, so a partial file loads and a missing
//! file yields [`AppConfig::default`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::config::{
    LinkConfig, PortSettings, DEFAULT_BAUD_RATE, DEFAULT_MAX_FRAME_SIZE,
    DEFAULT_MAX_RETRANSMISSIONS, DEFAULT_WORKER_PRIORITY,
};
use brewlink_core::protocol::packet::DEFAULT_HOST_ADDRESS;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub link: LinkSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where the machine is connected.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SerialConfig {
    /// Serial bridge endpoint, `host:port`.
    #[serde(default = "default_port_name")]
    pub port_name: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

/// Persisted form of [`LinkConfig`], with durations in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinkSettings {
    #[serde(default = "default_local_address")]
    pub local_address: u8,
    #[serde(default = "default_timeout_ms")]
    pub ack_timeout_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub response_timeout_ms: u64,
    #[serde(default = "default_max_retransmissions")]
    pub max_retransmissions: u32,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
    #[serde(default = "default_worker_priority")]
    pub worker_priority: u8,
    #[serde(default)]
    pub receive_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_port_name() -> String {
    "127.0.0.1:4001".to_string()
}
fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}
fn default_local_address() -> u8 {
    DEFAULT_HOST_ADDRESS
}
fn default_timeout_ms() -> u64 {
    200
}
fn default_max_retransmissions() -> u32 {
    DEFAULT_MAX_RETRANSMISSIONS
}
fn default_poll_interval_ms() -> u64 {
    1
}
fn default_max_frame_size() -> usize {
    DEFAULT_MAX_FRAME_SIZE
}
fn default_worker_priority() -> u8 {
    DEFAULT_WORKER_PRIORITY
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: default_port_name(),
            baud_rate: default_baud_rate(),
        }
    }
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            local_address: default_local_address(),
            ack_timeout_ms: default_timeout_ms(),
            response_timeout_ms: default_timeout_ms(),
            max_retransmissions: default_max_retransmissions(),
            poll_interval_ms: default_poll_interval_ms(),
            max_frame_size: default_max_frame_size(),
            worker_priority: default_worker_priority(),
            receive_only: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl AppConfig {
    /// The in-memory link configuration described by the `[link]` table.
    pub fn link_config(&self) -> LinkConfig {
        let link = &self.link;
        LinkConfig {
            local_address: link.local_address,
            ack_timeout: Duration::from_millis(link.ack_timeout_ms),
            response_timeout: Duration::from_millis(link.response_timeout_ms),
            max_retransmissions: link.max_retransmissions,
            poll_interval: Duration::from_millis(link.poll_interval_ms),
            max_frame_size: link.max_frame_size,
            worker_priority: link.worker_priority,
            receive_only: link.receive_only,
        }
    }

    pub fn port_settings(&self) -> PortSettings {
        PortSettings::new(self.serial.port_name.clone(), self.serial.baud_rate)
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the default config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads [`AppConfig`] from `path`, or from the default location when `path`
/// is `None`.  A missing file yields [`AppConfig::default`].
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => config_file_path()?,
    };

    match std::fs::read_to_string(&path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(e) => Err(ConfigError::Io { path, source: e }),
    }
}

/// Persists `config` to `path`, or to the default location when `path` is
/// `None`.  Creates the parent directory if needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(config: &AppConfig, path: Option<&Path>) -> Result<(), ConfigError> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => config_file_path()?,
    };

    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(&path, content).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("Brewlink"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("brewlink"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("Brewlink")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
