//! Application settings

use crate::core::device::DeviceConfig;
use crate::core::message::Protocol;
use crate::core::protocol::ProtocolParser;
use crate::core::transport::Transport;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// File could not be read or written
    #[error("config I/O on {path}: {source}")]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// File is not valid configuration
    #[error("invalid config {path}: {source}")]
    Parse {
        /// File involved
        path: PathBuf,
        /// TOML error
        #[source]
        source: toml::de::Error,
    },

    /// Configuration could not be rendered
    #[error("cannot serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// No home directory to derive the default location from
    #[error("could not determine config directory")]
    NoConfigDir,
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Default connection string
    pub connection: Option<Transport>,
    /// Parsers attached to a connection, in feed order
    pub protocols: Vec<Protocol>,
    /// Command retry policy
    pub device: DeviceConfig,
    /// Logging settings
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            connection: None,
            protocols: vec![Protocol::Ubx, Protocol::Nmea, Protocol::Rtcm3],
            device: DeviceConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load config from the default location, or defaults when absent
    pub fn load() -> Result<Self, ConfigError> {
        let path = super::config_path().ok_or(ConfigError::NoConfigDir)?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from `path`
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Save config to `path`, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let io = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(io)
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = super::config_path().ok_or(ConfigError::NoConfigDir)?;
        self.save_to(&path)
    }

    /// Fresh parsers for the enabled protocols
    pub fn parsers(&self) -> Vec<Box<dyn ProtocolParser>> {
        self.protocols.iter().filter_map(Protocol::parser).collect()
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,
    /// Emit JSON lines instead of text
    pub json: bool,
    /// Also write daily-rolling log files here
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            directory: None,
        }
    }
}
