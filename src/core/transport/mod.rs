//! Byte sources feeding a connection
//!
//! Supports:
//! - Serial ports (RS-232, USB-Serial)
//! - Raw TCP, as client or as a listening server
//! - An in-memory port for simulation and tests
//!
//! Connection strings:
//! - `serial:/dev/ttyUSB0?br=115200&parity=n&stopbits=1&databits=8`
//! - `tcp://192.168.1.10:5017`
//! - `tcp://0.0.0.0:5017?server=true`

mod serial;
mod tcp;
mod virtual_port;

pub use serial::{list_ports, SerialConfig, SerialParity, SerialSource};
pub use tcp::{TcpConfig, TcpMode, TcpSource};
pub use virtual_port::{Responder, VirtualPort};

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

/// Capacity of the received-chunk broadcast channel
pub const CHUNK_CAPACITY: usize = 1024;

/// Size of a single read from the underlying device
pub(crate) const READ_BUFFER: usize = 4096;

/// Transport error types
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection timeout
    #[error("Connection timeout after {0} seconds")]
    Timeout(u64),

    /// Port not found
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Recognised but not supported
    #[error("Unsupported transport: {0}")]
    Unsupported(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Disconnected
    #[error("Disconnected")]
    Disconnected,
}

/// A duplex byte stream from a receiver
///
/// Received chunks are published on a broadcast channel so several
/// consumers (connection, raw loggers) can observe the same stream.
#[async_trait]
pub trait ByteSource: Send + Sync {
    /// Human readable endpoint, used in logs and command errors
    fn name(&self) -> String;

    /// Subscribe to received chunks
    fn subscribe(&self) -> broadcast::Receiver<Bytes>;

    /// Write bytes to the device, returning how many were written
    async fn write(&self, data: Bytes) -> Result<usize, TransportError>;

    /// Stop reading and release the device
    async fn close(&self);
}

/// Parsed connection string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Transport {
    /// Serial port
    Serial(SerialConfig),
    /// TCP client or server
    Tcp(TcpConfig),
}

impl Transport {
    /// Open the transport and start reading
    pub async fn open(&self) -> Result<Arc<dyn ByteSource>, TransportError> {
        match self {
            Transport::Serial(cfg) => Ok(Arc::new(SerialSource::open(cfg.clone())?)),
            Transport::Tcp(cfg) => Ok(Arc::new(TcpSource::open(cfg.clone()).await?)),
        }
    }
}

fn query_pairs(query: &str) -> Result<Vec<(&str, &str)>, TransportError> {
    query
        .split('&')
        .filter(|p| !p.is_empty())
        .map(|pair| {
            pair.split_once('=').ok_or_else(|| {
                TransportError::InvalidConfiguration(format!("expected key=value, got '{pair}'"))
            })
        })
        .collect()
}

fn query_value<T: FromStr>(key: &str, value: &str) -> Result<T, TransportError> {
    value
        .parse()
        .map_err(|_| TransportError::InvalidConfiguration(format!("invalid {key} '{value}'")))
}

impl FromStr for Transport {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scheme, rest) = s
            .split_once(':')
            .ok_or_else(|| TransportError::InvalidConfiguration(format!("missing scheme in '{s}'")))?;
        let (target, query) = rest.split_once('?').unwrap_or((rest, ""));
        let pairs = query_pairs(query)?;

        match scheme.to_ascii_lowercase().as_str() {
            "serial" => {
                if target.is_empty() {
                    return Err(TransportError::InvalidConfiguration("missing serial port".into()));
                }
                let mut cfg = SerialConfig::new(target, 115_200);
                for (key, value) in pairs {
                    match key {
                        "br" | "baud" => cfg.baud_rate = query_value(key, value)?,
                        "parity" => cfg.parity = query_value(key, value)?,
                        "stopbits" => cfg.stop_bits = query_value(key, value)?,
                        "databits" => cfg.data_bits = query_value(key, value)?,
                        _ => {
                            return Err(TransportError::InvalidConfiguration(format!(
                                "unknown serial option '{key}'"
                            )))
                        }
                    }
                }
                cfg.validate()?;
                Ok(Transport::Serial(cfg))
            }
            "tcp" => {
                let address = target.trim_start_matches("//");
                let (host, port) = address.rsplit_once(':').ok_or_else(|| {
                    TransportError::InvalidConfiguration(format!("expected host:port, got '{address}'"))
                })?;
                let mut cfg = TcpConfig::new(host, query_value("port", port)?);
                for (key, value) in pairs {
                    match key {
                        "server" => {
                            if query_value::<bool>(key, value)? {
                                cfg.mode = TcpMode::Server;
                            }
                        }
                        "timeout" => cfg.timeout_secs = query_value(key, value)?,
                        _ => {
                            return Err(TransportError::InvalidConfiguration(format!(
                                "unknown tcp option '{key}'"
                            )))
                        }
                    }
                }
                Ok(Transport::Tcp(cfg))
            }
            "tcps" => Err(TransportError::Unsupported(
                "TLS connections (tcps://) are not available".into(),
            )),
            other => Err(TransportError::InvalidConfiguration(format!(
                "unknown scheme '{other}'"
            ))),
        }
    }
}

impl TryFrom<String> for Transport {
    type Error = TransportError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Transport> for String {
    fn from(value: Transport) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Serial(cfg) => write!(
                f,
                "serial:{}?br={}&parity={}&stopbits={}&databits={}",
                cfg.port, cfg.baud_rate, cfg.parity, cfg.stop_bits, cfg.data_bits
            ),
            Transport::Tcp(cfg) => {
                write!(f, "tcp://{}:{}", cfg.host, cfg.port)?;
                if cfg.mode == TcpMode::Server {
                    write!(f, "?server=true")?;
                }
                Ok(())
            }
        }
    }
}
