//! # gnsslink Core Library
//!
//! Turns raw byte streams from GNSS receivers into typed, validated messages
//! and drives receiver commands with ACK/NAK correlation.
//!
//! ## Features
//!
//! - UBX, RTCM v2, RTCM v3, NMEA-0183, SBF, Asv and ComNav parsing on one stream
//! - Serial, TCP client/server and in-memory byte sources
//! - Merged message and error broadcast streams
//! - Command retries with per-attempt timeouts and caller cancellation
//!
//! ## Example
//!
//! ```rust,no_run
//! use gnsslink_core::{Connection, Protocol, Transport};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let transport: Transport = "serial:/dev/ttyACM0?br=115200".parse()?;
//!     let source = transport.open().await?;
//!     let parsers = [Protocol::Ubx, Protocol::Nmea]
//!         .iter()
//!         .filter_map(Protocol::parser)
//!         .collect();
//!     let connection = Arc::new(Connection::open(source, parsers)?);
//!
//!     let mut rx = connection.subscribe_messages();
//!     while let Ok(message) = rx.recv().await {
//!         println!("{message}");
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod core;

// Re-exports for convenience
pub use crate::config::{AppConfig, ConfigError, LoggingConfig};
pub use crate::core::connection::{ByteCounters, Connection, ConnectionError, Demultiplexer};
pub use crate::core::device::{
    CommandError, Completion, Device, DeviceConfig, DeviceState, UbxCommands, UbxDevice,
};
pub use crate::core::error::{CodecError, ParseError, RegistryError};
pub use crate::core::message::{GnssMessage, Protocol, ProtocolMessage};
pub use crate::core::protocol::{Outlet, ParserStats, ProtocolParser};
pub use crate::core::registry::MessageRegistry;
pub use crate::core::transport::{ByteSource, Transport, TransportError, VirtualPort};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
