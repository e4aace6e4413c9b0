//! Core module containing the main functionality of gnsslink
//!
//! This module provides:
//! - Bit-level field extraction in both bit orders
//! - Byte-driven protocol parsers with a per-protocol message registry
//! - Connections demultiplexing one byte source into many parsers
//! - Byte sources (serial, TCP, in-memory)
//! - A command layer correlating receiver ACK/NAK and poll replies

pub mod bits;
pub mod connection;
pub mod device;
pub mod error;
pub mod message;
pub mod protocol;
pub mod registry;
pub mod transport;
