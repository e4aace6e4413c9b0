//! Protocol parsers
//!
//! Every protocol is a byte-at-a-time state machine implementing
//! [`ProtocolParser`]:
//! - UBX, RTCM v3, RTCM v2, Asv, SBF, NMEA-0183
//! - ComNav binary and ASCII logs
//! - Checksum algorithms shared by the framers
//!
//! A parser never builds messages itself. Completed frames go through
//! [`ParserCore::dispatch`], which looks the id up in the parser's
//! [`MessageRegistry`], decodes the payload and publishes the result on the
//! parser's [`Outlet`].

pub mod asv;
pub mod checksum;
pub mod comnav;
pub mod nmea;
pub mod rtcm2;
pub mod rtcm3;
pub mod sbf;
pub mod ubx;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;

use super::error::{CodecError, ParseError};
use super::message::{GnssMessage, Protocol, ProtocolMessage};
use super::registry::MessageRegistry;

/// Default broadcast capacity for message and error streams
pub const STREAM_CAPACITY: usize = 1024;

/// Synchronous observer run on the ingestion path for every published message
pub type Tap = Arc<dyn Fn(&GnssMessage) -> Result<(), String> + Send + Sync>;

/// Message and error streams a parser publishes into
///
/// Cloning yields a handle to the same streams; a connection binds one outlet
/// into all of its parsers so subscribers see a merged stream.
#[derive(Clone)]
pub struct Outlet {
    messages: broadcast::Sender<GnssMessage>,
    errors: broadcast::Sender<ParseError>,
    taps: Arc<RwLock<Vec<Tap>>>,
}

impl Outlet {
    /// Outlet with the default stream capacity
    pub fn new() -> Self {
        Self::with_capacity(STREAM_CAPACITY)
    }

    /// Outlet with a custom stream capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (messages, _) = broadcast::channel(capacity);
        let (errors, _) = broadcast::channel(capacity);
        Self {
            messages,
            errors,
            taps: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Subscribe to decoded messages
    pub fn subscribe_messages(&self) -> broadcast::Receiver<GnssMessage> {
        self.messages.subscribe()
    }

    /// Subscribe to parse errors
    pub fn subscribe_errors(&self) -> broadcast::Receiver<ParseError> {
        self.errors.subscribe()
    }

    /// Install a tap
    pub fn add_tap(&self, tap: Tap) {
        self.taps.write().push(tap);
    }

    /// Broadcast a message, then run every tap on it
    ///
    /// A tap that fails or panics is reported as [`ParseError::Publish`].
    pub fn publish(&self, message: GnssMessage) {
        let taps = self.taps.read().clone();
        let _ = self.messages.send(message.clone());

        for tap in taps {
            let outcome = catch_unwind(AssertUnwindSafe(|| tap(&message)));
            let reason = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(reason)) => reason,
                Err(panic) => panic_message(panic.as_ref()),
            };
            self.report(ParseError::Publish {
                protocol: message.protocol(),
                message_id: message.message_id(),
                name: message.name(),
                reason,
            });
        }
    }

    /// Broadcast an error
    pub fn report(&self, error: ParseError) {
        tracing::debug!("{}", error);
        let _ = self.errors.send(error);
    }
}

impl Default for Outlet {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Outlet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outlet")
            .field("message_receivers", &self.messages.receiver_count())
            .field("error_receivers", &self.errors.receiver_count())
            .field("taps", &self.taps.read().len())
            .finish()
    }
}

/// Text of a caught panic payload
pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

/// Per-parser counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ParserStats {
    /// Frames that passed the integrity check
    pub frames: u64,
    /// Messages published
    pub messages: u64,
    /// Bytes of successfully parsed frames
    pub parsed_bytes: u64,
    /// Integrity check failures
    pub crc_errors: u64,
    /// Valid frames with an unregistered id
    pub unknown_messages: u64,
    /// Payload decode failures
    pub deserialize_errors: u64,
    /// Messages with unconsumed payload bytes
    pub trailing_data: u64,
}

impl ParserStats {
    /// Total errors of any kind
    pub fn errors(&self) -> u64 {
        self.crc_errors + self.unknown_messages + self.deserialize_errors + self.trailing_data
    }
}

/// Registry, outlet and counters shared by every parser implementation
pub struct ParserCore<M: ProtocolMessage> {
    registry: MessageRegistry<M>,
    outlet: Outlet,
    stats: ParserStats,
    check_trailing: bool,
}

impl<M> ParserCore<M>
where
    M: ProtocolMessage,
    GnssMessage: From<M>,
{
    /// Core over `registry` with trailing-data checks enabled
    pub fn new(registry: MessageRegistry<M>) -> Self {
        Self {
            registry,
            outlet: Outlet::new(),
            stats: ParserStats::default(),
            check_trailing: true,
        }
    }

    /// Enable or disable the trailing-data check
    #[must_use]
    pub fn with_trailing_check(mut self, enabled: bool) -> Self {
        self.check_trailing = enabled;
        self
    }

    /// Registry in use
    pub fn registry(&self) -> &MessageRegistry<M> {
        &self.registry
    }

    /// Registry in use, for adding message types
    pub fn registry_mut(&mut self) -> &mut MessageRegistry<M> {
        &mut self.registry
    }

    /// Outlet in use
    pub fn outlet(&self) -> &Outlet {
        &self.outlet
    }

    /// Replace the outlet
    pub fn bind(&mut self, outlet: Outlet) {
        self.outlet = outlet;
    }

    /// Counters
    pub fn stats(&self) -> ParserStats {
        self.stats
    }

    /// Record a failed integrity check
    pub fn crc_error(&mut self, message_id: Option<String>, expected: u32, computed: u32) {
        self.stats.crc_errors += 1;
        self.outlet.report(ParseError::Crc {
            protocol: M::PROTOCOL,
            message_id,
            expected,
            computed,
        });
    }

    /// Record a frame that passed framing but cannot carry a message
    pub fn malformed(&mut self, message_id: impl Into<String>, name: &'static str, source: CodecError) {
        self.stats.frames += 1;
        self.stats.deserialize_errors += 1;
        self.outlet.report(ParseError::Deserialize {
            protocol: M::PROTOCOL,
            message_id: message_id.into(),
            name,
            source,
        });
    }

    /// Look up, decode and publish a verified frame
    ///
    /// `prepare` runs on the freshly constructed message before decoding and
    /// carries header fields that live outside the payload. Returns true when
    /// a message was published.
    pub fn dispatch(
        &mut self,
        id: &M::Id,
        payload: &[u8],
        frame_len: usize,
        prepare: impl FnOnce(&mut M),
    ) -> bool {
        self.stats.frames += 1;

        let Some(mut message) = self.registry.create(id) else {
            self.stats.unknown_messages += 1;
            self.outlet.report(ParseError::UnknownMessage {
                protocol: M::PROTOCOL,
                message_id: id.to_string(),
            });
            return false;
        };

        prepare(&mut message);

        let mut input = payload;
        if let Err(source) = message.deserialize(&mut input) {
            self.stats.deserialize_errors += 1;
            self.outlet.report(ParseError::Deserialize {
                protocol: M::PROTOCOL,
                message_id: id.to_string(),
                name: message.name(),
                source,
            });
            return false;
        }

        let remaining = input.len();
        let name = message.name();
        self.stats.messages += 1;
        self.stats.parsed_bytes += frame_len as u64;
        self.outlet.publish(message.into());

        if self.check_trailing && remaining > 0 {
            self.stats.trailing_data += 1;
            self.outlet.report(ParseError::TrailingData {
                protocol: M::PROTOCOL,
                message_id: id.to_string(),
                name,
                remaining,
            });
        }
        true
    }
}

/// Byte-driven protocol state machine
pub trait ProtocolParser: Send {
    /// Protocol handled by this parser
    fn protocol(&self) -> Protocol;

    /// Consume one byte; true exactly when a message was just published
    fn feed(&mut self, byte: u8) -> bool;

    /// Drop any partial frame and return to seeking
    fn reset(&mut self);

    /// Counters
    fn stats(&self) -> ParserStats;

    /// Bytes of successfully parsed frames
    fn parsed_bytes(&self) -> u64 {
        self.stats().parsed_bytes
    }

    /// Leading bytes of every frame; empty when frames have no byte-level sync
    fn sync_pattern(&self) -> &'static [u8];

    /// Whether a stream starting with `prefix` could be the start of one of this parser's frames
    fn claims_sync(&self, prefix: &[u8]) -> bool {
        let sync = self.sync_pattern();
        if sync.is_empty() || prefix.is_empty() {
            return false;
        }
        let n = sync.len().min(prefix.len());
        sync[..n] == prefix[..n]
    }

    /// Outlet the parser publishes into
    fn outlet(&self) -> &Outlet;

    /// Publish into `outlet` from now on
    fn bind(&mut self, outlet: Outlet);

    /// Subscribe to decoded messages
    fn subscribe_messages(&self) -> broadcast::Receiver<GnssMessage> {
        self.outlet().subscribe_messages()
    }

    /// Subscribe to parse errors
    fn subscribe_errors(&self) -> broadcast::Receiver<ParseError> {
        self.outlet().subscribe_errors()
    }
}

/// True when `a` and `b` would each treat the other's frames as their own
pub fn sync_collides(a: &dyn ProtocolParser, b: &dyn ProtocolParser) -> bool {
    a.claims_sync(b.sync_pattern()) && b.claims_sync(a.sync_pattern())
}

/// Feed the bytes of an abandoned frame again, so a frame that started
/// inside it is still found; the parser must be seeking already
pub(crate) fn rescan(parser: &mut dyn ProtocolParser, abandoned: &[u8]) -> bool {
    let mut published = false;
    for &byte in abandoned {
        published |= parser.feed(byte);
    }
    published
}

/// Forwards the bookkeeping part of [`ProtocolParser`] to a `core` field
macro_rules! delegate_core {
    () => {
        fn stats(&self) -> $crate::core::protocol::ParserStats {
            self.core.stats()
        }

        fn outlet(&self) -> &$crate::core::protocol::Outlet {
            self.core.outlet()
        }

        fn bind(&mut self, outlet: $crate::core::protocol::Outlet) {
            self.core.bind(outlet);
        }
    };
}
pub(crate) use delegate_core;

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;

    /// Feed `bytes`, returning the indices at which `feed` returned true
    pub fn feed_all(parser: &mut dyn ProtocolParser, bytes: &[u8]) -> Vec<usize> {
        bytes
            .iter()
            .enumerate()
            .filter_map(|(i, &b)| parser.feed(b).then_some(i))
            .collect()
    }

    /// Everything currently queued on a receiver
    pub fn drain<T: Clone>(rx: &mut broadcast::Receiver<T>) -> Vec<T> {
        let mut out = Vec::new();
        while let Ok(item) = rx.try_recv() {
            out.push(item);
        }
        out
    }
}
