//! Connection management
//!
//! A [`Connection`] owns one [`ByteSource`] and a set of protocol parsers.
//! Every received byte is fed to every parser under a single lock; decoded
//! messages and parse errors from all parsers come out of one merged pair of
//! broadcast streams.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

use super::error::{CodecError, ParseError};
use super::message::{GnssMessage, Protocol};
use super::protocol::{panic_message, sync_collides, Outlet, ParserStats, ProtocolParser, Tap, STREAM_CAPACITY};
use super::transport::{ByteSource, TransportError};

/// Connection errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Two parsers would each treat the other's frames as their own
    #[error("{first} and {second} parsers claim each other's sync pattern")]
    SyncCollision {
        /// Earlier parser in the set
        first: Protocol,
        /// Later parser in the set
        second: Protocol,
    },

    /// The outgoing message could not be encoded
    #[error("cannot encode {message}: {source}")]
    Codec {
        /// Message description
        message: String,
        /// Codec failure
        #[source]
        source: CodecError,
    },

    /// The byte source failed
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The connection was closed
    #[error("connection closed")]
    Closed,
}

/// Byte and message counters, republished on every change
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ByteCounters {
    /// Bytes received from the source
    pub rx_bytes: u64,
    /// Bytes written to the source
    pub tx_bytes: u64,
    /// Messages sent
    pub tx_messages: u64,
}

#[derive(Default)]
struct Counters {
    rx_bytes: AtomicU64,
    tx_bytes: AtomicU64,
    tx_messages: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> ByteCounters {
        ByteCounters {
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
            tx_bytes: self.tx_bytes.load(Ordering::Relaxed),
            tx_messages: self.tx_messages.load(Ordering::Relaxed),
        }
    }
}

/// Fans bytes out to a parser set
///
/// When any parser completes a frame, every parser is reset so the bytes of
/// that frame cannot also start a frame elsewhere.
pub struct Demultiplexer {
    parsers: Vec<Box<dyn ProtocolParser>>,
    outlet: Outlet,
}

impl Demultiplexer {
    /// Check the set for sync collisions and bind every parser to one outlet
    pub fn new(mut parsers: Vec<Box<dyn ProtocolParser>>) -> Result<Self, ConnectionError> {
        for (i, a) in parsers.iter().enumerate() {
            for b in &parsers[i + 1..] {
                if sync_collides(a.as_ref(), b.as_ref()) {
                    return Err(ConnectionError::SyncCollision {
                        first: a.protocol(),
                        second: b.protocol(),
                    });
                }
            }
        }

        let outlet = Outlet::with_capacity(STREAM_CAPACITY);
        for parser in &mut parsers {
            parser.bind(outlet.clone());
        }
        Ok(Self { parsers, outlet })
    }

    /// Merged streams
    pub fn outlet(&self) -> &Outlet {
        &self.outlet
    }

    /// Protocols in feed order
    pub fn protocols(&self) -> Vec<Protocol> {
        self.parsers.iter().map(|p| p.protocol()).collect()
    }

    /// Feed a chunk, returning how many messages were published
    pub fn push(&mut self, data: &[u8]) -> usize {
        data.iter().filter(|&&byte| self.push_byte(byte)).count()
    }

    fn push_byte(&mut self, byte: u8) -> bool {
        let mut completed = false;
        for parser in &mut self.parsers {
            match catch_unwind(AssertUnwindSafe(|| parser.feed(byte))) {
                Ok(done) => completed |= done,
                Err(panic) => {
                    let reason = format!(
                        "{} parser panicked: {}",
                        parser.protocol(),
                        panic_message(panic.as_ref())
                    );
                    tracing::error!("{}", reason);
                    self.outlet.report(ParseError::Internal {
                        protocol: Protocol::Common,
                        reason,
                    });
                    parser.reset();
                }
            }
        }
        if completed {
            self.reset();
        }
        completed
    }

    /// Reset every parser
    pub fn reset(&mut self) {
        for parser in &mut self.parsers {
            parser.reset();
        }
    }

    /// Counters per parser
    pub fn stats(&self) -> Vec<(Protocol, ParserStats)> {
        self.parsers.iter().map(|p| (p.protocol(), p.stats())).collect()
    }
}

/// Active connection to a receiver
pub struct Connection {
    source: Arc<dyn ByteSource>,
    demux: Arc<Mutex<Demultiplexer>>,
    outlet: Outlet,
    sent: broadcast::Sender<GnssMessage>,
    counters: Arc<Counters>,
    counters_tx: Arc<watch::Sender<ByteCounters>>,
    cancel: CancellationToken,
}

impl Connection {
    /// Start demultiplexing `source` into `parsers`
    ///
    /// # Errors
    ///
    /// [`ConnectionError::SyncCollision`] when two parsers claim each other's
    /// frame start.
    ///
    /// # Panics
    ///
    /// Must be called from within a tokio runtime; the ingestion task is
    /// spawned immediately.
    pub fn open(
        source: Arc<dyn ByteSource>,
        parsers: Vec<Box<dyn ProtocolParser>>,
    ) -> Result<Self, ConnectionError> {
        let demux = Demultiplexer::new(parsers)?;
        let outlet = demux.outlet().clone();
        tracing::info!(
            "Opening connection on {} with parsers {:?}",
            source.name(),
            demux.protocols()
        );

        let (sent, _) = broadcast::channel(STREAM_CAPACITY);
        let (counters_tx, _) = watch::channel(ByteCounters::default());
        let connection = Self {
            source,
            demux: Arc::new(Mutex::new(demux)),
            outlet,
            sent,
            counters: Arc::new(Counters::default()),
            counters_tx: Arc::new(counters_tx),
            cancel: CancellationToken::new(),
        };
        connection.spawn_ingestion();
        Ok(connection)
    }

    fn spawn_ingestion(&self) {
        let mut rx = self.source.subscribe();
        let demux = self.demux.clone();
        let outlet = self.outlet.clone();
        let counters = self.counters.clone();
        let counters_tx = self.counters_tx.clone();
        let cancel = self.cancel.clone();
        let name = self.source.name();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    chunk = rx.recv() => match chunk {
                        Ok(bytes) => {
                            counters.rx_bytes.fetch_add(bytes.len() as u64, Ordering::Relaxed);
                            demux.lock().push(&bytes);
                            counters_tx.send_replace(counters.snapshot());
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!("Ingestion on {} lagged, {} chunks dropped", name, skipped);
                            demux.lock().reset();
                            outlet.report(ParseError::Internal {
                                protocol: Protocol::Common,
                                reason: format!("{skipped} received chunks dropped"),
                            });
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            tracing::info!("Byte source {} closed", name);
                            break;
                        }
                    },
                }
            }
            tracing::debug!("Ingestion on {} stopped", name);
        });
    }

    /// Endpoint name of the byte source
    pub fn name(&self) -> String {
        self.source.name()
    }

    /// Decoded messages from every parser
    pub fn subscribe_messages(&self) -> broadcast::Receiver<GnssMessage> {
        self.outlet.subscribe_messages()
    }

    /// Parse errors from every parser
    pub fn subscribe_errors(&self) -> broadcast::Receiver<ParseError> {
        self.outlet.subscribe_errors()
    }

    /// Messages written by [`Connection::send`]
    pub fn subscribe_sent(&self) -> broadcast::Receiver<GnssMessage> {
        self.sent.subscribe()
    }

    /// Watch the byte counters
    pub fn watch_counters(&self) -> watch::Receiver<ByteCounters> {
        self.counters_tx.subscribe()
    }

    /// Current byte counters
    pub fn counters(&self) -> ByteCounters {
        self.counters.snapshot()
    }

    /// Run `tap` synchronously on every published message
    pub fn add_tap(&self, tap: Tap) {
        self.outlet.add_tap(tap);
    }

    /// Feed bytes directly, bypassing the source (capture replay)
    pub fn feed(&self, data: &[u8]) -> usize {
        self.counters.rx_bytes.fetch_add(data.len() as u64, Ordering::Relaxed);
        let published = self.demux.lock().push(data);
        self.counters_tx.send_replace(self.counters.snapshot());
        published
    }

    /// Counters per parser
    pub fn parser_stats(&self) -> Vec<(Protocol, ParserStats)> {
        self.demux.lock().stats()
    }

    /// Encode and write a message
    ///
    /// The message is published on the sent stream before it is written.
    pub async fn send(&self, message: &GnssMessage) -> Result<usize, ConnectionError> {
        if self.cancel.is_cancelled() {
            return Err(ConnectionError::Closed);
        }
        let frame = message.encode_frame().map_err(|source| ConnectionError::Codec {
            message: message.describe(),
            source,
        })?;
        let _ = self.sent.send(message.clone());
        tracing::debug!("Sending {} ({} bytes)", message.describe(), frame.len());
        self.write_counted(frame, 1).await
    }

    /// Write raw bytes (pre-encoded frames, receiver commands)
    pub async fn send_raw(&self, data: Bytes) -> Result<usize, ConnectionError> {
        if self.cancel.is_cancelled() {
            return Err(ConnectionError::Closed);
        }
        self.write_counted(data, 0).await
    }

    async fn write_counted(&self, data: Bytes, messages: u64) -> Result<usize, ConnectionError> {
        let written = self.source.write(data).await?;
        self.counters.tx_bytes.fetch_add(written as u64, Ordering::Relaxed);
        self.counters.tx_messages.fetch_add(messages, Ordering::Relaxed);
        self.counters_tx.send_replace(self.counters.snapshot());
        Ok(written)
    }

    /// True once closed
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop ingestion and close the source
    pub async fn close(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        self.source.close().await;
        tracing::info!("Closed connection on {}", self.source.name());
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
