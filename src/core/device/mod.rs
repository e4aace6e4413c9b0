//! Receiver command layer
//!
//! A [`Device`] sends commands over a [`Connection`] and correlates the
//! receiver's asynchronous answers with them:
//! - `push`: wait for ACK (success) or NAK (failure)
//! - `poll`: wait for a reply of the requested type, or a NAK
//!
//! Each attempt has its own deadline; attempts are retried up to
//! [`DeviceConfig::attempt_count`] times. Caller cancellation is never
//! retried. A disposed device stops silently with [`Completion::Stopped`].

mod pending;
mod ubx;

pub use pending::{accept_any, Accept, Expect, PendingGuard, PendingTable, Resolution};
pub use ubx::{UbxCommands, UbxDevice};

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::connection::{Connection, ConnectionError};
use super::message::{GnssMessage, ProtocolMessage};

/// Retry policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Attempts per command, including the first
    pub attempt_count: u32,
    /// Per-attempt deadline in milliseconds
    pub command_timeout_ms: u64,
}

impl DeviceConfig {
    /// Per-attempt deadline
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            attempt_count: 3,
            command_timeout_ms: 3000,
        }
    }
}

/// Command errors
#[derive(Error, Debug)]
pub enum CommandError {
    /// Every attempt ran out of time
    #[error("{message} on {transport}: no answer after {attempts} attempts of {timeout:?}")]
    Timeout {
        /// Byte source name
        transport: String,
        /// Command description
        message: String,
        /// Per-attempt deadline
        timeout: Duration,
        /// Attempts made
        attempts: u32,
    },

    /// Receiver rejected the command
    #[error("{message} rejected by receiver (NAK)")]
    Nak {
        /// Command description
        message: String,
    },

    /// Caller cancelled
    #[error("command cancelled")]
    Cancelled,

    /// Another bring-up is in progress
    #[error("device is busy initializing")]
    Busy,

    /// A message with the expected key was not the expected type
    #[error("unexpected reply to {message}: {reply}")]
    Uncorrelated {
        /// Command description
        message: String,
        /// Reply description
        reply: String,
    },

    /// Sending failed
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// Outcome of a command that did not fail
#[derive(Debug, Clone, PartialEq)]
pub enum Completion<T> {
    /// Answered
    Done(T),
    /// Device disposed while waiting
    Stopped,
}

impl<T> Completion<T> {
    /// The value, if answered
    pub fn done(self) -> Option<T> {
        match self {
            Completion::Done(value) => Some(value),
            Completion::Stopped => None,
        }
    }
}

/// ACK or NAK carried by a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acknowledgement<K> {
    /// Accepted
    Ack(K),
    /// Rejected
    Nak(K),
}

/// Protocol-specific correlation rules
pub trait CommandProtocol: Send + Sync + 'static {
    /// Message type commands and replies are made of
    type Message: ProtocolMessage;
    /// Correlation key
    type Key: Clone + PartialEq + fmt::Debug + fmt::Display + Send + Sync + 'static;

    /// This protocol's message, if `message` is one
    fn extract(message: &GnssMessage) -> Option<&Self::Message>;

    /// Wrap for sending
    fn wrap(message: Self::Message) -> GnssMessage;

    /// Key an ACK/NAK or reply must carry to answer `message`
    fn key(message: &Self::Message) -> Self::Key;

    /// ACK/NAK carried by `message`
    fn acknowledgement(message: &Self::Message) -> Option<Acknowledgement<Self::Key>>;
}

/// A typed poll reply
pub trait Reply<P: CommandProtocol>: Sized + Send + 'static {
    /// Decode from a reply message
    fn from_message(message: &P::Message) -> Option<Self>;
}

/// Bring-up state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum DeviceState {
    /// Not initialized
    Idle = 0,
    /// `initialize` running
    Initializing = 1,
    /// Initialized
    Ready = 2,
}

impl DeviceState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Initializing,
            2 => Self::Ready,
            _ => Self::Idle,
        }
    }
}

type Table<P> = PendingTable<<P as CommandProtocol>::Key, <P as CommandProtocol>::Message>;

/// Command channel to one receiver
pub struct Device<P: CommandProtocol> {
    connection: Arc<Connection>,
    config: DeviceConfig,
    pending: Arc<Mutex<Table<P>>>,
    shutdown: CancellationToken,
    state: AtomicU8,
    _protocol: PhantomData<P>,
}

impl<P: CommandProtocol> Device<P> {
    /// Start correlating answers arriving on `connection`
    ///
    /// # Panics
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(connection: Arc<Connection>, config: DeviceConfig) -> Self {
        let device = Self {
            connection,
            config,
            pending: Arc::new(Mutex::new(PendingTable::new())),
            shutdown: CancellationToken::new(),
            state: AtomicU8::new(DeviceState::Idle as u8),
            _protocol: PhantomData,
        };
        device.spawn_listener();
        device
    }

    fn spawn_listener(&self) {
        let mut rx = self.connection.subscribe_messages();
        let pending = self.pending.clone();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    received = rx.recv() => match received {
                        Ok(message) => {
                            if let Some(message) = P::extract(&message) {
                                Self::resolve(&pending, message);
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!("Command listener lagged, {} messages dropped", skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });
    }

    fn resolve(pending: &Mutex<Table<P>>, message: &P::Message) {
        let mut table = pending.lock();
        let matched = match P::acknowledgement(message) {
            Some(Acknowledgement::Ack(key)) => table.ack(&key),
            Some(Acknowledgement::Nak(key)) => table.nak(&key),
            None => table.reply(&P::key(message), message.clone()),
        };
        if matched {
            tracing::trace!("Resolved pending command with {}", message.name());
        }
    }

    /// Connection commands are sent on
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Retry policy
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Bring-up state
    pub fn state(&self) -> DeviceState {
        DeviceState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Send `message` and wait for its ACK
    pub async fn push(
        &self,
        message: P::Message,
        cancel: &CancellationToken,
    ) -> Result<Completion<()>, CommandError> {
        match self.execute(message, Expect::Ack, accept_any, cancel).await? {
            Completion::Done(_) => Ok(Completion::Done(())),
            Completion::Stopped => Ok(Completion::Stopped),
        }
    }

    /// Send `request` and wait for a reply decodable as `R`
    ///
    /// Same-key messages that do not decode as `R` are ignored and the
    /// attempt keeps waiting.
    pub async fn poll<R: Reply<P>>(
        &self,
        request: P::Message,
        cancel: &CancellationToken,
    ) -> Result<Completion<R>, CommandError> {
        let description = P::wrap(request.clone()).describe();
        let accept: Accept<P::Message> = |reply| R::from_message(reply).is_some();
        match self.execute(request, Expect::Reply, accept, cancel).await? {
            Completion::Done(Resolution::Reply(reply)) => match R::from_message(&reply) {
                Some(value) => Ok(Completion::Done(value)),
                None => Err(CommandError::Uncorrelated {
                    message: description,
                    reply: P::wrap(reply).describe(),
                }),
            },
            Completion::Done(_) => Err(CommandError::Uncorrelated {
                message: description,
                reply: "acknowledgement".into(),
            }),
            Completion::Stopped => Ok(Completion::Stopped),
        }
    }

    /// Send with retries until resolved, cancelled, disposed or out of attempts
    async fn execute(
        &self,
        message: P::Message,
        expect: Expect,
        accept: Accept<P::Message>,
        cancel: &CancellationToken,
    ) -> Result<Completion<Resolution<P::Message>>, CommandError> {
        let key = P::key(&message);
        let outgoing = P::wrap(message);
        let description = outgoing.describe();
        let timeout = self.config.command_timeout();
        let attempts = self.config.attempt_count.max(1);

        for attempt in 1..=attempts {
            if self.shutdown.is_cancelled() {
                return Ok(Completion::Stopped);
            }
            if cancel.is_cancelled() {
                return Err(CommandError::Cancelled);
            }

            // registered before sending so a fast answer cannot be missed
            let (_guard, rx) = PendingGuard::register_with(&self.pending, key.clone(), expect, accept);
            // the deadline covers the write as well as the wait
            let exchange = async {
                self.connection.send(&outgoing).await?;
                Ok::<_, ConnectionError>(rx.await)
            };

            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => return Ok(Completion::Stopped),
                () = cancel.cancelled() => return Err(CommandError::Cancelled),
                resolved = exchange => match resolved? {
                    Ok(Resolution::Nak) => {
                        return Err(CommandError::Nak { message: description });
                    }
                    Ok(resolution) => return Ok(Completion::Done(resolution)),
                    Err(_) => return Ok(Completion::Stopped),
                },
                () = tokio::time::sleep(timeout) => {
                    tracing::debug!(
                        "{} attempt {}/{} timed out after {:?}",
                        description, attempt, attempts, timeout
                    );
                }
            }
        }

        Err(CommandError::Timeout {
            transport: self.connection.name(),
            message: description,
            timeout,
            attempts,
        })
    }

    /// Claim the bring-up slot; Idle or Ready move to Initializing
    fn begin_initialize(&self) -> Result<(), CommandError> {
        for from in [DeviceState::Idle, DeviceState::Ready] {
            if self
                .state
                .compare_exchange(
                    from as u8,
                    DeviceState::Initializing as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                return Ok(());
            }
        }
        Err(CommandError::Busy)
    }

    fn end_initialize(&self, ready: bool) {
        let state = if ready { DeviceState::Ready } else { DeviceState::Idle };
        self.state.store(state as u8, Ordering::Release);
    }

    /// Stop the listener; outstanding and future commands complete as Stopped
    pub fn dispose(&self) {
        if !self.shutdown.is_cancelled() {
            tracing::debug!("Disposing device on {}", self.connection.name());
            self.shutdown.cancel();
        }
    }

    /// True once disposed
    pub fn is_disposed(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl<P: CommandProtocol> Drop for Device<P> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
