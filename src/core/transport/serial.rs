//! Serial port transport implementation

use super::{ByteSource, TransportError, CHUNK_CAPACITY, READ_BUFFER};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serialport::{DataBits, Parity, SerialPort, StopBits};
use std::fmt;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Serial port parity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SerialParity {
    /// No parity
    #[default]
    None,
    /// Odd parity
    Odd,
    /// Even parity
    Even,
}

impl std::str::FromStr for SerialParity {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "n" => Ok(Self::None),
            "odd" | "o" => Ok(Self::Odd),
            "even" | "e" => Ok(Self::Even),
            _ => Err(TransportError::InvalidConfiguration(format!("unknown parity '{s}'"))),
        }
    }
}

impl fmt::Display for SerialParity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "n",
            Self::Odd => "o",
            Self::Even => "e",
        })
    }
}

/// Serial port configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Port name (e.g., COM3, /dev/ttyUSB0)
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits (5, 6, 7, 8)
    pub data_bits: u8,
    /// Stop bits (1, 2)
    pub stop_bits: u8,
    /// Parity
    pub parity: SerialParity,
}

impl SerialConfig {
    /// Create a new serial configuration with 8N1 framing
    pub fn new(port: &str, baud_rate: u32) -> Self {
        Self {
            port: port.to_string(),
            baud_rate,
            data_bits: 8,
            stop_bits: 1,
            parity: SerialParity::None,
        }
    }

    /// Set data bits
    #[must_use]
    pub fn data_bits(mut self, bits: u8) -> Self {
        self.data_bits = bits;
        self
    }

    /// Set stop bits
    #[must_use]
    pub fn stop_bits(mut self, bits: u8) -> Self {
        self.stop_bits = bits;
        self
    }

    /// Set parity
    #[must_use]
    pub fn parity(mut self, parity: SerialParity) -> Self {
        self.parity = parity;
        self
    }

    /// Reject framing the port driver cannot express
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.baud_rate == 0 {
            return Err(TransportError::InvalidConfiguration("baud rate must be positive".into()));
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(TransportError::InvalidConfiguration(format!(
                "data bits must be 5-8, got {}",
                self.data_bits
            )));
        }
        if !(1..=2).contains(&self.stop_bits) {
            return Err(TransportError::InvalidConfiguration(format!(
                "stop bits must be 1 or 2, got {}",
                self.stop_bits
            )));
        }
        Ok(())
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self::new("/dev/ttyACM0", 115_200)
    }
}

/// Serial port byte source
///
/// A dedicated reader thread polls the port with a short timeout and
/// publishes every chunk it reads.
pub struct SerialSource {
    config: SerialConfig,
    writer: Arc<Mutex<Option<Box<dyn SerialPort>>>>,
    running: Arc<AtomicBool>,
    tx: broadcast::Sender<Bytes>,
}

impl SerialSource {
    /// Open the port and start the reader thread
    pub fn open(config: SerialConfig) -> Result<Self, TransportError> {
        config.validate()?;

        let data_bits = match config.data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            _ => DataBits::Eight,
        };
        let stop_bits = match config.stop_bits {
            2 => StopBits::Two,
            _ => StopBits::One,
        };
        let parity = match config.parity {
            SerialParity::Odd => Parity::Odd,
            SerialParity::Even => Parity::Even,
            SerialParity::None => Parity::None,
        };

        let port = serialport::new(&config.port, config.baud_rate)
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(parity)
            .timeout(Duration::from_millis(100))
            .open()
            .map_err(|e| match e.kind() {
                serialport::ErrorKind::NoDevice => TransportError::PortNotFound(config.port.clone()),
                serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
                    TransportError::PermissionDenied(config.port.clone())
                }
                _ => TransportError::ConnectionFailed(e.to_string()),
            })?;
        let reader = port
            .try_clone()
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        let (tx, _) = broadcast::channel(CHUNK_CAPACITY);
        let running = Arc::new(AtomicBool::new(true));
        Self::spawn_reader(config.port.clone(), reader, tx.clone(), running.clone())?;

        tracing::info!("Opened serial port {} @ {} baud", config.port, config.baud_rate);
        Ok(Self {
            config,
            writer: Arc::new(Mutex::new(Some(port))),
            running,
            tx,
        })
    }

    fn spawn_reader(
        name: String,
        mut port: Box<dyn SerialPort>,
        tx: broadcast::Sender<Bytes>,
        running: Arc<AtomicBool>,
    ) -> Result<(), TransportError> {
        std::thread::Builder::new()
            .name(format!("serial-{name}"))
            .spawn(move || {
                let mut buffer = vec![0u8; READ_BUFFER];
                while running.load(Ordering::Relaxed) {
                    match port.read(&mut buffer) {
                        Ok(0) => {}
                        Ok(n) => {
                            let _ = tx.send(Bytes::copy_from_slice(&buffer[..n]));
                        }
                        Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                        Err(e) => {
                            tracing::warn!("Serial read on {} failed: {}", name, e);
                            running.store(false, Ordering::Relaxed);
                        }
                    }
                }
                tracing::debug!("Serial reader for {} stopped", name);
            })
            .map(|_| ())
            .map_err(TransportError::IoError)
    }
}

#[async_trait]
impl ByteSource for SerialSource {
    fn name(&self) -> String {
        format!(
            "{} @ {} baud ({}{}{})",
            self.config.port,
            self.config.baud_rate,
            self.config.data_bits,
            self.config.parity.to_string().to_uppercase(),
            self.config.stop_bits,
        )
    }

    fn subscribe(&self) -> broadcast::Receiver<Bytes> {
        self.tx.subscribe()
    }

    async fn write(&self, data: Bytes) -> Result<usize, TransportError> {
        if !self.running.load(Ordering::Relaxed) {
            return Err(TransportError::Disconnected);
        }
        let mut guard = self.writer.lock();
        let port = guard.as_mut().ok_or(TransportError::Disconnected)?;
        port.write_all(&data)?;
        port.flush()?;
        Ok(data.len())
    }

    async fn close(&self) {
        self.running.store(false, Ordering::Relaxed);
        self.writer.lock().take();
    }
}

impl Drop for SerialSource {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

/// List available serial ports
pub fn list_ports() -> Result<Vec<serialport::SerialPortInfo>, TransportError> {
    serialport::available_ports().map_err(|e| TransportError::IoError(e.into()))
}
