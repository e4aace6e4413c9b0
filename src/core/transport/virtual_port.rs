//! In-memory loopback port
//!
//! Records everything written to it and lets the caller inject received
//! bytes, either directly or through a responder that reacts to writes the
//! way a receiver would.

use super::{ByteSource, TransportError, CHUNK_CAPACITY};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Produces the bytes a simulated device sends back for one write
pub type Responder = Box<dyn Fn(&[u8]) -> Vec<Bytes> + Send + Sync>;

/// Simulated device port
pub struct VirtualPort {
    name: String,
    tx: broadcast::Sender<Bytes>,
    written: Mutex<Vec<Bytes>>,
    responder: RwLock<Option<Responder>>,
    closed: AtomicBool,
}

impl VirtualPort {
    /// Create a new port
    pub fn new(name: &str) -> Arc<Self> {
        let (tx, _) = broadcast::channel(CHUNK_CAPACITY);
        Arc::new(Self {
            name: name.to_string(),
            tx,
            written: Mutex::new(Vec::new()),
            responder: RwLock::new(None),
            closed: AtomicBool::new(false),
        })
    }

    /// Deliver bytes as if the device had sent them
    pub fn inject(&self, data: impl Into<Bytes>) {
        let _ = self.tx.send(data.into());
    }

    /// React to every subsequent write
    pub fn set_responder<F>(&self, responder: F)
    where
        F: Fn(&[u8]) -> Vec<Bytes> + Send + Sync + 'static,
    {
        *self.responder.write() = Some(Box::new(responder));
    }

    /// Everything written so far, one entry per write
    pub fn written(&self) -> Vec<Bytes> {
        self.written.lock().clone()
    }

    /// Number of writes so far
    pub fn write_count(&self) -> usize {
        self.written.lock().len()
    }

    /// True once `close` has run
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ByteSource for VirtualPort {
    fn name(&self) -> String {
        format!("virtual:{}", self.name)
    }

    fn subscribe(&self) -> broadcast::Receiver<Bytes> {
        self.tx.subscribe()
    }

    async fn write(&self, data: Bytes) -> Result<usize, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Disconnected);
        }
        self.written.lock().push(data.clone());
        let replies = self
            .responder
            .read()
            .as_ref()
            .map(|respond| respond(&data))
            .unwrap_or_default();
        for reply in replies {
            self.inject(reply);
        }
        Ok(data.len())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_responder_echo() {
        let port = VirtualPort::new("echo");
        let mut rx = port.subscribe();
        port.set_responder(|data| vec![Bytes::copy_from_slice(data)]);

        assert_eq!(port.write(Bytes::from_static(b"ping")).await.unwrap(), 4);
        assert_eq!(&rx.recv().await.unwrap()[..], b"ping");
        assert_eq!(port.write_count(), 1);

        port.inject(&b"unsolicited"[..]);
        assert_eq!(&rx.recv().await.unwrap()[..], b"unsolicited");
    }

    #[tokio::test]
    async fn test_closed_rejects_writes() {
        let port = VirtualPort::new("closed");
        port.close().await;
        assert!(matches!(
            port.write(Bytes::from_static(b"x")).await,
            Err(TransportError::Disconnected)
        ));
        assert_eq!(port.write_count(), 0);
        assert_eq!(port.name(), "virtual:closed");
    }
}
