//! TCP transport implementation
//!
//! As a client the source connects to a receiver's TCP port. As a server it
//! listens, merges every client's bytes into one stream and fans writes out
//! to all connected clients.

use super::{ByteSource, TransportError, CHUNK_CAPACITY, READ_BUFFER};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;

/// Client or listening server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TcpMode {
    /// Connect to a remote endpoint
    #[default]
    Client,
    /// Accept connections on a local address
    Server,
}

/// TCP connection configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpConfig {
    /// Host address
    pub host: String,
    /// Port number
    pub port: u16,
    /// Connection timeout in seconds
    pub timeout_secs: u64,
    /// Client or server
    pub mode: TcpMode,
}

impl TcpConfig {
    /// Create a new TCP client configuration
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            timeout_secs: 10,
            mode: TcpMode::Client,
        }
    }

    /// Set timeout
    #[must_use]
    pub fn timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Listen instead of connecting
    #[must_use]
    pub fn server(mut self) -> Self {
        self.mode = TcpMode::Server;
        self
    }

    fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self::new("localhost", 5017)
    }
}

/// TCP byte source
pub struct TcpSource {
    name: String,
    local_addr: Option<SocketAddr>,
    writers: Arc<Mutex<Vec<OwnedWriteHalf>>>,
    tx: broadcast::Sender<Bytes>,
    cancel: CancellationToken,
}

impl TcpSource {
    /// Connect or start listening, depending on the configured mode
    pub async fn open(config: TcpConfig) -> Result<Self, TransportError> {
        let (tx, _) = broadcast::channel(CHUNK_CAPACITY);
        let cancel = CancellationToken::new();
        let writers = Arc::new(Mutex::new(Vec::new()));
        let address = config.address();

        match config.mode {
            TcpMode::Client => {
                let stream = tokio::time::timeout(
                    Duration::from_secs(config.timeout_secs),
                    TcpStream::connect(&address),
                )
                .await
                .map_err(|_| TransportError::Timeout(config.timeout_secs))?
                .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
                stream.set_nodelay(true)?;

                let (read, write) = stream.into_split();
                writers.lock().await.push(write);
                spawn_reader(address.clone(), read, tx.clone(), cancel.clone());
                tracing::info!("Connected to tcp://{}", address);

                Ok(Self {
                    name: format!("tcp://{address}"),
                    local_addr: None,
                    writers,
                    tx,
                    cancel,
                })
            }
            TcpMode::Server => {
                let listener = TcpListener::bind(&address)
                    .await
                    .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
                let local_addr = listener.local_addr()?;
                spawn_acceptor(listener, writers.clone(), tx.clone(), cancel.clone());
                tracing::info!("Listening on tcp://{}", local_addr);

                Ok(Self {
                    name: format!("tcp://{local_addr}?server=true"),
                    local_addr: Some(local_addr),
                    writers,
                    tx,
                    cancel,
                })
            }
        }
    }

    /// Bound address when running as a server
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Connected peers (always 1 for a live client)
    pub async fn peer_count(&self) -> usize {
        self.writers.lock().await.len()
    }
}

fn spawn_reader(
    peer: String,
    mut read: OwnedReadHalf,
    tx: broadcast::Sender<Bytes>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut buffer = vec![0u8; READ_BUFFER];
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                result = read.read(&mut buffer) => match result {
                    Ok(0) => {
                        tracing::info!("Peer {} closed the connection", peer);
                        break;
                    }
                    Ok(n) => {
                        let _ = tx.send(Bytes::copy_from_slice(&buffer[..n]));
                    }
                    Err(e) => {
                        tracing::warn!("Read from {} failed: {}", peer, e);
                        break;
                    }
                },
            }
        }
    });
}

fn spawn_acceptor(
    listener: TcpListener,
    writers: Arc<Mutex<Vec<OwnedWriteHalf>>>,
    tx: broadcast::Sender<Bytes>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tracing::info!("Client {} connected", peer);
                        let _ = stream.set_nodelay(true);
                        let (read, write) = stream.into_split();
                        writers.lock().await.push(write);
                        spawn_reader(peer.to_string(), read, tx.clone(), cancel.clone());
                    }
                    Err(e) => tracing::warn!("Accept failed: {}", e),
                },
            }
        }
    });
}

#[async_trait]
impl ByteSource for TcpSource {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<Bytes> {
        self.tx.subscribe()
    }

    async fn write(&self, data: Bytes) -> Result<usize, TransportError> {
        if self.cancel.is_cancelled() {
            return Err(TransportError::Disconnected);
        }
        let mut writers = self.writers.lock().await;
        if self.local_addr.is_none() {
            let stream = writers.first_mut().ok_or(TransportError::Disconnected)?;
            stream.write_all(&data).await?;
            stream.flush().await?;
            return Ok(data.len());
        }

        // server: drop clients whose write fails
        let mut alive = Vec::with_capacity(writers.len());
        for mut stream in writers.drain(..) {
            match stream.write_all(&data).await {
                Ok(()) => alive.push(stream),
                Err(e) => tracing::info!("Dropping client after write error: {}", e),
            }
        }
        *writers = alive;
        Ok(data.len())
    }

    async fn close(&self) {
        self.cancel.cancel();
        let mut writers = self.writers.lock().await;
        for stream in writers.iter_mut() {
            stream.shutdown().await.ok();
        }
        writers.clear();
    }
}

impl Drop for TcpSource {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_client_server_exchange() {
        let server = TcpSource::open(TcpConfig::new("127.0.0.1", 0).server()).await.unwrap();
        let addr = server.local_addr().unwrap();
        let mut server_rx = server.subscribe();

        let client = TcpSource::open(TcpConfig::new("127.0.0.1", addr.port())).await.unwrap();
        let mut client_rx = client.subscribe();

        client.write(Bytes::from_static(b"\xB5\x62hello")).await.unwrap();
        let got = tokio::time::timeout(Duration::from_secs(2), server_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&got[..], b"\xB5\x62hello");

        assert_eq!(server.peer_count().await, 1);
        server.write(Bytes::from_static(b"ack")).await.unwrap();
        let got = tokio::time::timeout(Duration::from_secs(2), client_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&got[..], b"ack");

        client.close().await;
        assert!(matches!(
            client.write(Bytes::from_static(b"x")).await,
            Err(TransportError::Disconnected)
        ));
        server.close().await;
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let result = TcpSource::open(TcpConfig::new("127.0.0.1", port).timeout(2)).await;
        assert!(result.is_err());
    }
}
