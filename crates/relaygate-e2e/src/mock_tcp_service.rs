//! Mock TCP service for E2E tests
//!
//! Stands in for the local service behind a forwarded port: echoes what it
//! receives, optionally after a banner identifying which service answered.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// Behavior mode for the mock TCP service
#[derive(Clone, Debug)]
pub enum TcpServiceMode {
    /// Echo back all received data
    Echo,
    /// Send the banner first, then echo
    Banner(Vec<u8>),
}

/// A recorded TCP connection
#[derive(Clone, Debug)]
pub struct RecordedTcpConnection {
    /// All data received on this connection
    pub received_data: Vec<u8>,
    /// Peer address
    pub peer_addr: SocketAddr,
}

/// A mock TCP service for testing
pub struct MockTcpService {
    addr: SocketAddr,
    connections: Arc<RwLock<Vec<RecordedTcpConnection>>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl MockTcpService {
    /// Echo service on an ephemeral loopback port
    pub async fn start() -> Self {
        Self::start_on("127.0.0.1:0", TcpServiceMode::Echo).await
    }

    /// Service announcing `banner` on an ephemeral loopback port
    pub async fn start_with_banner(banner: &str) -> Self {
        Self::start_on("127.0.0.1:0", TcpServiceMode::Banner(banner.as_bytes().to_vec())).await
    }

    /// Start on a specific address
    pub async fn start_on(addr: &str, mode: TcpServiceMode) -> Self {
        let listener = TcpListener::bind(addr)
            .await
            .expect("Failed to bind mock TCP service");
        let addr = listener.local_addr().unwrap();

        let connections: Arc<RwLock<Vec<RecordedTcpConnection>>> =
            Arc::new(RwLock::new(Vec::new()));
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let connections_clone = connections.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::debug!("Mock TCP service on {} shutting down", addr);
                        break;
                    }
                    result = listener.accept() => {
                        match result {
                            Ok((stream, peer_addr)) => {
                                let connections = connections_clone.clone();
                                let mode = mode.clone();
                                tokio::spawn(async move {
                                    handle_connection(stream, peer_addr, connections, mode).await;
                                });
                            }
                            Err(e) => {
                                tracing::error!("TCP accept error: {}", e);
                                break;
                            }
                        }
                    }
                }
            }
        });

        Self {
            addr,
            connections,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn get_connections(&self) -> Vec<RecordedTcpConnection> {
        self.connections.read().clone()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    /// Shutdown the service
    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
    }
}

impl Drop for MockTcpService {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.try_send(());
        }
    }
}

async fn handle_connection(
    mut stream: tokio::net::TcpStream,
    peer_addr: SocketAddr,
    connections: Arc<RwLock<Vec<RecordedTcpConnection>>>,
    mode: TcpServiceMode,
) {
    let mut received_data = Vec::new();
    let mut buf = [0u8; 4096];

    if let TcpServiceMode::Banner(banner) = &mode {
        if let Err(e) = stream.write_all(banner).await {
            tracing::error!("Banner write error: {}", e);
            return;
        }
    }

    loop {
        match stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                received_data.extend_from_slice(&buf[..n]);
                if let Err(e) = stream.write_all(&buf[..n]).await {
                    tracing::error!("Echo write error: {}", e);
                    break;
                }
            }
            Err(e) => {
                tracing::error!("Echo read error: {}", e);
                break;
            }
        }
    }

    connections.write().push(RecordedTcpConnection {
        received_data,
        peer_addr,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn test_banner_then_echo() {
        let service = MockTcpService::start_with_banner("svc-a\n").await;

        let mut stream = TcpStream::connect(service.addr()).await.unwrap();
        let mut banner = [0u8; 6];
        stream.read_exact(&mut banner).await.unwrap();
        assert_eq!(&banner, b"svc-a\n");

        stream.write_all(b"ping").await.unwrap();
        let mut echo = [0u8; 4];
        stream.read_exact(&mut echo).await.unwrap();
        assert_eq!(&echo, b"ping");
    }
}
