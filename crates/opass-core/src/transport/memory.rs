//! In-memory transport
//!
//! Each [`MemoryConnector::connect`] creates a linked pair: the client gets a
//! [`MemoryTransport`], the test gets the matching [`MemoryPeer`] through the
//! receiver returned by [`MemoryConnector::new`] and plays the companion.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{Connector, Transport};
use crate::config::ClientConfig;
use crate::error::TransportError;

/// Client half of an in-memory channel
#[derive(Debug)]
pub struct MemoryTransport {
    tx: Option<mpsc::UnboundedSender<String>>,
    rx: mpsc::UnboundedReceiver<String>,
}

/// Companion half of an in-memory channel
#[derive(Debug)]
pub struct MemoryPeer {
    tx: Option<mpsc::UnboundedSender<String>>,
    rx: mpsc::UnboundedReceiver<String>,
}

/// Create a linked transport/peer pair
pub fn pair() -> (MemoryTransport, MemoryPeer) {
    let (client_tx, peer_rx) = mpsc::unbounded_channel();
    let (peer_tx, client_rx) = mpsc::unbounded_channel();
    (
        MemoryTransport {
            tx: Some(client_tx),
            rx: client_rx,
        },
        MemoryPeer {
            tx: Some(peer_tx),
            rx: peer_rx,
        },
    )
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;
        tx.send(text).map_err(|_| TransportError::Closed)
    }

    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        self.rx.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.tx = None;
        self.rx.close();
        Ok(())
    }
}

impl MemoryPeer {
    /// Send a message to the client
    pub fn send(&self, text: impl Into<String>) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;
        tx.send(text.into()).map_err(|_| TransportError::Closed)
    }

    /// Next message from the client, `None` once the client closed
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Close the companion side
    pub fn close(&mut self) {
        self.tx = None;
        self.rx.close();
    }
}

/// Connector handing out in-memory transports
#[derive(Debug)]
pub struct MemoryConnector {
    peers: mpsc::UnboundedSender<MemoryPeer>,
}

impl MemoryConnector {
    /// Create a connector and the stream of peers it will produce
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MemoryPeer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        (Self { peers }, rx)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    type Transport = MemoryTransport;

    async fn connect(&self, config: &ClientConfig) -> Result<MemoryTransport, TransportError> {
        let (transport, peer) = pair();
        self.peers.send(peer).map_err(|_| {
            TransportError::Connect(format!("nobody listening at {}", config.address))
        })?;
        Ok(transport)
    }
}
