use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;

/// An event produced by the transport layer.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The transport has successfully connected.
    Connected,
    /// One complete relay message has been received.
    DataReceived(Bytes),
    /// The connection was lost.
    Disconnected,
}

/// Represents an active connection to the relay.
/// The transport delivers whole messages and knows nothing about their contents.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends one encoded message to the relay.
    async fn send(&self, data: &[u8]) -> Result<(), anyhow::Error>;

    /// Closes the connection.
    async fn disconnect(&self);
}

/// A factory responsible for creating new transport instances.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Creates a new transport and returns it, along with a stream of events.
    async fn create_transport(
        &self,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error>;
}
