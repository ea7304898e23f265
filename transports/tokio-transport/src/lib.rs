//! Tokio WebSocket transport for the signaling relay.
//!
//! Each relay message travels as one text frame, so the transport hands
//! whole messages up without any framing of its own.

use async_trait::async_trait;
use bytes::Bytes;
use callcore::net::{Transport, TransportEvent, TransportFactory};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, trace, warn};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type RawWs = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<RawWs, Message>;
type WsStream = SplitStream<RawWs>;

pub const DEFAULT_RELAY_URL: &str = "ws://localhost:8081/ws";
const MESSAGE_MAX_SIZE: usize = 1 << 20;
const EVENT_CHANNEL_CAPACITY: usize = 100;

pub struct TokioWebSocketTransport {
    ws_sink: Mutex<Option<WsSink>>,
}

impl TokioWebSocketTransport {
    fn new(sink: WsSink) -> Self {
        Self {
            ws_sink: Mutex::new(Some(sink)),
        }
    }
}

/// Relay messages are JSON; anything else is refused before it hits the wire.
fn text_message(data: &[u8]) -> Result<Message, anyhow::Error> {
    if data.len() > MESSAGE_MAX_SIZE {
        return Err(anyhow::anyhow!(
            "Message is too large (max: {}, got: {})",
            MESSAGE_MAX_SIZE,
            data.len()
        ));
    }
    let text = std::str::from_utf8(data)
        .map_err(|e| anyhow::anyhow!("Relay messages must be UTF-8: {}", e))?;
    Ok(Message::text(text.to_owned()))
}

#[async_trait]
impl Transport for TokioWebSocketTransport {
    async fn send(&self, data: &[u8]) -> Result<(), anyhow::Error> {
        let mut sink_guard = self.ws_sink.lock().await;
        let sink = sink_guard
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("Socket is closed"))?;

        let message = text_message(data)?;
        trace!("--> Sending {} bytes", data.len());
        sink.send(message)
            .await
            .map_err(|e| anyhow::anyhow!("WebSocket send error: {}", e))
    }

    async fn disconnect(&self) {
        if let Some(mut sink) = self.ws_sink.lock().await.take() {
            if let Err(e) = sink.close().await {
                debug!("Error closing websocket: {}", e);
            }
        }
    }
}

/// Factory for WebSocket connections to one relay URL.
pub struct TokioWebSocketTransportFactory {
    url: String,
}

impl TokioWebSocketTransportFactory {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Default for TokioWebSocketTransportFactory {
    fn default() -> Self {
        Self::new(DEFAULT_RELAY_URL)
    }
}

#[async_trait]
impl TransportFactory for TokioWebSocketTransportFactory {
    async fn create_transport(
        &self,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error> {
        info!("Dialing {}", self.url);
        let (client, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| anyhow::anyhow!("WebSocket connect failed: {}", e))?;

        let (sink, stream) = client.split();
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let transport = Arc::new(TokioWebSocketTransport::new(sink));

        tokio::task::spawn(read_pump(stream, event_tx.clone()));
        let _ = event_tx.send(TransportEvent::Connected).await;

        Ok((transport, event_rx))
    }
}

async fn read_pump(mut stream: WsStream, event_tx: mpsc::Sender<TransportEvent>) {
    loop {
        match stream.next().await {
            Some(Ok(msg)) => {
                let data = match msg {
                    Message::Text(text) => Bytes::copy_from_slice(text.as_bytes()),
                    Message::Binary(data) => Bytes::copy_from_slice(&data),
                    Message::Close(_) => {
                        trace!("Received close frame");
                        break;
                    }
                    _ => continue,
                };
                trace!("<-- Received {} bytes", data.len());
                if event_tx
                    .send(TransportEvent::DataReceived(data))
                    .await
                    .is_err()
                {
                    warn!("Event receiver dropped, closing read pump");
                    break;
                }
            }
            Some(Err(e)) => {
                error!("Error reading from websocket: {e}");
                break;
            }
            None => {
                trace!("Websocket stream ended");
                break;
            }
        }
    }

    let _ = event_tx.send(TransportEvent::Disconnected).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_is_sent_as_text() {
        let message = text_message(br#"{"type":"call-end","from":"u1","to":"u2"}"#).unwrap();
        assert!(message.is_text());
        assert_eq!(message.len(), 41);
    }

    #[test]
    fn test_rejects_non_utf8_and_oversized() {
        assert!(text_message(&[0xff, 0xfe]).is_err());
        assert!(text_message(&vec![b'a'; MESSAGE_MAX_SIZE + 1]).is_err());
    }

    #[test]
    fn test_default_factory_targets_local_relay() {
        let factory = TokioWebSocketTransportFactory::default();
        assert_eq!(factory.url(), DEFAULT_RELAY_URL);
    }
}
