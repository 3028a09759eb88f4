//! WebSocket transport
//!
//! The companion accepts a single WebSocket on its loopback port and checks
//! the `Origin` header against its list of known browser extensions.
//! Outbound messages are JSON text carried in binary frames; inbound text
//! and binary frames are both accepted.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use opass_core::error::TransportError;
use opass_core::{ClientConfig, Connector, Transport};

/// Open WebSocket to the companion
pub struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.stream
            .send(Message::Binary(text.into_bytes()))
            .await
            .map_err(|e| TransportError::Other(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(TransportError::Other(e.to_string()))),
            };

            match message {
                Message::Text(text) => return Some(Ok(text)),
                Message::Binary(data) => {
                    return Some(String::from_utf8(data).map_err(|e| {
                        TransportError::Other(format!("non UTF-8 binary frame: {}", e))
                    }))
                }
                Message::Close(frame) => {
                    tracing::debug!(?frame, "WebSocket closed by companion");
                    return None;
                }
                // Ping/pong are answered by tungstenite
                _ => continue,
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.stream.close(None).await {
            Ok(()) => Ok(()),
            Err(tokio_tungstenite::tungstenite::Error::ConnectionClosed) => Ok(()),
            Err(e) => Err(TransportError::Other(e.to_string())),
        }
    }
}

/// Connector opening [`WsTransport`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    type Transport = WsTransport;

    async fn connect(&self, config: &ClientConfig) -> Result<WsTransport, TransportError> {
        let mut request = config
            .address
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::Connect(format!("Invalid address: {}", e)))?;

        let origin = HeaderValue::from_str(&config.origin)
            .map_err(|e| TransportError::Connect(format!("Invalid origin: {}", e)))?;
        request.headers_mut().insert("Origin", origin);

        let (stream, _response) = connect_async(request).await.map_err(|e| {
            TransportError::Connect(format!(
                "Failed to connect to companion at {}: {}",
                config.address, e
            ))
        })?;

        Ok(WsTransport { stream })
    }
}
