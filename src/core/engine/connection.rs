use crate::core::engine::codec::OutboundFrame;
use crate::core::errors::EngineError;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{instrument, warn};

/// Transport contract: one physical socket, exclusive read/write access.
///
/// Transient I/O failures surface to the caller unchanged - retry policy
/// belongs to the run loop, not the transport. `receive` yields `Ok(None)`
/// once the peer has closed the connection.
#[async_trait]
pub trait Connection: Send {
    async fn open(&mut self) -> Result<(), EngineError>;

    async fn send(&mut self, frame: OutboundFrame) -> Result<(), EngineError>;

    /// Next inbound text frame. Control frames (ping/pong) are absorbed at
    /// this level and never reach the dispatcher.
    async fn receive(&mut self) -> Result<Option<String>, EngineError>;

    async fn close(&mut self) -> Result<(), EngineError>;

    fn is_open(&self) -> bool;
}

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Tungstenite-backed production transport.
pub struct TungsteniteConnection {
    url: String,
    write: Option<futures_util::stream::SplitSink<WsStream, Message>>,
    read: Option<futures_util::stream::SplitStream<WsStream>>,
    connected: bool,
    connect_timeout: Duration,
}

impl TungsteniteConnection {
    pub fn new(url: String, connect_timeout_ms: u64) -> Self {
        Self {
            url,
            write: None,
            read: None,
            connected: false,
            connect_timeout: Duration::from_millis(connect_timeout_ms),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn pong(&mut self, payload: Vec<u8>) {
        if let Some(write) = self.write.as_mut() {
            if let Err(e) = write.send(Message::Pong(payload)).await {
                warn!(url = %self.url, error = %e, "failed to send pong response");
            }
        }
    }
}

#[async_trait]
impl Connection for TungsteniteConnection {
    #[instrument(skip(self), fields(url = %self.url))]
    async fn open(&mut self) -> Result<(), EngineError> {
        let connection_future = tokio::time::timeout(self.connect_timeout, connect_async(&self.url));

        let (ws_stream, _) = connection_future
            .await
            .map_err(|_| {
                EngineError::ConnectionTimeout("WebSocket connection timeout".to_string())
            })?
            .map_err(|e| {
                EngineError::TransportError(format!("WebSocket connection failed: {}", e))
            })?;

        let (write, read) = ws_stream.split();
        self.write = Some(write);
        self.read = Some(read);
        self.connected = true;

        Ok(())
    }

    #[instrument(skip(self, frame), fields(url = %self.url))]
    async fn send(&mut self, frame: OutboundFrame) -> Result<(), EngineError> {
        if !self.connected {
            return Err(EngineError::TransportError(
                "WebSocket not connected".to_string(),
            ));
        }

        let msg = frame.to_message()?;
        let write = self.write.as_mut().ok_or_else(|| {
            EngineError::TransportError("WebSocket write stream not available".to_string())
        })?;

        write.send(msg).await.map_err(|e| {
            self.connected = false;
            EngineError::TransportError(format!("Failed to send WebSocket message: {}", e))
        })?;

        Ok(())
    }

    #[instrument(skip(self), fields(url = %self.url))]
    async fn receive(&mut self) -> Result<Option<String>, EngineError> {
        if !self.connected {
            return Err(EngineError::TransportError(
                "WebSocket not connected".to_string(),
            ));
        }

        loop {
            let read = match self.read.as_mut() {
                Some(read) => read,
                None => return Ok(None),
            };

            match read.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text)),
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                    Ok(text) => return Ok(Some(text)),
                    Err(_) => {
                        warn!(url = %self.url, "dropping non-UTF-8 binary frame");
                    }
                },
                Some(Ok(Message::Ping(payload))) => {
                    self.pong(payload).await;
                }
                Some(Ok(Message::Pong(_) | Message::Frame(_))) => {}
                Some(Ok(Message::Close(_))) => {
                    self.connected = false;
                    return Ok(None);
                }
                Some(Err(e)) => {
                    self.connected = false;
                    return Err(EngineError::TransportError(format!(
                        "WebSocket error: {}",
                        e
                    )));
                }
                None => {
                    self.connected = false;
                    return Ok(None);
                }
            }
        }
    }

    #[instrument(skip(self), fields(url = %self.url))]
    async fn close(&mut self) -> Result<(), EngineError> {
        if let Some(write) = self.write.as_mut() {
            let _ = write.send(Message::Close(None)).await;
        }
        self.connected = false;
        self.write = None;
        self.read = None;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.connected
    }
}
