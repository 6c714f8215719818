//! Transport seam between the connection core and the WebSocket.
//!
//! The core only ever speaks text frames, so the seam is two small traits:
//! [`Connect`] opens a transport for an endpoint URL and [`Transport`] moves
//! frames. Production uses [`WsConnector`]; tests drive the client through
//! an in-memory implementation.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream,
    WebSocketStream,
    connect_async,
    tungstenite::Message,
};

use crate::error::TransportError;

/// A bidirectional text-frame transport.
#[async_trait]
pub trait Transport: Send {
    /// Send one text frame to the peer.
    async fn send(&mut self, frame: String) -> Result<(), TransportError>;

    /// Receive the next text frame; `None` once the peer has closed.
    async fn recv(&mut self) -> Option<Result<String, TransportError>>;

    /// Close the transport, flushing queued frames where possible.
    async fn close(&mut self);
}

/// Opens transports on behalf of the connection core.
#[async_trait]
pub trait Connect: Send + Sync {
    /// Open a transport to `url`.
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, TransportError>;
}

/// Default connector backed by `tokio-tungstenite`.
#[derive(Clone, Copy, Debug, Default)]
pub struct WsConnector;

#[async_trait]
impl Connect for WsConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, TransportError> {
        let (stream, _response) = connect_async(url).await?;
        Ok(Box::new(WsTransport { stream }))
    }
}

struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, frame: String) -> Result<(), TransportError> {
        self.stream
            .send(Message::Text(frame.into()))
            .await
            .map_err(TransportError::from)
    }

    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
                // WebSocket-level pings are answered by tungstenite on
                // flush; only the JSON keepalive matters to the core.
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_) | Message::Frame(_)) => {}
                Ok(Message::Close(_)) => return None,
                Err(err) => return Some(Err(TransportError::from(err))),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(err) = self.stream.close(None).await {
            tracing::debug!(error = %err, "websocket close failed");
        }
    }
}
