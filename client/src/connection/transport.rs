use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::debug;
use url::Url;

use super::ConnectionError;

/// A connected duplex stream of text frames.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, text: String) -> Result<(), ConnectionError>;

    /// Next text frame. `None` once the peer closed the stream cleanly.
    async fn recv(&mut self) -> Option<Result<String, ConnectionError>>;

    async fn close(&mut self) -> Result<(), ConnectionError>;
}

/// Opens transports. Injected into the connection manager so tests can swap the network out.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &Url) -> Result<Box<dyn Transport>, ConnectionError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, endpoint: &Url) -> Result<Box<dyn Transport>, ConnectionError> {
        let (ws, _) = connect_async(endpoint.as_str())
            .await
            .map_err(|e| ConnectionError::Transport(format!("failed to connect to {endpoint}: {e}")))?;
        Ok(Box::new(WsTransport { ws }))
    }
}

pub struct WsTransport {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, text: String) -> Result<(), ConnectionError> {
        self.ws
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| ConnectionError::Transport(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, ConnectionError>> {
        loop {
            match self.ws.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
                Ok(Message::Close(frame)) => {
                    debug!("Peer closed websocket: {:?}", frame);
                    return None;
                }
                Ok(other) => {
                    debug!("Ignoring non-text websocket frame: {:?}", other);
                }
                Err(e) => return Some(Err(ConnectionError::Transport(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        self.ws
            .close(None)
            .await
            .map_err(|e| ConnectionError::Transport(e.to_string()))
    }
}
