//! WebSocket channel over `tokio-tungstenite`.

use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use super::{Connector, FrameChannel};
use crate::error::TransportError;

/// Dials `ws://host:port/ws`-style endpoints.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        WsConnector { url: url.into() }
    }
}

impl Connector for WsConnector {
    type Channel = WsChannel;

    async fn dial(&self) -> Result<WsChannel, TransportError> {
        let (stream, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::Connect(format!("{}: {e}", self.url)))?;
        debug!(url = %self.url, "websocket handshake complete");
        Ok(WsChannel { stream })
    }
}

pub struct WsChannel {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl FrameChannel for WsChannel {
    async fn next_frame(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(Message::Close(_)) => return None,
                // Pings are answered by tungstenite; binary frames are not part
                // of the protocol.
                Ok(_) => continue,
                Err(e) => return Some(Err(TransportError::Channel(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!(error = %e, "websocket close handshake failed");
        }
    }
}
