//! WebSocket transport built on `tokio-tungstenite`.

use crate::error::{SyncError, SyncResult};
use crate::transport::{Connector, FrameSink, FrameStream, Link};
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects to `ws://` and `wss://` push endpoints.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, endpoint: &str) -> SyncResult<Link> {
        let (socket, response) = tokio_tungstenite::connect_async(endpoint)
            .await
            .map_err(|e| SyncError::ConnectionRefused(format!("{endpoint}: {e}")))?;
        debug!("WebSocket handshake with {} returned {}", endpoint, response.status());

        let (sink, stream) = socket.split();
        Ok(Link {
            sink: Box::new(WsSink(sink)),
            stream: Box::new(WsStream(stream)),
        })
    }
}

struct WsSink(SplitSink<Socket, Message>);

#[async_trait]
impl FrameSink for WsSink {
    async fn send(&mut self, frame: String) -> SyncResult<()> {
        self.0.send(Message::Text(frame.into())).await?;
        Ok(())
    }

    async fn close(&mut self) -> SyncResult<()> {
        self.0.close().await?;
        Ok(())
    }
}

struct WsStream(SplitStream<Socket>);

#[async_trait]
impl FrameStream for WsStream {
    async fn next_frame(&mut self) -> Option<SyncResult<String>> {
        loop {
            match self.0.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => return Some(Ok(text)),
                    Err(e) => warn!("Dropping non-UTF-8 binary frame: {}", e),
                },
                Ok(Message::Close(frame)) => {
                    debug!("Server closed push socket: {:?}", frame);
                    return None;
                }
                // Ping/pong are answered by tungstenite itself.
                Ok(_) => continue,
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}
