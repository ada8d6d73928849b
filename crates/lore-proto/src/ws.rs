//! WebSocket connector for the streaming channel
//!
//! A [`Connector`] produces one [`Socket`] per connection attempt. The socket
//! carries text frames only; control frames are handled by the transport.

use std::pin::Pin;

use async_stream::stream;
use async_trait::async_trait;
use futures::{Sink, SinkExt, StreamExt};
use tokio_stream::Stream;
use tokio_tungstenite::tungstenite::Message;

use crate::error::{Error, Result};

/// Outbound half of a connection: accepts encoded text frames
pub type FrameSink = Pin<Box<dyn Sink<String, Error = Error> + Send>>;

/// Inbound half of a connection: yields text frames until the peer goes away
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// One live transport instance
pub struct Socket {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

/// Opens transport instances
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish a new connection
    async fn connect(&self) -> Result<Socket>;

    /// Where this connector dials, for logging
    fn endpoint(&self) -> &str;
}

/// Connector for `ws://` / `wss://` endpoints
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    /// Create a connector for the given URL
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let url = url.into();
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(Error::InvalidConfig(format!(
                "WebSocket URL must be ws(s): {}",
                url
            )));
        }
        Ok(Self { url })
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> Result<Socket> {
        let (ws, _response) = tokio_tungstenite::connect_async(self.url.as_str()).await?;
        tracing::debug!("WebSocket handshake completed with {}", self.url);
        let (write, mut read) = ws.split();

        let sink = write.with(|text: String| async move { Ok::<_, Error>(Message::text(text)) });

        let frames = stream! {
            while let Some(message) = read.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        yield Ok(text.as_str().to_owned());
                    }
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => {
                            yield Ok(text);
                        }
                        Err(_) => {
                            tracing::warn!("Dropping non UTF-8 binary frame ({} bytes)", bytes.len());
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        tracing::debug!("Peer sent close: {:?}", frame);
                        break;
                    }
                    // Ping/pong are answered by tungstenite itself
                    Ok(_) => {}
                    Err(e) => {
                        yield Err(Error::from(e));
                        break;
                    }
                }
            }
        };

        Ok(Socket {
            sink: Box::pin(sink),
            stream: Box::pin(frames),
        })
    }

    fn endpoint(&self) -> &str {
        &self.url
    }
}
