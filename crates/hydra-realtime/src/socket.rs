//! Socket abstraction the connection manager drives.
//!
//! A [`Connector`] opens one text-frame socket per call. The WebSocket
//! implementation is [`WsConnector`]; [`crate::memory`] provides an
//! in-process one.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::debug;

use crate::error::{RealtimeError, Result};

/// Outbound half of a socket: accepts serialized JSON frames.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = RealtimeError> + Send>>;

/// Inbound half of a socket: yields text frames until the socket closes.
///
/// An `Err` item means the socket failed; the stream is not polled again.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// An open socket split into its two halves.
pub struct Socket {
    /// Frames to the server.
    pub sink: FrameSink,
    /// Frames from the server.
    pub stream: FrameStream,
}

/// Opens sockets to a realtime endpoint.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a new socket to `url`.
    async fn connect(&self, url: &str) -> Result<Socket>;
}

/// WebSocket connector backed by `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl WsConnector {
    /// Creates a new WebSocket connector.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Socket> {
        let (ws, _response) = connect_async(url)
            .await
            .map_err(|e| RealtimeError::Connect {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        debug!(url = url, "websocket connected");

        let (write, read) = ws.split();
        let sink = write
            .with(|text: String| future::ready(Ok::<_, tungstenite::Error>(Message::Text(text))))
            .sink_map_err(|e| RealtimeError::WebSocket(e.to_string()));
        let stream = read.filter_map(|message| {
            future::ready(match message {
                Ok(Message::Text(text)) => Some(Ok(text)),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => Some(Ok(text)),
                    Err(_) => {
                        debug!("dropping non-utf8 binary frame");
                        None
                    }
                },
                Ok(_) => None,
                Err(e) => Some(Err(RealtimeError::WebSocket(e.to_string()))),
            })
        });

        Ok(Socket {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ws_connect_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = WsConnector::new()
            .connect(&format!("ws://{addr}/rt"))
            .await;
        match result {
            Err(err) => assert!(err.is_transport()),
            Ok(_) => panic!("connect to a closed port succeeded"),
        }
    }

    #[tokio::test]
    async fn test_ws_text_roundtrip() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(message)) = ws.next().await {
                if let Message::Text(text) = message {
                    ws.send(Message::Text(format!("echo:{text}"))).await.unwrap();
                    break;
                }
            }
        });

        let mut socket = WsConnector::new()
            .connect(&format!("ws://{addr}/rt"))
            .await
            .unwrap();
        socket.sink.send("ping".to_string()).await.unwrap();
        let reply = socket.stream.next().await.unwrap().unwrap();
        assert_eq!(reply, "echo:ping");

        server.await.unwrap();
    }
}
