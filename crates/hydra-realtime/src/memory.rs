//! In-process connector for tests and embedding.
//!
//! [`pair`] returns a [`MemoryConnector`] to hand to the client and a
//! [`MemoryServer`] that plays the remote end: it reads what the client
//! sends, pushes frames to the client's current socket, closes that socket,
//! and can refuse new connections to simulate an outage.

use std::sync::Arc;

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::{RealtimeError, Result};
use crate::socket::{Connector, Socket};

struct Link {
    id: usize,
    to_client: mpsc::UnboundedSender<Result<String>>,
}

struct MemoryState {
    refusing: bool,
    accepted: usize,
    refused: usize,
    current: Option<Link>,
    to_server: mpsc::UnboundedSender<String>,
}

/// Client side of an in-process transport.
#[derive(Clone)]
pub struct MemoryConnector {
    state: Arc<Mutex<MemoryState>>,
}

/// Server side of an in-process transport.
pub struct MemoryServer {
    state: Arc<Mutex<MemoryState>>,
    from_client: mpsc::UnboundedReceiver<String>,
}

/// Creates a connected connector/server pair.
pub fn pair() -> (MemoryConnector, MemoryServer) {
    let (to_server, from_client) = mpsc::unbounded();
    let state = Arc::new(Mutex::new(MemoryState {
        refusing: false,
        accepted: 0,
        refused: 0,
        current: None,
        to_server,
    }));
    (
        MemoryConnector {
            state: state.clone(),
        },
        MemoryServer { state, from_client },
    )
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &str) -> Result<Socket> {
        let mut state = self.state.lock();
        if state.refusing {
            state.refused += 1;
            return Err(RealtimeError::Connect {
                url: url.to_string(),
                reason: "connection refused".to_string(),
            });
        }

        let (to_client, from_server) = mpsc::unbounded();
        state.accepted += 1;
        state.current = Some(Link {
            id: state.accepted,
            to_client,
        });

        let sink = state
            .to_server
            .clone()
            .sink_map_err(|e| RealtimeError::WebSocket(e.to_string()));
        Ok(Socket {
            sink: Box::pin(sink),
            stream: from_server.boxed(),
        })
    }
}

impl MemoryServer {
    /// Next frame the client sent, parsed as JSON.
    pub async fn recv(&mut self) -> Option<Value> {
        let text = self.from_client.next().await?;
        serde_json::from_str(&text).ok()
    }

    /// Next frame the client sent, if one is already queued.
    pub fn try_recv(&mut self) -> Option<Value> {
        match self.from_client.try_next() {
            Ok(Some(text)) => serde_json::from_str(&text).ok(),
            _ => None,
        }
    }

    /// Pushes a JSON frame to the client's current socket.
    ///
    /// Returns `false` when no socket is open.
    pub fn push(&self, frame: Value) -> bool {
        self.push_text(frame.to_string())
    }

    /// Pushes a raw text frame to the client's current socket.
    pub fn push_text(&self, text: impl Into<String>) -> bool {
        let state = self.state.lock();
        match &state.current {
            Some(link) => link.to_client.unbounded_send(Ok(text.into())).is_ok(),
            None => false,
        }
    }

    /// Closes the client's current socket cleanly.
    pub fn close(&self) -> bool {
        self.state.lock().current.take().is_some()
    }

    /// Fails the client's current socket with a transport error.
    pub fn fail(&self, reason: &str) -> bool {
        let Some(link) = self.state.lock().current.take() else {
            return false;
        };
        link.to_client
            .unbounded_send(Err(RealtimeError::WebSocket(reason.to_string())))
            .is_ok()
    }

    /// Makes new connection attempts fail (or succeed again).
    pub fn set_refusing(&self, refusing: bool) {
        self.state.lock().refusing = refusing;
    }

    /// Number of sockets accepted so far.
    pub fn accepted(&self) -> usize {
        self.state.lock().accepted
    }

    /// Number of connection attempts refused so far.
    pub fn refused(&self) -> usize {
        self.state.lock().refused
    }

    /// Sequence number of the current socket, starting at 1.
    pub fn current_socket(&self) -> Option<usize> {
        self.state.lock().current.as_ref().map(|link| link.id)
    }
}
