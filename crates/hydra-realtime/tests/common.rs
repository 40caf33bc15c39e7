//! Shared fixtures for realtime client integration tests.
//!
//! Tests run on a paused tokio clock: time only moves when every task is
//! idle, so `settle` doubles as "let the client finish whatever it is doing".

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use hydra_realtime::memory::{self, MemoryServer};
use hydra_realtime::{ChannelFrame, ClientConfig, RealtimeClient, Subscription};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;

/// Client wired to an in-process server.
pub struct Harness {
    pub client: RealtimeClient,
    pub server: MemoryServer,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_timeout(10_000)
    }

    pub fn with_timeout(request_timeout_ms: u64) -> Self {
        let (connector, server) = memory::pair();
        let config = ClientConfig {
            url: "memory://realtime".to_string(),
            request_timeout_ms,
            ..Default::default()
        };
        let client = RealtimeClient::with_connector(config, Arc::new(connector))
            .expect("client should start inside the test runtime");
        Self { client, server }
    }

    /// Subscribes to `channel` and acknowledges the request.
    pub async fn subscribe(&mut self, channel: &str) -> Subscription {
        let client = self.client.clone();
        let name = channel.to_string();
        let pending = tokio::spawn(async move { client.subscribe(name).await });

        let request = self.server.recv().await.expect("subscribe request");
        assert_eq!(request["subscribe"], json!([channel]));
        assert!(self.server.push(ack(&request, "SUCCESS")));
        pending.await.unwrap().expect("subscribe acknowledged")
    }

    /// Pushes a broadcast on `channel`.
    pub fn broadcast(&self, channel: &str, kind: &str, message: Value) -> bool {
        self.server.push(json!({
            "channel": channel,
            "type": kind,
            "sender": {"guid": "u-1", "name": "alice"},
            "stamp": 1_700_000_000.0,
            "message": message,
        }))
    }

    /// Next request, or `None` if the client has sent nothing more.
    pub async fn quiet_recv(&mut self) -> Option<Value> {
        settle().await;
        self.server.try_recv()
    }
}

pub fn ack(request: &Value, status: &str) -> Value {
    json!({"requestId": request["requestId"], "status": status})
}

/// Lets every task run to idle.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

/// Listener that forwards frames into a channel the test can drain.
pub fn frame_sink() -> (
    impl Fn(&ChannelFrame) + Send + Sync + 'static,
    mpsc::UnboundedReceiver<ChannelFrame>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let listener = move |frame: &ChannelFrame| {
        let _ = tx.send(frame.clone());
    };
    (listener, rx)
}

/// Shared log for callbacks.
pub fn recorder<T: Send + 'static>() -> Arc<Mutex<Vec<T>>> {
    Arc::new(Mutex::new(Vec::new()))
}
