//! Realtime client and the connection manager behind it.
//!
//! [`RealtimeClient`] is a cheap, cloneable handle. All state lives in a
//! single [`ConnectionManager`] task: the socket, the pending-request table,
//! the channel registry and the reconnect schedule. Handles talk to it over
//! an unbounded command queue; socket tasks talk to it over an event queue.
//! The manager never waits on a socket: outbound frames go to the socket
//! task through its own queue, so a peer that stops reading cannot hold up
//! timeouts or other traffic.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::backoff::ReconnectBackoff;
use crate::config::ClientConfig;
use crate::error::{RealtimeError, Result};
use crate::protocol::{self, ChannelId, Inbound};
use crate::request::{PendingRequests, Reply, Settlement};
use crate::socket::{Connector, FrameSink, FrameStream, Socket, WsConnector};
use crate::subscription::{
    Removal, Subscription, SubscriptionId, SubscriptionRegistry, SubscriptionShared,
};

/// Callback for connectivity changes: `false` when a socket is lost, `true`
/// once the connection is restored.
pub type ConnectivityListener = Arc<dyn Fn(bool) + Send + Sync>;

/// Externally visible connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket has been opened yet.
    Disconnected,
    /// The first socket is being opened.
    Connecting,
    /// A socket is open.
    Open,
    /// The socket was lost; waiting for or performing a reconnect attempt.
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}

pub(crate) enum Command {
    Send {
        payload: Map<String, Value>,
        reply: oneshot::Sender<Result<Value>>,
    },
    Subscribe {
        handle: Arc<SubscriptionShared>,
        reply: oneshot::Sender<Result<Value>>,
    },
    Unsubscribe {
        channel: ChannelId,
        id: SubscriptionId,
    },
    WatchConnectivity(ConnectivityListener),
}

enum SocketEvent {
    Opened {
        socket: u64,
        outbound: mpsc::UnboundedSender<String>,
        shutdown: oneshot::Sender<()>,
    },
    ConnectFailed {
        socket: u64,
        error: RealtimeError,
    },
    Frame {
        socket: u64,
        text: String,
    },
    Closed {
        socket: u64,
    },
}

enum SocketSlot {
    Disconnected,
    Connecting {
        id: u64,
    },
    Open {
        id: u64,
        outbound: mpsc::UnboundedSender<String>,
        // Dropping this stops the socket's task.
        _shutdown: oneshot::Sender<()>,
    },
}

impl SocketSlot {
    fn id(&self) -> Option<u64> {
        match self {
            SocketSlot::Disconnected => None,
            SocketSlot::Connecting { id } | SocketSlot::Open { id, .. } => Some(*id),
        }
    }

    fn open_id(&self) -> Option<u64> {
        match self {
            SocketSlot::Open { id, .. } => Some(*id),
            _ => None,
        }
    }
}

struct Outbound {
    payload: Map<String, Value>,
    reply: Reply,
    resubscribe: bool,
}

impl Outbound {
    fn new(payload: Map<String, Value>, reply: Reply) -> Self {
        Self {
            payload,
            reply,
            resubscribe: false,
        }
    }
}

/// Owner of the socket and every piece of client state.
pub(crate) struct ConnectionManager {
    url: String,
    connector: Arc<dyn Connector>,
    backoff: ReconnectBackoff,
    connect_timeout: Duration,
    requests: PendingRequests,
    registry: SubscriptionRegistry,
    slot: SocketSlot,
    next_socket: u64,
    reconnecting: bool,
    attempts: u32,
    restore_armed: bool,
    waiting: VecDeque<Outbound>,
    retry_at: Option<Instant>,
    connectivity: Vec<ConnectivityListener>,
    commands: mpsc::UnboundedReceiver<Command>,
    events_tx: mpsc::UnboundedSender<SocketEvent>,
    events: mpsc::UnboundedReceiver<SocketEvent>,
    status: watch::Sender<ConnectionState>,
}

async fn retry_timer(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

impl ConnectionManager {
    /// Runs until every client and subscription handle has been dropped.
    pub(crate) async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(event) = self.events.recv() => self.handle_event(event),
                Some(request_id) = self.requests.next_timeout(), if !self.requests.is_empty() => {
                    warn!(request_id, "request timed out");
                }
                _ = retry_timer(self.retry_at) => {
                    self.retry_at = None;
                    self.open_socket();
                }
            }
        }
        debug!(url = %self.url, pending = self.requests.len(), "realtime client shut down");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Send { payload, reply } => self.enqueue(payload, Some(reply)),
            Command::Subscribe { handle, reply } => {
                let channel = handle.channel().to_string();
                debug!(channel = %channel, subscription = handle.id(), "subscribing");
                self.registry.add(handle);
                self.enqueue(protocol::subscribe_request(&[channel]), Some(reply));
            }
            Command::Unsubscribe { channel, id } => match self.registry.remove(&channel, id) {
                Removal::ChannelEmptied => {
                    debug!(channel = %channel, "last handle left, unsubscribing");
                    self.enqueue(protocol::unsubscribe_request(&[channel]), None);
                }
                Removal::Remaining(left) => {
                    debug!(channel = %channel, left, "handle left channel");
                }
                Removal::UnknownChannel => {
                    debug!(channel = %channel, "unsubscribe for unknown channel");
                }
            },
            Command::WatchConnectivity(listener) => self.connectivity.push(listener),
        }
    }

    fn handle_event(&mut self, event: SocketEvent) {
        match event {
            SocketEvent::Opened {
                socket,
                outbound,
                shutdown,
            } => self.on_open(socket, outbound, shutdown),
            SocketEvent::ConnectFailed { socket, error } => {
                if self.slot.id() == Some(socket) {
                    warn!(url = %self.url, socket, error = %error, "connect failed");
                }
                self.on_socket_closed(socket);
            }
            SocketEvent::Frame { socket, text } => self.on_frame(socket, &text),
            SocketEvent::Closed { socket } => self.on_socket_closed(socket),
        }
    }

    /// Sends now when a socket is open, otherwise queues until the next open.
    fn enqueue(&mut self, payload: Map<String, Value>, reply: Reply) {
        let outbound = Outbound::new(payload, reply);
        if self.slot.open_id().is_some() {
            self.transmit(outbound);
        } else {
            self.waiting.push_back(outbound);
            self.ensure_connecting();
        }
    }

    fn ensure_connecting(&mut self) {
        // During a reconnect cycle the retry timer owns the next attempt.
        if matches!(self.slot, SocketSlot::Disconnected) && self.retry_at.is_none() {
            self.open_socket();
        }
    }

    fn open_socket(&mut self) {
        self.next_socket += 1;
        let socket = self.next_socket;
        self.slot = SocketSlot::Connecting { id: socket };
        self.publish_state();
        debug!(url = %self.url, socket, attempt = self.attempts, "opening socket");

        tokio::spawn(run_socket(
            self.connector.clone(),
            self.url.clone(),
            socket,
            self.connect_timeout,
            self.events_tx.clone(),
        ));
    }

    fn on_open(
        &mut self,
        socket: u64,
        outbound: mpsc::UnboundedSender<String>,
        shutdown: oneshot::Sender<()>,
    ) {
        if !matches!(self.slot, SocketSlot::Connecting { id } if id == socket) {
            debug!(socket, "discarding stale socket");
            return;
        }
        info!(url = %self.url, socket, "socket open");
        self.slot = SocketSlot::Open {
            id: socket,
            outbound,
            _shutdown: shutdown,
        };
        self.reconnecting = false;
        self.attempts = 0;
        self.retry_at = None;
        self.publish_state();

        if std::mem::take(&mut self.restore_armed) {
            info!(url = %self.url, "connection restored");
            self.notify_connectivity(true);
            for handle in self.registry.all_handles() {
                handle.notify_connection_restored();
            }
        }
        self.flush();
    }

    fn flush(&mut self) {
        while self.slot.open_id().is_some() {
            let Some(outbound) = self.waiting.pop_front() else {
                break;
            };
            self.transmit(outbound);
        }
    }

    fn transmit(&mut self, outbound: Outbound) {
        let SocketSlot::Open { id, outbound: frames, .. } = &self.slot else {
            self.waiting.push_back(outbound);
            self.ensure_connecting();
            return;
        };
        let socket = *id;
        let request_id = self.requests.next_id();
        let text = match protocol::encode_request(&outbound.payload, request_id) {
            Ok(text) => text,
            Err(e) => {
                if let Some(reply) = outbound.reply {
                    let _ = reply.send(Err(e));
                }
                return;
            }
        };

        let sent = frames.send(text).is_ok();
        self.requests.register(request_id, outbound.reply);
        debug!(socket, request_id, "sending request");
        if !sent {
            // The request stays pending and times out; it is not replayed.
            warn!(socket, request_id, "socket writer gone");
            self.on_socket_closed(socket);
        }
    }

    fn on_frame(&mut self, socket: u64, text: &str) {
        if self.slot.open_id() != Some(socket) {
            debug!(socket, "dropping frame from stale socket");
            return;
        }
        match protocol::decode_inbound(text) {
            Ok(Inbound::Response {
                request_id: Some(request_id),
                response,
            }) => match self.requests.settle(request_id, response) {
                Settlement::Resolved => debug!(request_id, "request acknowledged"),
                Settlement::Rejected => warn!(request_id, "request rejected"),
                Settlement::Unknown => debug!(request_id, "response for unknown request"),
            },
            Ok(Inbound::Response {
                request_id: None, ..
            }) => debug!("response with non-numeric requestId"),
            Ok(Inbound::Broadcast(frame)) => {
                let delivered = self.registry.dispatch(&frame);
                debug!(channel = %frame.channel(), delivered, "broadcast");
            }
            Ok(Inbound::Ignored) => debug!("ignoring frame"),
            Err(e) => error!(socket, error = %e, "undecodable frame"),
        }
    }

    fn on_socket_closed(&mut self, socket: u64) {
        if self.slot.id() != Some(socket) {
            debug!(socket, "stale socket closed");
            return;
        }
        self.slot = SocketSlot::Disconnected;
        self.notify_connectivity(false);

        if !self.reconnecting {
            self.reconnecting = true;
            self.attempts = 0;
            for handle in self.registry.all_handles() {
                handle.notify_connection_lost();
            }
            self.restore_armed = true;
            // Resubscribes a failed flush never wrote are replaced, not repeated.
            self.waiting.retain(|outbound| !outbound.resubscribe);
            for channel in self.registry.channels() {
                self.waiting.push_back(Outbound {
                    payload: protocol::subscribe_request(&[channel]),
                    reply: None,
                    resubscribe: true,
                });
            }
        }

        self.attempts += 1;
        let delay = self.backoff.delay_for(self.attempts);
        warn!(
            url = %self.url,
            attempt = self.attempts,
            delay_ms = delay.as_millis() as u64,
            "socket closed, scheduling reconnect"
        );
        self.retry_at = Some(Instant::now() + delay);
        self.publish_state();
    }

    fn notify_connectivity(&self, connected: bool) {
        for listener in &self.connectivity {
            listener(connected);
        }
    }

    fn publish_state(&self) {
        let state = match (&self.slot, self.reconnecting) {
            (SocketSlot::Open { .. }, _) => ConnectionState::Open,
            (_, true) => ConnectionState::Reconnecting,
            (SocketSlot::Connecting { .. }, false) => ConnectionState::Connecting,
            (SocketSlot::Disconnected, false) => ConnectionState::Disconnected,
        };
        self.status.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
    }
}

/// Opens one socket, then pumps frames both ways until the socket ends or
/// the manager lets go of it.
///
/// Reading and writing run as separate futures, so a stalled write never
/// keeps inbound frames from reaching the manager.
async fn run_socket(
    connector: Arc<dyn Connector>,
    url: String,
    socket: u64,
    connect_timeout: Duration,
    events: mpsc::UnboundedSender<SocketEvent>,
) {
    let connected = match tokio::time::timeout(connect_timeout, connector.connect(&url)).await {
        Ok(result) => result,
        Err(_) => Err(RealtimeError::Connect {
            url: url.clone(),
            reason: format!("timed out after {}ms", connect_timeout.as_millis()),
        }),
    };
    let Socket { sink, stream } = match connected {
        Ok(socket) => socket,
        Err(error) => {
            let _ = events.send(SocketEvent::ConnectFailed { socket, error });
            return;
        }
    };

    let (outbound, frames) = mpsc::unbounded_channel();
    let (shutdown, mut stopped) = oneshot::channel();
    if events
        .send(SocketEvent::Opened {
            socket,
            outbound,
            shutdown,
        })
        .is_err()
    {
        return;
    }

    tokio::select! {
        biased;
        _ = &mut stopped => {
            debug!(socket, "socket released");
            return;
        }
        _ = read_frames(socket, stream, &events) => {}
        _ = write_frames(socket, sink, frames) => {}
    }
    let _ = events.send(SocketEvent::Closed { socket });
}

async fn read_frames(
    socket: u64,
    mut stream: FrameStream,
    events: &mpsc::UnboundedSender<SocketEvent>,
) {
    while let Some(item) = stream.next().await {
        match item {
            Ok(text) => {
                if events.send(SocketEvent::Frame { socket, text }).is_err() {
                    return;
                }
            }
            Err(e) => {
                warn!(socket, error = %e, "socket error");
                return;
            }
        }
    }
}

async fn write_frames(
    socket: u64,
    mut sink: FrameSink,
    mut frames: mpsc::UnboundedReceiver<String>,
) {
    while let Some(text) = frames.recv().await {
        if let Err(e) = sink.send(text).await {
            warn!(socket, error = %e, "write failed");
            return;
        }
    }
}

fn build(
    config: &ClientConfig,
    connector: Arc<dyn Connector>,
) -> (RealtimeClient, ConnectionManager) {
    let (commands_tx, commands) = mpsc::unbounded_channel();
    let (events_tx, events) = mpsc::unbounded_channel();
    let (status, state) = watch::channel(ConnectionState::Disconnected);

    let manager = ConnectionManager {
        url: config.url.clone(),
        connector,
        backoff: ReconnectBackoff::new(config.backoff.clone()),
        connect_timeout: config.connect_timeout(),
        requests: PendingRequests::new(config.request_timeout()),
        registry: SubscriptionRegistry::new(),
        slot: SocketSlot::Disconnected,
        next_socket: 0,
        reconnecting: false,
        attempts: 0,
        restore_armed: false,
        waiting: VecDeque::new(),
        retry_at: None,
        connectivity: Vec::new(),
        commands,
        events_tx,
        events,
        status,
    };
    let client = RealtimeClient {
        commands: commands_tx,
        state,
        request_timeout: config.request_timeout(),
    };
    (client, manager)
}

/// Handle to a realtime connection.
///
/// Cloning is cheap; all clones share one connection. The connection is
/// opened lazily by the first request and kept alive (reconnecting as
/// needed) until every clone and every [`Subscription`] is dropped.
#[derive(Clone)]
pub struct RealtimeClient {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    request_timeout: Duration,
}

impl RealtimeClient {
    /// Creates a WebSocket client. Must be called within a tokio runtime.
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::with_connector(config, Arc::new(WsConnector::new()))
    }

    /// Creates a client that opens its sockets through `connector`.
    pub fn with_connector(config: ClientConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| RealtimeError::Config(format!("no tokio runtime: {e}")))?;
        let (client, manager) = build(&config, connector);
        runtime.spawn(manager.run());
        Ok(client)
    }

    /// Sends a request and waits for its acknowledgement.
    ///
    /// `payload` must be a JSON object without a `requestId` field. The
    /// future resolves with the full response when the server reports
    /// `SUCCESS`, and fails on any other status or when no response arrives
    /// within the request timeout. The timeout starts once the request is
    /// written to a socket.
    pub async fn send(&self, payload: Value) -> Result<Value> {
        let payload = protocol::validate_payload(payload)?;
        let (reply, response) = oneshot::channel();
        self.submit(Command::Send { payload, reply })?;
        response.await.map_err(|_| RealtimeError::ClientShutdown)?
    }

    /// Subscribes to `channel` and returns the handle once the server
    /// acknowledges.
    ///
    /// On failure the handle is released again; if it was the channel's
    /// only handle the client sends an `unsubscribe` for it.
    pub async fn subscribe(&self, channel: impl Into<ChannelId>) -> Result<Subscription> {
        let shared = SubscriptionShared::new(channel.into());
        // Built before the request so a failed or cancelled subscribe still
        // unsubscribes when it drops.
        let subscription = Subscription::new(shared.clone(), self.commands.clone());
        let (reply, response) = oneshot::channel();
        self.submit(Command::Subscribe {
            handle: shared,
            reply,
        })?;
        response.await.map_err(|_| RealtimeError::ClientShutdown)??;
        Ok(subscription)
    }

    /// Registers `listener` for connectivity changes.
    pub fn on_connectivity_change<F>(&self, listener: F) -> Result<()>
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.submit(Command::WatchConnectivity(Arc::new(listener)))
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver that observes every connection state change.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Response timeout applied to every request.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    fn submit(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| RealtimeError::ClientShutdown)
    }
}

impl fmt::Debug for RealtimeClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeClient")
            .field("state", &self.state())
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Creates a WebSocket client for `url` with default reconnect settings.
pub fn connect(url: &str, request_timeout: Duration) -> Result<RealtimeClient> {
    RealtimeClient::new(ClientConfig {
        url: url.to_string(),
        request_timeout_ms: request_timeout.as_millis() as u64,
        ..Default::default()
    })
}
