//! Subscription handles and the per-channel registry that routes broadcasts
//! to them.
//!
//! A [`Subscription`] is owned by the consumer that asked for it. The
//! registry inside the client keeps a shared reference so it can fan frames
//! out and notify the handle about connectivity changes; that reference is
//! dropped as soon as the consumer unsubscribes (or drops the handle).

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::client::Command;
use crate::error::{RealtimeError, Result};
use crate::message::ChannelFrame;
use crate::protocol::ChannelId;

/// Callback for channel broadcasts.
pub type Listener = Arc<dyn Fn(&ChannelFrame) + Send + Sync>;

/// Callback for connectivity notifications.
pub type Notification = Arc<dyn Fn() + Send + Sync>;

/// Process-unique id of a subscription handle.
pub type SubscriptionId = u64;

static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ListenKey {
    Type(String),
    Everything,
}

#[derive(Default)]
struct HandleState {
    closed: bool,
    listeners: HashMap<ListenKey, Vec<Listener>>,
    connection_lost: Vec<Notification>,
    connection_restored: Vec<Notification>,
}

/// State shared between a [`Subscription`] and the registry.
pub(crate) struct SubscriptionShared {
    id: SubscriptionId,
    channel: ChannelId,
    state: Mutex<HandleState>,
}

impl SubscriptionShared {
    pub(crate) fn new(channel: ChannelId) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed),
            channel,
            state: Mutex::new(HandleState::default()),
        })
    }

    pub(crate) fn id(&self) -> SubscriptionId {
        self.id
    }

    pub(crate) fn channel(&self) -> &str {
        &self.channel
    }

    fn already_closed(&self) -> RealtimeError {
        RealtimeError::AlreadyClosed {
            channel: self.channel.clone(),
        }
    }

    fn add_listener(&self, key: ListenKey, listener: Listener) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(self.already_closed());
        }
        state.listeners.entry(key).or_default().push(listener);
        Ok(())
    }

    fn add_notification(&self, lost: bool, callback: Notification) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(self.already_closed());
        }
        if lost {
            state.connection_lost.push(callback);
        } else {
            state.connection_restored.push(callback);
        }
        Ok(())
    }

    /// Marks the handle closed and drops every callback.
    ///
    /// Returns `false` if it was closed already.
    fn close(&self) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        *state = HandleState {
            closed: true,
            ..Default::default()
        };
        true
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Runs the listeners registered for the frame's type, then the
    /// catch-all listeners.
    ///
    /// Callbacks run with the lock released so they may register more
    /// listeners on the same handle.
    pub(crate) fn process(&self, frame: &ChannelFrame) {
        let (typed, everything) = {
            let state = self.state.lock();
            let typed = frame
                .kind()
                .and_then(|kind| state.listeners.get(&ListenKey::Type(kind.to_string())))
                .cloned()
                .unwrap_or_default();
            let everything = state
                .listeners
                .get(&ListenKey::Everything)
                .cloned()
                .unwrap_or_default();
            (typed, everything)
        };
        for listener in typed.iter().chain(everything.iter()) {
            listener(frame);
        }
    }

    pub(crate) fn notify_connection_lost(&self) {
        let callbacks = self.state.lock().connection_lost.clone();
        for callback in callbacks {
            callback();
        }
    }

    pub(crate) fn notify_connection_restored(&self) {
        let callbacks = self.state.lock().connection_restored.clone();
        for callback in callbacks {
            callback();
        }
    }
}

/// A consumer's live interest in one channel.
///
/// Dropping the handle unsubscribes it; calling [`unsubscribe`](Self::unsubscribe)
/// does the same eagerly and reports misuse.
pub struct Subscription {
    shared: Arc<SubscriptionShared>,
    commands: mpsc::UnboundedSender<Command>,
}

impl Subscription {
    pub(crate) fn new(
        shared: Arc<SubscriptionShared>,
        commands: mpsc::UnboundedSender<Command>,
    ) -> Self {
        Self { shared, commands }
    }

    /// Channel this handle listens to.
    pub fn channel(&self) -> &str {
        self.shared.channel()
    }

    /// Process-unique id of this handle.
    pub fn id(&self) -> SubscriptionId {
        self.shared.id()
    }

    /// Whether the handle has been unsubscribed.
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Registers `listener` for broadcasts whose `type` equals `message_type`.
    pub fn listen<F>(&self, message_type: impl Into<String>, listener: F) -> Result<&Self>
    where
        F: Fn(&ChannelFrame) + Send + Sync + 'static,
    {
        self.shared
            .add_listener(ListenKey::Type(message_type.into()), Arc::new(listener))?;
        Ok(self)
    }

    /// Registers `listener` for every broadcast on the channel.
    pub fn listen_all<F>(&self, listener: F) -> Result<&Self>
    where
        F: Fn(&ChannelFrame) + Send + Sync + 'static,
    {
        self.shared
            .add_listener(ListenKey::Everything, Arc::new(listener))?;
        Ok(self)
    }

    /// Called when the client loses its socket.
    pub fn on_connection_lost<F>(&self, callback: F) -> Result<&Self>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.shared.add_notification(true, Arc::new(callback))?;
        Ok(self)
    }

    /// Called once the client reconnects after a loss.
    pub fn on_connection_restored<F>(&self, callback: F) -> Result<&Self>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.shared.add_notification(false, Arc::new(callback))?;
        Ok(self)
    }

    /// Delivers `frame` to this handle's listeners.
    pub fn process(&self, frame: &ChannelFrame) {
        self.shared.process(frame);
    }

    /// Leaves the channel. The last handle of a channel to leave makes the
    /// client send an `unsubscribe` request.
    pub fn unsubscribe(&self) -> Result<()> {
        if !self.shared.close() {
            return Err(self.shared.already_closed());
        }
        self.detach();
        Ok(())
    }

    fn detach(&self) {
        let command = Command::Unsubscribe {
            channel: self.shared.channel.clone(),
            id: self.shared.id,
        };
        if self.commands.send(command).is_err() {
            debug!(channel = %self.shared.channel, "client gone, nothing to unsubscribe");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.shared.close() {
            self.detach();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.shared.id)
            .field("channel", &self.shared.channel)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Result of removing a handle from the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// The channel has no handles left and was dropped from the registry.
    ChannelEmptied,
    /// Other handles still listen to the channel.
    Remaining(usize),
    /// The channel is not registered.
    UnknownChannel,
}

/// Authoritative map from channel to the handles listening on it.
///
/// Channels and handles keep insertion order; that order drives both
/// broadcast fan-out and resubscription after a reconnect.
#[derive(Default)]
pub(crate) struct SubscriptionRegistry {
    channels: Vec<(ChannelId, Vec<Arc<SubscriptionShared>>)>,
}

impl SubscriptionRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Appends a handle to its channel's list, creating the list if needed.
    pub(crate) fn add(&mut self, handle: Arc<SubscriptionShared>) {
        match self.position(handle.channel()) {
            Some(idx) => self.channels[idx].1.push(handle),
            None => self
                .channels
                .push((handle.channel().to_string(), vec![handle])),
        }
    }

    /// Removes the handle `id` from `channel`.
    pub(crate) fn remove(&mut self, channel: &str, id: SubscriptionId) -> Removal {
        let Some(idx) = self.position(channel) else {
            return Removal::UnknownChannel;
        };
        let handles = &mut self.channels[idx].1;
        handles.retain(|h| h.id() != id);
        if handles.is_empty() {
            self.channels.remove(idx);
            Removal::ChannelEmptied
        } else {
            Removal::Remaining(handles.len())
        }
    }

    /// Delivers a broadcast to every handle of its channel; returns how many.
    pub(crate) fn dispatch(&self, frame: &ChannelFrame) -> usize {
        let handles = self.handles_for(frame.channel());
        for handle in &handles {
            handle.process(frame);
        }
        handles.len()
    }

    pub(crate) fn handles_for(&self, channel: &str) -> Vec<Arc<SubscriptionShared>> {
        self.position(channel)
            .map(|idx| self.channels[idx].1.clone())
            .unwrap_or_default()
    }

    pub(crate) fn channels(&self) -> Vec<ChannelId> {
        self.channels.iter().map(|(c, _)| c.clone()).collect()
    }

    pub(crate) fn all_handles(&self) -> Vec<Arc<SubscriptionShared>> {
        self.channels
            .iter()
            .flat_map(|(_, handles)| handles.iter().cloned())
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.channels.len()
    }

    fn position(&self, channel: &str) -> Option<usize> {
        self.channels.iter().position(|(c, _)| c == channel)
    }
}
