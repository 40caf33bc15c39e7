#![warn(missing_docs)]

//! Hydra realtime client: correlated requests, channel subscriptions and
//! automatic reconnection over a JSON WebSocket protocol

pub mod backoff;
pub mod client;
pub mod config;
pub mod error;
pub mod memory;
pub mod message;
pub mod protocol;
pub mod request;
pub mod socket;
pub mod subscription;

pub use backoff::{BackoffConfig, BackoffTier, ReconnectBackoff};
pub use client::{connect, ConnectionState, ConnectivityListener, RealtimeClient};
pub use config::ClientConfig;
pub use error::{RealtimeError, Result};
pub use message::{ChannelFrame, ChatLine, RealtimeMessage, Severity, UserBlurb};
pub use protocol::ChannelId;
pub use socket::{Connector, Socket, WsConnector};
pub use subscription::{Subscription, SubscriptionId};
