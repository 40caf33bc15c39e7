//! Error type shared by every part of the realtime client.

use thiserror::Error;

/// Errors surfaced by the realtime client.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// A socket could not be opened.
    #[error("connection to {url} failed: {reason}")]
    Connect {
        /// Endpoint that was dialed.
        url: String,
        /// What went wrong.
        reason: String,
    },

    /// The socket failed while open.
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// No response arrived within the request timeout.
    #[error("request {request_id} timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// Id the request was sent with.
        request_id: u64,
        /// Timeout that elapsed.
        timeout_ms: u64,
    },

    /// The server answered with a status other than `SUCCESS`.
    #[error("request {request_id} rejected: {response}")]
    Rejected {
        /// Id the request was sent with.
        request_id: u64,
        /// The full response object.
        response: serde_json::Value,
    },

    /// The subscription handle was already unsubscribed.
    #[error("subscription to channel {channel} already closed")]
    AlreadyClosed {
        /// Channel of the closed handle.
        channel: String,
    },

    /// The payload cannot be sent as a request.
    #[error("invalid payload: {reason}")]
    InvalidPayload {
        /// Why it was refused.
        reason: String,
    },

    /// The connection manager is gone.
    #[error("realtime client has shut down")]
    ClientShutdown,

    /// Bad client settings.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// JSON encoding or decoding failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O failure, e.g. reading a config file.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RealtimeError {
    /// Whether the error belongs to the socket itself rather than to a caller.
    ///
    /// Transport errors never reach request callers; the connection manager
    /// absorbs them and reconnects.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            RealtimeError::Connect { .. } | RealtimeError::WebSocket(_) | RealtimeError::Io(_)
        )
    }
}

/// Result alias using [`RealtimeError`].
pub type Result<T> = std::result::Result<T, RealtimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_classification() {
        assert!(RealtimeError::Connect {
            url: "ws://localhost".to_string(),
            reason: "refused".to_string()
        }
        .is_transport());
        assert!(RealtimeError::WebSocket("reset".to_string()).is_transport());
        assert!(!RealtimeError::RequestTimeout {
            request_id: 1,
            timeout_ms: 10
        }
        .is_transport());
        assert!(!RealtimeError::AlreadyClosed {
            channel: "c".to_string()
        }
        .is_transport());
    }

    #[test]
    fn test_timeout_message() {
        let err = RealtimeError::RequestTimeout {
            request_id: 7,
            timeout_ms: 10000,
        };
        assert_eq!(err.to_string(), "request 7 timed out after 10000ms");
    }
}
