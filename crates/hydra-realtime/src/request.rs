//! Pending-request table for correlated request/response pairs.
//!
//! Each transmitted request gets a fresh id and a timer. Whichever of the
//! response or the timer reaches the table first removes the entry and
//! settles the caller; the other finds nothing and does nothing.

use std::collections::HashMap;
use std::future::poll_fn;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::time::{delay_queue, DelayQueue};
use tracing::debug;

use crate::error::{RealtimeError, Result};
use crate::protocol;

/// Completion slot of a request; `None` for requests the client issues on
/// its own behalf (resubscribes, unsubscribes).
pub(crate) type Reply = Option<oneshot::Sender<Result<Value>>>;

struct PendingRequest {
    reply: Reply,
    timer: delay_queue::Key,
}

/// How a response frame was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// The matching request succeeded.
    Resolved,
    /// The matching request got a non-success status.
    Rejected,
    /// No request with that id is pending.
    Unknown,
}

/// In-flight requests keyed by request id.
pub struct PendingRequests {
    next_id: u64,
    timeout: Duration,
    pending: HashMap<u64, PendingRequest>,
    timers: DelayQueue<u64>,
}

impl PendingRequests {
    /// Creates an empty table whose requests expire after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            next_id: 1,
            timeout,
            pending: HashMap::new(),
            timers: DelayQueue::new(),
        }
    }

    /// Allocates the next request id. Ids start at 1 and are never reused.
    pub fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Tracks a transmitted request and starts its timer.
    pub(crate) fn register(&mut self, request_id: u64, reply: Reply) {
        let timer = self.timers.insert(request_id, self.timeout);
        self.pending.insert(request_id, PendingRequest { reply, timer });
    }

    /// Settles the request matching `request_id` with `response`.
    pub fn settle(&mut self, request_id: u64, response: Value) -> Settlement {
        let Some(entry) = self.pending.remove(&request_id) else {
            return Settlement::Unknown;
        };
        self.timers.remove(&entry.timer);

        let (settlement, outcome) = if protocol::is_success(&response) {
            (Settlement::Resolved, Ok(response))
        } else {
            (
                Settlement::Rejected,
                Err(RealtimeError::Rejected {
                    request_id,
                    response,
                }),
            )
        };
        if let Some(reply) = entry.reply {
            let _ = reply.send(outcome);
        } else if let Err(e) = outcome {
            debug!(error = %e, "internal request rejected");
        }
        settlement
    }

    /// Waits for the next request to time out, fails it and returns its id.
    ///
    /// Returns `None` straight away when nothing is pending.
    pub async fn next_timeout(&mut self) -> Option<u64> {
        let expired = poll_fn(|cx| self.timers.poll_expired(cx)).await?;
        let request_id = expired.into_inner();
        if let Some(entry) = self.pending.remove(&request_id) {
            if let Some(reply) = entry.reply {
                let _ = reply.send(Err(RealtimeError::RequestTimeout {
                    request_id,
                    timeout_ms: self.timeout.as_millis() as u64,
                }));
            }
        }
        Some(request_id)
    }

    /// Number of requests awaiting a response.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether no request is awaiting a response.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// The response timeout applied to every request.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}
