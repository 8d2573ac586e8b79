//! Correlation tracker.
//!
//! Maps each admitted request to the connection that owns its reply channel
//! and guarantees at most one response per request. Every terminal path
//! (completion, failure, timeout, cancellation, shutdown) goes through
//! [`CorrelationTracker::resolve`] or removes the entry silently, and the
//! first one to do so wins.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use edl_protocol::{ConnectionId, EditorError, ResponseEnvelope};
use edl_transport::ReplySender;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use crate::request::{RequestKey, RequestState};

/// Outcome of delivering a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The response was handed to the connection's outbound queue.
    Delivered,
    /// The request was already resolved or cancelled, or its connection is gone.
    Discarded,
}

#[derive(Debug)]
struct Tracked {
    command: String,
    state: RequestState,
    enqueued_at: Instant,
    deadline: Option<Instant>,
    /// Dropped once the owning connection is cancelled.
    reply: Option<ReplySender>,
}

#[derive(Debug, Default)]
pub struct CorrelationTracker {
    entries: Mutex<HashMap<RequestKey, Tracked>>,
}

impl CorrelationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a request in the `Pending` state.
    ///
    /// An id still in flight on the same connection is rejected.
    pub fn track(
        &self,
        key: RequestKey,
        command: &str,
        enqueued_at: Instant,
        deadline: Option<Instant>,
        reply: ReplySender,
    ) -> Result<(), EditorError> {
        let mut entries = self.entries.lock();
        if entries.contains_key(&key) {
            return Err(EditorError::validation(format!(
                "request id '{}' is already in flight on this connection",
                key.id
            )));
        }
        entries.insert(
            key,
            Tracked {
                command: command.to_string(),
                state: RequestState::Pending,
                enqueued_at,
                deadline,
                reply: Some(reply),
            },
        );
        Ok(())
    }

    /// Transition `Pending` to `Running`. Returns `false` when the request is
    /// no longer tracked, meaning it must not be executed.
    pub fn mark_running(&self, key: &RequestKey) -> bool {
        match self.entries.lock().get_mut(key) {
            Some(entry) if entry.state == RequestState::Pending => {
                entry.state = RequestState::Running;
                true
            }
            _ => false,
        }
    }

    pub fn state(&self, key: &RequestKey) -> Option<RequestState> {
        self.entries.lock().get(key).map(|e| e.state)
    }

    pub fn is_tracked(&self, key: &RequestKey) -> bool {
        self.entries.lock().contains_key(key)
    }

    /// Whether a running request lost its connection and now only waits for
    /// the editor to finish.
    pub fn is_cancelled(&self, key: &RequestKey) -> bool {
        self.state(key) == Some(RequestState::Cancelled)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Deliver the terminal result for a request, exactly once.
    pub fn resolve(&self, key: &RequestKey, result: Result<Value, EditorError>) -> Resolution {
        let Some(entry) = self.entries.lock().remove(key) else {
            debug!("Dropping result for {key}: no longer tracked");
            return Resolution::Discarded;
        };
        if entry.state == RequestState::Cancelled {
            debug!("{key} ({}) finished after its connection closed", entry.command);
            return Resolution::Discarded;
        }
        let terminal = if result.is_ok() {
            RequestState::Completed
        } else {
            RequestState::Failed
        };
        debug!(
            "{key} ({}) {:?} after {} ms",
            entry.command,
            terminal,
            entry.enqueued_at.elapsed().as_millis()
        );
        deliver(key, entry, result)
    }

    /// Cancel every request owned by a connection without replying.
    ///
    /// Pending requests are forgotten. Running ones stay tracked as
    /// `Cancelled` with their reply channel dropped, so the editor can finish
    /// them and the result is thrown away.
    pub fn cancel_connection(&self, connection: ConnectionId) -> Vec<RequestKey> {
        let mut entries = self.entries.lock();
        let keys: Vec<RequestKey> = entries
            .keys()
            .filter(|k| k.connection == connection)
            .cloned()
            .collect();
        for key in &keys {
            let running = entries
                .get(key)
                .is_some_and(|e| matches!(e.state, RequestState::Running | RequestState::Cancelled));
            if running {
                if let Some(entry) = entries.get_mut(key) {
                    entry.state = RequestState::Cancelled;
                    entry.reply = None;
                }
            } else {
                entries.remove(key);
            }
        }
        keys
    }

    /// Requests whose deadline has passed, with how long each has waited.
    pub fn expired(&self, now: Instant) -> Vec<(RequestKey, Duration)> {
        self.entries
            .lock()
            .iter()
            .filter(|(_, e)| e.state != RequestState::Cancelled)
            .filter(|(_, e)| e.deadline.is_some_and(|d| now >= d))
            .map(|(k, e)| (k.clone(), now.saturating_duration_since(e.enqueued_at)))
            .collect()
    }

    /// Resolve every outstanding request with the same error. Returns the
    /// number delivered.
    pub fn resolve_all(&self, error: EditorError) -> usize {
        let drained: Vec<(RequestKey, Tracked)> = self.entries.lock().drain().collect();
        let mut delivered = 0;
        for (key, entry) in drained {
            debug!("{key} ({}) {:?}: {}", entry.command, RequestState::Cancelled, error.kind);
            if deliver(&key, entry, Err(error.clone())) == Resolution::Delivered {
                delivered += 1;
            }
        }
        delivered
    }
}

fn deliver(key: &RequestKey, entry: Tracked, result: Result<Value, EditorError>) -> Resolution {
    let Some(reply) = entry.reply else {
        return Resolution::Discarded;
    };
    let response = ResponseEnvelope::from_result(key.id.clone(), result);
    match reply.send(response) {
        Ok(()) => Resolution::Delivered,
        Err(_) => {
            debug!("Connection for {key} closed before its reply was sent");
            Resolution::Discarded
        }
    }
}
