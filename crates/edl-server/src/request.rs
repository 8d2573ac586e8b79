//! Identity and shape of one in-flight unit of work.

use std::fmt;
use std::time::Instant;

use edl_protocol::{ConnectionId, ResourceScope};
use serde_json::Value;

/// Correlates a result with the connection and client id that asked for it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    pub connection: ConnectionId,
    pub id: String,
}

impl RequestKey {
    pub fn new(connection: ConnectionId, id: impl Into<String>) -> Self {
        Self {
            connection,
            id: id.into(),
        }
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.connection, self.id)
    }
}

/// Lifecycle of a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// The editor state a request touches and whether it changes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeClaim {
    pub scope: ResourceScope,
    pub mutating: bool,
}

impl ScopeClaim {
    pub fn new(scope: ResourceScope, mutating: bool) -> Self {
        Self { scope, mutating }
    }

    /// Two claims conflict when they overlap and at least one mutates.
    pub fn conflicts_with(&self, other: &ScopeClaim) -> bool {
        (self.mutating || other.mutating) && self.scope.overlaps(&other.scope)
    }
}

/// A validated command waiting in the dispatch queue.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub key: RequestKey,
    pub command: String,
    pub params: Value,
    pub claim: ScopeClaim,
    pub enqueued_at: Instant,
    pub deadline: Option<Instant>,
    /// Arrival order, assigned by the queue.
    pub seq: u64,
}

impl PendingRequest {
    pub fn new(key: RequestKey, command: impl Into<String>, params: Value, claim: ScopeClaim) -> Self {
        Self {
            key,
            command: command.into(),
            params,
            claim,
            enqueued_at: Instant::now(),
            deadline: None,
            seq: 0,
        }
    }

    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| now >= d)
    }
}
