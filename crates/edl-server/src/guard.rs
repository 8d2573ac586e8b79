//! Admission guards.
//!
//! Guards inspect a decoded, registered command before it is validated or
//! queued. They run in priority order and the first block wins.

use std::sync::Arc;

use dashmap::DashSet;
use edl_protocol::{CommandDescriptor, CommandEnvelope, Commands, ConnectionId};

/// Whether a request may proceed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Allow,
    Block(String),
}

impl GuardDecision {
    pub fn block(reason: impl Into<String>) -> Self {
        Self::Block(reason.into())
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

pub trait RequestGuard: Send + Sync {
    fn check(
        &self,
        connection: ConnectionId,
        envelope: &CommandEnvelope,
        descriptor: &CommandDescriptor,
    ) -> GuardDecision;

    /// Guard name for logs.
    fn name(&self) -> &str;

    /// Priority (lower runs first).
    fn priority(&self) -> i32 {
        0
    }
}

/// Guards executed in priority order.
#[derive(Default)]
pub struct GuardChain {
    guards: Vec<Box<dyn RequestGuard>>,
}

impl GuardChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<G: RequestGuard + 'static>(&mut self, guard: G) {
        self.guards.push(Box::new(guard));
        self.guards.sort_by_key(|g| g.priority());
    }

    /// First block wins; the reason is prefixed with the guard's name.
    pub fn check(
        &self,
        connection: ConnectionId,
        envelope: &CommandEnvelope,
        descriptor: &CommandDescriptor,
    ) -> GuardDecision {
        for guard in &self.guards {
            if let GuardDecision::Block(reason) = guard.check(connection, envelope, descriptor) {
                return GuardDecision::Block(format!("{}: {reason}", guard.name()));
            }
        }
        GuardDecision::Allow
    }

    pub fn names(&self) -> Vec<&str> {
        self.guards.iter().map(|g| g.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Built-in guards
// ─────────────────────────────────────────────────────────────────────────────

/// Refuses commands from connections that have not authenticated.
pub struct TokenGuard {
    sessions: Arc<DashSet<ConnectionId>>,
}

impl TokenGuard {
    pub fn new(sessions: Arc<DashSet<ConnectionId>>) -> Self {
        Self { sessions }
    }
}

impl RequestGuard for TokenGuard {
    fn check(
        &self,
        connection: ConnectionId,
        envelope: &CommandEnvelope,
        _descriptor: &CommandDescriptor,
    ) -> GuardDecision {
        if Commands::UNAUTHENTICATED.contains(&envelope.command.as_str())
            || self.sessions.contains(&connection)
        {
            GuardDecision::Allow
        } else {
            GuardDecision::block("connection is not authenticated")
        }
    }

    fn name(&self) -> &str {
        "auth"
    }

    fn priority(&self) -> i32 {
        -100
    }
}

/// Refuses every mutating command.
pub struct ReadOnlyGuard;

impl RequestGuard for ReadOnlyGuard {
    fn check(
        &self,
        _connection: ConnectionId,
        envelope: &CommandEnvelope,
        descriptor: &CommandDescriptor,
    ) -> GuardDecision {
        if descriptor.mutating {
            GuardDecision::block(format!("'{}' mutates editor state", envelope.command))
        } else {
            GuardDecision::Allow
        }
    }

    fn name(&self) -> &str {
        "read-only"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(command: &str) -> CommandEnvelope {
        CommandEnvelope::new("1", command, json!({}))
    }

    #[test]
    fn token_guard_allows_authenticated_sessions() {
        let sessions = Arc::new(DashSet::new());
        let guard = TokenGuard::new(sessions.clone());
        let conn = ConnectionId::new();
        let descriptor = CommandDescriptor::query("getGraph", "");

        assert!(!guard.check(conn, &envelope("getGraph"), &descriptor).is_allowed());
        sessions.insert(conn);
        assert!(guard.check(conn, &envelope("getGraph"), &descriptor).is_allowed());
    }

    #[test]
    fn token_guard_lets_handshake_through() {
        let guard = TokenGuard::new(Arc::new(DashSet::new()));
        let descriptor = CommandDescriptor::query("x", "");
        for command in [Commands::AUTHENTICATE, Commands::LIST_COMMANDS] {
            assert!(guard
                .check(ConnectionId::new(), &envelope(command), &descriptor)
                .is_allowed());
        }
    }

    #[test]
    fn read_only_guard_blocks_mutations() {
        let guard = ReadOnlyGuard;
        let conn = ConnectionId::new();
        assert!(guard
            .check(conn, &envelope("getGraph"), &CommandDescriptor::query("getGraph", ""))
            .is_allowed());
        assert!(!guard
            .check(conn, &envelope("createGraph"), &CommandDescriptor::mutation("createGraph", ""))
            .is_allowed());
    }

    #[test]
    fn chain_runs_in_priority_order() {
        let mut chain = GuardChain::new();
        chain.add(ReadOnlyGuard);
        chain.add(TokenGuard::new(Arc::new(DashSet::new())));
        assert_eq!(chain.names(), vec!["auth", "read-only"]);

        let decision = chain.check(
            ConnectionId::new(),
            &envelope("createGraph"),
            &CommandDescriptor::mutation("createGraph", ""),
        );
        assert_eq!(
            decision,
            GuardDecision::Block("auth: connection is not authenticated".into())
        );
    }
}
