//! Server context — admission, cancellation, and lifecycle.
//!
//! One context exists per server process. Connection tasks call into it
//! through [`CommandSink`]; the editor executor reads the queue and tracker
//! it owns.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashSet;
use edl_protocol::auth::{AuthConfig, AuthenticateParams, AuthenticateResult};
use edl_protocol::commands::SERVER_VERSION;
use edl_protocol::{
    BuiltinCommand, CommandDescriptor, CommandEnvelope, ConnectionId, EditorError, ErrorKind,
    HandlerRef, HandlerResult, ResponseEnvelope,
};
use edl_transport::{CommandSink, ReplySender};
use parking_lot::RwLock;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::guard::{GuardChain, GuardDecision, ReadOnlyGuard, RequestGuard, TokenGuard};
use crate::queue::DispatchQueue;
use crate::registry::{CommandRegistry, RegistryError};
use crate::request::{PendingRequest, RequestKey, ScopeClaim};
use crate::tracker::{CorrelationTracker, Resolution};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Running,
    /// New commands are refused; outstanding ones may still finish.
    Draining,
    Stopped,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }
}

/// What happened to a submitted command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Waiting in the dispatch queue.
    Queued { seq: u64 },
    /// Answered immediately by a built-in handler.
    Answered,
    /// Refused; the error has already been sent.
    Rejected(ErrorKind),
}

// ─────────────────────────────────────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────────────────────────────────────

pub struct ServerContextBuilder {
    config: ServerConfig,
    registry: CommandRegistry,
    guards: GuardChain,
    sessions: Arc<DashSet<ConnectionId>>,
}

impl ServerContextBuilder {
    /// Register one editor command.
    pub fn register(mut self, descriptor: CommandDescriptor) -> Result<Self, RegistryError> {
        self.registry.register(descriptor)?;
        Ok(self)
    }

    pub fn register_all(
        mut self,
        descriptors: impl IntoIterator<Item = CommandDescriptor>,
    ) -> Result<Self, RegistryError> {
        self.registry.register_all(descriptors)?;
        Ok(self)
    }

    pub fn guard<G: RequestGuard + 'static>(mut self, guard: G) -> Self {
        self.guards.add(guard);
        self
    }

    pub fn build(mut self) -> Arc<ServerContext> {
        let auth = self.config.auth_token.clone().map(AuthConfig::new);
        if auth.is_some() {
            self.guards.add(TokenGuard::new(self.sessions.clone()));
        }
        if self.config.read_only {
            self.guards.add(ReadOnlyGuard);
        }

        info!(
            "Server context ready: {} commands, queue capacity {}, guards [{}]",
            self.registry.len(),
            self.config.queue_capacity,
            self.guards.names().join(", ")
        );

        Arc::new(ServerContext {
            queue: DispatchQueue::new(self.config.queue_capacity),
            tracker: CorrelationTracker::new(),
            registry: self.registry,
            guards: self.guards,
            auth,
            sessions: self.sessions,
            state: RwLock::new(LifecycleState::Running),
            started_at: Instant::now(),
            in_flight: AtomicUsize::new(0),
            stats: Stats::default(),
            config: self.config,
        })
    }
}

#[derive(Debug, Default)]
struct Stats {
    submitted: AtomicU64,
    rejected: AtomicU64,
    timed_out: AtomicU64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Context
// ─────────────────────────────────────────────────────────────────────────────

pub struct ServerContext {
    config: ServerConfig,
    registry: CommandRegistry,
    queue: DispatchQueue,
    tracker: CorrelationTracker,
    guards: GuardChain,
    auth: Option<AuthConfig>,
    sessions: Arc<DashSet<ConnectionId>>,
    state: RwLock<LifecycleState>,
    started_at: Instant,
    /// Continuations held by the executor, mirrored for status reports.
    in_flight: AtomicUsize,
    stats: Stats,
}

impl ServerContext {
    pub fn builder(config: ServerConfig) -> ServerContextBuilder {
        ServerContextBuilder {
            config,
            registry: CommandRegistry::with_builtins(),
            guards: GuardChain::new(),
            sessions: Arc::new(DashSet::new()),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    pub fn queue(&self) -> &DispatchQueue {
        &self.queue
    }

    pub fn tracker(&self) -> &CorrelationTracker {
        &self.tracker
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.read()
    }

    pub fn is_authenticated(&self, connection: ConnectionId) -> bool {
        self.auth.is_none() || self.sessions.contains(&connection)
    }

    pub(crate) fn set_in_flight(&self, count: usize) {
        self.in_flight.store(count, Ordering::Relaxed);
    }

    /// No queued, tracked, or in-flight work remains.
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty()
            && self.tracker.is_empty()
            && self.in_flight.load(Ordering::Relaxed) == 0
    }

    // ── Admission ───────────────────────────────────────────────────────────

    /// Validate and admit one command. Every rejection is answered on `reply`
    /// before this returns.
    pub fn submit_command(
        &self,
        connection: ConnectionId,
        envelope: CommandEnvelope,
        reply: &ReplySender,
    ) -> Admission {
        self.stats.submitted.fetch_add(1, Ordering::Relaxed);

        if self.state() != LifecycleState::Running {
            return self.reject(&envelope.id, EditorError::shutting_down(), reply);
        }

        let descriptor = match self.registry.lookup(&envelope.command) {
            Ok(descriptor) => descriptor,
            // Unknown names look the same as known ones until the handshake.
            Err(_) if !self.is_authenticated(connection) => {
                debug!("Blocked {} from {connection}: not authenticated", envelope.command);
                let error = EditorError::unauthorized("auth: connection is not authenticated");
                return self.reject(&envelope.id, error, reply);
            }
            Err(e) => return self.reject(&envelope.id, e, reply),
        };

        if let GuardDecision::Block(reason) = self.guards.check(connection, &envelope, descriptor) {
            debug!("Blocked {} from {connection}: {reason}", envelope.command);
            return self.reject(&envelope.id, EditorError::unauthorized(reason), reply);
        }

        if let Err(e) = descriptor.params.validate(&envelope.params) {
            return self.reject(&envelope.id, e, reply);
        }

        match descriptor.handler {
            HandlerRef::Builtin(builtin) => {
                let result = self.run_builtin(builtin, connection, &envelope.params);
                let _ = reply.send(ResponseEnvelope::from_result(envelope.id, result));
                Admission::Answered
            }
            HandlerRef::Editor => self.enqueue(connection, envelope, descriptor, reply),
        }
    }

    fn enqueue(
        &self,
        connection: ConnectionId,
        envelope: CommandEnvelope,
        descriptor: &CommandDescriptor,
        reply: &ReplySender,
    ) -> Admission {
        let now = Instant::now();
        let timeout = envelope
            .timeout_ms
            .map(Duration::from_millis)
            .or_else(|| self.config.default_timeout());
        let deadline = timeout.map(|t| now + t);
        let key = RequestKey::new(connection, envelope.id.clone());

        if let Err(e) = self
            .tracker
            .track(key.clone(), &envelope.command, now, deadline, reply.clone())
        {
            return self.reject(&envelope.id, e, reply);
        }

        let claim = ScopeClaim::new(descriptor.scope.resolve(&envelope.params), descriptor.mutating);
        let mut request = PendingRequest::new(key.clone(), envelope.command, envelope.params, claim)
            .with_deadline(deadline);
        request.enqueued_at = now;

        match self.queue.enqueue(request) {
            Ok(seq) => Admission::Queued { seq },
            Err(e) => {
                warn!("Dispatch queue full, rejecting {key}");
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                let kind = e.kind;
                self.tracker.resolve(&key, Err(e));
                Admission::Rejected(kind)
            }
        }
    }

    fn reject(&self, id: &str, error: EditorError, reply: &ReplySender) -> Admission {
        self.stats.rejected.fetch_add(1, Ordering::Relaxed);
        let kind = error.kind;
        let _ = reply.send(ResponseEnvelope::failure(Some(id.to_string()), error));
        Admission::Rejected(kind)
    }

    fn run_builtin(
        &self,
        builtin: BuiltinCommand,
        connection: ConnectionId,
        params: &Value,
    ) -> HandlerResult {
        match builtin {
            BuiltinCommand::ListCommands => Ok(json!({
                "serverVersion": SERVER_VERSION,
                "commands": self.registry.describe_all(),
            })),
            BuiltinCommand::Authenticate => self.authenticate(connection, params),
        }
    }

    fn authenticate(&self, connection: ConnectionId, params: &Value) -> HandlerResult {
        let params: AuthenticateParams = serde_json::from_value(params.clone())
            .map_err(|e| EditorError::validation(format!("invalid params: {e}")))?;

        if let Some(auth) = &self.auth {
            if !auth.accepts(&params.token) {
                warn!("Authentication failed for {connection}");
                return Err(EditorError::unauthorized("invalid authentication token"));
            }
            self.sessions.insert(connection);
        }
        info!(
            "Connection {connection} authenticated ({})",
            params.client.as_deref().unwrap_or("unnamed client")
        );

        let result = AuthenticateResult {
            connection_id: connection.to_string(),
            server_version: SERVER_VERSION.to_string(),
        };
        serde_json::to_value(result).map_err(|e| EditorError::internal(e.to_string()))
    }

    // ── Cancellation and timeouts ───────────────────────────────────────────

    /// Cancel everything a closed connection owned. No replies are sent.
    pub fn cancel_connection(&self, connection: ConnectionId) -> usize {
        self.sessions.remove(&connection);
        let cancelled = self.tracker.cancel_connection(connection);
        let removed = self.queue.remove_connection(connection);
        if !cancelled.is_empty() {
            info!(
                "Cancelled {} request(s) for {connection} ({removed} still queued)",
                cancelled.len()
            );
        }
        cancelled.len()
    }

    /// Resolve every request whose deadline has passed. Returns how many
    /// timeouts were delivered.
    pub fn sweep_timeouts(&self, now: Instant) -> usize {
        let mut delivered = 0;
        for (key, waited) in self.tracker.expired(now) {
            self.queue.remove(&key);
            let error = EditorError::timeout(waited.as_millis());
            if self.tracker.resolve(&key, Err(error)) == Resolution::Delivered {
                warn!("Request {key} timed out after {} ms", waited.as_millis());
                delivered += 1;
            }
        }
        self.stats.timed_out.fetch_add(delivered as u64, Ordering::Relaxed);
        delivered
    }

    // ── Lifecycle ───────────────────────────────────────────────────────────

    /// Refuse new commands; outstanding ones keep running.
    pub fn begin_shutdown(&self) {
        let mut state = self.state.write();
        if *state == LifecycleState::Running {
            *state = LifecycleState::Draining;
            info!(
                "Draining: {} queued, {} pending",
                self.queue.len(),
                self.tracker.len()
            );
        }
    }

    /// Fail every queued and pending request with `ShuttingDown`.
    pub fn force_cancel_all(&self) -> usize {
        let dropped = self.queue.drain_all().len();
        let delivered = self.tracker.resolve_all(EditorError::shutting_down());
        if dropped > 0 || delivered > 0 {
            warn!("Force-cancelled {delivered} request(s) ({dropped} never started)");
        }
        delivered
    }

    pub fn mark_stopped(&self) {
        *self.state.write() = LifecycleState::Stopped;
        info!("Server context stopped");
    }

    /// Server-side fields for the status endpoint.
    pub fn status_report(&self) -> Value {
        json!({
            "state": self.state().as_str(),
            "uptimeMs": self.started_at.elapsed().as_millis() as u64,
            "commands": self.registry.len(),
            "queueDepth": self.queue.len(),
            "queueCapacity": self.queue.capacity(),
            "pending": self.tracker.len(),
            "inFlight": self.in_flight.load(Ordering::Relaxed),
            "authenticatedSessions": self.sessions.len(),
            "submitted": self.stats.submitted.load(Ordering::Relaxed),
            "rejected": self.stats.rejected.load(Ordering::Relaxed),
            "timedOut": self.stats.timed_out.load(Ordering::Relaxed),
        })
    }
}

impl CommandSink for ServerContext {
    fn connection_opened(&self, connection: ConnectionId) {
        debug!("Connection {connection} registered with dispatch");
    }

    fn submit(&self, connection: ConnectionId, envelope: CommandEnvelope, reply: &ReplySender) {
        self.submit_command(connection, envelope, reply);
    }

    fn connection_closed(&self, connection: ConnectionId) {
        self.cancel_connection(connection);
    }

    fn status(&self) -> Value {
        self.status_report()
    }
}

/// Resolve expired requests from the network side, so a client sees its
/// timeout even when the editor thread is stalled. Runs until the context
/// stops.
pub async fn run_timeout_sweeper(context: Arc<ServerContext>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        if context.state() == LifecycleState::Stopped {
            break;
        }
        context.sweep_timeouts(Instant::now());
    }
    debug!("Timeout sweeper stopped");
}
