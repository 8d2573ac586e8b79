//! Editor executor — the only component that touches the editor model.
//!
//! Driven by the host's tick. Each tick:
//!   1. resolves requests whose deadline has passed,
//!   2. re-polls continuations started on earlier ticks,
//!   3. starts up to `batch_size` newly ready requests.
//!
//! A handler that panics fails only its own request.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Instant;

use edl_protocol::{ContinuationToken, EditorError, EditorOperations, OperationOutcome};
use serde_json::{Value, json};
use tracing::{debug, error, warn};

use crate::context::ServerContext;
use crate::request::{PendingRequest, RequestKey, ScopeClaim};
use crate::tracker::Resolution;

/// A request that returned a continuation and is re-polled every tick.
#[derive(Debug)]
struct InFlight {
    key: RequestKey,
    command: String,
    token: ContinuationToken,
    claim: ScopeClaim,
    started_at: Instant,
    deadline: Option<Instant>,
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Requests taken off the queue and handed to the editor.
    pub started: usize,
    /// Results (success or failure) delivered to clients.
    pub completed: usize,
    /// Continuations still outstanding after this tick.
    pub in_flight: usize,
    /// Timeouts delivered by the deadline sweep.
    pub timed_out: usize,
    /// Continuations abandoned because their deadline passed.
    pub abandoned: usize,
    /// Queue entries skipped because they were cancelled or already resolved.
    pub skipped: usize,
}

impl TickReport {
    pub fn is_quiet(&self) -> bool {
        self.started == 0 && self.completed == 0 && self.timed_out == 0 && self.abandoned == 0
    }
}

pub struct EditorExecutor<E: EditorOperations> {
    context: Arc<ServerContext>,
    editor: E,
    in_flight: Vec<InFlight>,
}

impl<E: EditorOperations> EditorExecutor<E> {
    pub fn new(context: Arc<ServerContext>, editor: E) -> Self {
        Self {
            context,
            editor,
            in_flight: Vec::new(),
        }
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.context
    }

    pub fn editor(&self) -> &E {
        &self.editor
    }

    pub fn editor_mut(&mut self) -> &mut E {
        &mut self.editor
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Nothing queued, pending, or mid-continuation.
    pub fn is_idle(&self) -> bool {
        self.in_flight.is_empty() && self.context.is_idle()
    }

    pub fn tick(&mut self) -> TickReport {
        self.tick_at(Instant::now())
    }

    /// Run one tick as if the clock read `now`.
    pub fn tick_at(&mut self, now: Instant) -> TickReport {
        let mut report = TickReport {
            timed_out: self.context.sweep_timeouts(now),
            ..TickReport::default()
        };

        self.poll_continuations(now, &mut report);
        self.start_ready(&mut report);

        report.in_flight = self.in_flight.len();
        self.context.set_in_flight(self.in_flight.len());
        if !report.is_quiet() {
            debug!("Tick: {report:?}");
        }
        report
    }

    /// Stop polling every continuation, e.g. after a forced shutdown.
    pub fn abandon_all(&mut self) -> usize {
        let abandoned = std::mem::take(&mut self.in_flight);
        for op in &abandoned {
            debug!("Abandoning {} ({})", op.key, op.command);
            self.editor.release_continuation(&op.token);
        }
        self.context.set_in_flight(0);
        abandoned.len()
    }

    fn poll_continuations(&mut self, now: Instant, report: &mut TickReport) {
        for mut op in std::mem::take(&mut self.in_flight) {
            // A cancelled request runs to completion; only a live one is cut
            // off at its deadline.
            let expired = op.deadline.is_some_and(|d| now >= d);
            if expired && !self.context.tracker().is_cancelled(&op.key) {
                self.editor.release_continuation(&op.token);
                let waited = now.saturating_duration_since(op.started_at);
                self.finish(&op.key, &op.command, Err(EditorError::timeout(waited.as_millis())));
                report.abandoned += 1;
                continue;
            }

            let token = op.token.clone();
            let outcome = self.guarded(&op.command, |editor| editor.poll_continuation(&token));
            match outcome {
                OperationOutcome::Continuation(next) => {
                    op.token = next;
                    self.in_flight.push(op);
                }
                OperationOutcome::Resolved(value) => {
                    self.finish_counted(&op.key, &op.command, Ok(value), report);
                }
                OperationOutcome::Failed(e) => {
                    self.finish_counted(&op.key, &op.command, Err(e), report);
                }
            }
        }
    }

    fn start_ready(&mut self, report: &mut TickReport) {
        let batch_size = self.context.config().batch_size;
        while report.started < batch_size {
            let claims: Vec<ScopeClaim> = self.in_flight.iter().map(|op| op.claim.clone()).collect();
            let Some(request) = self.context.queue().dequeue_next_ready(&claims) else {
                break;
            };
            if !self.context.tracker().mark_running(&request.key) {
                debug!("Skipping {}: cancelled or already resolved", request.key);
                report.skipped += 1;
                continue;
            }
            report.started += 1;
            self.start(request, report);
        }
    }

    fn start(&mut self, request: PendingRequest, report: &mut TickReport) {
        let PendingRequest {
            key,
            command,
            params,
            claim,
            deadline,
            ..
        } = request;

        debug!("Executing {key}: {command} on {}", claim.scope.label());
        let outcome = self.guarded(&command, |editor| editor.execute_operation(&command, &params));
        match outcome {
            OperationOutcome::Resolved(value) => self.finish_counted(&key, &command, Ok(value), report),
            OperationOutcome::Failed(e) => self.finish_counted(&key, &command, Err(e), report),
            OperationOutcome::Continuation(token) => {
                debug!("{key} continues as {token}");
                self.in_flight.push(InFlight {
                    key,
                    command,
                    token,
                    claim,
                    started_at: Instant::now(),
                    deadline,
                });
            }
        }
    }

    /// Run a handler, converting a panic into an `Internal` failure.
    fn guarded<F>(&mut self, command: &str, run: F) -> OperationOutcome
    where
        F: FnOnce(&mut E) -> OperationOutcome,
    {
        let editor = &mut self.editor;
        match catch_unwind(AssertUnwindSafe(|| run(editor))) {
            Ok(outcome) => outcome,
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                error!("Handler for {command} panicked: {reason}");
                OperationOutcome::Failed(EditorError::internal(format!("handler panicked: {reason}")))
            }
        }
    }

    fn finish_counted(
        &self,
        key: &RequestKey,
        command: &str,
        result: Result<Value, EditorError>,
        report: &mut TickReport,
    ) {
        if self.finish(key, command, result) == Resolution::Delivered {
            report.completed += 1;
        }
    }

    fn finish(&self, key: &RequestKey, command: &str, result: Result<Value, EditorError>) -> Resolution {
        let result = result.map_err(|e| {
            warn!("{key} ({command}) failed: {e}");
            e.with_detail_field("command", json!(command))
        });
        let resolution = self.context.tracker().resolve(key, result);
        if resolution == Resolution::Discarded {
            debug!("Result for {key} ({command}) discarded");
        }
        resolution
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".into()
    }
}
