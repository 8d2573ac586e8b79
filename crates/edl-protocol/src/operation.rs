//! The capability the core consumes from the editor model.
//!
//! The server never inspects editor assets itself. It hands validated
//! parameters to an [`EditorOperations`] implementation on the editor thread
//! and receives an [`OperationOutcome`]. Multi-tick work is expressed as a
//! [`ContinuationToken`] that the executor re-polls once per tick.

use std::fmt;

use serde_json::Value;

use crate::error::EditorError;

/// Opaque handle for an in-progress, multi-tick operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContinuationToken(String);

impl ContinuationToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContinuationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What an editor operation (or a continuation poll) produced.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationOutcome {
    Resolved(Value),
    Failed(EditorError),
    /// Not finished yet; poll again next tick with this token.
    Continuation(ContinuationToken),
}

impl From<Result<Value, EditorError>> for OperationOutcome {
    fn from(result: Result<Value, EditorError>) -> Self {
        match result {
            Ok(value) => Self::Resolved(value),
            Err(error) => Self::Failed(error),
        }
    }
}

/// Editor-model collaborator.
///
/// Implementations live on the editor thread and are driven only by the
/// executor, so no `Send`/`Sync` bound is required. Neither method may block.
pub trait EditorOperations {
    /// Run a command against the live editor model.
    fn execute_operation(&mut self, command: &str, params: &Value) -> OperationOutcome;

    /// Advance a previously returned continuation.
    fn poll_continuation(&mut self, token: &ContinuationToken) -> OperationOutcome;

    /// The executor stopped polling this token (deadline elapsed).
    fn release_continuation(&mut self, _token: &ContinuationToken) {}
}
