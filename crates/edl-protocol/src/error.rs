//! Request-scoped error taxonomy.
//!
//! Every failure the server reports to a client is an [`EditorError`]: a
//! stable [`ErrorKind`], a human-readable message, and optional structured
//! detail. Only `FramingError` is connection-fatal; every other kind resolves
//! exactly one request and leaves the connection untouched.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Stable error kinds as they appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The byte stream could not be framed; the connection is closed.
    FramingError,
    /// Envelope or parameter payload failed validation before execution.
    ValidationFailed,
    /// Unknown command, or a handler could not find the target asset.
    NotFound,
    /// Admission control rejected the request (dispatch queue full).
    Busy,
    /// The editor model refused the operation in its current state.
    EngineStateConflict,
    /// A client or server deadline elapsed before the request resolved.
    Timeout,
    /// Unexpected handler failure.
    Internal,
    /// A request guard or the auth hook refused the request.
    Unauthorized,
    /// The server is draining or has force-cancelled in-flight work.
    ShuttingDown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FramingError => "FramingError",
            Self::ValidationFailed => "ValidationFailed",
            Self::NotFound => "NotFound",
            Self::Busy => "Busy",
            Self::EngineStateConflict => "EngineStateConflict",
            Self::Timeout => "Timeout",
            Self::Internal => "Internal",
            Self::Unauthorized => "Unauthorized",
            Self::ShuttingDown => "ShuttingDown",
        }
    }

    /// Whether this kind terminates the connection that produced it.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(self, Self::FramingError)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error carried in a response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct EditorError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

impl EditorError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }

    /// Insert a single key into the detail object, creating it if needed.
    ///
    /// A non-object detail is preserved under the `"detail"` key.
    pub fn with_detail_field(mut self, key: &str, value: Value) -> Self {
        let mut map = match self.detail.take() {
            Some(Value::Object(map)) => map,
            Some(other) => {
                let mut map = Map::new();
                map.insert("detail".into(), other);
                map
            }
            None => Map::new(),
        };
        map.insert(key.to_string(), value);
        self.detail = Some(Value::Object(map));
        self
    }

    pub fn framing(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::FramingError, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValidationFailed, message)
    }

    pub fn unknown_command(command: &str) -> Self {
        Self::new(ErrorKind::NotFound, format!("unknown command: {command}"))
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn busy(depth: usize) -> Self {
        Self::new(
            ErrorKind::Busy,
            format!("dispatch queue is full ({depth} pending), retry later"),
        )
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::EngineStateConflict, message)
    }

    pub fn timeout(elapsed_ms: u128) -> Self {
        Self::new(
            ErrorKind::Timeout,
            format!("request did not resolve within {elapsed_ms} ms"),
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }

    pub fn shutting_down() -> Self {
        Self::new(ErrorKind::ShuttingDown, "server is shutting down")
    }
}

/// Result from a built-in or editor-side handler.
pub type HandlerResult = Result<Value, EditorError>;
