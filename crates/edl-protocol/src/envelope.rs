//! Wire envelopes.
//!
//! Request:  `{ id, command, params, timeoutMs? }`
//! Response: `{ id, ok, result?, error? }`

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EditorError;

/// Identifies one client session for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(uuid::Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form keeps log lines readable.
        let s = self.0.simple().to_string();
        f.write_str(&s[..8])
    }
}

/// A decoded client command. Immutable once decoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    /// Client-assigned id, unique per connection.
    pub id: String,
    /// Registered command name.
    pub command: String,
    /// Parameter payload, validated against the command's schema.
    #[serde(default = "empty_object")]
    pub params: Value,
    /// Optional client deadline, measured from enqueue.
    #[serde(rename = "timeoutMs", default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

impl CommandEnvelope {
    pub fn new(id: impl Into<String>, command: impl Into<String>, params: Value) -> Self {
        Self {
            id: id.into(),
            command: command.into(),
            params,
            timeout_ms: None,
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

/// Result or error for exactly one request.
///
/// `id` is `None` only when the offending message carried no recoverable id
/// (unparseable line, or a connection-fatal framing error).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub id: Option<String>,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<EditorError>,
}

impl ResponseEnvelope {
    pub fn success(id: impl Into<String>, result: Value) -> Self {
        Self {
            id: Some(id.into()),
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Option<String>, error: EditorError) -> Self {
        Self {
            id,
            ok: false,
            result: None,
            error: Some(error),
        }
    }

    /// Build the envelope for a handler outcome.
    pub fn from_result(id: impl Into<String>, result: Result<Value, EditorError>) -> Self {
        match result {
            Ok(value) => Self::success(id, value),
            Err(error) => Self::failure(Some(id.into()), error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.ok
    }

    pub fn is_error(&self) -> bool {
        !self.ok
    }
}
