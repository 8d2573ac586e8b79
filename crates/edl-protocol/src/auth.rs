//! Connection authentication types.
//!
//! Protocol flow when a token is configured:
//!   1. Client connects and sends `authenticate { token }`.
//!   2. Server marks the connection authenticated or replies `Unauthorized`.
//!   3. Every other command (except `listCommands`) is refused until then.

use serde::{Deserialize, Serialize};

/// Parameters for the `authenticate` command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticateParams {
    /// Shared secret configured on the server
    pub token: String,
    /// Optional client name, recorded in logs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
}

/// Successful `authenticate` result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticateResult {
    #[serde(rename = "connectionId")]
    pub connection_id: String,
    #[serde(rename = "serverVersion")]
    pub server_version: String,
}

/// Authentication state for a client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Pending,
    Authenticated,
}

/// Authentication configuration for the server.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Static auth token (shared secret)
    pub token: String,
}

impl AuthConfig {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }

    /// Constant-time comparison against the configured token.
    pub fn accepts(&self, candidate: &str) -> bool {
        let expected = self.token.as_bytes();
        let candidate = candidate.as_bytes();
        if expected.len() != candidate.len() {
            return false;
        }
        expected
            .iter()
            .zip(candidate)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}
