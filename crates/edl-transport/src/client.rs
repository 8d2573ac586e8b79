//! Client connection state tracking.

use std::net::SocketAddr;
use std::time::Instant;

use chrono::{DateTime, Utc};
use edl_protocol::ConnectionId;
use serde_json::{Value, json};

/// Liveness of a client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

/// Represents a connected client.
#[derive(Debug, Clone)]
pub struct ClientConnection {
    /// Unique connection ID
    pub id: ConnectionId,
    /// Remote address
    pub peer: SocketAddr,
    /// Wall-clock connect time (reported by the status endpoint)
    pub connected_at: DateTime<Utc>,
    pub state: ConnectionState,
    /// Last time we received any bytes from this client
    pub last_activity: Instant,
    /// Commands decoded on this connection
    pub commands_received: u64,
}

impl ClientConnection {
    pub fn new(id: ConnectionId, peer: SocketAddr) -> Self {
        Self {
            id,
            peer,
            connected_at: Utc::now(),
            state: ConnectionState::Connecting,
            last_activity: Instant::now(),
            commands_received: 0,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn summary(&self) -> Value {
        json!({
            "id": self.id.to_string(),
            "peer": self.peer.to_string(),
            "state": self.state.as_str(),
            "connectedAt": self.connected_at.to_rfc3339(),
            "idleMs": self.last_activity.elapsed().as_millis() as u64,
            "commandsReceived": self.commands_received,
        })
    }
}
