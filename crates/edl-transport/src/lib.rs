//! Editor Link Transport Layer
//!
//! Provides the stream-socket transport for the command server.
//! The transport layer handles:
//! - Connection lifecycle (accept, read loop, write loop, close)
//! - Newline-delimited framing via the protocol codec
//! - Idle-connection detection
//! - An optional HTTP status endpoint
//!
//! The transport is decoupled from dispatch via the `CommandSink` trait.

pub mod client;
pub mod server;
pub mod status;

pub use client::{ClientConnection, ConnectionState};
pub use server::{CommandSink, ReplySender, TransportConfig, TransportError, TransportServer};
