//! Editor Link — Protocol Types
//!
//! Newline-delimited JSON envelopes exchanged between an automation client
//! and the editor-resident command server. This crate is the single source
//! of truth for everything that crosses a crate boundary: wire envelopes,
//! the error taxonomy, the framing codec, command descriptors and parameter
//! schemas, and the interface the core uses to reach the editor model.

pub mod auth;
pub mod codec;
pub mod commands;
pub mod envelope;
pub mod error;
pub mod operation;
pub mod schema;

pub use codec::{DecodedFrame, FrameDecoder, FramingError, decode_command, encode, encode_command};
pub use commands::Commands;
pub use envelope::{CommandEnvelope, ConnectionId, ResponseEnvelope};
pub use error::{EditorError, ErrorKind, HandlerResult};
pub use operation::{ContinuationToken, EditorOperations, OperationOutcome};
pub use schema::{
    Affinity, BuiltinCommand, CommandDescriptor, HandlerRef, ParamField, ParamKind, ParamSchema,
    ResourceScope, ScopeRule,
};
