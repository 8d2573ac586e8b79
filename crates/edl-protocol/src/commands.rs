//! Names of the commands the server answers itself.
//!
//! Editor-model commands are owned by the collaborator that registers them;
//! these are the only names the core reserves.

/// Built-in command names.
pub struct Commands;

impl Commands {
    /// Introspection: every registered command with its schema.
    pub const LIST_COMMANDS: &str = "listCommands";
    /// Auth hook: present the shared token for this connection.
    pub const AUTHENTICATE: &str = "authenticate";

    /// Commands that never require an authenticated connection.
    pub const UNAUTHENTICATED: &[&str] = &[Self::LIST_COMMANDS, Self::AUTHENTICATE];
}

/// Server version reported to clients.
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");
