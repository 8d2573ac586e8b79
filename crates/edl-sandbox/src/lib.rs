//! Editor Link Sandbox — an in-memory editor model.
//!
//! Implements [`EditorOperations`](edl_protocol::EditorOperations) over a
//! small model of visual-script graphs, widget trees, and the gameplay tag
//! and effect libraries. Used by the standalone binary and by tests in place
//! of a live editor.

pub mod catalog;
pub mod editor;
pub mod gameplay;
pub mod graph;
pub mod widget;

pub use catalog::{SandboxCommands, descriptors};
pub use editor::SandboxEditor;
