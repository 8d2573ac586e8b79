//! Editor Link Server — admits commands from the transport and executes
//! them on the editor thread.
//!
//! The [`ServerContext`] is the process-scoped object shared by the network
//! side. The [`EditorExecutor`] is owned by the editor thread and is the only
//! component that ever touches the editor model.

pub mod config;
pub mod context;
pub mod executor;
pub mod guard;
pub mod host;
pub mod queue;
pub mod registry;
pub mod request;
pub mod tracker;

pub use config::{ConfigError, ServerConfig};
pub use context::{Admission, LifecycleState, ServerContext, ServerContextBuilder};
pub use executor::{EditorExecutor, TickReport};
pub use guard::{GuardChain, GuardDecision, ReadOnlyGuard, RequestGuard, TokenGuard};
pub use host::TickDriver;
pub use queue::DispatchQueue;
pub use registry::{CommandRegistry, RegistryError};
pub use request::{PendingRequest, RequestKey, RequestState, ScopeClaim};
pub use tracker::{CorrelationTracker, Resolution};
