//! Agent runtime between a remote AI service and a local Home Assistant.
//!
//! - **[`Agent`]**: owns the lifecycle. Connects out, authenticates, pushes
//!   the baseline inventory, then dispatches commands until shutdown.
//!
//! - **[`ConnectionManager`]**: state machine over one outbound WebSocket,
//!   with heartbeats and jittered exponential backoff
//!   ([`backoff::Backoff`]). Observed through a cloneable
//!   [`ConnectionHandle`].
//!
//! - **[`Dispatcher`]**: validates commands against the [`EntityStore`] and
//!   the capability allow-list, runs them on a [`LocalControl`] with bounded
//!   concurrency, and answers retried ids from its result cache.
//!
//! - **[`RegistrySync`]**: full inventory per session, diffs in between.

pub mod agent;
pub mod backoff;
pub mod config;
pub mod connection;
pub mod convert;
pub mod dispatch;
pub mod error;
pub mod local;
pub mod model;
pub mod registry;

#[cfg(test)]
mod testing;

// ── Primary re-exports ──────────────────────────────────────────────
pub use agent::Agent;
pub use backoff::{Backoff, BackoffPolicy};
pub use config::{AgentConfig, TlsVerification};
pub use connection::{
    ConnectionHandle, ConnectionManager, ConnectionSettings, ConnectionState, Outbox,
    SessionHook, SessionId,
};
pub use dispatch::{DispatchSettings, Dispatcher};
pub use error::{CommandError, CoreError};
pub use local::{HomeAssistant, LocalControl, RetryPolicy};
pub use model::{
    Command, CommandId, CommandResult, CommandStatus, EntityId, EntitySnapshot,
};
pub use registry::{EntityStore, InventoryDiff, RegistrySync};
