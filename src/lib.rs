//! Offline-first synchronization core for the hangout relationship feature.
//!
//! One [`sync::SyncClient`] per signed-in user keeps the local cache and the
//! remote backend consistent across intermittent connectivity: outbound
//! commands are written optimistically and settled by acknowledgement,
//! inbound peer actions merge through the reception pipeline, and commands
//! issued while disconnected queue locally and flush on reconnect.
//!
//! The crate does no I/O of its own. Hosts supply a [`cache::CacheStore`],
//! a [`backend::RemoteBackend`], and drive the session from their runtime.

#![forbid(unsafe_code)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod cache;
pub mod classifier;
pub mod config;
pub mod delivery;
pub mod model;
pub mod offline;
pub mod reception;
pub mod reducer;
pub mod state_map;
pub mod sync;

use thiserror::Error;

pub use backend::{BackendError, MemoryBackend, RemoteBackend};
pub use cache::{CacheError, CacheKeys, CacheStore, HangoutTable, MemoryCache};
pub use classifier::Notification;
pub use config::{ConfigError, SyncConfig};
pub use model::{
    Command, CommandError, ConnectionState, DeliveryPhase, Hangout, Identity, Message, ModelError,
    PendingCommand, RelationState, RouteChange, UnixTimeMs, Username,
};
pub use reducer::{update, Event, Model};
pub use state_map::{map_command, StatePair};
pub use sync::SyncClient;

/// Top-level error for session operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}
