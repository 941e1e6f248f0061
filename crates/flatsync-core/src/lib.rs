//! flatsync-core - Core library for Flatsync
//!
//! This crate contains the shared household models, the local store with its
//! outbox, and the sync engine used by every Flatsync front end.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod state;
pub mod sync;
pub mod util;

pub use config::SyncConfig;
pub use error::{Error, Result};
pub use models::{EntityType, LocalRecord, SyncEntity, SyncStatus};
pub use services::LocalStore;
pub use state::SyncHealth;
pub use sync::{HttpTransport, Resolution, RoundSummary, SyncEngine, SyncError, SyncScheduler};
