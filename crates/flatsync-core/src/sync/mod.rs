//! Offline-first synchronization: outbox push, incremental pull, merge.

mod backoff;
mod engine;
mod http;
#[cfg(test)]
pub(crate) mod mock;
mod protocol;
mod resolver;
mod scheduler;
mod transport;

use thiserror::Error;

use crate::models::EntityType;

pub use backoff::Backoff;
pub use engine::{Resolution, SyncEngine};
pub use http::HttpTransport;
pub use protocol::{DeletedIds, EntityChanges, SyncChanges, SyncRequest, SyncResponse};
pub use resolver::{resolve, Decision, Remote};
pub use scheduler::SyncScheduler;
pub use transport::{SyncTransport, TransportError};

/// Why a round (or a single entity within it) did not sync.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Transient; the round is retried with backoff
    #[error("Network error: {0}")]
    Network(String),

    /// Bearer token rejected; the outbox is left untouched
    #[error("Authentication expired, sign in again")]
    Auth,

    /// Local and remote diverged; waiting for the user
    #[error("Conflict on {entity_type} {entity_id}")]
    Conflict {
        entity_type: EntityType,
        entity_id: String,
    },

    /// Local persistence failed; fatal to the round
    #[error("Local store error: {0}")]
    Storage(#[from] crate::Error),

    /// Malformed payload from the server, or an invalid request
    #[error("Invalid data: {0}")]
    Validation(String),

    #[error("Sync round cancelled")]
    Cancelled,
}

impl SyncError {
    /// Whether the scheduler should retry after a backoff delay
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

/// Result type alias for sync operations
pub type SyncResult<T> = std::result::Result<T, SyncError>;

/// Outcome of one completed round.
#[derive(Debug, Default)]
pub struct RoundSummary {
    /// Outbox entries the server accepted
    pub pushed: usize,
    /// Remote changes applied locally
    pub pulled: usize,
    /// Entities newly flagged for user resolution
    pub conflicted: usize,
    /// Entries or entities that failed on their own without aborting the round
    pub failed: usize,
    /// Watermark after the round
    pub watermark: i64,
    /// Round went through the per-entity REST endpoints
    pub used_fallback: bool,
    /// Per-entity conflicts and validation failures
    pub issues: Vec<SyncError>,
}

impl RoundSummary {
    /// Fold the outcome of a later batch of the same round into this one.
    pub(crate) fn absorb(&mut self, later: Self) {
        self.pushed += later.pushed;
        self.pulled += later.pulled;
        self.conflicted += later.conflicted;
        self.failed += later.failed;
        self.watermark = later.watermark;
        self.used_fallback |= later.used_fallback;
        self.issues.extend(later.issues);
    }
}
