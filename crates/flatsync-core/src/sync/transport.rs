//! Network transport capability consumed by the engine.

use std::future::Future;

use serde_json::Value;
use thiserror::Error;

use super::protocol::{SyncRequest, SyncResponse};
use crate::models::{EntityType, OutboxEntry};

/// Failure of a single network call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Rejected as conflicting: {0}")]
    Conflict(String),

    #[error("Not found")]
    NotFound,

    #[error("Rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The batch endpoint is not available on this server
    #[error("Sync endpoint not supported by server")]
    Unsupported,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl TransportError {
    /// Network-level failures that say nothing about the request itself
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout)
    }
}

/// Request/response channel to the server.
///
/// Implementations do not retry; the engine owns retry and backoff.
pub trait SyncTransport: Send + Sync {
    /// Combined push and pull.
    fn sync(
        &self,
        request: &SyncRequest,
    ) -> impl Future<Output = Result<SyncResponse, TransportError>> + Send;

    /// Push one outbox entry through the per-entity endpoints.
    ///
    /// Returns the server's copy of the entity for creates and updates.
    fn push_entity(
        &self,
        entry: &OutboxEntry,
    ) -> impl Future<Output = Result<Option<Value>, TransportError>> + Send;

    /// Full collection of one type for a household, or for a parent entity
    /// when the type is scoped under one.
    fn fetch_collection(
        &self,
        entity_type: EntityType,
        household_id: &str,
        parent_id: Option<&str>,
    ) -> impl Future<Output = Result<Vec<Value>, TransportError>> + Send;

    /// Current server copy of one entity; `None` when it no longer exists.
    fn fetch_entity(
        &self,
        entity_type: EntityType,
        id: &str,
    ) -> impl Future<Output = Result<Option<Value>, TransportError>> + Send;
}
