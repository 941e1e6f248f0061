//! Database layer for Flatsync

mod connection;
mod directory_repository;
mod entity_repository;
mod migrations;
mod outbox_repository;
mod sync_state_repository;

pub use connection::Database;
pub use directory_repository::{DirectoryRepository, SqliteDirectoryRepository};
pub use entity_repository::{EntityRepository, SqliteEntityRepository};
pub use outbox_repository::{NewOutboxEntry, OutboxRepository, SqliteOutboxRepository};
pub use sync_state_repository::{SqliteSyncStateRepository, SyncStateRepository};
