//! Per-household watermark storage

use crate::error::Result;
use crate::models::SyncWatermark;
use rusqlite::{params, Connection, OptionalExtension};

/// Trait for watermark storage operations
pub trait SyncStateRepository {
    /// Load the household's state, or a zero watermark if it never synced
    fn load(&self, household_id: &str) -> Result<SyncWatermark>;

    /// Every household with recorded state
    fn list(&self) -> Result<Vec<SyncWatermark>>;

    /// Record a complete round. The watermark only moves forward.
    fn advance(&self, household_id: &str, server_timestamp: i64, now: i64) -> Result<SyncWatermark>;

    /// Record a complete round that had no server timestamp to advance to
    fn record_success(&self, household_id: &str, now: i64) -> Result<SyncWatermark>;

    /// Record a failed round, leaving the watermark untouched.
    /// Returns the new consecutive failure count.
    fn record_failure(&self, household_id: &str, error: &str, now: i64) -> Result<u32>;
}

/// `SQLite` implementation of `SyncStateRepository`
pub struct SqliteSyncStateRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteSyncStateRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_state(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncWatermark> {
        Ok(SyncWatermark {
            household_id: row.get(0)?,
            last_sync_timestamp: row.get(1)?,
            consecutive_failures: row.get(2)?,
            last_error: row.get(3)?,
            last_round_at: row.get(4)?,
        })
    }
}

impl SyncStateRepository for SqliteSyncStateRepository<'_> {
    fn load(&self, household_id: &str) -> Result<SyncWatermark> {
        let state = self
            .conn
            .query_row(
                "SELECT household_id, last_sync_timestamp, consecutive_failures, last_error, last_round_at
                 FROM sync_state WHERE household_id = ?1",
                params![household_id],
                Self::parse_state,
            )
            .optional()?;
        Ok(state.unwrap_or_else(|| SyncWatermark::new(household_id)))
    }

    fn list(&self) -> Result<Vec<SyncWatermark>> {
        let mut stmt = self.conn.prepare(
            "SELECT household_id, last_sync_timestamp, consecutive_failures, last_error, last_round_at
             FROM sync_state ORDER BY household_id",
        )?;
        let states = stmt
            .query_map([], Self::parse_state)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(states)
    }

    fn advance(&self, household_id: &str, server_timestamp: i64, now: i64) -> Result<SyncWatermark> {
        self.conn.execute(
            "INSERT INTO sync_state (household_id, last_sync_timestamp, consecutive_failures, last_error, last_round_at)
             VALUES (?1, MAX(?2, 0), 0, NULL, ?3)
             ON CONFLICT(household_id) DO UPDATE SET
                last_sync_timestamp = MAX(last_sync_timestamp, excluded.last_sync_timestamp),
                consecutive_failures = 0,
                last_error = NULL,
                last_round_at = excluded.last_round_at",
            params![household_id, server_timestamp, now],
        )?;
        self.load(household_id)
    }

    fn record_success(&self, household_id: &str, now: i64) -> Result<SyncWatermark> {
        self.advance(household_id, 0, now)
    }

    fn record_failure(&self, household_id: &str, error: &str, now: i64) -> Result<u32> {
        self.conn.execute(
            "INSERT INTO sync_state (household_id, consecutive_failures, last_error, last_round_at)
             VALUES (?1, 1, ?2, ?3)
             ON CONFLICT(household_id) DO UPDATE SET
                consecutive_failures = consecutive_failures + 1,
                last_error = excluded.last_error,
                last_round_at = excluded.last_round_at",
            params![household_id, error, now],
        )?;
        Ok(self.load(household_id)?.consecutive_failures)
    }
}
