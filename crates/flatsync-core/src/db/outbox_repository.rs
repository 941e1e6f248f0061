//! Outbox (sync queue) repository

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT and counters

use crate::error::Result;
use crate::models::{EntityType, Operation, OutboxEntry};
use rusqlite::{params, Connection, OptionalExtension};

const COLUMNS: &str = "id, entity_type, entity_id, household_id, operation, payload, \
                       created_at, retry_count, last_error, revision, held";

/// A mutation to append to the outbox
#[derive(Debug, Clone, Copy)]
pub struct NewOutboxEntry<'e> {
    pub entity_type: EntityType,
    pub entity_id: &'e str,
    pub household_id: &'e str,
    pub operation: Operation,
    pub payload: &'e serde_json::Value,
    pub created_at: i64,
}

/// Trait for outbox storage operations
pub trait OutboxRepository {
    /// Append a mutation, coalescing with a queued create/update of the same
    /// entity. A delete replaces everything queued for the entity.
    ///
    /// Returns the id of the entry now carrying the mutation.
    fn enqueue(&self, entry: NewOutboxEntry<'_>) -> Result<i64>;

    /// Entries ready to push, FIFO by id and grouped by entity type in push
    /// order. Held entries and entries past `max_retries` are skipped.
    fn peek_batch(
        &self,
        household_id: &str,
        max_entries: usize,
        max_retries: u32,
    ) -> Result<Vec<OutboxEntry>>;

    fn get(&self, entry_id: i64) -> Result<Option<OutboxEntry>>;

    /// Every queued entry, optionally for one household, FIFO
    fn list(&self, household_id: Option<&str>) -> Result<Vec<OutboxEntry>>;

    /// Queued entries for one entity, FIFO
    fn entries_for(&self, entity_type: EntityType, entity_id: &str) -> Result<Vec<OutboxEntry>>;

    /// Remove an entry. Idempotent; returns whether anything was removed.
    fn acknowledge(&self, entry_id: i64) -> Result<bool>;

    /// Remove an entry only if nothing was coalesced into it since
    /// `revision` was read.
    fn acknowledge_revision(&self, entry_id: i64, revision: i64) -> Result<bool>;

    /// Count a failed push attempt and remember why
    fn mark_failed(&self, entry_id: i64, error: &str) -> Result<()>;

    /// Entries excluded from automatic batches by the retry ceiling
    fn stuck_entries(&self, max_retries: u32) -> Result<Vec<OutboxEntry>>;

    /// Reset one entry's retry count. Returns false if it does not exist.
    fn retry(&self, entry_id: i64) -> Result<bool>;

    /// Reset the retry count of every stuck entry of a household
    fn retry_all_stuck(&self, household_id: &str, max_retries: u32) -> Result<usize>;

    /// Park or release an entity's entries for conflict review
    fn set_held(&self, entity_type: EntityType, entity_id: &str, held: bool) -> Result<usize>;

    /// Drop everything queued for an entity
    fn remove_for_entity(&self, entity_type: EntityType, entity_id: &str) -> Result<usize>;

    /// Number of queued entries for a household
    fn pending_count(&self, household_id: &str) -> Result<usize>;
}

/// `SQLite` implementation of `OutboxRepository`
pub struct SqliteOutboxRepository<'a> {
    conn: &'a Connection,
}

struct StoredEntry {
    id: i64,
    entity_type: String,
    entity_id: String,
    household_id: String,
    operation: String,
    payload: String,
    created_at: i64,
    retry_count: i64,
    last_error: Option<String>,
    revision: i64,
    held: bool,
}

impl StoredEntry {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            entity_type: row.get(1)?,
            entity_id: row.get(2)?,
            household_id: row.get(3)?,
            operation: row.get(4)?,
            payload: row.get(5)?,
            created_at: row.get(6)?,
            retry_count: row.get(7)?,
            last_error: row.get(8)?,
            revision: row.get(9)?,
            held: row.get::<_, i32>(10)? != 0,
        })
    }

    fn into_entry(self) -> Result<OutboxEntry> {
        Ok(OutboxEntry {
            id: self.id,
            entity_type: self.entity_type.parse()?,
            entity_id: self.entity_id,
            household_id: self.household_id,
            operation: self.operation.parse()?,
            payload: serde_json::from_str(&self.payload)?,
            created_at: self.created_at,
            retry_count: u32::try_from(self.retry_count).unwrap_or(u32::MAX),
            last_error: self.last_error,
            revision: self.revision,
            held: self.held,
        })
    }
}

impl<'a> SqliteOutboxRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn query(&self, filter: &str, params: impl rusqlite::Params) -> Result<Vec<OutboxEntry>> {
        let sql = format!("SELECT {COLUMNS} FROM sync_queue WHERE {filter} ORDER BY id");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params, StoredEntry::read)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(StoredEntry::into_entry).collect()
    }

    fn insert(&self, entry: &NewOutboxEntry<'_>) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO sync_queue (entity_type, entity_id, household_id, operation, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.entity_type.as_str(),
                entry.entity_id,
                entry.household_id,
                entry.operation.as_str(),
                serde_json::to_string(entry.payload)?,
                entry.created_at,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }
}

impl OutboxRepository for SqliteOutboxRepository<'_> {
    fn enqueue(&self, entry: NewOutboxEntry<'_>) -> Result<i64> {
        if entry.operation == Operation::Delete {
            let dropped = self.remove_for_entity(entry.entity_type, entry.entity_id)?;
            if dropped > 0 {
                tracing::debug!(
                    "Delete of {} {} replaced {dropped} queued entries",
                    entry.entity_type,
                    entry.entity_id
                );
            }
            return self.insert(&entry);
        }

        let latest = self.entries_for(entry.entity_type, entry.entity_id)?.pop();
        match latest {
            Some(existing) if existing.operation != Operation::Delete => {
                // A create stays a create: the server has never seen the entity.
                let operation = if existing.operation == Operation::Create {
                    Operation::Create
                } else {
                    entry.operation
                };
                self.conn.execute(
                    "UPDATE sync_queue
                     SET payload = ?1, operation = ?2, revision = revision + 1
                     WHERE id = ?3",
                    params![
                        serde_json::to_string(entry.payload)?,
                        operation.as_str(),
                        existing.id
                    ],
                )?;
                tracing::debug!(
                    "Coalesced {} into outbox entry {} for {} {}",
                    entry.operation,
                    existing.id,
                    entry.entity_type,
                    entry.entity_id
                );
                Ok(existing.id)
            }
            _ => self.insert(&entry),
        }
    }

    fn peek_batch(
        &self,
        household_id: &str,
        max_entries: usize,
        max_retries: u32,
    ) -> Result<Vec<OutboxEntry>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM sync_queue
             WHERE household_id = ?1 AND held = 0 AND retry_count <= ?2
             ORDER BY id
             LIMIT ?3"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                params![household_id, max_retries, max_entries as i64],
                StoredEntry::read,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut entries = rows
            .into_iter()
            .map(StoredEntry::into_entry)
            .collect::<Result<Vec<_>>>()?;
        // Stable: FIFO is kept inside each type.
        entries.sort_by_key(|entry| entry.entity_type);
        Ok(entries)
    }

    fn get(&self, entry_id: i64) -> Result<Option<OutboxEntry>> {
        let sql = format!("SELECT {COLUMNS} FROM sync_queue WHERE id = ?1");
        let row = self
            .conn
            .query_row(&sql, params![entry_id], StoredEntry::read)
            .optional()?;
        row.map(StoredEntry::into_entry).transpose()
    }

    fn list(&self, household_id: Option<&str>) -> Result<Vec<OutboxEntry>> {
        match household_id {
            Some(household_id) => self.query("household_id = ?1", params![household_id]),
            None => self.query("1 = 1", []),
        }
    }

    fn entries_for(&self, entity_type: EntityType, entity_id: &str) -> Result<Vec<OutboxEntry>> {
        self.query(
            "entity_type = ?1 AND entity_id = ?2",
            params![entity_type.as_str(), entity_id],
        )
    }

    fn acknowledge(&self, entry_id: i64) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM sync_queue WHERE id = ?1", params![entry_id])?;
        Ok(rows > 0)
    }

    fn acknowledge_revision(&self, entry_id: i64, revision: i64) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM sync_queue WHERE id = ?1 AND revision = ?2",
            params![entry_id, revision],
        )?;
        Ok(rows > 0)
    }

    fn mark_failed(&self, entry_id: i64, error: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE sync_queue SET retry_count = retry_count + 1, last_error = ?1 WHERE id = ?2",
            params![error, entry_id],
        )?;
        Ok(())
    }

    fn stuck_entries(&self, max_retries: u32) -> Result<Vec<OutboxEntry>> {
        self.query("retry_count > ?1", params![max_retries])
    }

    fn retry(&self, entry_id: i64) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE sync_queue SET retry_count = 0 WHERE id = ?1",
            params![entry_id],
        )?;
        Ok(rows > 0)
    }

    fn retry_all_stuck(&self, household_id: &str, max_retries: u32) -> Result<usize> {
        let rows = self.conn.execute(
            "UPDATE sync_queue SET retry_count = 0 WHERE household_id = ?1 AND retry_count > ?2",
            params![household_id, max_retries],
        )?;
        Ok(rows)
    }

    fn set_held(&self, entity_type: EntityType, entity_id: &str, held: bool) -> Result<usize> {
        let rows = self.conn.execute(
            "UPDATE sync_queue SET held = ?1 WHERE entity_type = ?2 AND entity_id = ?3",
            params![i32::from(held), entity_type.as_str(), entity_id],
        )?;
        Ok(rows)
    }

    fn remove_for_entity(&self, entity_type: EntityType, entity_id: &str) -> Result<usize> {
        let rows = self.conn.execute(
            "DELETE FROM sync_queue WHERE entity_type = ?1 AND entity_id = ?2",
            params![entity_type.as_str(), entity_id],
        )?;
        Ok(rows)
    }

    fn pending_count(&self, household_id: &str) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sync_queue WHERE household_id = ?1",
            params![household_id],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}
