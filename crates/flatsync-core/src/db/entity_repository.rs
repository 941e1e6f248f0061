//! Entity repository: one table per entity type, identical sync columns

use crate::error::Result;
use crate::models::{EntityType, LocalRecord, SyncEntity, SyncStatus};
use rusqlite::{params, Connection, OptionalExtension, Params};

const COLUMNS: &str = "household_id, payload, base_updated_at, sync_status, \
                       last_modified_locally, is_deleted, remote_payload";

/// Trait for entity row storage
pub trait EntityRepository {
    /// Get a row by id, including a local tombstone
    fn get(&self, entity_type: EntityType, id: &str) -> Result<Option<LocalRecord>>;

    /// Live rows of a household, most recently updated first
    fn list(&self, entity_type: EntityType, household_id: &str) -> Result<Vec<LocalRecord>>;

    /// All rows of a household, tombstones included
    fn list_all(&self, entity_type: EntityType, household_id: &str) -> Result<Vec<LocalRecord>>;

    /// Live rows under a parent entity
    fn list_children(&self, entity_type: EntityType, parent_id: &str) -> Result<Vec<LocalRecord>>;

    /// Rows of every type with the given status
    fn list_with_status(&self, household_id: &str, status: SyncStatus) -> Result<Vec<LocalRecord>>;

    /// Insert or replace a row
    fn upsert(&self, record: &LocalRecord) -> Result<()>;

    /// Physically remove a row. Returns false if it did not exist.
    fn remove(&self, entity_type: EntityType, id: &str) -> Result<bool>;
}

/// `SQLite` implementation of `EntityRepository`
pub struct SqliteEntityRepository<'a> {
    conn: &'a Connection,
}

struct StoredRow {
    household_id: String,
    payload: String,
    base_updated_at: Option<i64>,
    sync_status: String,
    last_modified_locally: Option<i64>,
    is_deleted: bool,
    remote_payload: Option<String>,
}

impl StoredRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            household_id: row.get(0)?,
            payload: row.get(1)?,
            base_updated_at: row.get(2)?,
            sync_status: row.get(3)?,
            last_modified_locally: row.get(4)?,
            is_deleted: row.get::<_, i32>(5)? != 0,
            remote_payload: row.get(6)?,
        })
    }

    fn into_record(self, entity_type: EntityType) -> Result<LocalRecord> {
        let payload = serde_json::from_str(&self.payload)?;
        let remote_payload = self
            .remote_payload
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;

        Ok(LocalRecord {
            entity: SyncEntity::from_payload(entity_type, payload)?,
            household_id: self.household_id,
            sync_status: self.sync_status.parse()?,
            base_updated_at: self.base_updated_at,
            last_modified_locally: self.last_modified_locally,
            is_deleted: self.is_deleted,
            remote_payload,
        })
    }
}

impl<'a> SqliteEntityRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn query(
        &self,
        entity_type: EntityType,
        filter: &str,
        params: impl Params,
    ) -> Result<Vec<LocalRecord>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM {} WHERE {filter} ORDER BY updated_at DESC, id",
            entity_type.table()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params, StoredRow::read)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|row| row.into_record(entity_type))
            .collect()
    }
}

impl EntityRepository for SqliteEntityRepository<'_> {
    fn get(&self, entity_type: EntityType, id: &str) -> Result<Option<LocalRecord>> {
        let sql = format!("SELECT {COLUMNS} FROM {} WHERE id = ?1", entity_type.table());
        let row = self
            .conn
            .query_row(&sql, params![id], StoredRow::read)
            .optional()?;

        row.map(|row| row.into_record(entity_type)).transpose()
    }

    fn list(&self, entity_type: EntityType, household_id: &str) -> Result<Vec<LocalRecord>> {
        self.query(
            entity_type,
            "household_id = ?1 AND is_deleted = 0",
            params![household_id],
        )
    }

    fn list_all(&self, entity_type: EntityType, household_id: &str) -> Result<Vec<LocalRecord>> {
        self.query(entity_type, "household_id = ?1", params![household_id])
    }

    fn list_children(&self, entity_type: EntityType, parent_id: &str) -> Result<Vec<LocalRecord>> {
        self.query(
            entity_type,
            "parent_id = ?1 AND is_deleted = 0",
            params![parent_id],
        )
    }

    fn list_with_status(&self, household_id: &str, status: SyncStatus) -> Result<Vec<LocalRecord>> {
        let mut records = Vec::new();
        for entity_type in EntityType::ALL {
            records.extend(self.query(
                entity_type,
                "household_id = ?1 AND sync_status = ?2",
                params![household_id, status.as_str()],
            )?);
        }
        Ok(records)
    }

    fn upsert(&self, record: &LocalRecord) -> Result<()> {
        let payload = serde_json::to_string(&record.entity.to_payload()?)?;
        let remote_payload = record
            .remote_payload
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let sql = format!(
            "INSERT INTO {} (id, household_id, parent_id, payload, updated_at, base_updated_at,
                             sync_status, last_modified_locally, is_deleted, remote_payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
                household_id = excluded.household_id,
                parent_id = excluded.parent_id,
                payload = excluded.payload,
                updated_at = excluded.updated_at,
                base_updated_at = excluded.base_updated_at,
                sync_status = excluded.sync_status,
                last_modified_locally = excluded.last_modified_locally,
                is_deleted = excluded.is_deleted,
                remote_payload = excluded.remote_payload",
            record.entity_type().table()
        );

        self.conn.execute(
            &sql,
            params![
                record.id(),
                record.household_id,
                record.entity.parent_id(),
                payload,
                record.updated_at_ms(),
                record.base_updated_at,
                record.sync_status.as_str(),
                record.last_modified_locally,
                i32::from(record.is_deleted),
                remote_payload,
            ],
        )?;
        Ok(())
    }

    fn remove(&self, entity_type: EntityType, id: &str) -> Result<bool> {
        let sql = format!("DELETE FROM {} WHERE id = ?1", entity_type.table());
        let rows = self.conn.execute(&sql, params![id])?;
        Ok(rows > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{ShoppingList, ShoppingListItem, Todo};
    use pretty_assertions::assert_eq;

    fn record(entity: SyncEntity, household_id: &str, status: SyncStatus) -> LocalRecord {
        let dirty = status != SyncStatus::Synced;
        LocalRecord {
            entity,
            household_id: household_id.to_string(),
            sync_status: status,
            base_updated_at: None,
            last_modified_locally: dirty.then_some(1),
            is_deleted: false,
            remote_payload: None,
        }
    }

    #[test]
    fn upsert_then_get_roundtrips_record() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteEntityRepository::new(db.connection());
        let todo = Todo::new("h1", "u1", "Buy milk");
        let stored = record(todo.clone().into(), "h1", SyncStatus::Pending);

        repo.upsert(&stored).unwrap();

        let loaded = repo.get(EntityType::Todo, &todo.id).unwrap().unwrap();
        assert_eq!(loaded, stored);
        assert!(repo.get(EntityType::Expense, &todo.id).unwrap().is_none());
    }

    #[test]
    fn list_hides_tombstones_but_list_all_keeps_them() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteEntityRepository::new(db.connection());

        let live = record(Todo::new("h1", "u1", "Live").into(), "h1", SyncStatus::Synced);
        let mut gone = record(Todo::new("h1", "u1", "Gone").into(), "h1", SyncStatus::Pending);
        gone.is_deleted = true;
        let other = record(Todo::new("h2", "u1", "Other").into(), "h2", SyncStatus::Synced);
        for r in [&live, &gone, &other] {
            repo.upsert(r).unwrap();
        }

        let listed = repo.list(EntityType::Todo, "h1").unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id(), live.id());
        assert_eq!(repo.list_all(EntityType::Todo, "h1").unwrap().len(), 2);
    }

    #[test]
    fn list_children_filters_by_parent() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteEntityRepository::new(db.connection());
        let list = ShoppingList::new("h1", "u1", "Weekly");
        let item = ShoppingListItem::new(&list.id, "u1", "Milk");
        let stray = ShoppingListItem::new("other-list", "u1", "Soap");

        repo.upsert(&record(list.clone().into(), "h1", SyncStatus::Synced))
            .unwrap();
        repo.upsert(&record(item.clone().into(), "h1", SyncStatus::Synced))
            .unwrap();
        repo.upsert(&record(stray.into(), "h1", SyncStatus::Synced))
            .unwrap();

        let children = repo
            .list_children(EntityType::ShoppingListItem, &list.id)
            .unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].id(), item.id);
    }

    #[test]
    fn list_with_status_spans_entity_types() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteEntityRepository::new(db.connection());
        repo.upsert(&record(
            Todo::new("h1", "u1", "A").into(),
            "h1",
            SyncStatus::Conflict,
        ))
        .unwrap();
        repo.upsert(&record(
            ShoppingList::new("h1", "u1", "B").into(),
            "h1",
            SyncStatus::Conflict,
        ))
        .unwrap();
        repo.upsert(&record(
            Todo::new("h1", "u1", "C").into(),
            "h1",
            SyncStatus::Pending,
        ))
        .unwrap();

        let conflicts = repo.list_with_status("h1", SyncStatus::Conflict).unwrap();
        assert_eq!(conflicts.len(), 2);
    }

    #[test]
    fn remove_reports_presence() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteEntityRepository::new(db.connection());
        let todo = Todo::new("h1", "u1", "Temp");
        repo.upsert(&record(todo.clone().into(), "h1", SyncStatus::Synced))
            .unwrap();

        assert!(repo.remove(EntityType::Todo, &todo.id).unwrap());
        assert!(!repo.remove(EntityType::Todo, &todo.id).unwrap());
    }
}
