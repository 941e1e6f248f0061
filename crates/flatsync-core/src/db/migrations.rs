//! Database migrations

use crate::error::Result;
use crate::models::EntityType;
use rusqlite::{Connection, OptionalExtension};

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .optional()?
        .unwrap_or(0);

    Ok(version)
}

/// Apply one migration atomically and record its version
fn apply(conn: &Connection, version: i32, statements: &[String]) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    for stmt in statements {
        tx.execute_batch(stmt)?;
    }
    tx.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    tx.commit()?;

    tracing::info!("Migrated database to version {version}");
    Ok(())
}

/// Table for one syncable entity type.
///
/// The CHECK keeps `last_modified_locally` set exactly when the row is dirty.
fn entity_table(table: &str) -> Vec<String> {
    vec![
        format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id TEXT PRIMARY KEY,
                household_id TEXT NOT NULL,
                parent_id TEXT,
                payload TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                base_updated_at INTEGER,
                sync_status TEXT NOT NULL DEFAULT 'SYNCED'
                    CHECK (sync_status IN ('SYNCED', 'PENDING', 'CONFLICT')),
                last_modified_locally INTEGER,
                is_deleted INTEGER NOT NULL DEFAULT 0,
                remote_payload TEXT,
                CHECK ((sync_status = 'SYNCED') = (last_modified_locally IS NULL))
            )"
        ),
        format!("CREATE INDEX IF NOT EXISTS idx_{table}_household ON {table}(household_id)"),
        format!("CREATE INDEX IF NOT EXISTS idx_{table}_status ON {table}(sync_status)"),
        format!("CREATE INDEX IF NOT EXISTS idx_{table}_parent ON {table}(parent_id)"),
    ]
}

/// Migration to version 1: Initial schema
fn migrate_v1(conn: &Connection) -> Result<()> {
    let mut statements: Vec<String> = [
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )",
        "CREATE TABLE IF NOT EXISTS households (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            invite_code TEXT,
            created_at INTEGER NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL,
            full_name TEXT
        )",
        "CREATE TABLE IF NOT EXISTS household_members (
            id TEXT PRIMARY KEY,
            household_id TEXT NOT NULL REFERENCES households(id) ON DELETE CASCADE,
            user_id TEXT NOT NULL,
            role TEXT NOT NULL,
            joined_at INTEGER NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_household_members_household ON household_members(household_id)",
        // Outbox
        "CREATE TABLE IF NOT EXISTS sync_queue (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            household_id TEXT NOT NULL,
            operation TEXT NOT NULL CHECK (operation IN ('CREATE', 'UPDATE', 'DELETE')),
            payload TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            retry_count INTEGER NOT NULL DEFAULT 0,
            last_error TEXT
        )",
        "CREATE INDEX IF NOT EXISTS idx_sync_queue_entity ON sync_queue(entity_type, entity_id)",
        "CREATE INDEX IF NOT EXISTS idx_sync_queue_household ON sync_queue(household_id, id)",
        // Watermark, one row per household
        "CREATE TABLE IF NOT EXISTS sync_state (
            household_id TEXT PRIMARY KEY,
            last_sync_timestamp INTEGER NOT NULL DEFAULT 0,
            consecutive_failures INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            last_round_at INTEGER
        )",
    ]
    .into_iter()
    .map(str::to_string)
    .collect();

    for entity_type in EntityType::ALL {
        statements.extend(entity_table(entity_type.table()));
    }

    apply(conn, 1, &statements)
}

/// Migration to version 2: outbox revisions and conflict holds
fn migrate_v2(conn: &Connection) -> Result<()> {
    let statements = [
        "ALTER TABLE sync_queue ADD COLUMN revision INTEGER NOT NULL DEFAULT 0",
        "ALTER TABLE sync_queue ADD COLUMN held INTEGER NOT NULL DEFAULT 0",
        "CREATE INDEX IF NOT EXISTS idx_sync_queue_ready ON sync_queue(held, retry_count)",
    ]
    .map(str::to_string);

    apply(conn, CURRENT_VERSION, &statements)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    fn table_exists(conn: &Connection, name: &str) -> bool {
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            [name],
            |row| row.get(0),
        )
        .unwrap()
    }

    #[test]
    fn test_migrations() {
        let conn = setup();
        run(&conn).unwrap();

        let version = get_version(&conn).unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[test]
    fn test_migrations_idempotent() {
        let conn = setup();
        run(&conn).unwrap();
        run(&conn).unwrap();

        let version = get_version(&conn).unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[test]
    fn test_creates_entity_tables() {
        let conn = setup();
        run(&conn).unwrap();

        for entity_type in EntityType::ALL {
            assert!(table_exists(&conn, entity_type.table()), "{entity_type}");
        }
        assert!(table_exists(&conn, "sync_queue"));
        assert!(table_exists(&conn, "sync_state"));
    }

    #[test]
    fn test_synced_rows_cannot_carry_local_timestamp() {
        let conn = setup();
        run(&conn).unwrap();

        let result = conn.execute(
            "INSERT INTO todos (id, household_id, payload, updated_at, sync_status, last_modified_locally)
             VALUES ('t1', 'h1', '{}', 1, 'SYNCED', 5)",
            [],
        );
        assert!(result.is_err());

        let result = conn.execute(
            "INSERT INTO todos (id, household_id, payload, updated_at, sync_status, last_modified_locally)
             VALUES ('t1', 'h1', '{}', 1, 'PENDING', NULL)",
            [],
        );
        assert!(result.is_err());
    }
}
