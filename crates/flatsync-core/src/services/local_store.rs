//! Shared local store used by front ends and the sync engine.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::db::{
    Database, DirectoryRepository, EntityRepository, NewOutboxEntry, OutboxRepository,
    SqliteDirectoryRepository, SqliteEntityRepository, SqliteOutboxRepository,
    SqliteSyncStateRepository, SyncStateRepository,
};
use crate::models::{
    EntityType, Household, HouseholdMember, LocalRecord, Operation, OutboxEntry, SyncEntity,
    SyncStatus, SyncWatermark, Syncable, User,
};
use crate::util::{millis_to_datetime, unix_millis_now};
use crate::{Error, Result};

/// Thread-safe facade over the local database.
///
/// Every mutation writes the entity row and its outbox entry in one
/// transaction. The lock is only ever held for synchronous database work.
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
}

impl LocalStore {
    /// Open a store at the given filesystem path, creating parent directories.
    pub fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::open(&db_path)?;
        tracing::debug!("Opened local store at {}", db_path.display());
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: Some(db_path),
        })
    }

    /// Open an in-memory store (primarily for tests).
    pub fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: None,
        })
    }

    /// Path of the backing file, if any.
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Run synchronous database work under the store lock.
    pub(crate) async fn with_db<T>(&self, work: impl FnOnce(&mut Database) -> Result<T>) -> Result<T> {
        let mut db = self.db.lock().await;
        work(&mut db)
    }

    /// Record a locally created entity and queue its CREATE.
    pub async fn create(&self, entity: impl Into<SyncEntity>) -> Result<LocalRecord> {
        let entity = entity.into();
        entity.validate()?;

        self.with_db(|db| {
            let tx = db.connection_mut().transaction()?;
            let entities = SqliteEntityRepository::new(&tx);

            if entities.get(entity.entity_type(), entity.id())?.is_some() {
                return Err(Error::InvalidInput(format!(
                    "{} {} already exists",
                    entity.entity_type(),
                    entity.id()
                )));
            }
            let household_id = owning_household(&entities, &entity)?;

            let record = LocalRecord {
                entity,
                household_id,
                sync_status: SyncStatus::Pending,
                base_updated_at: None,
                last_modified_locally: Some(unix_millis_now()),
                is_deleted: false,
                remote_payload: None,
            };
            entities.upsert(&record)?;
            queue(&tx, &record, Operation::Create)?;
            tx.commit()?;

            tracing::debug!("Created {} {}", record.entity_type(), record.id());
            Ok(record)
        })
        .await
    }

    /// Record a local edit and queue its UPDATE.
    ///
    /// The entity's `updated_at` is stamped here and always moves forward.
    /// An entity in conflict stays in conflict and its queued work stays held.
    pub async fn update(&self, entity: impl Into<SyncEntity>) -> Result<LocalRecord> {
        let mut entity = entity.into();
        entity.validate()?;

        self.with_db(|db| {
            let tx = db.connection_mut().transaction()?;
            let entities = SqliteEntityRepository::new(&tx);

            let existing = live_record(&entities, entity.entity_type(), entity.id())?;
            let now = unix_millis_now();
            entity.touch(millis_to_datetime(now.max(existing.updated_at_ms() + 1)));

            let record = LocalRecord {
                entity,
                sync_status: dirty_status(existing.sync_status),
                last_modified_locally: Some(next_local_clock(existing.last_modified_locally, now)),
                ..existing
            };
            entities.upsert(&record)?;
            queue(&tx, &record, Operation::Update)?;
            tx.commit()?;

            tracing::debug!("Updated {} {}", record.entity_type(), record.id());
            Ok(record)
        })
        .await
    }

    /// Tombstone an entity locally and queue its DELETE.
    pub async fn delete(&self, entity_type: EntityType, id: &str) -> Result<()> {
        self.with_db(|db| {
            let tx = db.connection_mut().transaction()?;
            let entities = SqliteEntityRepository::new(&tx);

            let existing = live_record(&entities, entity_type, id)?;
            let now = unix_millis_now();
            let mut entity = existing.entity.clone();
            entity.touch(millis_to_datetime(now.max(existing.updated_at_ms() + 1)));

            let record = LocalRecord {
                entity,
                sync_status: dirty_status(existing.sync_status),
                last_modified_locally: Some(next_local_clock(existing.last_modified_locally, now)),
                is_deleted: true,
                ..existing
            };
            entities.upsert(&record)?;
            queue(&tx, &record, Operation::Delete)?;
            tx.commit()?;

            tracing::debug!("Deleted {entity_type} {id}");
            Ok(())
        })
        .await
    }

    /// Fetch a live row by id.
    pub async fn get(&self, entity_type: EntityType, id: &str) -> Result<Option<LocalRecord>> {
        self.with_db(|db| {
            let repo = SqliteEntityRepository::new(db.connection());
            Ok(repo.get(entity_type, id)?.filter(|record| !record.is_deleted))
        })
        .await
    }

    /// Fetch a live entity of a concrete type.
    pub async fn get_entity<T: Syncable>(&self, id: &str) -> Result<Option<T>> {
        let record = self.get(T::ENTITY_TYPE, id).await?;
        Ok(record.and_then(|record| T::from_entity(record.entity)))
    }

    /// Live rows of one type for a household, newest first.
    pub async fn list(&self, entity_type: EntityType, household_id: &str) -> Result<Vec<LocalRecord>> {
        self.with_db(|db| {
            let repo = SqliteEntityRepository::new(db.connection());
            repo.list(entity_type, household_id)
        })
        .await
    }

    /// Live items of a shopping list.
    pub async fn list_items(&self, shopping_list_id: &str) -> Result<Vec<LocalRecord>> {
        self.with_db(|db| {
            let repo = SqliteEntityRepository::new(db.connection());
            repo.list_children(EntityType::ShoppingListItem, shopping_list_id)
        })
        .await
    }

    /// Rows awaiting a keep-mine / take-theirs decision.
    pub async fn list_conflicts(&self, household_id: &str) -> Result<Vec<LocalRecord>> {
        self.with_db(|db| {
            let repo = SqliteEntityRepository::new(db.connection());
            repo.list_with_status(household_id, SyncStatus::Conflict)
        })
        .await
    }

    /// Queued outbox entries, FIFO.
    pub async fn outbox_entries(&self, household_id: Option<&str>) -> Result<Vec<OutboxEntry>> {
        self.with_db(|db| {
            let repo = SqliteOutboxRepository::new(db.connection());
            repo.list(household_id)
        })
        .await
    }

    /// Entries that exhausted their automatic retries.
    pub async fn stuck_entries(&self, max_retries: u32) -> Result<Vec<OutboxEntry>> {
        self.with_db(|db| {
            let repo = SqliteOutboxRepository::new(db.connection());
            repo.stuck_entries(max_retries)
        })
        .await
    }

    /// Put one entry back into automatic batches.
    pub async fn retry_entry(&self, entry_id: i64) -> Result<bool> {
        self.with_db(|db| {
            let repo = SqliteOutboxRepository::new(db.connection());
            repo.retry(entry_id)
        })
        .await
    }

    /// Put a household's stuck entries back into automatic batches.
    pub async fn retry_stuck(&self, household_id: &str, max_retries: u32) -> Result<usize> {
        self.with_db(|db| {
            let repo = SqliteOutboxRepository::new(db.connection());
            repo.retry_all_stuck(household_id, max_retries)
        })
        .await
    }

    pub async fn pending_count(&self, household_id: &str) -> Result<usize> {
        self.with_db(|db| {
            let repo = SqliteOutboxRepository::new(db.connection());
            repo.pending_count(household_id)
        })
        .await
    }

    /// Current watermark and failure bookkeeping for a household.
    pub async fn watermark(&self, household_id: &str) -> Result<SyncWatermark> {
        self.with_db(|db| {
            let repo = SqliteSyncStateRepository::new(db.connection());
            repo.load(household_id)
        })
        .await
    }

    /// Watermarks of every household that has synced.
    pub async fn sync_states(&self) -> Result<Vec<SyncWatermark>> {
        self.with_db(|db| {
            let repo = SqliteSyncStateRepository::new(db.connection());
            repo.list()
        })
        .await
    }

    pub async fn upsert_household(&self, household: &Household) -> Result<()> {
        self.with_db(|db| {
            let repo = SqliteDirectoryRepository::new(db.connection());
            repo.upsert_household(household)
        })
        .await
    }

    pub async fn get_household(&self, id: &str) -> Result<Option<Household>> {
        self.with_db(|db| {
            let repo = SqliteDirectoryRepository::new(db.connection());
            repo.get_household(id)
        })
        .await
    }

    pub async fn list_households(&self) -> Result<Vec<Household>> {
        self.with_db(|db| {
            let repo = SqliteDirectoryRepository::new(db.connection());
            repo.list_households()
        })
        .await
    }

    pub async fn upsert_member(&self, member: &HouseholdMember) -> Result<()> {
        self.with_db(|db| {
            let repo = SqliteDirectoryRepository::new(db.connection());
            repo.upsert_member(member)
        })
        .await
    }

    pub async fn list_members(&self, household_id: &str) -> Result<Vec<HouseholdMember>> {
        self.with_db(|db| {
            let repo = SqliteDirectoryRepository::new(db.connection());
            repo.list_members(household_id)
        })
        .await
    }

    pub async fn upsert_user(&self, user: &User) -> Result<()> {
        self.with_db(|db| {
            let repo = SqliteDirectoryRepository::new(db.connection());
            repo.upsert_user(user)
        })
        .await
    }

    pub async fn get_user(&self, id: &str) -> Result<Option<User>> {
        self.with_db(|db| {
            let repo = SqliteDirectoryRepository::new(db.connection());
            repo.get_user(id)
        })
        .await
    }
}

/// Household that owns an entity. Items inherit it from their list.
pub(crate) fn owning_household(
    entities: &impl EntityRepository,
    entity: &SyncEntity,
) -> Result<String> {
    if let Some(household_id) = entity.household_id() {
        return Ok(household_id.to_string());
    }
    let parent_id = entity.parent_id().unwrap_or_default();
    entities
        .get(EntityType::ShoppingList, parent_id)?
        .map(|list| list.household_id)
        .ok_or_else(|| Error::NotFound(format!("shopping list {parent_id}")))
}

fn live_record(
    entities: &impl EntityRepository,
    entity_type: EntityType,
    id: &str,
) -> Result<LocalRecord> {
    entities
        .get(entity_type, id)?
        .filter(|record| !record.is_deleted)
        .ok_or_else(|| Error::NotFound(format!("{entity_type} {id}")))
}

const fn dirty_status(current: SyncStatus) -> SyncStatus {
    match current {
        SyncStatus::Conflict => SyncStatus::Conflict,
        SyncStatus::Synced | SyncStatus::Pending => SyncStatus::Pending,
    }
}

/// Local modification clock: wall time, but never behind the previous stamp.
fn next_local_clock(previous: Option<i64>, now: i64) -> i64 {
    previous.map_or(now, |previous| now.max(previous + 1))
}

/// Queue the record's mutation; conflicted entities keep their work held.
fn queue(conn: &rusqlite::Connection, record: &LocalRecord, operation: Operation) -> Result<()> {
    let outbox = SqliteOutboxRepository::new(conn);
    let payload = record.entity.to_payload()?;
    outbox.enqueue(NewOutboxEntry {
        entity_type: record.entity_type(),
        entity_id: record.id(),
        household_id: &record.household_id,
        operation,
        payload: &payload,
        created_at: unix_millis_now(),
    })?;
    if record.sync_status == SyncStatus::Conflict {
        outbox.set_held(record.entity_type(), record.id(), true)?;
    }
    Ok(())
}
