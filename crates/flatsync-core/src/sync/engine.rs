//! Sync rounds: push the outbox, pull remote changes, merge.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Mutex, PoisonError};

use rusqlite::Connection;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::protocol::{SyncChanges, SyncRequest, SyncResponse};
use super::resolver::{resolve, Decision, Remote};
use super::transport::{SyncTransport, TransportError};
use super::{RoundSummary, SyncError, SyncResult};
use crate::config::SyncConfig;
use crate::db::{
    EntityRepository, NewOutboxEntry, OutboxRepository, SqliteEntityRepository,
    SqliteOutboxRepository, SqliteSyncStateRepository, SyncStateRepository,
};
use crate::models::{
    timestamp, ConflictType, EntityType, LocalRecord, Operation, OutboxEntry, SyncEntity,
    SyncStatus,
};
use crate::services::{owning_household, LocalStore};
use crate::util::{millis_to_datetime, unix_millis_now};
use crate::Error;

/// How the user settles an entity in conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Push the local version over the server's
    KeepMine,
    /// Discard the local version
    TakeTheirs,
}

enum CallError {
    Cancelled,
    Transport(TransportError),
}

/// Runs sync rounds for households against one server.
///
/// At most one round runs per household. A request that arrives while a
/// round is in flight is folded into one follow-up round.
pub struct SyncEngine<T> {
    store: LocalStore,
    transport: T,
    config: SyncConfig,
    /// Households with a round in flight, and whether a rerun was requested
    in_flight: Mutex<HashMap<String, bool>>,
}

impl<T: SyncTransport> SyncEngine<T> {
    pub fn new(store: LocalStore, transport: T, config: SyncConfig) -> Self {
        Self {
            store,
            transport,
            config,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub const fn store(&self) -> &LocalStore {
        &self.store
    }

    pub const fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Sync a household, coalescing with a round already in flight.
    ///
    /// Returns `None` when another caller's round picked up this request.
    pub async fn sync_household(
        &self,
        household_id: &str,
        cancel: &CancellationToken,
    ) -> SyncResult<Option<RoundSummary>> {
        let Some(_flight) = Flight::begin(&self.in_flight, household_id) else {
            tracing::debug!("Round for {household_id} already running, queued a rerun");
            return Ok(None);
        };

        loop {
            let summary = self.run_round(household_id, cancel).await?;
            if !Flight::take_rerun(&self.in_flight, household_id) {
                return Ok(Some(summary));
            }
            tracing::debug!("Rerunning round for {household_id}");
        }
    }

    /// Run exactly one round. Callers normally go through [`Self::sync_household`].
    pub async fn run_round(
        &self,
        household_id: &str,
        cancel: &CancellationToken,
    ) -> SyncResult<RoundSummary> {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let watermark = self.store.watermark(household_id).await?.last_sync_timestamp;
        let mut sent = HashSet::new();
        let mut summary = RoundSummary::default();

        // Drain the outbox in batches. Only the call carrying the last,
        // partial batch advances the watermark.
        loop {
            let batch = self.next_batch(household_id, &mut sent).await?;
            let last = batch.len() < self.batch_size();
            let request = SyncRequest {
                last_sync_timestamp: watermark,
                household_id: household_id.to_string(),
                changes: SyncChanges::from_entries(&batch),
            };
            tracing::info!(
                household_id,
                watermark,
                pushing = batch.len(),
                "Sending sync batch"
            );

            let response = match self.call(cancel, self.transport.sync(&request)).await {
                Ok(response) => response,
                Err(CallError::Cancelled) => return Err(SyncError::Cancelled),
                Err(CallError::Transport(TransportError::Unsupported)) => {
                    tracing::info!(
                        "Sync endpoint unavailable, falling back to per-entity requests"
                    );
                    let fallback = self
                        .fallback_round(household_id, watermark, batch, sent, cancel)
                        .await?;
                    summary.absorb(fallback);
                    return Ok(summary);
                }
                Err(CallError::Transport(error)) => {
                    return Err(self.abort_round(household_id, &batch, error).await);
                }
            };
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            let merged = self
                .merge_response(household_id, watermark, &batch, response, last)
                .await?;
            summary.absorb(merged);
            if last {
                break;
            }
        }

        log_summary(household_id, &summary);
        Ok(summary)
    }

    const fn batch_size(&self) -> usize {
        if self.config.batch_size == 0 {
            1
        } else {
            self.config.batch_size
        }
    }

    /// Next entries of the round's drain. Entries already sent this round
    /// (failed but retained, or re-queued while in flight) wait for the next
    /// round.
    async fn next_batch(
        &self,
        household_id: &str,
        sent: &mut HashSet<i64>,
    ) -> SyncResult<Vec<OutboxEntry>> {
        let batch_size = self.batch_size();
        let limit = batch_size + sent.len();
        let max_retries = self.config.max_retries;
        let peeked = self
            .store
            .with_db(|db| {
                SqliteOutboxRepository::new(db.connection()).peek_batch(
                    household_id,
                    limit,
                    max_retries,
                )
            })
            .await?;

        let batch: Vec<OutboxEntry> = peeked
            .into_iter()
            .filter(|entry| !sent.contains(&entry.id))
            .take(batch_size)
            .collect();
        sent.extend(batch.iter().map(|entry| entry.id));
        Ok(batch)
    }

    /// Settle an entity in conflict.
    ///
    /// Returns the resulting local row, or `None` when the entity no longer
    /// exists on either side.
    pub async fn resolve_conflict(
        &self,
        entity_type: EntityType,
        id: &str,
        resolution: Resolution,
    ) -> SyncResult<Option<LocalRecord>> {
        let record = self
            .store
            .with_db(|db| SqliteEntityRepository::new(db.connection()).get(entity_type, id))
            .await?
            .ok_or_else(|| Error::NotFound(format!("{entity_type} {id}")))?;
        if record.sync_status != SyncStatus::Conflict {
            return Err(SyncError::Validation(format!(
                "{entity_type} {id} is not in conflict"
            )));
        }

        let snapshot = match record.remote_payload {
            Some(payload) => Some(payload),
            None => {
                let fetch = self.transport.fetch_entity(entity_type, id);
                match self.call(&CancellationToken::new(), fetch).await {
                    Ok(payload) => payload,
                    Err(CallError::Cancelled) => return Err(SyncError::Cancelled),
                    Err(CallError::Transport(TransportError::Unauthorized)) => {
                        return Err(SyncError::Auth)
                    }
                    Err(CallError::Transport(error)) => {
                        return Err(SyncError::Network(error.to_string()))
                    }
                }
            }
        };
        let remote = snapshot
            .map(|payload| SyncEntity::from_payload(entity_type, payload))
            .transpose()
            .map_err(|error| SyncError::Validation(error.to_string()))?;

        let resolved = self
            .store
            .with_db(|db| {
                let tx = db.connection_mut().transaction()?;
                let result = settle(&tx, entity_type, id, resolution, remote)?;
                tx.commit()?;
                Ok(result)
            })
            .await?;

        tracing::info!("Resolved conflict on {entity_type} {id} with {resolution:?}");
        Ok(resolved)
    }

    async fn call<R>(
        &self,
        cancel: &CancellationToken,
        request: impl Future<Output = Result<R, TransportError>>,
    ) -> Result<R, CallError> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(CallError::Cancelled),
            outcome = tokio::time::timeout(self.config.request_timeout, request) => match outcome {
                Ok(result) => result.map_err(CallError::Transport),
                Err(_) => Err(CallError::Transport(TransportError::Timeout)),
            },
        }
    }

    /// Record a failed round. Unless the failure is an auth rejection, every
    /// entry of the batch counts a failed attempt.
    async fn abort_round(
        &self,
        household_id: &str,
        batch: &[OutboxEntry],
        error: TransportError,
    ) -> SyncError {
        let unauthorized = error == TransportError::Unauthorized;
        let message = error.to_string();
        let recorded = self
            .store
            .with_db(|db| {
                let tx = db.connection_mut().transaction()?;
                if !unauthorized {
                    let outbox = SqliteOutboxRepository::new(&tx);
                    for entry in batch {
                        outbox.mark_failed(entry.id, &message)?;
                    }
                }
                let failures = SqliteSyncStateRepository::new(&tx).record_failure(
                    household_id,
                    &message,
                    unix_millis_now(),
                )?;
                tx.commit()?;
                Ok(failures)
            })
            .await;

        match recorded {
            Err(storage) => SyncError::Storage(storage),
            Ok(_) if unauthorized => {
                tracing::warn!("Server rejected credentials for {household_id}, sync paused");
                SyncError::Auth
            }
            Ok(failures) => {
                tracing::warn!(
                    household_id,
                    failures,
                    "Sync round failed: {message}"
                );
                SyncError::Network(message)
            }
        }
    }

    /// Apply a `/sync` response, unless another round moved the watermark
    /// since `started_at` was read. Intermediate batches of a round merge
    /// without advancing.
    async fn merge_response(
        &self,
        household_id: &str,
        started_at: i64,
        batch: &[OutboxEntry],
        response: SyncResponse,
        advance: bool,
    ) -> SyncResult<RoundSummary> {
        let mut summary = RoundSummary {
            watermark: started_at,
            ..RoundSummary::default()
        };
        let merged = self
            .store
            .with_db(|db| {
                let tx = db.connection_mut().transaction()?;
                let state = SqliteSyncStateRepository::new(&tx);
                if state.load(household_id)?.last_sync_timestamp != started_at {
                    return Ok(false);
                }

                Merge::new(&tx, household_id, &mut summary).apply_response(batch, &response)?;
                if advance {
                    let watermark =
                        state.advance(household_id, response.server_timestamp, unix_millis_now())?;
                    summary.watermark = watermark.last_sync_timestamp;
                }
                tx.commit()?;
                Ok(true)
            })
            .await?;

        if merged {
            Ok(summary)
        } else {
            tracing::warn!("Round for {household_id} was superseded, discarding its response");
            Err(SyncError::Cancelled)
        }
    }

    /// Round over the per-entity REST endpoints. Pushes one entry at a time
    /// until the outbox is drained, then pulls full collections. The
    /// watermark stays where it is.
    async fn fallback_round(
        &self,
        household_id: &str,
        started_at: i64,
        mut batch: Vec<OutboxEntry>,
        mut sent: HashSet<i64>,
        cancel: &CancellationToken,
    ) -> SyncResult<RoundSummary> {
        let mut summary = RoundSummary {
            used_fallback: true,
            watermark: started_at,
            ..RoundSummary::default()
        };

        loop {
            let last = batch.len() < self.batch_size();
            self.push_entries(household_id, &batch, &mut summary, cancel)
                .await?;
            if last {
                break;
            }
            batch = self.next_batch(household_id, &mut sent).await?;
        }

        let collections = self.pull_collections(household_id, cancel).await?;
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let merged = self
            .store
            .with_db(|db| {
                let tx = db.connection_mut().transaction()?;
                let state = SqliteSyncStateRepository::new(&tx);
                if state.load(household_id)?.last_sync_timestamp != started_at {
                    return Ok(false);
                }

                let mut merge = Merge::new(&tx, household_id, &mut summary);
                for collection in &collections {
                    merge.apply_collection(collection)?;
                }
                let watermark = state.record_success(household_id, unix_millis_now())?;
                summary.watermark = watermark.last_sync_timestamp;
                tx.commit()?;
                Ok(true)
            })
            .await?;

        if !merged {
            tracing::warn!("Fallback round for {household_id} was superseded");
            return Err(SyncError::Cancelled);
        }
        log_summary(household_id, &summary);
        Ok(summary)
    }

    async fn push_entries(
        &self,
        household_id: &str,
        batch: &[OutboxEntry],
        summary: &mut RoundSummary,
        cancel: &CancellationToken,
    ) -> SyncResult<()> {
        for (index, entry) in batch.iter().enumerate() {
            let outcome = match self.call(cancel, self.transport.push_entity(entry)).await {
                Ok(echoed) => PushOutcome::Accepted(echoed),
                Err(CallError::Cancelled) => return Err(SyncError::Cancelled),
                Err(CallError::Transport(TransportError::NotFound))
                    if entry.operation == Operation::Delete =>
                {
                    PushOutcome::Accepted(None)
                }
                Err(CallError::Transport(TransportError::NotFound)) => {
                    PushOutcome::Conflict(ConflictType::UpdateDelete)
                }
                Err(CallError::Transport(TransportError::Conflict(_))) => {
                    PushOutcome::Conflict(ConflictType::UpdateUpdate)
                }
                Err(CallError::Transport(
                    error @ (TransportError::Rejected { .. } | TransportError::InvalidResponse(_)),
                )) => PushOutcome::Rejected(error.to_string()),
                Err(CallError::Transport(error)) => {
                    return Err(self.abort_round(household_id, &batch[index..], error).await);
                }
            };

            self.store
                .with_db(|db| {
                    let tx = db.connection_mut().transaction()?;
                    Merge::new(&tx, household_id, &mut *summary).apply_push(entry, outcome)?;
                    tx.commit()?;
                    Ok(())
                })
                .await?;
        }
        Ok(())
    }

    async fn pull_collections(
        &self,
        household_id: &str,
        cancel: &CancellationToken,
    ) -> SyncResult<Vec<Collection>> {
        let mut collections = Vec::new();
        let mut list_ids: Vec<String> = self
            .store
            .list(EntityType::ShoppingList, household_id)
            .await?
            .iter()
            .map(|record| record.id().to_string())
            .collect();

        for entity_type in EntityType::ALL {
            let parents: Vec<Option<String>> = if entity_type.has_parent() {
                list_ids.iter().cloned().map(Some).collect()
            } else {
                vec![None]
            };

            for parent_id in parents {
                let fetch = self.transport.fetch_collection(
                    entity_type,
                    household_id,
                    parent_id.as_deref(),
                );
                let values = match self.call(cancel, fetch).await {
                    Ok(values) => values,
                    Err(CallError::Cancelled) => return Err(SyncError::Cancelled),
                    Err(CallError::Transport(TransportError::NotFound)) if parent_id.is_some() => {
                        Vec::new()
                    }
                    Err(CallError::Transport(error)) => {
                        return Err(self.abort_round(household_id, &[], error).await);
                    }
                };

                if entity_type == EntityType::ShoppingList {
                    for id in values.iter().filter_map(payload_id) {
                        if !list_ids.iter().any(|known| known == id) {
                            list_ids.push(id.to_string());
                        }
                    }
                }
                collections.push(Collection {
                    entity_type,
                    parent_id,
                    values,
                });
            }
        }
        Ok(collections)
    }
}

/// Registration of a household's round in flight; released on drop.
struct Flight<'a> {
    in_flight: &'a Mutex<HashMap<String, bool>>,
    household_id: &'a str,
}

impl<'a> Flight<'a> {
    fn begin(in_flight: &'a Mutex<HashMap<String, bool>>, household_id: &'a str) -> Option<Self> {
        let mut flights = in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(rerun) = flights.get_mut(household_id) {
            *rerun = true;
            return None;
        }
        flights.insert(household_id.to_string(), false);
        Some(Self {
            in_flight,
            household_id,
        })
    }

    fn take_rerun(in_flight: &Mutex<HashMap<String, bool>>, household_id: &str) -> bool {
        let mut flights = in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        flights
            .get_mut(household_id)
            .is_some_and(|rerun| std::mem::take(rerun))
    }
}

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(self.household_id);
    }
}

enum PushOutcome {
    Accepted(Option<Value>),
    Conflict(ConflictType),
    Rejected(String),
}

/// Full server collection of one type, for the household or one parent.
struct Collection {
    entity_type: EntityType,
    parent_id: Option<String>,
    values: Vec<Value>,
}

/// Merge state for one transaction.
struct Merge<'c, 's> {
    household_id: &'c str,
    entities: SqliteEntityRepository<'c>,
    outbox: SqliteOutboxRepository<'c>,
    summary: &'s mut RoundSummary,
}

impl<'c, 's> Merge<'c, 's> {
    fn new(conn: &'c Connection, household_id: &'c str, summary: &'s mut RoundSummary) -> Self {
        Self {
            household_id,
            entities: SqliteEntityRepository::new(conn),
            outbox: SqliteOutboxRepository::new(conn),
            summary,
        }
    }

    fn apply_response(&mut self, batch: &[OutboxEntry], response: &SyncResponse) -> crate::Result<()> {
        let mut reported = HashMap::new();
        for conflict in &response.conflicts {
            match conflict.entity_type() {
                Some(entity_type) => {
                    reported.insert(
                        (entity_type, conflict.entity_id.as_str()),
                        conflict.conflict_type,
                    );
                }
                None => self.invalid(format!(
                    "conflict for unknown entity type '{}'",
                    conflict.entity_type
                )),
            }
        }

        let mut decoded = Vec::new();
        let mut index = HashMap::new();
        for entity_type in EntityType::ALL {
            for payload in response.entities(entity_type) {
                if let Some(entity) = self.decode(entity_type, payload) {
                    index.insert((entity_type, entity.id().to_string()), decoded.len());
                    decoded.push((entity, payload));
                }
            }
        }

        let mut handled = HashSet::new();
        for entry in batch {
            let key = (entry.entity_type, entry.entity_id.clone());
            let echoed = index.get(&key).map(|position| &decoded[*position]);
            if let Some(kind) = reported.get(&(entry.entity_type, entry.entity_id.as_str())) {
                if let Some(record) = self.entities.get(entry.entity_type, &entry.entity_id)? {
                    let snapshot = echoed
                        .map(|(_, payload)| (*payload).clone())
                        .or_else(|| record.remote_payload.clone());
                    self.flag_conflict(record, snapshot, *kind)?;
                }
            } else {
                self.acknowledge(entry, echoed.map(|(entity, _)| entity))?;
            }
            handled.insert(key);
        }

        for (entity, payload) in decoded {
            if handled.contains(&(entity.entity_type(), entity.id().to_string())) {
                continue;
            }
            self.apply_remote(entity, payload.clone())?;
        }

        for ((entity_type, entity_id), kind) in reported {
            if handled.contains(&(entity_type, entity_id.to_string())) {
                continue;
            }
            if let Some(record) = self.entities.get(entity_type, entity_id)? {
                let snapshot = record.remote_payload.clone();
                self.flag_conflict(record, snapshot, kind)?;
            }
        }

        for entity_type in EntityType::ALL {
            for id in response.deleted.ids(entity_type) {
                self.apply_remote_delete(entity_type, id)?;
            }
        }
        Ok(())
    }

    fn apply_push(&mut self, entry: &OutboxEntry, outcome: PushOutcome) -> crate::Result<()> {
        match outcome {
            PushOutcome::Accepted(echoed) => {
                let echoed = echoed.and_then(|payload| self.decode(entry.entity_type, &payload));
                self.acknowledge(entry, echoed.as_ref())
            }
            PushOutcome::Conflict(kind) => {
                if let Some(record) = self.entities.get(entry.entity_type, &entry.entity_id)? {
                    let snapshot = if kind == ConflictType::UpdateDelete {
                        None
                    } else {
                        record.remote_payload.clone()
                    };
                    self.flag_conflict(record, snapshot, kind)?;
                }
                Ok(())
            }
            PushOutcome::Rejected(message) => {
                self.outbox.mark_failed(entry.id, &message)?;
                tracing::warn!(
                    "Server rejected {} {}: {message}",
                    entry.entity_type,
                    entry.entity_id
                );
                self.summary.failed += 1;
                self.summary.issues.push(SyncError::Validation(format!(
                    "{} {} rejected: {message}",
                    entry.entity_type, entry.entity_id
                )));
                Ok(())
            }
        }
    }

    fn apply_collection(&mut self, collection: &Collection) -> crate::Result<()> {
        let entity_type = collection.entity_type;
        let mut present = HashSet::new();
        for payload in &collection.values {
            if let Some(id) = payload_id(payload) {
                present.insert(id.to_string());
            }
            if let Some(entity) = self.decode(entity_type, payload) {
                self.apply_remote(entity, payload.clone())?;
            }
        }

        let scope = match &collection.parent_id {
            Some(parent_id) => self.entities.list_children(entity_type, parent_id)?,
            None => self.entities.list(entity_type, self.household_id)?,
        };
        for record in scope {
            if record.sync_status == SyncStatus::Synced && !present.contains(record.id()) {
                self.apply_remote_delete(entity_type, record.id())?;
            }
        }
        Ok(())
    }

    /// Settle a pushed entry the server accepted.
    fn acknowledge(&mut self, entry: &OutboxEntry, echoed: Option<&SyncEntity>) -> crate::Result<()> {
        self.summary.pushed += 1;
        let settled = self.outbox.acknowledge_revision(entry.id, entry.revision)?;
        let Some(mut record) = self.entities.get(entry.entity_type, &entry.entity_id)? else {
            return Ok(());
        };
        let server_version = echoed
            .map(SyncEntity::updated_at_ms)
            .or_else(|| payload_updated_at(&entry.payload));

        if !settled {
            // Edited again while the push was in flight; the newer payload stays queued.
            record.base_updated_at = server_version.or(record.base_updated_at);
            self.entities.upsert(&record)?;
            tracing::debug!(
                "{} {} changed during push, keeping it pending",
                entry.entity_type,
                entry.entity_id
            );
            return Ok(());
        }

        if entry.operation == Operation::Delete {
            self.entities.remove(entry.entity_type, &entry.entity_id)?;
            return Ok(());
        }

        if let Some(echoed) = echoed {
            record.entity = echoed.clone();
        }
        record.base_updated_at = Some(server_version.unwrap_or_else(|| record.updated_at_ms()));
        record.sync_status = SyncStatus::Synced;
        record.last_modified_locally = None;
        record.remote_payload = None;
        self.entities.upsert(&record)
    }

    /// Merge one remote entity into the local store.
    fn apply_remote(&mut self, entity: SyncEntity, payload: Value) -> crate::Result<()> {
        let entity_type = entity.entity_type();
        let Some(local) = self.entities.get(entity_type, entity.id())? else {
            let household_id = match owning_household(&self.entities, &entity) {
                Ok(household_id) => household_id,
                Err(Error::NotFound(_)) => self.household_id.to_string(),
                Err(error) => return Err(error),
            };
            self.store_synced(entity, household_id)?;
            self.summary.pulled += 1;
            return Ok(());
        };

        match resolve(&local, Remote::Entity(&entity)) {
            Decision::AcceptRemote => {
                if local.sync_status == SyncStatus::Synced && local.entity == entity {
                    return Ok(());
                }
                self.outbox.remove_for_entity(entity_type, entity.id())?;
                self.store_synced(entity, local.household_id)?;
                self.summary.pulled += 1;
                Ok(())
            }
            Decision::KeepLocal => {
                tracing::debug!("Keeping local {entity_type} {}, remote copy is older", entity.id());
                Ok(())
            }
            Decision::Conflict(kind) => self.flag_conflict(local, Some(payload), kind),
        }
    }

    fn apply_remote_delete(&mut self, entity_type: EntityType, id: &str) -> crate::Result<()> {
        let Some(local) = self.entities.get(entity_type, id)? else {
            return Ok(());
        };

        match resolve(&local, Remote::Deleted) {
            Decision::AcceptRemote => {
                self.entities.remove(entity_type, id)?;
                self.outbox.remove_for_entity(entity_type, id)?;
                if entity_type == EntityType::ShoppingList {
                    for item in self.entities.list_children(EntityType::ShoppingListItem, id)? {
                        if item.sync_status == SyncStatus::Synced {
                            self.entities.remove(EntityType::ShoppingListItem, item.id())?;
                        }
                    }
                }
                self.summary.pulled += 1;
                Ok(())
            }
            Decision::KeepLocal => Ok(()),
            Decision::Conflict(kind) => self.flag_conflict(local, None, kind),
        }
    }

    /// Park a diverged entity for the user. Local data is never overwritten.
    fn flag_conflict(
        &mut self,
        mut record: LocalRecord,
        snapshot: Option<Value>,
        kind: ConflictType,
    ) -> crate::Result<()> {
        let newly_flagged = record.sync_status != SyncStatus::Conflict;
        record.sync_status = SyncStatus::Conflict;
        record.last_modified_locally = record.last_modified_locally.or_else(|| Some(unix_millis_now()));
        record.remote_payload = snapshot;
        self.entities.upsert(&record)?;
        self.outbox.set_held(record.entity_type(), record.id(), true)?;

        if newly_flagged {
            tracing::info!("{kind} conflict on {} {}", record.entity_type(), record.id());
            self.summary.conflicted += 1;
            self.summary.issues.push(SyncError::Conflict {
                entity_type: record.entity_type(),
                entity_id: record.id().to_string(),
            });
        }
        Ok(())
    }

    fn store_synced(&self, entity: SyncEntity, household_id: String) -> crate::Result<()> {
        self.entities.upsert(&synced_record(entity, household_id))
    }

    fn decode(&mut self, entity_type: EntityType, payload: &Value) -> Option<SyncEntity> {
        match SyncEntity::from_payload(entity_type, payload.clone()) {
            Ok(entity) => Some(entity),
            Err(error) => {
                let id = payload_id(payload).unwrap_or("<no id>");
                self.invalid(format!("{entity_type} {id}: {error}"));
                None
            }
        }
    }

    fn invalid(&mut self, message: String) {
        tracing::warn!("Skipping invalid remote data: {message}");
        self.summary.failed += 1;
        self.summary.issues.push(SyncError::Validation(message));
    }
}

/// Apply a user resolution inside an open transaction.
fn settle(
    conn: &Connection,
    entity_type: EntityType,
    id: &str,
    resolution: Resolution,
    remote: Option<SyncEntity>,
) -> crate::Result<Option<LocalRecord>> {
    let entities = SqliteEntityRepository::new(conn);
    let outbox = SqliteOutboxRepository::new(conn);
    let Some(mut record) = entities.get(entity_type, id)? else {
        return Ok(None);
    };

    match (resolution, remote) {
        (Resolution::TakeTheirs, Some(remote)) => {
            outbox.remove_for_entity(entity_type, id)?;
            let record = synced_record(remote, record.household_id);
            entities.upsert(&record)?;
            Ok(Some(record))
        }
        (Resolution::TakeTheirs, None) => {
            outbox.remove_for_entity(entity_type, id)?;
            entities.remove(entity_type, id)?;
            Ok(None)
        }
        (Resolution::KeepMine, None) if record.is_deleted => {
            // Deleted on both sides.
            outbox.remove_for_entity(entity_type, id)?;
            entities.remove(entity_type, id)?;
            Ok(None)
        }
        (Resolution::KeepMine, remote) => {
            let now = unix_millis_now();
            let remote_version = remote.as_ref().map(SyncEntity::updated_at_ms);
            let floor = remote_version.map_or(0, |version| version + 1);
            let stamp = now.max(record.updated_at_ms() + 1).max(floor);
            record.entity.touch(millis_to_datetime(stamp));
            record.base_updated_at = remote_version;
            record.sync_status = SyncStatus::Pending;
            record.remote_payload = None;
            record.last_modified_locally = Some(
                record
                    .last_modified_locally
                    .map_or(now, |previous| now.max(previous + 1)),
            );

            let operation = if record.is_deleted {
                Operation::Delete
            } else if remote.is_none() {
                Operation::Create
            } else {
                Operation::Update
            };
            entities.upsert(&record)?;
            outbox.remove_for_entity(entity_type, id)?;
            let payload = record.entity.to_payload()?;
            outbox.enqueue(NewOutboxEntry {
                entity_type,
                entity_id: id,
                household_id: &record.household_id,
                operation,
                payload: &payload,
                created_at: now,
            })?;
            Ok(Some(record))
        }
    }
}

fn synced_record(entity: SyncEntity, household_id: String) -> LocalRecord {
    LocalRecord {
        base_updated_at: Some(entity.updated_at_ms()),
        entity,
        household_id,
        sync_status: SyncStatus::Synced,
        last_modified_locally: None,
        is_deleted: false,
        remote_payload: None,
    }
}

fn payload_id(payload: &Value) -> Option<&str> {
    payload.get("id").and_then(Value::as_str)
}

fn payload_updated_at(payload: &Value) -> Option<i64> {
    payload
        .get("updated_at")
        .and_then(Value::as_str)
        .and_then(timestamp::parse)
        .map(|at| at.timestamp_millis())
}

fn log_summary(household_id: &str, summary: &RoundSummary) {
    tracing::info!(
        household_id,
        pushed = summary.pushed,
        pulled = summary.pulled,
        conflicted = summary.conflicted,
        failed = summary.failed,
        watermark = summary.watermark,
        fallback = summary.used_fallback,
        "Sync round complete"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Expense, Todo};
    use crate::sync::mock::MockTransport;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    const BASE: i64 = 1_700_000_000_000;

    fn engine() -> SyncEngine<MockTransport> {
        engine_with(SyncConfig::default())
    }

    fn engine_with(config: SyncConfig) -> SyncEngine<MockTransport> {
        SyncEngine::new(
            LocalStore::open_in_memory().unwrap(),
            MockTransport::new(),
            config,
        )
    }

    fn ts(millis: i64) -> String {
        timestamp::format(&millis_to_datetime(millis))
    }

    fn remote_todo(id: &str, title: &str, updated_at: i64) -> Value {
        json!({
            "id": id,
            "household_id": "h1",
            "title": title,
            "status": "PENDING",
            "priority": "MEDIUM",
            "created_by": "u2",
            "created_at": ts(BASE),
            "updated_at": ts(updated_at),
        })
    }

    fn response(server_timestamp: i64, todos: Vec<Value>) -> SyncResponse {
        SyncResponse {
            server_timestamp,
            todos,
            ..SyncResponse::default()
        }
    }

    async fn record(engine: &SyncEngine<MockTransport>, id: &str) -> LocalRecord {
        engine
            .store()
            .with_db(|db| SqliteEntityRepository::new(db.connection()).get(EntityType::Todo, id))
            .await
            .unwrap()
            .unwrap()
    }

    /// Pull a todo from the server so it starts out synced.
    async fn seed_synced(engine: &SyncEngine<MockTransport>, id: &str, updated_at: i64) {
        let started_at = engine.store().watermark("h1").await.unwrap().last_sync_timestamp;
        engine
            .merge_response(
                "h1",
                started_at,
                &[],
                response(BASE, vec![remote_todo(id, "A", updated_at)]),
                true,
            )
            .await
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn offline_create_is_pushed_and_acknowledged() {
        let engine = engine();
        let mut todo = Todo::new("h1", "u1", "Buy milk");
        todo.id = "t1".to_string();
        engine.store().create(todo.clone()).await.unwrap();

        let mut echo = serde_json::to_value(&todo).unwrap();
        echo["updated_at"] = json!(ts(BASE + 500));
        engine
            .transport()
            .respond(Ok(response(BASE + 1000, vec![echo])));

        let summary = engine.run_round("h1", &CancellationToken::new()).await.unwrap();
        assert_eq!(summary.pushed, 1);
        assert_eq!(summary.watermark, BASE + 1000);

        let request = engine.transport().last_request().unwrap();
        assert_eq!(request.last_sync_timestamp, 0);
        assert_eq!(request.changes.todos.unwrap().created.len(), 1);

        let stored = record(&engine, "t1").await;
        assert_eq!(stored.sync_status, SyncStatus::Synced);
        assert_eq!(stored.last_modified_locally, None);
        assert_eq!(stored.base_updated_at, Some(BASE + 500));
        assert_eq!(engine.store().pending_count("h1").await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn remote_changes_are_pulled_and_watermark_never_regresses() {
        let engine = engine();
        engine
            .transport()
            .respond(Ok(response(BASE + 1000, vec![remote_todo("t9", "From phone", BASE)])))
            .respond(Ok(response(BASE + 10, Vec::new())));
        let cancel = CancellationToken::new();

        let first = engine.run_round("h1", &cancel).await.unwrap();
        assert_eq!(first.pulled, 1);
        let pulled: Todo = engine.store().get_entity("t9").await.unwrap().unwrap();
        assert_eq!(pulled.title, "From phone");

        let second = engine.run_round("h1", &cancel).await.unwrap();
        assert_eq!(second.watermark, BASE + 1000);
        assert_eq!(
            engine.transport().last_request().unwrap().last_sync_timestamp,
            BASE + 1000
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn applying_the_same_response_twice_changes_nothing() {
        let engine = engine();
        engine
            .transport()
            .respond_always(Ok(response(BASE + 1000, vec![remote_todo("t1", "A", BASE)])));
        let cancel = CancellationToken::new();

        engine.run_round("h1", &cancel).await.unwrap();
        let before = record(&engine, "t1").await;
        let again = engine.run_round("h1", &cancel).await.unwrap();

        assert_eq!(again.pulled, 0);
        assert_eq!(record(&engine, "t1").await, before);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn auth_failure_leaves_outbox_untouched() {
        let engine = engine();
        engine.store().create(Todo::new("h1", "u1", "Secret")).await.unwrap();
        engine.transport().respond(Err(TransportError::Unauthorized));

        let error = engine.run_round("h1", &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(error, SyncError::Auth));

        let outbox = engine.store().outbox_entries(Some("h1")).await.unwrap();
        assert_eq!(outbox[0].retry_count, 0);
        assert_eq!(outbox[0].last_error, None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn network_failure_counts_a_failed_attempt() {
        let engine = engine();
        engine.store().create(Todo::new("h1", "u1", "Later")).await.unwrap();
        engine
            .transport()
            .respond(Err(TransportError::Connection("reset".to_string())));

        let error = engine.run_round("h1", &CancellationToken::new()).await.unwrap_err();
        assert!(error.is_retryable());

        let outbox = engine.store().outbox_entries(Some("h1")).await.unwrap();
        assert_eq!(outbox[0].retry_count, 1);
        assert!(outbox[0].last_error.as_deref().unwrap().contains("reset"));
        let watermark = engine.store().watermark("h1").await.unwrap();
        assert_eq!(watermark.consecutive_failures, 1);
        assert_eq!(watermark.last_sync_timestamp, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn server_conflict_holds_entry_and_keeps_local_edit() {
        let engine = engine();
        seed_synced(&engine, "t1", BASE).await;
        let mut mine: Todo = engine.store().get_entity("t1").await.unwrap().unwrap();
        mine.title = "mine".to_string();
        engine.store().update(mine).await.unwrap();

        let mut conflicted = response(BASE + 2000, vec![remote_todo("t1", "theirs", BASE + 100)]);
        conflicted.conflicts = vec![serde_json::from_value(json!({
            "entity_type": "todo",
            "entity_id": "t1",
            "conflict_type": "UPDATE_UPDATE",
        }))
        .unwrap()];
        engine.transport().respond(Ok(conflicted));
        let cancel = CancellationToken::new();

        let summary = engine.run_round("h1", &cancel).await.unwrap();
        assert_eq!(summary.conflicted, 1);
        assert!(matches!(summary.issues[0], SyncError::Conflict { .. }));

        let stored = record(&engine, "t1").await;
        assert_eq!(stored.sync_status, SyncStatus::Conflict);
        let SyncEntity::Todo(todo) = &stored.entity else {
            panic!("expected a todo");
        };
        assert_eq!(todo.title, "mine");
        assert_eq!(stored.remote_payload.unwrap()["title"], "theirs");

        let outbox = engine.store().outbox_entries(Some("h1")).await.unwrap();
        assert!(outbox[0].held);

        engine.transport().respond(Ok(response(BASE + 3000, Vec::new())));
        engine.run_round("h1", &cancel).await.unwrap();
        assert!(engine.transport().last_request().unwrap().changes.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_remote_edit_is_flagged_on_pull() {
        let engine = engine();
        seed_synced(&engine, "t1", BASE).await;
        let mut mine: Todo = engine.store().get_entity("t1").await.unwrap().unwrap();
        mine.title = "mine".to_string();
        engine.store().update(mine).await.unwrap();

        let summary = engine
            .merge_response("h1", BASE, &[], response(BASE + 2000, vec![remote_todo("t1", "theirs", BASE + 100)]), true)
            .await
            .unwrap();

        assert_eq!(summary.conflicted, 1);
        assert_eq!(record(&engine, "t1").await.sync_status, SyncStatus::Conflict);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn invalid_entity_is_skipped_without_failing_the_round() {
        let engine = engine();
        let broken = json!({ "id": "bad", "household_id": "h1" });
        let summary = engine
            .merge_response(
                "h1",
                0,
                &[],
                response(BASE, vec![broken, remote_todo("ok", "Fine", BASE)]),
                true,
            )
            .await
            .unwrap();

        assert_eq!(summary.pulled, 1);
        assert_eq!(summary.failed, 1);
        assert!(matches!(summary.issues[0], SyncError::Validation(_)));
        assert_eq!(summary.watermark, BASE);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn superseded_response_is_discarded() {
        let engine = engine();
        engine
            .store()
            .with_db(|db| {
                SqliteSyncStateRepository::new(db.connection()).advance("h1", BASE, BASE)
            })
            .await
            .unwrap();

        let error = engine
            .merge_response("h1", 0, &[], response(BASE + 1, vec![remote_todo("t1", "A", BASE)]), true)
            .await
            .unwrap_err();
        assert!(matches!(error, SyncError::Cancelled));
        assert!(engine.store().get(EntityType::Todo, "t1").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancelled_round_sends_nothing() {
        let engine = engine();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let error = engine.run_round("h1", &cancel).await.unwrap_err();
        assert!(matches!(error, SyncError::Cancelled));
        assert_eq!(engine.transport().sync_calls(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancelling_mid_request_applies_nothing() {
        let engine = engine();
        engine.store().create(Todo::new("h1", "u1", "Slow")).await.unwrap();
        engine.transport().set_delay(Duration::from_secs(5));
        engine.transport().respond(Ok(response(BASE, Vec::new())));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let error = engine.run_round("h1", &cancel).await.unwrap_err();
        assert!(matches!(error, SyncError::Cancelled));
        let outbox = engine.store().outbox_entries(Some("h1")).await.unwrap();
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].retry_count, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn edit_during_push_stays_pending() {
        let engine = engine();
        let todo = Todo::new("h1", "u1", "first");
        engine.store().create(todo.clone()).await.unwrap();
        let in_flight = engine.store().outbox_entries(Some("h1")).await.unwrap();

        let mut edit = todo.clone();
        edit.title = "second".to_string();
        engine.store().update(edit).await.unwrap();

        engine
            .merge_response("h1", 0, &in_flight, response(BASE, Vec::new()), true)
            .await
            .unwrap();

        let stored = record(&engine, &todo.id).await;
        assert_eq!(stored.sync_status, SyncStatus::Pending);
        assert_eq!(stored.base_updated_at, Some(todo.updated_at.timestamp_millis()));
        let outbox = engine.store().outbox_entries(Some("h1")).await.unwrap();
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].payload["title"], "second");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn remote_delete_removes_clean_rows_and_conflicts_with_edits() {
        let engine = engine();
        seed_synced(&engine, "clean", BASE).await;
        seed_synced(&engine, "edited", BASE).await;
        let mut mine: Todo = engine.store().get_entity("edited").await.unwrap().unwrap();
        mine.title = "mine".to_string();
        engine.store().update(mine).await.unwrap();

        let mut deletes = response(BASE + 1000, Vec::new());
        deletes.deleted.todos = vec!["clean".to_string(), "edited".to_string()];
        let summary = engine.merge_response("h1", BASE, &[], deletes, true).await.unwrap();

        assert_eq!(summary.pulled, 1);
        assert_eq!(summary.conflicted, 1);
        assert!(engine.store().get(EntityType::Todo, "clean").await.unwrap().is_none());
        let edited = record(&engine, "edited").await;
        assert_eq!(edited.sync_status, SyncStatus::Conflict);
        assert_eq!(edited.remote_payload, None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn fallback_pushes_entries_and_reconciles_collections() {
        let engine = engine();
        seed_synced(&engine, "gone", BASE).await;
        let todo = Todo::new("h1", "u1", "Fresh");
        engine.store().create(todo.clone()).await.unwrap();
        engine.store().create(Expense::new("h1", "u1", "9.99", "Soap")).await.unwrap();

        let mut echo = serde_json::to_value(&todo).unwrap();
        echo["updated_at"] = json!(ts(BASE + 700));
        let transport = engine.transport();
        transport.respond(Err(TransportError::Unsupported));
        transport.respond_push(Ok(Some(echo.clone())));
        transport.respond_push(Err(TransportError::Rejected {
            status: 422,
            message: "amount".to_string(),
        }));
        transport.set_collection(EntityType::Todo, None, vec![echo]);

        let summary = engine.run_round("h1", &CancellationToken::new()).await.unwrap();
        assert!(summary.used_fallback);
        assert_eq!(summary.pushed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.watermark, BASE);

        let fresh = record(&engine, &todo.id).await;
        assert_eq!(fresh.sync_status, SyncStatus::Synced);
        assert_eq!(fresh.base_updated_at, Some(BASE + 700));
        assert!(engine.store().get(EntityType::Todo, "gone").await.unwrap().is_none());

        let outbox = engine.store().outbox_entries(Some("h1")).await.unwrap();
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].entity_type, EntityType::Expense);
        assert_eq!(outbox[0].retry_count, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn keep_mine_rebases_onto_server_version() {
        let engine = engine();
        seed_synced(&engine, "t1", BASE).await;
        let mut mine: Todo = engine.store().get_entity("t1").await.unwrap().unwrap();
        mine.title = "mine".to_string();
        engine.store().update(mine).await.unwrap();
        engine
            .merge_response("h1", BASE, &[], response(BASE + 2000, vec![remote_todo("t1", "theirs", BASE + 100)]), true)
            .await
            .unwrap();

        let resolved = engine
            .resolve_conflict(EntityType::Todo, "t1", Resolution::KeepMine)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.sync_status, SyncStatus::Pending);
        assert_eq!(resolved.base_updated_at, Some(BASE + 100));
        assert!(resolved.updated_at_ms() > BASE + 100);

        let outbox = engine.store().outbox_entries(Some("h1")).await.unwrap();
        assert_eq!(outbox.len(), 1);
        assert!(!outbox[0].held);
        assert_eq!(outbox[0].operation, Operation::Update);
        assert_eq!(outbox[0].payload["title"], "mine");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn take_theirs_applies_snapshot_or_drops_deleted_rows() {
        let engine = engine();
        seed_synced(&engine, "t1", BASE).await;
        seed_synced(&engine, "t2", BASE).await;
        for id in ["t1", "t2"] {
            let mut mine: Todo = engine.store().get_entity(id).await.unwrap().unwrap();
            mine.title = "mine".to_string();
            engine.store().update(mine).await.unwrap();
        }
        let mut remote = response(BASE + 2000, vec![remote_todo("t1", "theirs", BASE + 100)]);
        remote.deleted.todos = vec!["t2".to_string()];
        engine.merge_response("h1", BASE, &[], remote, true).await.unwrap();

        let theirs = engine
            .resolve_conflict(EntityType::Todo, "t1", Resolution::TakeTheirs)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(theirs.sync_status, SyncStatus::Synced);
        assert_eq!(theirs.base_updated_at, Some(BASE + 100));

        let dropped = engine
            .resolve_conflict(EntityType::Todo, "t2", Resolution::TakeTheirs)
            .await
            .unwrap();
        assert!(dropped.is_none());
        assert!(engine.store().get(EntityType::Todo, "t2").await.unwrap().is_none());
        assert_eq!(engine.store().pending_count("h1").await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn resolving_a_clean_row_is_rejected() {
        let engine = engine();
        seed_synced(&engine, "t1", BASE).await;
        let error = engine
            .resolve_conflict(EntityType::Todo, "t1", Resolution::KeepMine)
            .await
            .unwrap_err();
        assert!(matches!(error, SyncError::Validation(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn overlapping_requests_share_one_flight() {
        let engine = Arc::new(engine());
        engine.transport().set_delay(Duration::from_millis(300));
        engine.transport().respond_always(Ok(response(BASE, Vec::new())));

        let first = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                engine
                    .sync_household("h1", &CancellationToken::new())
                    .await
                    .unwrap()
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = engine
            .sync_household("h1", &CancellationToken::new())
            .await
            .unwrap();

        assert!(second.is_none());
        assert!(first.await.unwrap().is_some());
        assert_eq!(engine.transport().sync_calls(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn backlog_larger_than_a_batch_is_drained_in_one_round() {
        let engine = engine_with(SyncConfig::default().with_batch_size(2));
        for index in 0..5 {
            engine
                .store()
                .create(Todo::new("h1", "u1", format!("Chore {index}")))
                .await
                .unwrap();
        }
        engine
            .transport()
            .respond_always(Ok(response(BASE + 1000, Vec::new())));

        let summary = engine
            .sync_household("h1", &CancellationToken::new())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(summary.pushed, 5);
        assert_eq!(summary.watermark, BASE + 1000);
        assert_eq!(engine.store().pending_count("h1").await.unwrap(), 0);

        let requests = engine.transport().requests.lock().unwrap().clone();
        let sizes: Vec<usize> = requests
            .iter()
            .map(|request| request.changes.todos.as_ref().map_or(0, |todos| todos.created.len()))
            .collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert!(requests.iter().all(|request| request.last_sync_timestamp == 0));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn full_last_batch_gets_a_closing_sync_call() {
        let engine = engine_with(SyncConfig::default().with_batch_size(2));
        for title in ["Bins", "Dishes"] {
            engine.store().create(Todo::new("h1", "u1", title)).await.unwrap();
        }
        engine
            .transport()
            .respond_always(Ok(response(BASE + 1000, Vec::new())));

        let summary = engine.run_round("h1", &CancellationToken::new()).await.unwrap();

        assert_eq!(summary.pushed, 2);
        assert_eq!(engine.transport().sync_calls(), 2);
        assert!(engine.transport().last_request().unwrap().changes.is_empty());
        assert_eq!(summary.watermark, BASE + 1000);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn fallback_drains_every_batch() {
        let engine = engine_with(SyncConfig::default().with_batch_size(2));
        for index in 0..5 {
            engine
                .store()
                .create(Todo::new("h1", "u1", format!("Errand {index}")))
                .await
                .unwrap();
        }
        engine.transport().respond(Err(TransportError::Unsupported));

        let summary = engine.run_round("h1", &CancellationToken::new()).await.unwrap();

        assert!(summary.used_fallback);
        assert_eq!(summary.pushed, 5);
        assert_eq!(engine.transport().pushes.lock().unwrap().len(), 5);
        assert_eq!(engine.store().pending_count("h1").await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rejected_entries_are_sent_once_per_round() {
        let engine = engine_with(SyncConfig::default().with_batch_size(2));
        for title in ["Plants", "Post"] {
            engine.store().create(Todo::new("h1", "u1", title)).await.unwrap();
        }
        let rejected = || {
            Err(TransportError::Rejected {
                status: 422,
                message: "title too long".to_string(),
            })
        };
        engine
            .transport()
            .respond(Err(TransportError::Unsupported))
            .respond_push(rejected())
            .respond_push(rejected());

        let summary = engine.run_round("h1", &CancellationToken::new()).await.unwrap();

        assert_eq!(summary.failed, 2);
        assert_eq!(engine.transport().pushes.lock().unwrap().len(), 2);
        let outbox = engine.store().outbox_entries(Some("h1")).await.unwrap();
        assert!(outbox.iter().all(|entry| entry.retry_count == 1));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_expense_amounts_are_both_kept() {
        let engine = engine();
        let mut base = Expense::new("h1", "u2", "10", "Groceries");
        base.id = "e1".to_string();
        base.updated_at = millis_to_datetime(BASE);
        let seeded = SyncResponse {
            server_timestamp: BASE,
            expenses: vec![serde_json::to_value(&base).unwrap()],
            ..SyncResponse::default()
        };
        engine.merge_response("h1", 0, &[], seeded, true).await.unwrap();

        let mut mine: Expense = engine.store().get_entity("e1").await.unwrap().unwrap();
        mine.amount = "20".to_string();
        engine.store().update(mine).await.unwrap();

        let mut theirs = base.clone();
        theirs.amount = "30".to_string();
        theirs.updated_at = millis_to_datetime(unix_millis_now() + 60_000);
        let pulled = SyncResponse {
            server_timestamp: BASE + 2000,
            expenses: vec![serde_json::to_value(&theirs).unwrap()],
            ..SyncResponse::default()
        };
        let summary = engine.merge_response("h1", BASE, &[], pulled, true).await.unwrap();
        assert_eq!(summary.conflicted, 1);

        let stored = engine
            .store()
            .with_db(|db| SqliteEntityRepository::new(db.connection()).get(EntityType::Expense, "e1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.sync_status, SyncStatus::Conflict);
        let SyncEntity::Expense(local) = &stored.entity else {
            panic!("expected an expense");
        };
        assert_eq!(local.amount, "20");
        assert_eq!(stored.remote_payload.unwrap()["amount"], "30");

        let outbox = engine.store().outbox_entries(Some("h1")).await.unwrap();
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].entity_type, EntityType::Expense);
        assert!(outbox[0].held);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn timed_out_request_counts_as_network_failure() {
        let engine =
            engine_with(SyncConfig::default().with_request_timeout(Duration::from_millis(50)));
        engine.transport().set_delay(Duration::from_secs(2));
        engine
            .transport()
            .respond_always(Ok(response(BASE + 1000, Vec::new())));
        engine.store().create(Todo::new("h1", "u1", "Slow")).await.unwrap();

        let error = engine.run_round("h1", &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(error, SyncError::Network(_)));
        assert!(error.is_retryable());
        assert!(error.to_string().contains("timed out"));

        let outbox = engine.store().outbox_entries(Some("h1")).await.unwrap();
        assert_eq!(outbox[0].retry_count, 1);
        let watermark = engine.store().watermark("h1").await.unwrap();
        assert_eq!(watermark.last_sync_timestamp, 0);
        assert_eq!(watermark.consecutive_failures, 1);
        assert_eq!(engine.store().pending_count("h1").await.unwrap(), 1);
    }
}
