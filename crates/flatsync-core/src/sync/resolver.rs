//! Merge decision for one entity seen both locally and remotely.

use crate::models::{ConflictType, LocalRecord, SyncEntity, SyncStatus};

/// The server-side state an entity was observed in.
#[derive(Debug, Clone, Copy)]
pub enum Remote<'a> {
    Entity(&'a SyncEntity),
    Deleted,
}

/// What the merge should do with the local row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Overwrite (or remove) the local row with the server state
    AcceptRemote,
    /// Local edit already supersedes what the server sent
    KeepLocal,
    /// Both sides changed; flag for the user
    Conflict(ConflictType),
}

/// Decide how a remote observation merges into an existing local row.
///
/// Rows without local changes always take the server state. Dirty rows keep
/// their edit when the server copy is no newer than the version the edit was
/// based on, and otherwise surface a conflict. A row created locally and
/// never acknowledged has no base, so any remote copy of it conflicts unless
/// it is exactly the local entity.
pub fn resolve(local: &LocalRecord, remote: Remote<'_>) -> Decision {
    if local.sync_status == SyncStatus::Synced {
        return Decision::AcceptRemote;
    }

    match remote {
        Remote::Entity(entity) => {
            if !local.is_deleted && entity == &local.entity {
                return Decision::AcceptRemote;
            }
            let remote_updated_at = entity.updated_at_ms();
            if local
                .base_updated_at
                .is_some_and(|base| remote_updated_at <= base)
            {
                return Decision::KeepLocal;
            }
            if local.is_deleted {
                Decision::Conflict(ConflictType::DeleteUpdate)
            } else {
                Decision::Conflict(ConflictType::UpdateUpdate)
            }
        }
        Remote::Deleted if local.is_deleted => Decision::AcceptRemote,
        Remote::Deleted => Decision::Conflict(ConflictType::UpdateDelete),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Todo;
    use crate::util::millis_to_datetime;

    const BASE: i64 = 1_700_000_000_000;

    fn todo_at(title: &str, updated_at: i64) -> SyncEntity {
        let mut todo = Todo::new("h1", "u1", title);
        todo.id = "t1".to_string();
        todo.created_at = millis_to_datetime(BASE - 1000);
        todo.updated_at = millis_to_datetime(updated_at);
        todo.into()
    }

    fn synced(entity: SyncEntity) -> LocalRecord {
        LocalRecord {
            base_updated_at: Some(entity.updated_at_ms()),
            entity,
            household_id: "h1".to_string(),
            sync_status: SyncStatus::Synced,
            last_modified_locally: None,
            is_deleted: false,
            remote_payload: None,
        }
    }

    fn pending(entity: SyncEntity, base: Option<i64>) -> LocalRecord {
        LocalRecord {
            entity,
            household_id: "h1".to_string(),
            sync_status: SyncStatus::Pending,
            base_updated_at: base,
            last_modified_locally: Some(BASE + 5000),
            is_deleted: false,
            remote_payload: None,
        }
    }

    #[test]
    fn clean_rows_accept_remote() {
        let local = synced(todo_at("A", BASE));
        let remote = todo_at("B", BASE + 10);
        assert_eq!(resolve(&local, Remote::Entity(&remote)), Decision::AcceptRemote);
        assert_eq!(resolve(&local, Remote::Deleted), Decision::AcceptRemote);
    }

    #[test]
    fn reapplying_the_same_version_is_accepted() {
        let local = synced(todo_at("A", BASE));
        let same = todo_at("A", BASE);
        assert_eq!(resolve(&local, Remote::Entity(&same)), Decision::AcceptRemote);
    }

    #[test]
    fn local_edit_wins_over_stale_remote() {
        let local = pending(todo_at("mine", BASE + 20), Some(BASE));
        let stale = todo_at("A", BASE);
        assert_eq!(resolve(&local, Remote::Entity(&stale)), Decision::KeepLocal);
    }

    #[test]
    fn concurrent_edits_conflict() {
        let local = pending(todo_at("mine", BASE + 20), Some(BASE));
        let theirs = todo_at("theirs", BASE + 10);
        assert_eq!(
            resolve(&local, Remote::Entity(&theirs)),
            Decision::Conflict(ConflictType::UpdateUpdate)
        );
    }

    #[test]
    fn unacknowledged_create_conflicts_unless_identical() {
        let local = pending(todo_at("mine", BASE), None);
        let theirs = todo_at("theirs", BASE - 10);
        assert_eq!(
            resolve(&local, Remote::Entity(&theirs)),
            Decision::Conflict(ConflictType::UpdateUpdate)
        );

        let echo = local.entity.clone();
        assert_eq!(resolve(&local, Remote::Entity(&echo)), Decision::AcceptRemote);
    }

    #[test]
    fn local_delete_against_remote_edit_conflicts() {
        let mut local = pending(todo_at("A", BASE + 20), Some(BASE));
        local.is_deleted = true;
        let theirs = todo_at("theirs", BASE + 10);
        assert_eq!(
            resolve(&local, Remote::Entity(&theirs)),
            Decision::Conflict(ConflictType::DeleteUpdate)
        );
        assert_eq!(resolve(&local, Remote::Deleted), Decision::AcceptRemote);
    }

    #[test]
    fn remote_delete_against_local_edit_conflicts() {
        let local = pending(todo_at("mine", BASE + 20), Some(BASE));
        assert_eq!(
            resolve(&local, Remote::Deleted),
            Decision::Conflict(ConflictType::UpdateDelete)
        );
    }

    #[test]
    fn conflicted_rows_stay_in_conflict_when_seen_again() {
        let mut local = pending(todo_at("mine", BASE + 20), Some(BASE));
        local.sync_status = SyncStatus::Conflict;
        let theirs = todo_at("theirs", BASE + 10);
        let first = resolve(&local, Remote::Entity(&theirs));
        let second = resolve(&local, Remote::Entity(&theirs));
        assert_eq!(first, second);
        assert_eq!(first, Decision::Conflict(ConflictType::UpdateUpdate));
    }
}
