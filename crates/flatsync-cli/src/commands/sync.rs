use chrono::Utc;
use flatsync_core::{EntityType, LocalRecord, LocalStore, Resolution, RoundSummary, SyncConfig};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::cli::SyncCommands;
use crate::commands::common::{
    conflict_to_item, format_conflict_lines, format_outbox_lines, format_relative_time,
    format_sync_timestamp, normalize_identifier, outbox_to_item, print_json, record_label,
    CommandContext, ConflictListItem, OutboxListItem,
};
use crate::error::CliError;

#[derive(Serialize)]
pub struct RoundSummaryItem {
    pub household_id: String,
    pub pushed: usize,
    pub pulled: usize,
    pub conflicted: usize,
    pub failed: usize,
    pub watermark: i64,
    pub used_fallback: bool,
    pub issues: Vec<String>,
}

#[derive(Serialize)]
pub struct SyncStatusItem {
    pub household_id: String,
    pub last_sync_timestamp: i64,
    pub pending: usize,
    pub conflicts: usize,
    pub stuck: usize,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub last_round_at: Option<i64>,
}

pub async fn run_sync_command(
    command: Option<SyncCommands>,
    json: bool,
    context: &CommandContext,
) -> Result<(), CliError> {
    let household_id = context.household_id()?;
    let store = context.open_store()?;

    match command {
        None => run_sync(&household_id, json, store, context).await,
        Some(SyncCommands::Status { json }) => {
            run_sync_status(&store, &household_id, &context.sync_config, json).await
        }
        Some(SyncCommands::Conflicts { json }) => {
            run_sync_conflicts(&store, &household_id, json).await
        }
        Some(SyncCommands::Resolve {
            entity_type,
            id,
            keep_mine,
            take_theirs: _,
        }) => {
            let resolution = if keep_mine {
                Resolution::KeepMine
            } else {
                Resolution::TakeTheirs
            };
            run_sync_resolve(entity_type, &id, resolution, &household_id, store, context).await
        }
        Some(SyncCommands::Outbox { stuck, json }) => {
            let max_retries = stuck.then_some(context.sync_config.max_retries);
            run_sync_outbox(&store, &household_id, max_retries, json).await
        }
        Some(SyncCommands::Retry { entry_id }) => {
            run_sync_retry(&store, &household_id, entry_id, context.sync_config.max_retries).await
        }
    }
}

async fn run_sync(
    household_id: &str,
    json: bool,
    store: LocalStore,
    context: &CommandContext,
) -> Result<(), CliError> {
    let engine = context.engine(store)?;

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let Some(summary) = engine.sync_household(household_id, &cancel).await? else {
        println!("A sync round for this household is already running");
        return Ok(());
    };

    let item = summary_to_item(household_id, &summary);
    if json {
        return print_json(&item);
    }
    for line in format_summary_lines(&item) {
        println!("{line}");
    }
    Ok(())
}

async fn run_sync_status(
    store: &LocalStore,
    household_id: &str,
    config: &SyncConfig,
    json: bool,
) -> Result<(), CliError> {
    let status = sync_status(store, household_id, config).await?;
    if json {
        return print_json(&status);
    }

    let last_sync = if status.last_sync_timestamp == 0 {
        "never".to_string()
    } else {
        format_relative_time(status.last_sync_timestamp, Utc::now().timestamp_millis())
    };
    println!("Household {}: last sync {last_sync}", status.household_id);
    println!(
        "{} pending, {} in conflict, {} stuck",
        status.pending, status.conflicts, status.stuck
    );
    if status.consecutive_failures > 0 {
        println!(
            "{} failed round(s) in a row; last error: {}",
            status.consecutive_failures,
            status.last_error.as_deref().unwrap_or("unknown")
        );
    }
    Ok(())
}

pub async fn sync_status(
    store: &LocalStore,
    household_id: &str,
    config: &SyncConfig,
) -> Result<SyncStatusItem, CliError> {
    let watermark = store.watermark(household_id).await?;
    let pending = store.pending_count(household_id).await?;
    let conflicts = store.list_conflicts(household_id).await?.len();
    let stuck = store
        .stuck_entries(config.max_retries)
        .await?
        .iter()
        .filter(|entry| entry.household_id == household_id)
        .count();

    Ok(SyncStatusItem {
        household_id: household_id.to_string(),
        last_sync_timestamp: watermark.last_sync_timestamp,
        pending,
        conflicts,
        stuck,
        consecutive_failures: watermark.consecutive_failures,
        last_error: watermark.last_error,
        last_round_at: watermark.last_round_at,
    })
}

async fn run_sync_conflicts(
    store: &LocalStore,
    household_id: &str,
    json: bool,
) -> Result<(), CliError> {
    let conflicts = store
        .list_conflicts(household_id)
        .await?
        .iter()
        .map(conflict_to_item)
        .collect::<Vec<ConflictListItem>>();

    if json {
        return print_json(&conflicts);
    }
    if conflicts.is_empty() {
        println!("No sync conflicts.");
        return Ok(());
    }
    for line in format_conflict_lines(&conflicts) {
        println!("{line}");
    }
    Ok(())
}

async fn run_sync_resolve(
    entity_type: EntityType,
    id: &str,
    resolution: Resolution,
    household_id: &str,
    store: LocalStore,
    context: &CommandContext,
) -> Result<(), CliError> {
    let record = find_conflict(&store, entity_type, household_id, id).await?;
    let engine = context.engine(store)?;

    match engine
        .resolve_conflict(entity_type, record.id(), resolution)
        .await?
    {
        Some(resolved) => println!(
            "Resolved {entity_type} {} ({}); now {}",
            record.id(),
            record_label(&resolved),
            resolved.sync_status
        ),
        None => println!("Resolved {entity_type} {}; removed locally", record.id()),
    }
    Ok(())
}

/// Conflicted row by full ID or unique prefix. Tombstoned rows count.
pub async fn find_conflict(
    store: &LocalStore,
    entity_type: EntityType,
    household_id: &str,
    query: &str,
) -> Result<LocalRecord, CliError> {
    let query = normalize_identifier(query)?;
    let mut matches = store
        .list_conflicts(household_id)
        .await?
        .into_iter()
        .filter(|record| record.entity_type() == entity_type && record.id().starts_with(&query))
        .collect::<Vec<_>>();

    if let Some(exact) = matches.iter().position(|record| record.id() == query) {
        return Ok(matches.swap_remove(exact));
    }
    match matches.len() {
        0 => Err(CliError::NotFound("conflicted entity", query)),
        1 => Ok(matches.remove(0)),
        count => Err(CliError::AmbiguousId(format!(
            "ID prefix '{query}' matches {count} conflicted {entity_type} rows"
        ))),
    }
}

/// Queued entries of the household; only stuck ones when `stuck_after` is set.
async fn run_sync_outbox(
    store: &LocalStore,
    household_id: &str,
    stuck_after: Option<u32>,
    json: bool,
) -> Result<(), CliError> {
    let entries = if let Some(max_retries) = stuck_after {
        store
            .stuck_entries(max_retries)
            .await?
            .into_iter()
            .filter(|entry| entry.household_id == household_id)
            .collect()
    } else {
        store.outbox_entries(Some(household_id)).await?
    };

    if json {
        let items = entries.iter().map(outbox_to_item).collect::<Vec<OutboxListItem>>();
        return print_json(&items);
    }
    if entries.is_empty() {
        println!("Outbox is empty.");
        return Ok(());
    }
    for line in format_outbox_lines(&entries) {
        println!("{line}");
    }
    Ok(())
}

async fn run_sync_retry(
    store: &LocalStore,
    household_id: &str,
    entry_id: Option<i64>,
    max_retries: u32,
) -> Result<(), CliError> {
    if let Some(entry_id) = entry_id {
        if !store.retry_entry(entry_id).await? {
            return Err(CliError::NotFound("outbox entry", entry_id.to_string()));
        }
        println!("Entry #{entry_id} will be retried on the next sync");
        return Ok(());
    }

    let count = store.retry_stuck(household_id, max_retries).await?;
    let noun = if count == 1 { "entry" } else { "entries" };
    println!("{count} stuck {noun} will be retried on the next sync");
    Ok(())
}

pub fn summary_to_item(household_id: &str, summary: &RoundSummary) -> RoundSummaryItem {
    RoundSummaryItem {
        household_id: household_id.to_string(),
        pushed: summary.pushed,
        pulled: summary.pulled,
        conflicted: summary.conflicted,
        failed: summary.failed,
        watermark: summary.watermark,
        used_fallback: summary.used_fallback,
        issues: summary.issues.iter().map(ToString::to_string).collect(),
    }
}

pub fn format_summary_lines(item: &RoundSummaryItem) -> Vec<String> {
    let mut lines = vec![format!(
        "Sync completed: {} pushed, {} pulled, {} conflicts, {} failed",
        item.pushed, item.pulled, item.conflicted, item.failed
    )];
    if item.used_fallback {
        lines.push("Server has no batch sync endpoint; used per-entity requests".to_string());
    }
    lines.extend(item.issues.iter().map(|issue| format!("  {issue}")));
    if item.conflicted > 0 {
        lines.push("Run `flatsync sync conflicts` to review".to_string());
    }
    if item.watermark > 0 {
        lines.push(format!(
            "Up to date as of {}",
            format_sync_timestamp(item.watermark)
        ));
    }
    lines
}
