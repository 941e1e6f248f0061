use std::env;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use flatsync_core::models::{timestamp, Household, OutboxEntry};
use flatsync_core::{
    EntityType, HttpTransport, LocalRecord, LocalStore, SyncConfig, SyncEngine, SyncEntity,
    SyncStatus,
};
use serde::Serialize;

use crate::auth::resolve_token;
use crate::config_profiles::{CliProfile, CliProfilesConfig};
use crate::error::CliError;

const DEFAULT_USER_ID: &str = "local-user";

/// Everything a command needs to know about where it runs.
pub struct CommandContext {
    pub db_path: PathBuf,
    pub profile_name: String,
    pub profile: CliProfile,
    /// Tunables shared by the engine and the outbox commands
    pub sync_config: SyncConfig,
    household_override: Option<String>,
}

impl CommandContext {
    pub fn load(
        db_path: Option<PathBuf>,
        profile: Option<&str>,
        household: Option<String>,
    ) -> Result<Self, CliError> {
        let config = CliProfilesConfig::load()?;
        let profile_name = config.resolve_profile_name(profile);
        let profile = config.profile(&profile_name).cloned().unwrap_or_default();
        Ok(Self::new(resolve_db_path(db_path), profile_name, profile, household))
    }

    pub fn new(
        db_path: PathBuf,
        profile_name: String,
        profile: CliProfile,
        household: Option<String>,
    ) -> Self {
        Self {
            db_path,
            profile_name,
            profile,
            sync_config: SyncConfig::default(),
            household_override: flatsync_core::util::normalize_text_option(household),
        }
    }

    /// `--household` first, then the profile default
    pub fn household_id(&self) -> Result<String, CliError> {
        self.household_override
            .clone()
            .or_else(|| self.profile.household_id())
            .ok_or(CliError::HouseholdNotConfigured)
    }

    pub fn user_id(&self) -> String {
        self.profile
            .user_id()
            .unwrap_or_else(|| DEFAULT_USER_ID.to_string())
    }

    pub fn open_store(&self) -> Result<LocalStore, CliError> {
        Ok(LocalStore::open_path(&self.db_path)?)
    }

    /// Engine talking to the profile's server with the profile's token.
    pub fn engine(&self, store: LocalStore) -> Result<SyncEngine<HttpTransport>, CliError> {
        let base_url = self
            .profile
            .api_base_url()
            .ok_or(CliError::SyncNotConfigured)?;
        let token = resolve_token(&self.profile_name)?.map(|(token, _)| token);
        if token.is_none() {
            tracing::warn!(
                "No API token for profile '{}'; requests are unauthenticated",
                self.profile_name
            );
        }

        let config = self.sync_config.clone();
        let transport = HttpTransport::new(base_url, token, config.request_timeout)?;
        Ok(SyncEngine::new(store, transport, config))
    }
}

#[derive(Serialize)]
pub struct TodoListItem {
    pub id: String,
    pub title: String,
    pub status: String,
    pub priority: String,
    pub due_date: Option<String>,
    pub assigned_to_id: Option<String>,
    pub sync_status: SyncStatus,
    pub updated_at: String,
}

#[derive(Serialize)]
pub struct ShoppingListListItem {
    pub id: String,
    pub name: String,
    pub status: String,
    pub items: usize,
    pub sync_status: SyncStatus,
}

#[derive(Serialize)]
pub struct ShoppingItemListItem {
    pub id: String,
    pub name: String,
    pub quantity: f64,
    pub unit: Option<String>,
    pub price: Option<String>,
    pub is_purchased: bool,
    pub sync_status: SyncStatus,
}

#[derive(Serialize)]
pub struct ExpenseListItem {
    pub id: String,
    pub amount: String,
    pub description: String,
    pub category: String,
    pub date: String,
    pub splits: usize,
    pub sync_status: SyncStatus,
}

#[derive(Serialize)]
pub struct HouseholdListItem {
    pub id: String,
    pub name: String,
    pub is_default: bool,
}

#[derive(Serialize)]
pub struct OutboxListItem {
    pub id: i64,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub operation: String,
    pub retry_count: u32,
    pub held: bool,
    pub last_error: Option<String>,
    pub created_at: i64,
}

#[derive(Serialize)]
pub struct ConflictListItem {
    pub entity_type: EntityType,
    pub id: String,
    pub label: String,
    pub local_updated_at: i64,
    pub remote_updated_at: Option<i64>,
    pub remote_deleted: bool,
}

pub fn todo_to_item(record: &LocalRecord) -> Option<TodoListItem> {
    let SyncEntity::Todo(todo) = &record.entity else {
        return None;
    };
    Some(TodoListItem {
        id: todo.id.clone(),
        title: todo.title.clone(),
        status: todo.status.to_string(),
        priority: todo.priority.to_string(),
        due_date: todo.due_date.as_ref().map(timestamp::format),
        assigned_to_id: todo.assigned_to_id.clone(),
        sync_status: record.sync_status,
        updated_at: timestamp::format(&todo.updated_at),
    })
}

pub fn shopping_item_to_item(record: &LocalRecord) -> Option<ShoppingItemListItem> {
    let SyncEntity::ShoppingListItem(item) = &record.entity else {
        return None;
    };
    Some(ShoppingItemListItem {
        id: item.id.clone(),
        name: item.name.clone(),
        quantity: item.quantity,
        unit: item.unit.clone(),
        price: item.price.clone(),
        is_purchased: item.is_purchased,
        sync_status: record.sync_status,
    })
}

pub fn expense_to_item(record: &LocalRecord) -> Option<ExpenseListItem> {
    let SyncEntity::Expense(expense) = &record.entity else {
        return None;
    };
    Some(ExpenseListItem {
        id: expense.id.clone(),
        amount: expense.amount.clone(),
        description: expense.description.clone(),
        category: expense.category.to_string(),
        date: timestamp::format(&expense.date),
        splits: expense.splits.len(),
        sync_status: record.sync_status,
    })
}

pub fn outbox_to_item(entry: &OutboxEntry) -> OutboxListItem {
    OutboxListItem {
        id: entry.id,
        entity_type: entry.entity_type,
        entity_id: entry.entity_id.clone(),
        operation: entry.operation.to_string(),
        retry_count: entry.retry_count,
        held: entry.held,
        last_error: entry.last_error.clone(),
        created_at: entry.created_at,
    }
}

pub fn conflict_to_item(record: &LocalRecord) -> ConflictListItem {
    let remote_updated_at = record.remote_payload.as_ref().and_then(|payload| {
        SyncEntity::from_payload(record.entity_type(), payload.clone())
            .ok()
            .map(|entity| entity.updated_at_ms())
    });
    ConflictListItem {
        entity_type: record.entity_type(),
        id: record.id().to_string(),
        label: record_label(record),
        local_updated_at: record.updated_at_ms(),
        remote_updated_at,
        remote_deleted: record.remote_payload.is_none(),
    }
}

pub fn household_to_item(household: &Household, default_id: Option<&str>) -> HouseholdListItem {
    HouseholdListItem {
        id: household.id.clone(),
        name: household.name.clone(),
        is_default: default_id == Some(household.id.as_str()),
    }
}

/// Short human label for any entity
pub fn record_label(record: &LocalRecord) -> String {
    match &record.entity {
        SyncEntity::Todo(todo) => todo.title.clone(),
        SyncEntity::ShoppingList(list) => list.name.clone(),
        SyncEntity::ShoppingListItem(item) => item.name.clone(),
        SyncEntity::Expense(expense) => format!("{} {}", expense.amount, expense.description),
    }
}

pub fn short_id(id: &str) -> String {
    id.chars().take(13).collect()
}

/// Marker shown next to rows that have not reached the server
pub const fn sync_marker(status: SyncStatus) -> &'static str {
    match status {
        SyncStatus::Synced => " ",
        SyncStatus::Pending => "*",
        SyncStatus::Conflict => "!",
    }
}

pub fn format_todo_lines(items: &[TodoListItem]) -> Vec<String> {
    items
        .iter()
        .map(|item| {
            let due = item
                .due_date
                .as_deref()
                .map(|due| format!("  due {}", &due[..due.len().min(10)]))
                .unwrap_or_default();
            format!(
                "{}{:<13}  {:<11}  {:<6}  {}{due}",
                sync_marker(item.sync_status),
                short_id(&item.id),
                item.status,
                item.priority,
                item.title
            )
        })
        .collect()
}

pub fn format_expense_lines(items: &[ExpenseListItem]) -> Vec<String> {
    items
        .iter()
        .map(|item| {
            format!(
                "{}{:<13}  {:>10}  {:<14}  {}  {}",
                sync_marker(item.sync_status),
                short_id(&item.id),
                item.amount,
                item.category,
                &item.date[..item.date.len().min(10)],
                item.description
            )
        })
        .collect()
}

pub fn format_outbox_lines(entries: &[OutboxEntry]) -> Vec<String> {
    entries
        .iter()
        .map(|entry| {
            let mut line = format!(
                "#{:<5} {:<6}  {:<13}  {}  retries={}",
                entry.id,
                entry.operation,
                entry.entity_type,
                short_id(&entry.entity_id),
                entry.retry_count
            );
            if entry.held {
                line.push_str("  held");
            }
            if let Some(error) = &entry.last_error {
                line.push_str(&format!("  last_error={error}"));
            }
            line
        })
        .collect()
}

pub fn format_conflict_lines(items: &[ConflictListItem]) -> Vec<String> {
    items
        .iter()
        .map(|item| {
            let remote = if item.remote_deleted {
                "deleted remotely".to_string()
            } else {
                item.remote_updated_at.map_or_else(
                    || "remote=unknown".to_string(),
                    |at| format!("remote={}", format_sync_timestamp(at)),
                )
            };
            format!(
                "{:<13}  {:<13}  {}  local={}  {remote}",
                item.entity_type,
                short_id(&item.id),
                item.label,
                format_sync_timestamp(item.local_updated_at)
            )
        })
        .collect()
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else {
        format!("{}d ago", diff / day)
    }
}

/// Join free-form words into one trimmed value
pub fn join_text(parts: &[String], what: &'static str) -> Result<String, CliError> {
    normalize_content(&parts.join(" ")).ok_or(CliError::EmptyInput(what))
}

pub fn normalize_content(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn normalize_identifier(id: &str) -> Result<String, CliError> {
    normalize_content(id).ok_or(CliError::EmptyInput("ID"))
}

pub fn parse_date(raw: &str) -> Result<DateTime<Utc>, CliError> {
    timestamp::parse(raw).ok_or_else(|| CliError::InvalidInput(format!("Unrecognized date '{raw}'")))
}

/// Parse `USER_ID=AMOUNT`
pub fn parse_split(raw: &str) -> Result<(String, String), CliError> {
    let Some((user_id, amount)) = raw.split_once('=') else {
        return Err(CliError::InvalidInput(format!(
            "Split '{raw}' must look like USER_ID=AMOUNT"
        )));
    };
    let user_id = normalize_content(user_id).ok_or(CliError::EmptyInput("Split user ID"))?;
    let amount = normalize_content(amount).ok_or(CliError::EmptyInput("Split amount"))?;
    Ok((user_id, amount))
}

/// Find a live entity by full ID or unique ID prefix within a household.
pub async fn resolve_record(
    store: &LocalStore,
    entity_type: EntityType,
    household_id: &str,
    query: &str,
) -> Result<LocalRecord, CliError> {
    let query = normalize_identifier(query)?;
    if let Some(record) = store.get(entity_type, &query).await? {
        return Ok(record);
    }

    let mut matches = store
        .list(entity_type, household_id)
        .await?
        .into_iter()
        .filter(|record| record.id().starts_with(&query))
        .collect::<Vec<_>>();

    match matches.len() {
        0 => Err(CliError::NotFound(entity_type.as_str(), query)),
        1 => Ok(matches.remove(0)),
        count => {
            let candidates = matches
                .iter()
                .take(5)
                .map(|record| short_id(record.id()))
                .collect::<Vec<_>>()
                .join(", ");
            Err(CliError::AmbiguousId(format!(
                "ID prefix '{query}' matches {count} {entity_type} rows ({candidates})"
            )))
        }
    }
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("FLATSYNC_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("flatsync")
        .join("flatsync.db")
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
