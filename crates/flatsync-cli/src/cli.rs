use std::path::PathBuf;

use clap::{ArgGroup, Parser, Subcommand, ValueEnum};
use flatsync_core::models::{ExpenseCategory, TodoPriority, TodoStatus};
use flatsync_core::EntityType;

#[derive(Parser)]
#[command(name = "flatsync")]
#[command(about = "Shared household todos, shopping lists and expenses, offline first")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// CLI profile name for server and household configuration
    #[arg(long, global = true, value_name = "NAME")]
    pub profile: Option<String>,

    /// Household to act on instead of the profile default
    #[arg(long, global = true, value_name = "ID")]
    pub household: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage household todos
    Todo {
        #[command(subcommand)]
        command: TodoCommands,
    },
    /// Manage shopping lists and their items
    Shopping {
        #[command(subcommand)]
        command: ShoppingCommands,
    },
    /// Record and list shared expenses
    Expense {
        #[command(subcommand)]
        command: ExpenseCommands,
    },
    /// Delete any entity by type and ID
    Delete {
        /// Entity type (todo, shopping_list, shopping_item, expense)
        #[arg(value_parser = parse_entity_type)]
        entity_type: EntityType,
        /// Entity ID or unique ID prefix
        id: String,
    },
    /// Manage households known on this device
    Household {
        #[command(subcommand)]
        command: HouseholdCommands,
    },
    /// Run a sync round, or inspect sync state
    Sync {
        #[command(subcommand)]
        command: Option<SyncCommands>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Configure CLI profiles
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Manage the API token for a profile
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
    #[value(name = "powershell")]
    PowerShell,
}

#[derive(Subcommand)]
pub enum TodoCommands {
    /// Create a todo
    #[command(alias = "new")]
    Add {
        /// Todo title
        title: Vec<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long, value_parser = parse_priority)]
        priority: Option<TodoPriority>,
        /// Due date (YYYY-MM-DD or RFC 3339)
        #[arg(long, value_name = "DATE")]
        due: Option<String>,
        /// Member the todo is assigned to
        #[arg(long, value_name = "USER_ID")]
        assign: Option<String>,
    },
    /// List todos
    List {
        /// Only show todos with this status
        #[arg(long, value_parser = parse_todo_status)]
        status: Option<TodoStatus>,
        /// Number of todos to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Mark a todo completed
    Done {
        /// Todo ID or unique ID prefix
        id: String,
    },
    /// Edit fields of a todo
    Edit {
        /// Todo ID or unique ID prefix
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long, value_parser = parse_priority)]
        priority: Option<TodoPriority>,
        #[arg(long, value_parser = parse_todo_status)]
        status: Option<TodoStatus>,
        /// Due date (YYYY-MM-DD or RFC 3339)
        #[arg(long, value_name = "DATE")]
        due: Option<String>,
    },
    /// Delete a todo
    Delete {
        /// Todo ID or unique ID prefix
        id: String,
    },
}

#[derive(Subcommand)]
pub enum ShoppingCommands {
    /// Create a shopping list
    ListAdd {
        /// List name
        name: Vec<String>,
        #[arg(long)]
        description: Option<String>,
    },
    /// Show shopping lists
    Lists {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Add an item to a list
    ItemAdd {
        /// Shopping list ID or unique ID prefix
        list: String,
        /// Item name
        name: Vec<String>,
        #[arg(long, default_value = "1")]
        quantity: f64,
        #[arg(long)]
        unit: Option<String>,
        /// Price as a decimal number
        #[arg(long)]
        price: Option<String>,
    },
    /// Show the items of a list
    Items {
        /// Shopping list ID or unique ID prefix
        list: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check an item off (or back on with --undo)
    Check {
        /// Item ID or unique ID prefix
        id: String,
        #[arg(long)]
        undo: bool,
    },
}

#[derive(Subcommand)]
pub enum ExpenseCommands {
    /// Record an expense
    Add {
        /// Amount as a decimal number
        amount: String,
        /// What the money was spent on
        description: Vec<String>,
        #[arg(long, value_parser = parse_category)]
        category: Option<ExpenseCategory>,
        /// Share owed by a member, as USER_ID=AMOUNT (repeatable)
        #[arg(long = "split", value_name = "USER_ID=AMOUNT")]
        splits: Vec<String>,
        /// Only relevant to the creator
        #[arg(long)]
        personal: bool,
    },
    /// List expenses
    List {
        /// Number of expenses to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum HouseholdCommands {
    /// Register a household on this device
    Add {
        /// Household name
        name: Vec<String>,
        /// Use an existing server-side household ID
        #[arg(long)]
        id: Option<String>,
        /// Make it the profile's default household
        #[arg(long = "use")]
        make_default: bool,
    },
    /// List households known on this device
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Set the profile's default household
    Use {
        /// Household ID
        id: String,
    },
}

#[derive(Subcommand)]
pub enum SyncCommands {
    /// Show watermark, queue depth and health of the last round
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List entities waiting for a conflict decision
    Conflicts {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Settle a conflict by keeping the local or the server version
    #[command(group(ArgGroup::new("resolution").required(true).args(["keep_mine", "take_theirs"])))]
    Resolve {
        /// Entity type (todo, shopping_list, shopping_item, expense)
        #[arg(value_parser = parse_entity_type)]
        entity_type: EntityType,
        /// Entity ID or unique ID prefix
        id: String,
        /// Push the local version over the server's
        #[arg(long)]
        keep_mine: bool,
        /// Discard the local version
        #[arg(long)]
        take_theirs: bool,
    },
    /// Show queued local changes
    Outbox {
        /// Only entries that exhausted their retries
        #[arg(long)]
        stuck: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Put stuck entries back into automatic sync
    Retry {
        /// A single outbox entry ID (all stuck entries when omitted)
        entry_id: Option<i64>,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Initialize or update profile config
    Init {
        /// API base URL (e.g. <https://api.example.com>)
        #[arg(long, value_name = "URL")]
        api_base_url: Option<String>,
        /// Default household ID
        #[arg(long, value_name = "ID")]
        household_id: Option<String>,
        /// User ID recorded as the creator of new entities
        #[arg(long, value_name = "ID")]
        user_id: Option<String>,
        /// Keep current active profile instead of activating this one
        #[arg(long)]
        no_activate: bool,
    },
    /// Print the resolved profile
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum AuthCommands {
    /// Store an API bearer token in the keychain
    SetToken {
        /// Token value (read from stdin when omitted)
        #[arg(long, value_name = "TOKEN")]
        token: Option<String>,
    },
    /// Show whether a token is available for the profile
    Status,
    /// Remove the stored token
    Logout,
}

pub fn parse_entity_type(raw: &str) -> Result<EntityType, String> {
    EntityType::parse(raw).ok_or_else(|| {
        format!("unknown entity type '{raw}' (expected todo, shopping_list, shopping_item or expense)")
    })
}

fn parse_priority(raw: &str) -> Result<TodoPriority, String> {
    TodoPriority::parse(raw).ok_or_else(|| format!("unknown priority '{raw}'"))
}

fn parse_todo_status(raw: &str) -> Result<TodoStatus, String> {
    TodoStatus::parse(&raw.replace('-', "_")).ok_or_else(|| format!("unknown status '{raw}'"))
}

fn parse_category(raw: &str) -> Result<ExpenseCategory, String> {
    ExpenseCategory::parse(raw).ok_or_else(|| format!("unknown category '{raw}'"))
}
