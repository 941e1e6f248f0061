use flatsync_core::models::{Todo, TodoStatus};
use flatsync_core::util::utc_now;
use flatsync_core::{EntityType, LocalStore, SyncEntity};

use crate::cli::TodoCommands;
use crate::commands::common::{
    format_todo_lines, join_text, parse_date, print_json, resolve_record, todo_to_item,
    CommandContext, TodoListItem,
};
use crate::error::CliError;

pub async fn run_todo(command: TodoCommands, context: &CommandContext) -> Result<(), CliError> {
    let household_id = context.household_id()?;
    let store = context.open_store()?;

    match command {
        TodoCommands::Add {
            title,
            description,
            priority,
            due,
            assign,
        } => {
            let mut todo = Todo::new(&household_id, context.user_id(), join_text(&title, "Todo title")?);
            todo.description = description;
            todo.priority = priority.unwrap_or_default();
            todo.due_date = due.as_deref().map(parse_date).transpose()?;
            todo.assigned_to_id = assign;

            let record = store.create(todo).await?;
            println!("{}", record.id());
        }
        TodoCommands::List {
            status,
            limit,
            json,
        } => {
            let todos = list_todos(&store, &household_id, status, limit).await?;
            if json {
                return print_json(&todos);
            }
            if todos.is_empty() {
                println!("No todos.");
            }
            for line in format_todo_lines(&todos) {
                println!("{line}");
            }
        }
        TodoCommands::Done { id } => {
            let mut todo = load_todo(&store, &household_id, &id).await?;
            todo.set_status(TodoStatus::Completed, utc_now());
            let record = store.update(todo).await?;
            println!("{}", record.id());
        }
        TodoCommands::Edit {
            id,
            title,
            description,
            priority,
            status,
            due,
        } => {
            let mut todo = load_todo(&store, &household_id, &id).await?;
            if let Some(title) = title {
                todo.title = title;
            }
            if let Some(description) = description {
                todo.description = Some(description);
            }
            if let Some(priority) = priority {
                todo.priority = priority;
            }
            if let Some(status) = status {
                todo.set_status(status, utc_now());
            }
            if let Some(due) = due {
                todo.due_date = Some(parse_date(&due)?);
            }
            let record = store.update(todo).await?;
            println!("{}", record.id());
        }
        TodoCommands::Delete { id } => {
            let record = resolve_record(&store, EntityType::Todo, &household_id, &id).await?;
            store.delete(EntityType::Todo, record.id()).await?;
            println!("{}", record.id());
        }
    }
    Ok(())
}

pub async fn list_todos(
    store: &LocalStore,
    household_id: &str,
    status: Option<TodoStatus>,
    limit: usize,
) -> Result<Vec<TodoListItem>, CliError> {
    Ok(store
        .list(EntityType::Todo, household_id)
        .await?
        .iter()
        .filter_map(todo_to_item)
        .filter(|item| status.is_none_or(|status| item.status == status.as_str()))
        .take(limit)
        .collect())
}

async fn load_todo(store: &LocalStore, household_id: &str, id: &str) -> Result<Todo, CliError> {
    let record = resolve_record(store, EntityType::Todo, household_id, id).await?;
    match record.entity {
        SyncEntity::Todo(todo) => Ok(todo),
        _ => Err(CliError::NotFound("todo", id.to_string())),
    }
}
