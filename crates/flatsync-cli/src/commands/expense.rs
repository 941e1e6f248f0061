use flatsync_core::models::{Expense, SplitType};
use flatsync_core::{EntityType, LocalStore};

use crate::cli::ExpenseCommands;
use crate::commands::common::{
    expense_to_item, format_expense_lines, join_text, parse_split, print_json, CommandContext,
    ExpenseListItem,
};
use crate::error::CliError;

pub async fn run_expense(
    command: ExpenseCommands,
    context: &CommandContext,
) -> Result<(), CliError> {
    let household_id = context.household_id()?;
    let store = context.open_store()?;

    match command {
        ExpenseCommands::Add {
            amount,
            description,
            category,
            splits,
            personal,
        } => {
            let mut expense = Expense::new(
                &household_id,
                context.user_id(),
                amount.trim(),
                join_text(&description, "Expense description")?,
            );
            expense.category = category.unwrap_or_default();
            expense.is_personal = personal;
            for raw in &splits {
                let (user_id, amount_owed) = parse_split(raw)?;
                expense.add_split(user_id, amount_owed);
            }
            if !expense.splits.is_empty() {
                expense.split_type = SplitType::Custom;
            }

            let record = store.create(expense).await?;
            println!("{}", record.id());
        }
        ExpenseCommands::List { limit, json } => {
            let expenses = list_expenses(&store, &household_id, limit).await?;
            if json {
                return print_json(&expenses);
            }
            if expenses.is_empty() {
                println!("No expenses.");
            }
            for line in format_expense_lines(&expenses) {
                println!("{line}");
            }
        }
    }
    Ok(())
}

pub async fn list_expenses(
    store: &LocalStore,
    household_id: &str,
    limit: usize,
) -> Result<Vec<ExpenseListItem>, CliError> {
    Ok(store
        .list(EntityType::Expense, household_id)
        .await?
        .iter()
        .filter_map(expense_to_item)
        .take(limit)
        .collect())
}
