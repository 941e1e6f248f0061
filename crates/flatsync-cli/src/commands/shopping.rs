use flatsync_core::models::{ShoppingList, ShoppingListItem};
use flatsync_core::util::utc_now;
use flatsync_core::{EntityType, LocalStore, SyncEntity};

use crate::cli::ShoppingCommands;
use crate::commands::common::{
    join_text, print_json, resolve_record, shopping_item_to_item, short_id, sync_marker,
    CommandContext, ShoppingItemListItem, ShoppingListListItem,
};
use crate::error::CliError;

pub async fn run_shopping(
    command: ShoppingCommands,
    context: &CommandContext,
) -> Result<(), CliError> {
    let household_id = context.household_id()?;
    let store = context.open_store()?;

    match command {
        ShoppingCommands::ListAdd { name, description } => {
            let mut list =
                ShoppingList::new(&household_id, context.user_id(), join_text(&name, "List name")?);
            list.description = description;
            let record = store.create(list).await?;
            println!("{}", record.id());
        }
        ShoppingCommands::Lists { json } => {
            let lists = list_shopping_lists(&store, &household_id).await?;
            if json {
                return print_json(&lists);
            }
            if lists.is_empty() {
                println!("No shopping lists.");
            }
            for list in &lists {
                println!(
                    "{}{:<13}  {:<8}  {:>3} items  {}",
                    sync_marker(list.sync_status),
                    short_id(&list.id),
                    list.status,
                    list.items,
                    list.name
                );
            }
        }
        ShoppingCommands::ItemAdd {
            list,
            name,
            quantity,
            unit,
            price,
        } => {
            let list = resolve_record(&store, EntityType::ShoppingList, &household_id, &list).await?;
            let mut item =
                ShoppingListItem::new(list.id(), context.user_id(), join_text(&name, "Item name")?);
            item.quantity = quantity;
            item.unit = unit;
            item.price = price;
            item.position = i32::try_from(store.list_items(list.id()).await?.len()).unwrap_or(i32::MAX);
            let record = store.create(item).await?;
            println!("{}", record.id());
        }
        ShoppingCommands::Items { list, json } => {
            let list = resolve_record(&store, EntityType::ShoppingList, &household_id, &list).await?;
            let items = list_items(&store, list.id()).await?;
            if json {
                return print_json(&items);
            }
            if items.is_empty() {
                println!("No items.");
            }
            for item in &items {
                let check = if item.is_purchased { "[x]" } else { "[ ]" };
                let unit = item.unit.as_deref().unwrap_or("");
                let price = item
                    .price
                    .as_deref()
                    .map(|price| format!("  @ {price}"))
                    .unwrap_or_default();
                println!(
                    "{}{:<13}  {check} {} {unit} {}{price}",
                    sync_marker(item.sync_status),
                    short_id(&item.id),
                    item.quantity,
                    item.name
                );
            }
        }
        ShoppingCommands::Check { id, undo } => {
            let record =
                resolve_record(&store, EntityType::ShoppingListItem, &household_id, &id).await?;
            let SyncEntity::ShoppingListItem(mut item) = record.entity else {
                return Err(CliError::NotFound("shopping item", id));
            };
            item.set_purchased(!undo, Some(context.user_id()), utc_now());
            let record = store.update(item).await?;
            println!("{}", record.id());
        }
    }
    Ok(())
}

pub async fn list_shopping_lists(
    store: &LocalStore,
    household_id: &str,
) -> Result<Vec<ShoppingListListItem>, CliError> {
    let mut lists = Vec::new();
    for record in store.list(EntityType::ShoppingList, household_id).await? {
        let SyncEntity::ShoppingList(list) = &record.entity else {
            continue;
        };
        let items = store.list_items(&list.id).await?.len();
        lists.push(ShoppingListListItem {
            id: list.id.clone(),
            name: list.name.clone(),
            status: list.status.to_string(),
            items,
            sync_status: record.sync_status,
        });
    }
    Ok(lists)
}

pub async fn list_items(
    store: &LocalStore,
    shopping_list_id: &str,
) -> Result<Vec<ShoppingItemListItem>, CliError> {
    let mut items = store
        .list_items(shopping_list_id)
        .await?
        .iter()
        .filter_map(|record| {
            let position = match &record.entity {
                SyncEntity::ShoppingListItem(item) => item.position,
                _ => 0,
            };
            shopping_item_to_item(record).map(|item| (position, item))
        })
        .collect::<Vec<_>>();
    items.sort_by_key(|(position, _)| *position);
    Ok(items.into_iter().map(|(_, item)| item).collect())
}
