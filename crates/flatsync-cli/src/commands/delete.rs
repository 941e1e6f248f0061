use flatsync_core::EntityType;

use crate::commands::common::{resolve_record, CommandContext};
use crate::error::CliError;

pub async fn run_delete(
    entity_type: EntityType,
    id: &str,
    context: &CommandContext,
) -> Result<(), CliError> {
    let household_id = context.household_id()?;
    let store = context.open_store()?;
    let record = resolve_record(&store, entity_type, &household_id, id).await?;

    store.delete(entity_type, record.id()).await?;
    println!("{}", record.id());
    Ok(())
}
