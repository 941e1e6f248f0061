use flatsync_core::models::{new_id, Household};
use flatsync_core::util::utc_now;

use crate::cli::HouseholdCommands;
use crate::commands::common::{
    household_to_item, join_text, normalize_identifier, print_json, short_id, CommandContext,
    HouseholdListItem,
};
use crate::config_profiles::{CliProfilesConfig, ProfileUpdate};
use crate::error::CliError;

pub async fn run_household(
    command: HouseholdCommands,
    context: &CommandContext,
) -> Result<(), CliError> {
    let store = context.open_store()?;

    match command {
        HouseholdCommands::Add {
            name,
            id,
            make_default,
        } => {
            let id = match id {
                Some(id) => normalize_identifier(&id)?,
                None => new_id(),
            };
            let household = Household {
                id,
                name: join_text(&name, "Household name")?,
                invite_code: None,
                created_at: utc_now(),
            };
            store.upsert_household(&household).await?;
            if make_default {
                set_default_household(&context.profile_name, &household.id)?;
            }
            println!("{}", household.id);
        }
        HouseholdCommands::List { json } => {
            let default_id = context.household_id().ok();
            let households = store
                .list_households()
                .await?
                .iter()
                .map(|household| household_to_item(household, default_id.as_deref()))
                .collect::<Vec<HouseholdListItem>>();
            if json {
                return print_json(&households);
            }
            if households.is_empty() {
                println!("No households. Add one with `flatsync household add <name>`.");
            }
            for household in &households {
                let marker = if household.is_default { "*" } else { " " };
                println!("{marker}{:<13}  {}", short_id(&household.id), household.name);
            }
        }
        HouseholdCommands::Use { id } => {
            let id = normalize_identifier(&id)?;
            let household = store
                .get_household(&id)
                .await?
                .ok_or_else(|| CliError::NotFound("household", id.clone()))?;
            set_default_household(&context.profile_name, &household.id)?;
            println!("Using household '{}' ({})", household.name, household.id);
        }
    }
    Ok(())
}

fn set_default_household(profile_name: &str, household_id: &str) -> Result<(), CliError> {
    let mut config = CliProfilesConfig::load()?;
    config.update_profile(
        profile_name,
        ProfileUpdate {
            household_id: Some(household_id.to_string()),
            ..ProfileUpdate::default()
        },
    );
    config.save()?;
    Ok(())
}
