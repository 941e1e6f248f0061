use std::env;

use flatsync_core::util::{is_http_url, normalize_text_option};
use serde::Serialize;

use crate::auth::resolve_token;
use crate::cli::ConfigCommands;
use crate::commands::common::{print_json, CommandContext};
use crate::config_profiles::{CliProfile, CliProfilesConfig, ProfileUpdate};
use crate::error::CliError;

#[derive(Serialize)]
struct ProfileView<'a> {
    profile: &'a str,
    api_base_url: Option<String>,
    household_id: Option<String>,
    user_id: Option<String>,
    db_path: String,
    has_token: bool,
}

pub fn run_config(
    command: ConfigCommands,
    global_profile: Option<&str>,
    context: &CommandContext,
) -> Result<(), CliError> {
    match command {
        ConfigCommands::Init {
            api_base_url,
            household_id,
            user_id,
            no_activate,
        } => run_config_init(
            global_profile,
            api_base_url,
            household_id,
            user_id,
            no_activate,
        ),
        ConfigCommands::Show { json } => {
            let view = ProfileView {
                profile: &context.profile_name,
                api_base_url: context.profile.api_base_url(),
                household_id: context.household_id().ok(),
                user_id: context.profile.user_id(),
                db_path: context.db_path.display().to_string(),
                has_token: resolve_token(&context.profile_name)?.is_some(),
            };
            if json {
                return print_json(&view);
            }
            println!("profile       {}", view.profile);
            println!("api_base_url  {}", view.api_base_url.as_deref().unwrap_or("(not set)"));
            println!("household_id  {}", view.household_id.as_deref().unwrap_or("(not set)"));
            println!("user_id       {}", view.user_id.as_deref().unwrap_or("(not set)"));
            println!("db_path       {}", view.db_path);
            println!("token         {}", if view.has_token { "stored" } else { "(none)" });
            Ok(())
        }
    }
}

pub fn run_config_init(
    profile_name: Option<&str>,
    api_base_url: Option<String>,
    household_id: Option<String>,
    user_id: Option<String>,
    no_activate: bool,
) -> Result<(), CliError> {
    let mut config = CliProfilesConfig::load()?;
    let profile_name = config.resolve_profile_name(profile_name);
    let existing_profile = config.profile(&profile_name).cloned().unwrap_or_default();

    let update = ProfileUpdate {
        api_base_url: resolve_api_base_url(api_base_url, &existing_profile)?,
        household_id,
        user_id,
    };
    let missing_fields = config
        .update_profile(&profile_name, update)
        .missing_sync_fields();
    if !no_activate {
        config.activate(&profile_name);
    }

    let path = config.save()?;
    println!("Profile '{profile_name}' initialized at {}", path.display());
    if missing_fields.is_empty() {
        println!(
            "Profile '{profile_name}' is ready. Store a token with `flatsync auth set-token`."
        );
    } else {
        println!(
            "Profile '{profile_name}' is missing: {}",
            missing_fields.join(", ")
        );
    }

    Ok(())
}

/// Explicit flag, then `FLATSYNC_API_BASE_URL`, then what the profile already has.
pub fn resolve_api_base_url(
    explicit: Option<String>,
    existing_profile: &CliProfile,
) -> Result<Option<String>, CliError> {
    let Some(url) = normalize_text_option(explicit)
        .or_else(|| normalize_text_option(env::var("FLATSYNC_API_BASE_URL").ok()))
        .or_else(|| existing_profile.api_base_url())
    else {
        return Ok(None);
    };
    normalize_api_base_url(&url).map(Some)
}

pub fn normalize_api_base_url(url: &str) -> Result<String, CliError> {
    let normalized = url.trim();
    if !is_http_url(normalized) {
        return Err(CliError::Config(
            "api_base_url must include http:// or https://".to_string(),
        ));
    }
    Ok(normalized.trim_end_matches('/').to_string())
}
