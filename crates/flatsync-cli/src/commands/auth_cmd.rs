use std::io::{self, IsTerminal, Read};

use crate::auth::{mask_token, resolve_token, TokenSource, TokenStore};
use crate::cli::AuthCommands;
use crate::commands::common::{normalize_content, CommandContext};
use crate::error::CliError;

pub fn run_auth(command: AuthCommands, context: &CommandContext) -> Result<(), CliError> {
    let profile_name = &context.profile_name;
    match command {
        AuthCommands::SetToken { token } => {
            let token = match token.as_deref().and_then(normalize_content) {
                Some(token) => token,
                None => read_token_from_stdin()?.ok_or(CliError::EmptyInput("Token"))?,
            };
            TokenStore::new(profile_name).save(&token)?;
            println!("Stored token for profile '{profile_name}'");
            Ok(())
        }
        AuthCommands::Status => {
            match resolve_token(profile_name)? {
                Some((token, TokenSource::Environment)) => println!(
                    "Profile '{profile_name}' uses FLATSYNC_TOKEN ({})",
                    mask_token(&token)
                ),
                Some((token, TokenSource::Keychain)) => println!(
                    "Profile '{profile_name}' has a stored token ({})",
                    mask_token(&token)
                ),
                None => println!("Profile '{profile_name}' has no token."),
            }
            Ok(())
        }
        AuthCommands::Logout => {
            TokenStore::new(profile_name).clear()?;
            println!("Removed token for profile '{profile_name}'");
            Ok(())
        }
    }
}

fn read_token_from_stdin() -> Result<Option<String>, CliError> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        eprintln!("Paste the API token and press Ctrl-D:");
    }

    let mut buffer = String::new();
    stdin.lock().read_to_string(&mut buffer)?;
    Ok(normalize_content(&buffer))
}
