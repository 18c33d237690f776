use anyhow::{Context, Result};
use std::sync::Arc;

use bearer_session::auth::{
    Credential, CredentialState, RefreshClient, SessionManager, TokenStore,
};
use bearer_session::config::{Command, Config};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    config.validate()?;

    // Initialize logging with a configured level
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::debug!("Command: {:?}", config.command);

    let (state, store) = load_credentials(&config)?;
    let state = Arc::new(state);

    // Persist every refreshed token back to the token file
    if let Some(ref store) = store {
        store.attach(&state);
    }

    let refresher = match (&config.token_endpoint, &config.client_id, &config.client_secret) {
        (Some(endpoint), Some(client_id), Some(client_secret)) => Some(RefreshClient::new(
            endpoint,
            client_id,
            client_secret,
            config.http_request_timeout,
        )?),
        _ => None,
    };

    let session = SessionManager::new(state.clone(), refresher);

    match config.command {
        Command::Status => print_status(&state),
        Command::Token => {
            let header = session.authorization_header().await?;
            println!("{}", header);
        }
        Command::Refresh => {
            session.force_refresh().await?;
            tracing::info!("✅ Token refreshed");
            print_status(&state);
        }
    }

    Ok(())
}

/// Build the credential state from the configured source
fn load_credentials(config: &Config) -> Result<(CredentialState, Option<TokenStore>)> {
    if let Some(ref permanent_token) = config.permanent_token {
        tracing::info!("Using permanent token");
        let state = CredentialState::from_permanent_token(permanent_token.clone())?;
        return Ok((state, None));
    }

    let path = config
        .token_file
        .clone()
        .context("TOKEN_FILE is required when no permanent token is set")?;
    let store = TokenStore::new(path);

    let state = match store.load()? {
        Some(token) => CredentialState::from_token(token)?,
        None => {
            tracing::warn!(
                "No token stored at {}, complete the authorization flow first",
                store.path().display()
            );
            CredentialState::empty()
        }
    };

    Ok((state, Some(store)))
}

/// Print a summary of the held credential
fn print_status(state: &CredentialState) {
    let kind = match state.credential() {
        Credential::None => "none",
        Credential::Permanent(_) => "permanent",
        Credential::Refreshable(_) => "oauth",
    };

    println!("  Credential:  {}", kind);
    println!("  Scheme:      {}", state.token_type());
    println!("  Valid:       {}", state.is_valid());
    println!("  Refreshable: {}", state.can_refresh());
    if let Some(expires_at) = state.expires_at() {
        println!("  Expires:     {}", expires_at.to_rfc3339());
    }
    if let Some(token) = state.effective_access_token() {
        let prefix: String = token.chars().take(8).collect();
        println!("  Token:       {}...", prefix);
    }
}
