use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Bearer session - inspect and refresh API client credentials
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Permanent (non-expiring) API token
    #[arg(short = 't', long, env = "PERMANENT_TOKEN", hide_env_values = true)]
    pub permanent_token: Option<String>,

    /// JSON file holding the OAuth token
    #[arg(short = 'f', long, env = "TOKEN_FILE")]
    pub token_file: Option<String>,

    /// OAuth token endpoint used for refresh
    #[arg(short = 'e', long, env = "TOKEN_ENDPOINT")]
    pub token_endpoint: Option<String>,

    /// OAuth client id
    #[arg(long, env = "CLIENT_ID")]
    pub client_id: Option<String>,

    /// OAuth client secret
    #[arg(long, env = "CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: Option<String>,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "30")]
    pub http_timeout: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq)]
pub enum Command {
    /// Show the held credential and whether it is usable
    Status,
    /// Print the Authorization header value, refreshing first if needed
    Token,
    /// Refresh the OAuth token now and store the result
    Refresh,
}

#[derive(Clone, Debug)]
pub struct Config {
    // Credentials
    pub permanent_token: Option<String>,
    pub token_file: Option<PathBuf>,

    // Refresh endpoint
    pub token_endpoint: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,

    // HTTP client
    pub http_request_timeout: u64,

    // Logging
    pub log_level: String,

    pub command: Command,
}

impl Config {
    /// Load configuration from all sources with priority: CLI > ENV > defaults
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        Ok(Self::from_args(CliArgs::parse()))
    }

    /// Build config from parsed arguments
    pub fn from_args(args: CliArgs) -> Self {
        let permanent_token = args.permanent_token.filter(|t| !t.is_empty());

        // Without a permanent token, fall back to the default token file
        let token_file = args
            .token_file
            .map(|s| expand_tilde(&s))
            .or_else(|| permanent_token.is_none().then(default_token_file).flatten());

        Config {
            permanent_token,
            token_file,
            token_endpoint: args.token_endpoint,
            client_id: args.client_id,
            client_secret: args.client_secret,
            http_request_timeout: args.http_timeout,
            log_level: args.log_level,
            command: args.command,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        match (&self.permanent_token, &self.token_file) {
            (Some(_), Some(_)) => {
                anyhow::bail!("Configure either PERMANENT_TOKEN or TOKEN_FILE, not both")
            }
            (None, None) => {
                anyhow::bail!("No credentials configured (set PERMANENT_TOKEN or TOKEN_FILE)")
            }
            _ => {}
        }

        if let Some(endpoint) = &self.token_endpoint {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                anyhow::bail!("TOKEN_ENDPOINT must be an http(s) URL: {}", endpoint);
            }
            self.client_id
                .as_ref()
                .context("CLIENT_ID is required when TOKEN_ENDPOINT is set")?;
            self.client_secret
                .as_ref()
                .context("CLIENT_SECRET is required when TOKEN_ENDPOINT is set")?;
        }

        if self.command == Command::Refresh {
            if self.permanent_token.is_some() {
                anyhow::bail!("Permanent tokens cannot be refreshed");
            }
            if self.token_endpoint.is_none() {
                anyhow::bail!("TOKEN_ENDPOINT is required to refresh");
            }
        }

        Ok(())
    }
}

/// Default location of the token file
fn default_token_file() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("bearer-session").join("token.json"))
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
