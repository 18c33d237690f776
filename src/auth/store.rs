// Token persistence
// Keeps the latest token on disk so the next process start can reuse it

use anyhow::{Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::observer::Subscription;
use super::state::CredentialState;
use super::types::Token;

/// JSON file holding the most recently issued token
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored token; `None` if nothing has been stored yet
    pub fn load(&self) -> Result<Option<Token>> {
        if !self.path.exists() {
            tracing::debug!("No stored token at {}", self.path.display());
            return Ok(None);
        }

        let contents = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read token file: {}", self.path.display()))?;
        let token: Token = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse token file: {}", self.path.display()))?;

        tracing::info!(
            "Loaded token from {}, expires: {}",
            self.path.display(),
            token.access_token_expiration().to_rfc3339()
        );
        Ok(Some(token))
    }

    pub fn save(&self, token: &Token) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let json = serde_json::to_string_pretty(token).context("Failed to serialize token")?;

        // Write then rename so readers never see a half-written file
        let tmp = self.path.with_extension("tmp");
        let mut options = std::fs::OpenOptions::new();
        options.create(true).write(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            // Owner read/write only
            options.mode(0o600);
        }
        let mut file = options
            .open(&tmp)
            .with_context(|| format!("Failed to open token file: {}", tmp.display()))?;
        file.write_all(json.as_bytes())
            .and_then(|_| file.sync_all())
            .with_context(|| format!("Failed to write token file: {}", tmp.display()))?;
        drop(file);
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace token file: {}", self.path.display()))?;

        tracing::debug!("Token saved to {}", self.path.display());
        Ok(())
    }

    /// Persist every token installed into `state` from now on
    ///
    /// Write failures are logged; they never fail the credential update.
    pub fn attach(&self, state: &CredentialState) -> Subscription {
        let store = self.clone();
        state.subscribe(move |token| {
            if let Err(e) = store.save(token) {
                tracing::error!("Failed to persist refreshed token: {:#}", e);
            }
        })
    }
}
