use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::refresh::RefreshClient;
use super::state::CredentialState;

/// Session manager
/// Hands out usable access tokens, refreshing through the token endpoint when
/// the held one has expired. Only one refresh runs at a time.
pub struct SessionManager {
    /// Credential state shared with listeners
    state: Arc<CredentialState>,

    /// Token endpoint client; `None` when only permanent tokens are used
    refresher: Option<RefreshClient>,

    /// Serializes refresh exchanges
    refresh_lock: Mutex<()>,
}

impl SessionManager {
    pub fn new(state: Arc<CredentialState>, refresher: Option<RefreshClient>) -> Self {
        Self {
            state,
            refresher,
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn state(&self) -> &Arc<CredentialState> {
        &self.state
    }

    /// Run the refresh exchange and install the result
    async fn refresh_token(&self) -> Result<()> {
        let refresher = self
            .refresher
            .as_ref()
            .context("No token endpoint configured for refresh")?;
        let refresh_token = self
            .state
            .effective_refresh_token()
            .context("Credentials cannot be refreshed")?;

        let token = refresher.refresh(&refresh_token, self.state.clock()).await?;
        self.state
            .update(token)
            .context("Failed to install refreshed token")?;

        Ok(())
    }

    /// Get a valid access token, refreshing if necessary
    pub async fn access_token(&self) -> Result<String> {
        if !self.state.is_valid() {
            if self.state.effective_access_token().is_none() {
                anyhow::bail!("No credentials configured");
            }
            if !self.state.can_refresh() {
                anyhow::bail!("Access token expired and cannot be refreshed");
            }

            let _guard = self.refresh_lock.lock().await;

            // Another caller may have refreshed while we waited
            if !self.state.is_valid() {
                if let Err(e) = self.refresh_token().await {
                    tracing::error!("Token refresh failed: {:#}", e);

                    // Graceful degradation: if token isn't actually expired yet, use it
                    if !self.state.is_expired() {
                        tracing::warn!(
                            "Using existing token despite refresh failure (not yet expired)"
                        );
                        if let Some(token) = self.state.effective_access_token() {
                            return Ok(token);
                        }
                    }

                    return Err(e).context("Failed to refresh token and no valid token available");
                }
            }
        }

        self.state
            .effective_access_token()
            .context("No access token available")
    }

    /// `Authorization` header value for the next request
    pub async fn authorization_header(&self) -> Result<String> {
        let token = self.access_token().await?;
        Ok(format!("{} {}", self.state.token_type(), token))
    }

    /// Refresh regardless of the current token's validity
    pub async fn force_refresh(&self) -> Result<()> {
        let _guard = self.refresh_lock.lock().await;
        self.refresh_token().await
    }
}
