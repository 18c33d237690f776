// Token refresh exchange

use anyhow::{Context, Result};
use reqwest::Client;
use std::time::Duration;

use super::clock::Clock;
use super::types::{Token, TokenResponse};

/// Client for the OAuth token endpoint's `refresh_token` grant
#[derive(Debug, Clone)]
pub struct RefreshClient {
    client: Client,
    token_endpoint: String,
    client_id: String,
    client_secret: String,
}

impl RefreshClient {
    pub fn new(
        token_endpoint: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        request_timeout: u64,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(request_timeout))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            token_endpoint: token_endpoint.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        })
    }

    pub fn token_endpoint(&self) -> &str {
        &self.token_endpoint
    }

    /// Exchange `refresh_token` for a new token
    ///
    /// The returned token's expiration is stamped with `clock` on receipt.
    pub async fn refresh(&self, refresh_token: &str, clock: &dyn Clock) -> Result<Token> {
        tracing::info!("Refreshing access token...");
        tracing::debug!(
            "Token refresh request: url={}, client_id={}...",
            self.token_endpoint,
            self.client_id.chars().take(8).collect::<String>()
        );

        let form = [
            ("grant_type", "refresh_token"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("refresh_token", refresh_token),
        ];

        let response = self
            .client
            .post(&self.token_endpoint)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .form(&form)
            .send()
            .await
            .context("Failed to send token refresh request")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!(
                "Token refresh failed: status={}, body={}",
                status,
                error_text
            );

            // OAuth errors carry a code and a description
            if let Ok(error_json) = serde_json::from_str::<serde_json::Value>(&error_text) {
                if let (Some(error_code), Some(error_desc)) = (
                    error_json.get("error").and_then(|v| v.as_str()),
                    error_json.get("error_description").and_then(|v| v.as_str()),
                ) {
                    tracing::error!(
                        "Token refresh error details: error={}, description={}",
                        error_code,
                        error_desc
                    );
                }
            }

            anyhow::bail!("Token refresh failed: {} - {}", status, error_text);
        }

        let data: TokenResponse = response
            .json()
            .await
            .context("Failed to parse token refresh response")?;

        if data.access_token.is_empty() {
            anyhow::bail!("Token refresh response does not contain access_token");
        }

        let token = data
            .into_token(clock)
            .context("Token refresh response is not a usable token")?;

        tracing::info!(
            "Token refreshed, expires: {}",
            token.access_token_expiration().to_rfc3339()
        );

        Ok(token)
    }
}
