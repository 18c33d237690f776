// Token types

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::clock::Clock;
use crate::error::{CredentialError, Result};

/// Scheme used when the issuer does not name one
pub const DEFAULT_TOKEN_TYPE: &str = "Bearer";

/// Lifetime assumed when a token response omits `expires_in`
pub const DEFAULT_EXPIRES_IN: i64 = 3600;

fn default_token_type() -> String {
    DEFAULT_TOKEN_TYPE.to_string()
}

/// One issued credential
///
/// The expiration is fixed at construction: either derived from the
/// server-provided lifetime at receipt time, or given as an absolute instant
/// (e.g. when reloading a persisted token). Persisted tokens go through the
/// same validation as the builders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "StoredToken")]
pub struct Token {
    access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    token_type: String,
    expires_at: DateTime<Utc>,
}

/// On-disk shape of a token, before validation
#[derive(Deserialize)]
struct StoredToken {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    expires_at: DateTime<Utc>,
}

impl TryFrom<StoredToken> for Token {
    type Error = CredentialError;

    fn try_from(stored: StoredToken) -> Result<Self> {
        let mut token = Token::with_expiration(stored.access_token, stored.expires_at)?;
        if let Some(refresh_token) = stored.refresh_token {
            token = token.with_refresh_token(refresh_token);
        }
        if let Some(token_type) = stored.token_type {
            token = token.with_token_type(token_type);
        }
        Ok(token)
    }
}

impl Token {
    /// Build a token received now, valid for `expires_in` seconds
    pub fn issued(access_token: impl Into<String>, expires_in: i64, clock: &dyn Clock) -> Result<Self> {
        if expires_in < 0 {
            return Err(CredentialError::InvalidLifetime(expires_in));
        }

        let lifetime =
            Duration::try_seconds(expires_in).ok_or(CredentialError::InvalidLifetime(expires_in))?;
        let expires_at = clock
            .now()
            .checked_add_signed(lifetime)
            .ok_or(CredentialError::InvalidLifetime(expires_in))?;

        Self::with_expiration(access_token, expires_at)
    }

    /// Build a token with an explicit expiration instant
    pub fn with_expiration(access_token: impl Into<String>, expires_at: DateTime<Utc>) -> Result<Self> {
        let access_token = access_token.into();
        if access_token.is_empty() {
            return Err(CredentialError::EmptyAccessToken);
        }

        Ok(Self {
            access_token,
            refresh_token: None,
            token_type: default_token_type(),
            expires_at,
        })
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        let refresh_token = refresh_token.into();
        self.refresh_token = (!refresh_token.is_empty()).then_some(refresh_token);
        self
    }

    /// Set the authentication scheme; an empty value keeps the default
    pub fn with_token_type(mut self, token_type: impl Into<String>) -> Self {
        let token_type = token_type.into();
        if !token_type.is_empty() {
            self.token_type = token_type;
        }
        self
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    pub fn token_type(&self) -> &str {
        &self.token_type
    }

    /// Instant after which the access token is no longer accepted
    pub fn access_token_expiration(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Replace the refresh token, used when a refresh response doesn't echo one
    pub(crate) fn carrying_refresh_token(mut self, refresh_token: Option<String>) -> Self {
        self.refresh_token = refresh_token;
        self
    }
}

/// OAuth token endpoint response
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_type: Option<String>,
    pub expires_in: Option<i64>,
}

impl TokenResponse {
    /// Convert the response into a token, stamping its expiration with `clock`
    pub fn into_token(self, clock: &dyn Clock) -> Result<Token> {
        let expires_in = self.expires_in.unwrap_or(DEFAULT_EXPIRES_IN);
        let mut token = Token::issued(self.access_token, expires_in, clock)?;

        if let Some(refresh_token) = self.refresh_token {
            token = token.with_refresh_token(refresh_token);
        }
        if let Some(token_type) = self.token_type {
            token = token.with_token_type(token_type);
        }

        Ok(token)
    }
}
