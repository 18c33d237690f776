// Error handling module
// Defines the errors raised by the credential core

use thiserror::Error;

/// Errors that can occur while constructing or updating credentials
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// A token was issued without an access token
    #[error("Token does not contain an access token")]
    EmptyAccessToken,

    /// A permanent token was configured with an empty value
    #[error("Permanent token cannot be empty")]
    EmptyPermanentToken,

    /// The server-provided lifetime could not be turned into an expiration instant
    #[error("Invalid token lifetime: {0} seconds")]
    InvalidLifetime(i64),

    /// Permanent credentials never change, so they cannot take a refreshed token
    #[error("Cannot update a permanent credential with a refreshed token")]
    PermanentCredential,
}

/// Result type alias for credential operations
pub type Result<T> = std::result::Result<T, CredentialError>;
