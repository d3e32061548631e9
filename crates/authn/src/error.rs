//! Authentication error types.
//!
//! This module defines errors that can occur while issuing and verifying
//! bearer tokens, resolving identities, and handling login and registration.

use labgate_storage::StorageError;
use thiserror::Error;

use crate::config::ConfigError;

/// The only message a caller ever sees for a failed login.
pub const INVALID_CREDENTIALS_MESSAGE: &str = "incorrect username or password";

/// Authentication errors.
///
/// The token variants are kept distinct for logging and tests. Callers that
/// face end users collapse them (see [`AuthError::is_authentication_failure`]).
///
/// # Non-exhaustive
///
/// This enum is marked `#[non_exhaustive]`. Downstream match expressions
/// must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthError {
    /// No `Authorization` header was presented.
    #[error("Missing authorization header")]
    MissingHeader,

    /// The header does not start with the literal `Bearer ` prefix.
    #[error("Unsupported authorization scheme")]
    InvalidScheme,

    /// Malformed token - cannot be decoded.
    #[error("Invalid token format: {0}")]
    InvalidTokenFormat(String),

    /// Signature verification failed.
    #[error("Invalid signature")]
    InvalidSignature,

    /// Token has expired.
    #[error("Token expired")]
    TokenExpired,

    /// Algorithm not in allowed list.
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Required claim is missing.
    #[error("Missing claim: {0}")]
    MissingClaim(String),

    /// The token verified but its subject matches no stored identity.
    #[error("Unknown token subject")]
    UnknownSubject,

    /// The token's identity exists but is disabled.
    #[error("Identity disabled")]
    IdentityDisabled,

    /// Login failed. Deliberately silent about which part was wrong.
    #[error("incorrect username or password")]
    InvalidCredentials,

    /// A registration field was rejected.
    #[error("{field}: {message}")]
    Validation {
        /// The offending field.
        field: &'static str,
        /// Human-readable reason.
        message: String,
    },

    /// A username or email is already registered.
    #[error("{0}")]
    Conflict(String),

    /// Password hashing or hash parsing failed.
    #[error("Password hashing failed: {0}")]
    PasswordHash(String),

    /// Credential store failure.
    ///
    /// Wraps the original [`StorageError`] to preserve the source chain.
    #[error("Credential store error: {0}")]
    Storage(
        /// The underlying storage error.
        #[source]
        StorageError,
    ),

    /// Configuration could not be loaded or is invalid.
    #[error("Configuration error: {0}")]
    Config(
        /// The underlying configuration error.
        #[source]
        ConfigError,
    ),
}

impl AuthError {
    /// Creates an `InvalidTokenFormat` error.
    #[must_use]
    pub fn invalid_token_format(message: impl Into<String>) -> Self {
        Self::InvalidTokenFormat(message.into())
    }

    /// Creates an `UnsupportedAlgorithm` error.
    #[must_use]
    pub fn unsupported_algorithm(message: impl Into<String>) -> Self {
        Self::UnsupportedAlgorithm(message.into())
    }

    /// Creates a `MissingClaim` error.
    #[must_use]
    pub fn missing_claim(claim: impl Into<String>) -> Self {
        Self::MissingClaim(claim.into())
    }

    /// Creates a `Validation` error for `field`.
    #[must_use]
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation { field, message: message.into() }
    }

    /// Creates a `Conflict` error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// Creates a `PasswordHash` error.
    #[must_use]
    pub fn password_hash(message: impl Into<String>) -> Self {
        Self::PasswordHash(message.into())
    }

    /// Returns `true` for every failure that means "not authenticated":
    /// header, token and subject problems.
    #[must_use]
    pub fn is_authentication_failure(&self) -> bool {
        matches!(
            self,
            Self::MissingHeader
                | Self::InvalidScheme
                | Self::InvalidTokenFormat(_)
                | Self::InvalidSignature
                | Self::TokenExpired
                | Self::UnsupportedAlgorithm(_)
                | Self::MissingClaim(_)
                | Self::UnknownSubject
                | Self::IdentityDisabled
        )
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::InvalidToken => AuthError::invalid_token_format("Invalid JWT structure"),
            ErrorKind::InvalidSignature => AuthError::InvalidSignature,
            ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            ErrorKind::InvalidAlgorithm => {
                AuthError::unsupported_algorithm("Algorithm not supported")
            },
            ErrorKind::MissingRequiredClaim(claim) => AuthError::missing_claim(claim.as_str()),
            _ => AuthError::invalid_token_format(format!("JWT error: {err}")),
        }
    }
}

impl From<StorageError> for AuthError {
    fn from(err: StorageError) -> Self {
        AuthError::Storage(err)
    }
}

impl From<ConfigError> for AuthError {
    fn from(err: ConfigError) -> Self {
        AuthError::Config(err)
    }
}

impl From<argon2::password_hash::Error> for AuthError {
    fn from(err: argon2::password_hash::Error) -> Self {
        AuthError::password_hash(err.to_string())
    }
}

/// Result type alias for authentication operations.
pub type Result<T> = std::result::Result<T, AuthError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AuthError::invalid_token_format("test");
        assert_eq!(err.to_string(), "Invalid token format: test");

        let err = AuthError::TokenExpired;
        assert_eq!(err.to_string(), "Token expired");

        let err = AuthError::missing_claim("sub");
        assert_eq!(err.to_string(), "Missing claim: sub");

        let err = AuthError::validation("password", "must be at least 8 characters");
        assert_eq!(err.to_string(), "password: must be at least 8 characters");
    }

    #[test]
    fn test_invalid_credentials_message_is_uniform() {
        assert_eq!(AuthError::InvalidCredentials.to_string(), INVALID_CREDENTIALS_MESSAGE);
    }

    #[test]
    fn test_error_from_jsonwebtoken() {
        use jsonwebtoken::errors::{Error, ErrorKind};

        let auth_err: AuthError = Error::from(ErrorKind::ExpiredSignature).into();
        assert!(matches!(auth_err, AuthError::TokenExpired));

        let auth_err: AuthError = Error::from(ErrorKind::InvalidSignature).into();
        assert!(matches!(auth_err, AuthError::InvalidSignature));

        let auth_err: AuthError = Error::from(ErrorKind::MissingRequiredClaim("sub".into())).into();
        assert!(matches!(auth_err, AuthError::MissingClaim(ref c) if c == "sub"));
    }

    #[test]
    fn test_authentication_failures_are_classified() {
        assert!(AuthError::MissingHeader.is_authentication_failure());
        assert!(AuthError::TokenExpired.is_authentication_failure());
        assert!(AuthError::UnknownSubject.is_authentication_failure());
        assert!(!AuthError::InvalidCredentials.is_authentication_failure());
        assert!(!AuthError::conflict("taken").is_authentication_failure());
    }

    #[test]
    fn test_storage_error_preserves_source_chain() {
        use std::error::Error;

        let auth_err: AuthError = StorageError::internal("disk on fire").into();

        let source = auth_err.source().expect("source chain must be preserved");
        assert_eq!(source.to_string(), "Internal error: disk on fire");
        assert_eq!(auth_err.to_string(), "Credential store error: Internal error: disk on fire");
    }
}
