//! Authentication configuration.
//!
//! Values are layered the usual way:
//! 1. Defaults from `#[serde(default)]`
//! 2. An optional TOML file
//! 3. Environment variables with the `LABGATE__` prefix
//!
//! ```toml
//! [auth]
//! jwt_secret = "change-me-to-at-least-32-random-bytes"
//!
//! [auth.password_hash]
//! memory_kib = 19456
//! iterations = 2
//! parallelism = 1
//! ```
//!
//! Environment equivalents:
//! - `LABGATE__AUTH__JWT_SECRET=...`
//! - `LABGATE__AUTH__PASSWORD_HASH__ITERATIONS=3`
//!
//! A missing or empty signing secret is a fatal startup error.

use std::{fmt, path::Path};

use ::config::{Config as ConfigBuilder, Environment, File, builder::DefaultState};
use serde::Deserialize;
use thiserror::Error;
use zeroize::Zeroizing;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "LABGATE";

/// Secrets shorter than this are accepted with a warning.
pub const RECOMMENDED_SECRET_LEN: usize = 32;

/// Configuration errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// No signing secret was configured.
    #[error("auth.jwt_secret must be set")]
    MissingSecret,

    /// Argon2 cost parameters are out of range.
    #[error("invalid password hash parameters: {0}")]
    InvalidHashParams(String),

    /// The configuration sources could not be read or deserialized.
    #[error("failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),
}

/// Argon2id cost parameters.
///
/// Defaults are the OWASP minimums for Argon2id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, bon::Builder)]
#[serde(default)]
pub struct PasswordHashConfig {
    /// Memory cost in KiB.
    #[builder(default = 19_456)]
    pub memory_kib: u32,
    /// Number of passes.
    #[builder(default = 2)]
    pub iterations: u32,
    /// Degree of parallelism.
    #[builder(default = 1)]
    pub parallelism: u32,
}

impl Default for PasswordHashConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl PasswordHashConfig {
    /// Builds the Argon2 parameter set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidHashParams`] if argon2 rejects the values.
    pub fn params(&self) -> Result<argon2::Params, ConfigError> {
        argon2::Params::new(self.memory_kib, self.iterations, self.parallelism, None)
            .map_err(|e| ConfigError::InvalidHashParams(e.to_string()))
    }
}

/// Authentication settings.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Shared HS256 signing secret.
    pub jwt_secret: Zeroizing<String>,
    /// Password hashing cost.
    pub password_hash: PasswordHashConfig,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &"<redacted>")
            .field("password_hash", &self.password_hash)
            .finish()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RootConfig {
    auth: AuthConfig,
}

impl AuthConfig {
    /// Creates a configuration around `secret` with default hashing cost.
    #[must_use]
    pub fn with_secret(secret: impl Into<String>) -> Self {
        Self { jwt_secret: Zeroizing::new(secret.into()), password_hash: Default::default() }
    }

    /// Loads the `[auth]` section from `path` (if it exists) and the
    /// environment, then validates it.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::Load`] if a source is unreadable or malformed
    /// - [`ConfigError::MissingSecret`] if no secret is configured
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let builder = ConfigBuilder::builder()
            .add_source(File::from(path.as_ref()).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__").try_parsing(true));
        Self::from_builder(builder)
    }

    fn from_builder(builder: ::config::ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        let root: RootConfig = builder.build()?.try_deserialize()?;
        root.auth.validate()?;
        tracing::info!(config = ?root.auth, "authentication configuration loaded");
        Ok(root.auth)
    }

    /// Checks the configuration for startup.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::MissingSecret`] if the secret is empty or blank
    /// - [`ConfigError::InvalidHashParams`] if the Argon2 cost is invalid
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt_secret.trim().is_empty() {
            return Err(ConfigError::MissingSecret);
        }
        if self.jwt_secret.len() < RECOMMENDED_SECRET_LEN {
            tracing::warn!(
                length = self.jwt_secret.len(),
                recommended = RECOMMENDED_SECRET_LEN,
                "auth.jwt_secret is shorter than recommended for HS256"
            );
        }
        self.password_hash.params()?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use ::config::FileFormat;

    use super::*;

    fn from_toml(toml: &str) -> Result<AuthConfig, ConfigError> {
        AuthConfig::from_builder(
            ConfigBuilder::builder().add_source(File::from_str(toml, FileFormat::Toml)),
        )
    }

    #[test]
    fn test_default_hash_params() {
        let params = PasswordHashConfig::default();
        assert_eq!(params.memory_kib, 19_456);
        assert_eq!(params.iterations, 2);
        assert_eq!(params.parallelism, 1);
        assert!(params.params().is_ok());
    }

    #[test]
    fn test_load_from_toml() {
        let config = from_toml(
            r#"
            [auth]
            jwt_secret = "0123456789abcdef0123456789abcdef"

            [auth.password_hash]
            iterations = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.jwt_secret.as_str(), "0123456789abcdef0123456789abcdef");
        assert_eq!(config.password_hash.iterations, 3);
        assert_eq!(config.password_hash.memory_kib, 19_456);
    }

    #[test]
    fn test_missing_secret_is_fatal() {
        let result = from_toml("[auth]\n");
        assert!(matches!(result, Err(ConfigError::MissingSecret)));

        let result = from_toml("[auth]\njwt_secret = \"   \"\n");
        assert!(matches!(result, Err(ConfigError::MissingSecret)));
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        // Without a file or environment the secret is absent.
        let result = AuthConfig::load("/nonexistent/labgate.toml");
        assert!(matches!(result, Err(ConfigError::MissingSecret)));
    }

    #[test]
    fn test_short_secret_is_accepted() {
        let _subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_test_writer()
            .try_init();

        assert!(AuthConfig::with_secret("short").validate().is_ok());
    }

    #[test]
    fn test_invalid_hash_params_rejected() {
        let mut config = AuthConfig::with_secret("0123456789abcdef0123456789abcdef");
        config.password_hash = PasswordHashConfig::builder().parallelism(0).build();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidHashParams(_))));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let config = AuthConfig::with_secret("super-secret-value");
        let debug = format!("{config:?}");
        assert!(!debug.contains("super-secret-value"));
        assert!(debug.contains("<redacted>"));
    }
}
