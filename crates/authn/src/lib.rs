//! # labgate authentication
//!
//! Bearer tokens, password credentials and identity resolution for
//! labgate services.
//!
//! This crate provides:
//! - **Token service**: HS256 issue/verify with a fixed ten hour lifetime
//! - **Authenticator**: `Authorization: Bearer <token>` to stored identity
//! - **Credentials**: login by username or email, registration, provisioning
//! - **Password hashing**: salted Argon2id in PHC format
//! - **Configuration**: signing secret and hashing cost via `config`
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use labgate_authn::{
//!     AuthConfig, Authenticator, CredentialService, PasswordHasher, RegistrationRequest,
//!     TokenService,
//! };
//! use labgate_storage::{Directory, MemoryBackend};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AuthConfig::load("labgate.toml")?;
//! let directory = Arc::new(Directory::new(MemoryBackend::new()));
//! let tokens = Arc::new(TokenService::new(&config)?);
//!
//! let credentials = CredentialService::new(
//!     Arc::clone(&tokens),
//!     PasswordHasher::new(&config.password_hash)?,
//!     directory.clone(),
//! );
//! credentials
//!     .register(
//!         RegistrationRequest::builder()
//!             .username("bob")
//!             .password("secret123")
//!             .email("bob@example.com")
//!             .first_name("Bob")
//!             .last_name("Stone")
//!             .build(),
//!     )
//!     .await?;
//! let login = credentials.login("bob", "secret123").await?;
//!
//! let authenticator = Authenticator::new(tokens, directory);
//! let header = format!("Bearer {}", login.token);
//! assert!(authenticator.authenticate(Some(&header)).await.is_some());
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Bearer header authentication.
pub mod authenticator;
/// Configuration loading.
pub mod config;
/// Login and registration.
pub mod credentials;
/// Authentication error types.
pub mod error;
/// Token issuance and verification.
pub mod jwt;
/// Password hashing.
pub mod password;
/// Shared test utilities.
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;
/// Algorithm and input validation.
pub mod validation;

// Re-export key types for convenience
pub use authenticator::{Authenticator, BEARER_PREFIX, bearer_token};
pub use config::{AuthConfig, ConfigError, PasswordHashConfig};
pub use credentials::{CredentialService, DEFAULT_ROLE, LoginProfile, RegistrationRequest};
pub use error::{AuthError, INVALID_CREDENTIALS_MESSAGE, Result};
pub use jwt::{TOKEN_LIFETIME, TokenClaims, TokenService, TokenStatus};
pub use password::PasswordHasher;
pub use validation::{ACCEPTED_ALGORITHMS, FORBIDDEN_ALGORITHMS, validate_algorithm};
