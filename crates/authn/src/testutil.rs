//! Shared test utilities for authentication testing.
//!
//! Provides a token service with a fixed secret, cheap password hashing,
//! a credential service over an in-memory directory, and helpers for
//! crafting raw tokens in attack tests. Feature-gated behind `testutil`.
//!
//! ```toml
//! [dev-dependencies]
//! labgate-authn = { path = "../authn", features = ["testutil"] }
//! ```

use std::sync::Arc;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use labgate_storage::{Directory, MemoryBackend, testutil::memory_directory};

use crate::{
    config::PasswordHashConfig, credentials::CredentialService, credentials::RegistrationRequest,
    jwt::TokenService, password::PasswordHasher,
};

/// Signing secret used by [`test_token_service`].
pub const TEST_SECRET: &str = "labgate-test-secret-0123456789abcdef";

/// A token service signing with [`TEST_SECRET`].
///
/// # Panics
///
/// Never in practice; the secret is non-empty.
#[must_use]
pub fn test_token_service() -> TokenService {
    TokenService::from_secret(TEST_SECRET.as_bytes()).expect("test secret is non-empty")
}

/// The cheapest Argon2 parameters argon2 accepts, for fast tests.
#[must_use]
pub fn fast_hash_config() -> PasswordHashConfig {
    PasswordHashConfig::builder().memory_kib(8).iterations(1).parallelism(1).build()
}

/// A credential service over a fresh in-memory directory.
///
/// # Panics
///
/// Panics if the fast hash parameters are rejected.
#[must_use]
pub fn credential_service() -> (CredentialService, Arc<Directory<MemoryBackend>>) {
    let dir = memory_directory();
    let hasher = PasswordHasher::new(&fast_hash_config()).expect("fast hash config");
    let service = CredentialService::new(Arc::new(test_token_service()), hasher, dir.clone());
    (service, dir)
}

/// A complete registration for `username` with `{username}@example.com`.
///
/// The first name is the capitalized username.
#[must_use]
pub fn registration(username: &str, password: &str) -> RegistrationRequest {
    let mut first_name = username.to_owned();
    if let Some(head) = first_name.get_mut(0..1) {
        head.make_ascii_uppercase();
    }
    RegistrationRequest::builder()
        .username(username)
        .password(password)
        .email(format!("{username}@example.com"))
        .first_name(first_name)
        .last_name("Tester")
        .build()
}

/// Signs an arbitrary JSON payload with HS256 and `secret`.
///
/// # Panics
///
/// Panics if encoding fails.
pub fn sign_payload(payload: &serde_json::Value, secret: &[u8]) -> String {
    jsonwebtoken::encode(&Header::new(Algorithm::HS256), payload, &EncodingKey::from_secret(secret))
        .expect("Failed to encode test JWT")
}

/// Creates a raw JWT string from header and payload JSON with an empty
/// signature segment.
///
/// # Panics
///
/// Panics if JSON serialization fails.
pub fn craft_raw_jwt(header_json: &serde_json::Value, payload_json: &serde_json::Value) -> String {
    let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(header_json).expect("header json"));
    let payload_b64 =
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload_json).expect("payload json"));
    format!("{header_b64}.{payload_b64}.")
}
