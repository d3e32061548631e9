//! Shared fixtures for directory tests.
//!
//! Feature-gated behind `testutil` so they never reach production builds.
//!
//! ```toml
//! [dev-dependencies]
//! labgate-storage = { path = "../storage", features = ["testutil"] }
//! ```

use std::{collections::BTreeSet, sync::Arc};

use crate::{
    Directory, IdentityStore, LabStore, MemoryBackend,
    error::{StorageError, StorageResult},
    records::{Identity, Lab, NewIdentity, NewLab, RoleName},
    types::UserId,
};

/// A fresh in-memory directory.
#[must_use]
pub fn memory_directory() -> Arc<Directory<MemoryBackend>> {
    Arc::new(Directory::new(MemoryBackend::new()))
}

/// Builds a [`NewIdentity`] with `{username}@example.com` and a fixed
/// placeholder hash.
#[must_use]
pub fn new_identity(username: &str, roles: &[RoleName]) -> NewIdentity {
    NewIdentity::builder()
        .username(username)
        .email(format!("{username}@example.com"))
        .password_hash(String::from("$argon2id$v=19$m=8,t=1,p=1$placeholder$placeholder"))
        .roles(roles.iter().copied().collect::<BTreeSet<_>>())
        .build()
}

/// Creates an identity in `store`.
///
/// # Panics
///
/// Panics if the identity cannot be created.
pub async fn seed_identity(
    store: &dyn IdentityStore,
    username: &str,
    roles: &[RoleName],
) -> Identity {
    store.create(new_identity(username, roles)).await.expect("seed identity")
}

/// Creates an active lab named `name` owned by `creator`.
///
/// # Panics
///
/// Panics if the lab cannot be created.
pub async fn seed_lab(store: &dyn LabStore, name: &str, creator: UserId) -> Lab {
    store
        .create_lab(NewLab::builder().name(name).created_by(creator).build())
        .await
        .expect("seed lab")
}

/// Assert that a [`StorageResult`] is a [`StorageError::NotFound`].
///
/// # Panics
///
/// Panics with a descriptive message if the result is not `NotFound`.
pub fn assert_not_found<T: std::fmt::Debug>(result: &StorageResult<T>) {
    assert!(
        matches!(result, Err(StorageError::NotFound { .. })),
        "expected NotFound, got: {result:?}"
    );
}

/// Assert that a [`StorageResult`] is a [`StorageError::AlreadyExists`].
///
/// # Panics
///
/// Panics with a descriptive message if the result is not `AlreadyExists`.
pub fn assert_already_exists<T: std::fmt::Debug>(result: &StorageResult<T>) {
    assert!(
        matches!(result, Err(StorageError::AlreadyExists { .. })),
        "expected AlreadyExists, got: {result:?}"
    );
}
