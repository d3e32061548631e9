//! Storage abstraction and credential directory for labgate.
//!
//! This crate provides the [`StorageBackend`] trait, an in-memory backend,
//! and the credential directory built on top of them: identities, labs,
//! roles, and the relations between them.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │           labgate-authn / labgate-authz services            │
//! ├─────────────────────────────────────────────────────────────┤
//! │       IdentityStore │ LabStore │ RoleStore  (traits)        │
//! │                 Directory<B: StorageBackend>                │
//! │       (records, uniqueness indexes, guarded join keys)      │
//! ├─────────────────────────────────────────────────────────────┤
//! │                    StorageBackend trait                     │
//! │            (get, set, delete, get_range, transaction)       │
//! ├─────────────────────────────────────────────────────────────┤
//! │                        MemoryBackend                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use labgate_storage::{
//!     Directory, IdentityStore, LabStore, MemoryBackend, NewIdentity, NewLab, RoleName,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let directory = Directory::new(MemoryBackend::new());
//!
//!     let alice = directory
//!         .create(
//!             NewIdentity::builder()
//!                 .username("alice")
//!                 .email("alice@example.com")
//!                 .password_hash(String::from("$argon2id$..."))
//!                 .roles([RoleName::Admin].into())
//!                 .build(),
//!         )
//!         .await?;
//!
//!     let lab = directory
//!         .create_lab(NewLab::builder().name("Central").created_by(alice.id).build())
//!         .await?;
//!     assert!(lab.active);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module (directory fixtures) and
//!   the in-memory `RecordingAuditLogger`.

#![deny(unsafe_code)]

pub mod audit;
pub mod backend;
pub mod directory;
pub mod error;
pub mod memory;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;
pub mod transaction;
pub mod types;

// Re-export primary types at crate root for convenience
pub use backend::{StorageBackend, prefix_range};
pub use directory::{
    Directory, IdentityStore, LabStore, MAX_CONFLICT_RETRIES, RoleStore,
    records::{
        self, Identity, Lab, LabChanges, LabDetails, NewIdentity, NewLab, Profile, Role, RoleName,
        UnknownRole,
    },
};
pub use error::{BoxError, StorageError, StorageResult};
pub use memory::MemoryBackend;
pub use transaction::Transaction;
pub use types::{KeyValue, LabId, RoleId, UserId};
pub use zeroize::Zeroizing;
