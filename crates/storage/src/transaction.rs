//! Transaction trait for atomic storage operations.
//!
//! Transactions provide:
//! - **Atomicity**: all buffered operations apply together or not at all
//! - **Read-your-writes**: reads inside a transaction see pending writes
//! - **Guards**: compare-and-set and compare-and-delete conditions are
//!   checked at commit, and any failed guard aborts the whole commit
//!
//! The directory uses guards to keep uniqueness indexes and join keys
//! consistent under concurrent mutation.
//!
//! # Example
//!
//! ```
//! use labgate_storage::{MemoryBackend, StorageBackend};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let backend = MemoryBackend::new();
//!
//! let mut txn = backend.transaction().await.unwrap();
//! txn.compare_and_set(b"identity-index/username/alice".to_vec(), None, b"1".to_vec()).unwrap();
//! txn.set(b"identities/1".to_vec(), b"{}".to_vec());
//! txn.commit().await.unwrap();
//!
//! assert!(backend.get(b"identities/1").await.unwrap().is_some());
//! # });
//! ```

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StorageResult;

/// A buffered set of writes applied atomically by [`commit`](Transaction::commit).
#[async_trait]
pub trait Transaction: Send {
    /// Reads a key, observing this transaction's pending writes first.
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>>;

    /// Buffers an unconditional write.
    fn set(&mut self, key: Vec<u8>, value: Vec<u8>);

    /// Buffers an unconditional delete.
    fn delete(&mut self, key: Vec<u8>);

    /// Buffers a write guarded by the current value of `key`.
    ///
    /// `expected == None` requires the key to be absent at commit.
    fn compare_and_set(
        &mut self,
        key: Vec<u8>,
        expected: Option<Vec<u8>>,
        new_value: Vec<u8>,
    ) -> StorageResult<()>;

    /// Buffers a delete guarded by the current value of `key`.
    ///
    /// The key must exist with exactly `expected` at commit.
    fn compare_and_delete(&mut self, key: Vec<u8>, expected: Vec<u8>) -> StorageResult<()>;

    /// Verifies every guard and applies all buffered operations.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Conflict`](crate::StorageError::Conflict) if
    /// any guard fails. No operation is applied in that case.
    async fn commit(self: Box<Self>) -> StorageResult<()>;
}
