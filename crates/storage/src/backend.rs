//! Storage backend trait definition.
//!
//! [`StorageBackend`] is a minimal, ordered key-value interface:
//! - **Keys and values are bytes**: record encoding lives in the directory layer
//! - **Async by default**: every operation is async
//! - **Range queries supported**: prefix scans drive membership and role listings
//! - **Transactional**: guarded multi-key commits via [`Transaction`]
//!
//! Identity, lab and role semantics live in [`Directory`](crate::Directory),
//! which is generic over this trait.

use std::ops::{Range, RangeBounds};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    error::{StorageError, StorageResult},
    transaction::Transaction,
    types::KeyValue,
};

/// Abstract ordered key-value store.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Retrieves the value stored at `key`, or `None` when absent.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>>;

    /// Stores `value` at `key`, replacing any existing value.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn set(&self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()>;

    /// Atomically replaces the value at `key` if it currently equals `expected`.
    ///
    /// `expected == None` means the key must not exist (insert-if-absent).
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Conflict`] when the current value differs.
    #[must_use = "compare-and-set may fail with a conflict and errors must be handled"]
    async fn compare_and_set(
        &self,
        key: &[u8],
        expected: Option<&[u8]>,
        new_value: Vec<u8>,
    ) -> StorageResult<()>;

    /// Removes `key`. Removing an absent key succeeds.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn delete(&self, key: &[u8]) -> StorageResult<()>;

    /// Returns every entry whose key falls in `range`, in key order.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn get_range<R>(&self, range: R) -> StorageResult<Vec<KeyValue>>
    where
        R: RangeBounds<Vec<u8>> + Send;

    /// Begins a transaction whose writes apply atomically on commit.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn transaction(&self) -> StorageResult<Box<dyn Transaction>>;

    /// Reads and decodes a JSON record stored at `key`.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn get_json<T>(&self, key: &[u8]) -> StorageResult<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        match self.get(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Encodes `value` as JSON and stores it at `key`.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn set_json<T>(&self, key: Vec<u8>, value: &T) -> StorageResult<()>
    where
        T: Serialize + Sync,
    {
        let bytes = serde_json::to_vec(value)
            .map_err(|e| StorageError::serialization_with_source("encode failed", e))?;
        self.set(key, bytes).await
    }
}

/// Returns the half-open key range covering every key that starts with `prefix`.
///
/// Prefixes used by the directory always end in `/`, so bumping the final
/// byte yields a tight exclusive upper bound.
#[must_use]
pub fn prefix_range(prefix: &[u8]) -> Range<Vec<u8>> {
    let start = prefix.to_vec();
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return start..end;
        }
    }
    // All bytes were 0xFF; no finite upper bound exists, use the widest one.
    start..vec![u8::MAX; prefix.len() + 1]
}
