//! Credential directory: identities, labs, roles and their relations.
//!
//! [`Directory`] implements [`IdentityStore`], [`LabStore`] and
//! [`RoleStore`] over any [`StorageBackend`]. Consumers hold the store
//! traits as `Arc<dyn ...>` and never see the backend.
//!
//! # Key Layout
//!
//! ```text
//! identities/{user}                      identity document (JSON)
//! identity-index/username/{username}     -> user id
//! identity-index/email/{email}           -> user id
//! identity-roles/{user}/{ROLE}           role held by user
//! labs/{lab}                             lab document (JSON)
//! lab-index/name/{name}                  -> lab id
//! lab-index/creator/{user}/{lab}         lab created by user
//! lab-owned-count/{user}                 number of labs created by user
//! lab-members/{lab}/{user}               membership, lab side
//! member-labs/{user}/{lab}               membership, user side
//! roles/{role}                           role document (JSON)
//! role-index/{ROLE}                      -> role id
//! sequences/{kind}                       id counter
//! ```
//!
//! Numeric ids are zero-padded so prefix scans return them in numeric order.
//! Every mutation that touches an index or a join key commits in a single
//! [`Transaction`](crate::Transaction) guarded by compare-and-set or
//! compare-and-delete, so concurrent mutations never leave an index and its
//! record disagreeing.

mod identity;
mod lab;
pub mod records;
mod role;

use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};

pub use self::{identity::IdentityStore, lab::LabStore, role::RoleStore};
use crate::{
    backend::{StorageBackend, prefix_range},
    error::{StorageError, StorageResult},
};

/// Upper bound on optimistic retries for a single directory mutation.
pub const MAX_CONFLICT_RETRIES: usize = 16;

/// Marker value stored under join keys.
const PRESENT: &[u8] = b"";

pub(crate) mod keys {
    use crate::{
        directory::records::RoleName,
        types::{LabId, RoleId, UserId},
    };

    pub fn identity(id: UserId) -> Vec<u8> {
        format!("identities/{:020}", id.0).into_bytes()
    }

    pub fn identity_prefix() -> Vec<u8> {
        b"identities/".to_vec()
    }

    pub fn username_index(username: &str) -> Vec<u8> {
        format!("identity-index/username/{username}").into_bytes()
    }

    pub fn email_index(email: &str) -> Vec<u8> {
        format!("identity-index/email/{email}").into_bytes()
    }

    pub fn identity_role(user: UserId, role: RoleName) -> Vec<u8> {
        format!("identity-roles/{:020}/{role}", user.0).into_bytes()
    }

    pub fn identity_roles_prefix(user: UserId) -> Vec<u8> {
        format!("identity-roles/{:020}/", user.0).into_bytes()
    }

    pub fn lab(id: LabId) -> Vec<u8> {
        format!("labs/{:020}", id.0).into_bytes()
    }

    pub fn lab_prefix() -> Vec<u8> {
        b"labs/".to_vec()
    }

    pub fn lab_name_index(name: &str) -> Vec<u8> {
        format!("lab-index/name/{name}").into_bytes()
    }

    pub fn lab_creator(user: UserId, lab: LabId) -> Vec<u8> {
        format!("lab-index/creator/{:020}/{:020}", user.0, lab.0).into_bytes()
    }

    pub fn lab_creator_prefix(user: UserId) -> Vec<u8> {
        format!("lab-index/creator/{:020}/", user.0).into_bytes()
    }

    pub fn owned_lab_count(user: UserId) -> Vec<u8> {
        format!("lab-owned-count/{:020}", user.0).into_bytes()
    }

    pub fn lab_member(lab: LabId, user: UserId) -> Vec<u8> {
        format!("lab-members/{:020}/{:020}", lab.0, user.0).into_bytes()
    }

    pub fn lab_members_prefix(lab: LabId) -> Vec<u8> {
        format!("lab-members/{:020}/", lab.0).into_bytes()
    }

    pub fn member_lab(user: UserId, lab: LabId) -> Vec<u8> {
        format!("member-labs/{:020}/{:020}", user.0, lab.0).into_bytes()
    }

    pub fn member_labs_prefix(user: UserId) -> Vec<u8> {
        format!("member-labs/{:020}/", user.0).into_bytes()
    }

    pub fn role(id: RoleId) -> Vec<u8> {
        format!("roles/{:020}", id.0).into_bytes()
    }

    pub fn role_prefix() -> Vec<u8> {
        b"roles/".to_vec()
    }

    pub fn role_index(name: RoleName) -> Vec<u8> {
        format!("role-index/{name}").into_bytes()
    }

    pub fn sequence(kind: &str) -> Vec<u8> {
        format!("sequences/{kind}").into_bytes()
    }

    /// Renders a key for logs and error messages.
    pub fn display(key: &[u8]) -> String {
        String::from_utf8_lossy(key).into_owned()
    }
}

/// Identity, lab and role stores backed by a [`StorageBackend`].
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use labgate_storage::{Directory, IdentityStore, LabStore, MemoryBackend};
///
/// let directory = Arc::new(Directory::new(MemoryBackend::new()));
/// let identities: Arc<dyn IdentityStore> = directory.clone();
/// let labs: Arc<dyn LabStore> = directory;
/// # let _ = (identities, labs);
/// ```
#[derive(Debug, Clone)]
pub struct Directory<B> {
    backend: B,
}

impl<B: StorageBackend> Directory<B> {
    /// Creates a directory over `backend`.
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// The underlying storage backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Allocates the next id from the `kind` counter.
    async fn next_id(&self, kind: &str) -> StorageResult<i64> {
        let key = keys::sequence(kind);
        for _ in 0..MAX_CONFLICT_RETRIES {
            let current = self.backend.get(&key).await?;
            let next = match &current {
                Some(bytes) => decode_i64(&key, bytes)? + 1,
                None => 1,
            };
            match self
                .backend
                .compare_and_set(&key, current.as_deref(), next.to_string().into_bytes())
                .await
            {
                Ok(()) => return Ok(next),
                Err(StorageError::Conflict) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(StorageError::Conflict)
    }

    /// Resolves an index key to the id it points at.
    async fn lookup_index(&self, key: &[u8]) -> StorageResult<Option<i64>> {
        match self.backend.get(key).await? {
            Some(bytes) => Ok(Some(decode_i64(key, &bytes)?)),
            None => Ok(None),
        }
    }

    /// Reads a record together with its raw bytes for use as a guard.
    async fn load_raw<T>(&self, key: &[u8]) -> StorageResult<Option<(T, Bytes)>>
    where
        T: DeserializeOwned + Send,
    {
        match self.backend.get(key).await? {
            Some(bytes) => Ok(Some((serde_json::from_slice(&bytes)?, bytes))),
            None => Ok(None),
        }
    }

    /// Lists the numeric ids that trail `prefix` in every matching key.
    async fn scan_ids(&self, prefix: &[u8]) -> StorageResult<Vec<i64>> {
        let entries = self.backend.get_range(prefix_range(prefix)).await?;
        entries
            .iter()
            .map(|kv| decode_i64(&kv.key, &kv.key[prefix.len()..]))
            .collect()
    }

    /// Decodes every JSON document under `prefix`.
    async fn scan_records<T>(&self, prefix: &[u8]) -> StorageResult<Vec<T>>
    where
        T: DeserializeOwned + Send,
    {
        let entries = self.backend.get_range(prefix_range(prefix)).await?;
        entries.iter().map(|kv| Ok(serde_json::from_slice(&kv.value)?)).collect()
    }
}

fn encode<T: Serialize>(value: &T) -> StorageResult<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

fn decode_i64(key: &[u8], bytes: &[u8]) -> StorageResult<i64> {
    std::str::from_utf8(bytes).ok().and_then(|s| s.parse::<i64>().ok()).ok_or_else(|| {
        StorageError::serialization(format!("malformed id under {}", keys::display(key)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LabId, UserId};

    #[test]
    fn test_padded_ids_sort_numerically() {
        let nine = keys::lab_member(LabId(1), UserId(9));
        let ten = keys::lab_member(LabId(1), UserId(10));
        assert!(nine < ten);
    }

    #[test]
    fn test_member_prefix_does_not_match_longer_lab_ids() {
        let range = prefix_range(&keys::lab_members_prefix(LabId(1)));
        assert!(range.contains(&keys::lab_member(LabId(1), UserId(5))));
        assert!(!range.contains(&keys::lab_member(LabId(11), UserId(5))));
    }

    #[test]
    fn test_decode_i64_rejects_garbage() {
        assert_eq!(decode_i64(b"k", b"42").ok(), Some(42));
        assert!(decode_i64(b"k", b"4x2").is_err());
    }
}
