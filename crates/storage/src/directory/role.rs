//! Role catalog.

use async_trait::async_trait;

use super::{
    Directory, encode, keys,
    records::{Role, RoleName},
};
use crate::{
    backend::StorageBackend,
    error::{StorageError, StorageResult},
    types::RoleId,
};

/// Persistence for the role catalog.
///
/// Role names form a closed set; the catalog only assigns each name a
/// stable id the first time it is needed.
#[async_trait]
pub trait RoleStore: Send + Sync {
    /// Loads the role record for `name`.
    async fn find_by_name(&self, name: RoleName) -> StorageResult<Option<Role>>;

    /// Loads the role record with `id`.
    async fn find_role(&self, id: RoleId) -> StorageResult<Option<Role>>;

    /// Lists every stored role, in id order.
    async fn all_roles(&self) -> StorageResult<Vec<Role>>;

    /// Returns the role record for `name`, creating it if missing.
    async fn save(&self, name: RoleName) -> StorageResult<Role>;
}

#[async_trait]
impl<B: StorageBackend> RoleStore for Directory<B> {
    async fn find_by_name(&self, name: RoleName) -> StorageResult<Option<Role>> {
        match self.lookup_index(&keys::role_index(name)).await? {
            Some(id) => self.find_role(RoleId(id)).await,
            None => Ok(None),
        }
    }

    async fn find_role(&self, id: RoleId) -> StorageResult<Option<Role>> {
        self.backend.get_json(&keys::role(id)).await
    }

    async fn all_roles(&self) -> StorageResult<Vec<Role>> {
        self.scan_records(&keys::role_prefix()).await
    }

    #[tracing::instrument(skip(self))]
    async fn save(&self, name: RoleName) -> StorageResult<Role> {
        if let Some(role) = self.find_by_name(name).await? {
            return Ok(role);
        }

        let role = Role { id: RoleId(self.next_id("roles").await?), name };
        let mut txn = self.backend.transaction().await?;
        txn.compare_and_set(keys::role_index(name), None, role.id.to_string().into_bytes())?;
        txn.compare_and_set(keys::role(role.id), None, encode(&role)?)?;

        match txn.commit().await {
            Ok(()) => {
                tracing::info!(role = %name, role_id = %role.id, "role created");
                Ok(role)
            },
            // Another writer created it first.
            Err(StorageError::Conflict) => {
                self.find_by_name(name).await?.ok_or(StorageError::Conflict)
            },
            Err(e) => Err(e),
        }
    }
}
