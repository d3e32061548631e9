//! Lab persistence and lab membership.

use async_trait::async_trait;
use chrono::Utc;

use super::{
    Directory, MAX_CONFLICT_RETRIES, PRESENT, decode_i64, encode, keys,
    records::{Lab, LabChanges, NewLab},
};
use crate::{
    backend::StorageBackend,
    error::{StorageError, StorageResult},
    types::{LabId, UserId},
};

/// Persistence for labs and the identities that belong to them.
///
/// Membership is a many-to-many relation stored from both sides, so both
/// [`members_of`](LabStore::members_of) and [`labs_of`](LabStore::labs_of)
/// are single prefix scans.
#[async_trait]
pub trait LabStore: Send + Sync {
    /// Loads a lab, or `None` if absent.
    async fn find_lab(&self, id: LabId) -> StorageResult<Option<Lab>>;

    /// Loads the lab registered under `name`.
    async fn find_lab_by_name(&self, name: &str) -> StorageResult<Option<Lab>>;

    /// Returns `true` if a lab named `name` exists.
    async fn lab_name_exists(&self, name: &str) -> StorageResult<bool>;

    /// Lists the labs created by `creator`, in id order.
    async fn labs_created_by(&self, creator: UserId) -> StorageResult<Vec<Lab>>;

    /// Lists every lab, in id order.
    async fn list_labs(&self) -> StorageResult<Vec<Lab>>;

    /// Creates an active lab.
    ///
    /// # Errors
    ///
    /// - [`StorageError::AlreadyExists`] if the name is taken
    /// - [`StorageError::NotFound`] if the creator does not exist
    async fn create_lab(&self, new: NewLab) -> StorageResult<Lab>;

    /// Replaces the lab's name and details.
    ///
    /// # Errors
    ///
    /// - [`StorageError::NotFound`] if the lab does not exist
    /// - [`StorageError::AlreadyExists`] if renaming onto a taken name
    async fn update_lab(&self, id: LabId, changes: LabChanges) -> StorageResult<Lab>;

    /// Sets the lab's active flag.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if the lab does not exist.
    async fn set_lab_active(&self, id: LabId, active: bool) -> StorageResult<Lab>;

    /// Deletes the lab and all of its memberships.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if the lab does not exist.
    async fn delete_lab(&self, id: LabId) -> StorageResult<()>;

    /// Lists the members of `lab`, in id order.
    async fn members_of(&self, lab: LabId) -> StorageResult<Vec<UserId>>;

    /// Lists the labs `user` is a member of, in id order.
    async fn labs_of(&self, user: UserId) -> StorageResult<Vec<LabId>>;

    /// Returns `true` if `user` is a member of `lab`.
    async fn is_member(&self, lab: LabId, user: UserId) -> StorageResult<bool>;

    /// Adds `user` to `lab`.
    ///
    /// Returns `false` without writing if `user` is already a member.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if the lab or the identity does
    /// not exist.
    async fn add_member(&self, lab: LabId, user: UserId) -> StorageResult<bool>;

    /// Removes `user` from `lab`.
    ///
    /// Returns `false` without writing if `user` is not a member.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if the lab or the identity does
    /// not exist.
    async fn remove_member(&self, lab: LabId, user: UserId) -> StorageResult<bool>;
}

impl<B: StorageBackend> Directory<B> {
    /// Guarded toggle of the two membership join keys.
    async fn toggle_membership(&self, lab: LabId, user: UserId, add: bool) -> StorageResult<bool> {
        let lab_key = keys::lab(lab);
        let identity_key = keys::identity(user);
        let lab_side = keys::lab_member(lab, user);
        let user_side = keys::member_lab(user, lab);

        for _ in 0..MAX_CONFLICT_RETRIES {
            let Some(lab_raw) = self.backend.get(&lab_key).await? else {
                return Err(StorageError::not_found(keys::display(&lab_key)));
            };
            let Some(identity_raw) = self.backend.get(&identity_key).await? else {
                return Err(StorageError::not_found(keys::display(&identity_key)));
            };
            let present = self.backend.get(&lab_side).await?.is_some();
            if present == add {
                return Ok(false);
            }

            let mut txn = self.backend.transaction().await?;
            txn.compare_and_set(lab_key.clone(), Some(lab_raw.to_vec()), lab_raw.to_vec())?;
            txn.compare_and_set(
                identity_key.clone(),
                Some(identity_raw.to_vec()),
                identity_raw.to_vec(),
            )?;
            if add {
                txn.compare_and_set(lab_side.clone(), None, PRESENT.to_vec())?;
                txn.set(user_side.clone(), PRESENT.to_vec());
            } else {
                txn.compare_and_delete(lab_side.clone(), PRESENT.to_vec())?;
                txn.delete(user_side.clone());
            }

            match txn.commit().await {
                Ok(()) => return Ok(true),
                Err(StorageError::Conflict) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(StorageError::Conflict)
    }

    /// Removes membership keys added while the lab was being deleted.
    async fn sweep_lab_members(&self, lab: LabId) -> StorageResult<()> {
        let members = self.scan_ids(&keys::lab_members_prefix(lab)).await?;
        if members.is_empty() {
            return Ok(());
        }

        let mut txn = self.backend.transaction().await?;
        for user in members {
            txn.delete(keys::lab_member(lab, user.into()));
            txn.delete(keys::member_lab(user.into(), lab));
        }
        txn.commit().await
    }

    async fn name_taken(&self, name: &str) -> StorageResult<bool> {
        Ok(self.backend.get(&keys::lab_name_index(name)).await?.is_some())
    }
}

#[async_trait]
impl<B: StorageBackend> LabStore for Directory<B> {
    #[tracing::instrument(skip(self))]
    async fn find_lab(&self, id: LabId) -> StorageResult<Option<Lab>> {
        self.backend.get_json(&keys::lab(id)).await
    }

    #[tracing::instrument(skip(self))]
    async fn find_lab_by_name(&self, name: &str) -> StorageResult<Option<Lab>> {
        match self.lookup_index(&keys::lab_name_index(name)).await? {
            Some(id) => self.find_lab(LabId(id)).await,
            None => Ok(None),
        }
    }

    async fn lab_name_exists(&self, name: &str) -> StorageResult<bool> {
        self.name_taken(name).await
    }

    async fn labs_created_by(&self, creator: UserId) -> StorageResult<Vec<Lab>> {
        let mut labs = Vec::new();
        for id in self.scan_ids(&keys::lab_creator_prefix(creator)).await? {
            if let Some(lab) = self.find_lab(LabId(id)).await? {
                labs.push(lab);
            }
        }
        Ok(labs)
    }

    async fn list_labs(&self) -> StorageResult<Vec<Lab>> {
        self.scan_records(&keys::lab_prefix()).await
    }

    #[tracing::instrument(skip(self, new), fields(name = %new.name, creator = %new.created_by))]
    async fn create_lab(&self, new: NewLab) -> StorageResult<Lab> {
        let name_key = keys::lab_name_index(&new.name);
        if self.name_taken(&new.name).await? {
            return Err(StorageError::already_exists(keys::display(&name_key)));
        }

        let creator_key = keys::identity(new.created_by);
        let owned_key = keys::owned_lab_count(new.created_by);
        let id = LabId(self.next_id("labs").await?);
        let now = Utc::now();
        let lab = Lab {
            id,
            name: new.name,
            details: new.details,
            active: true,
            created_by: new.created_by,
            created_at: now,
            updated_at: now,
        };
        let document = encode(&lab)?;

        for _ in 0..MAX_CONFLICT_RETRIES {
            let Some(creator_raw) = self.backend.get(&creator_key).await? else {
                return Err(StorageError::not_found(keys::display(&creator_key)));
            };
            let owned = self.backend.get(&owned_key).await?;
            let count = match &owned {
                Some(bytes) => decode_i64(&owned_key, bytes)?,
                None => 0,
            };

            let mut txn = self.backend.transaction().await?;
            txn.compare_and_set(name_key.clone(), None, id.to_string().into_bytes())?;
            txn.compare_and_set(
                creator_key.clone(),
                Some(creator_raw.to_vec()),
                creator_raw.to_vec(),
            )?;
            txn.compare_and_set(
                owned_key.clone(),
                owned.map(|b| b.to_vec()),
                (count + 1).to_string().into_bytes(),
            )?;
            txn.compare_and_set(keys::lab(id), None, document.clone())?;
            txn.set(keys::lab_creator(lab.created_by, id), PRESENT.to_vec());

            match txn.commit().await {
                Ok(()) => {
                    tracing::debug!(lab_id = %id, "lab created");
                    return Ok(lab);
                },
                Err(StorageError::Conflict) => {
                    if self.name_taken(&lab.name).await? {
                        return Err(StorageError::already_exists(keys::display(&name_key)));
                    }
                },
                Err(e) => return Err(e),
            }
        }
        Err(StorageError::Conflict)
    }

    #[tracing::instrument(skip(self, changes))]
    async fn update_lab(&self, id: LabId, changes: LabChanges) -> StorageResult<Lab> {
        let key = keys::lab(id);
        let new_name_key = keys::lab_name_index(&changes.name);

        for _ in 0..MAX_CONFLICT_RETRIES {
            let Some((mut lab, raw)) = self.load_raw::<Lab>(&key).await? else {
                return Err(StorageError::not_found(keys::display(&key)));
            };
            let renamed = lab.name != changes.name;
            if renamed && self.name_taken(&changes.name).await? {
                return Err(StorageError::already_exists(keys::display(&new_name_key)));
            }
            let old_name_key = keys::lab_name_index(&lab.name);

            lab.name = changes.name.clone();
            lab.details = changes.details.clone();
            lab.updated_at = Utc::now();

            let mut txn = self.backend.transaction().await?;
            txn.compare_and_set(key.clone(), Some(raw.to_vec()), encode(&lab)?)?;
            if renamed {
                let id_bytes = id.to_string().into_bytes();
                txn.compare_and_set(new_name_key.clone(), None, id_bytes.clone())?;
                txn.compare_and_delete(old_name_key, id_bytes)?;
            }

            match txn.commit().await {
                Ok(()) => return Ok(lab),
                Err(StorageError::Conflict) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(StorageError::Conflict)
    }

    #[tracing::instrument(skip(self))]
    async fn set_lab_active(&self, id: LabId, active: bool) -> StorageResult<Lab> {
        let key = keys::lab(id);
        for _ in 0..MAX_CONFLICT_RETRIES {
            let Some((mut lab, raw)) = self.load_raw::<Lab>(&key).await? else {
                return Err(StorageError::not_found(keys::display(&key)));
            };
            lab.active = active;
            lab.updated_at = Utc::now();

            match self.backend.compare_and_set(&key, Some(&raw), encode(&lab)?).await {
                Ok(()) => return Ok(lab),
                Err(StorageError::Conflict) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(StorageError::Conflict)
    }

    #[tracing::instrument(skip(self))]
    async fn delete_lab(&self, id: LabId) -> StorageResult<()> {
        let key = keys::lab(id);

        for _ in 0..MAX_CONFLICT_RETRIES {
            let Some((lab, raw)) = self.load_raw::<Lab>(&key).await? else {
                return Err(StorageError::not_found(keys::display(&key)));
            };
            let members = self.scan_ids(&keys::lab_members_prefix(id)).await?;
            let owned_key = keys::owned_lab_count(lab.created_by);
            let owned = self.backend.get(&owned_key).await?;

            let mut txn = self.backend.transaction().await?;
            txn.compare_and_delete(key.clone(), raw.to_vec())?;
            txn.compare_and_delete(keys::lab_name_index(&lab.name), id.to_string().into_bytes())?;
            txn.delete(keys::lab_creator(lab.created_by, id));
            if let Some(bytes) = owned {
                let count = decode_i64(&owned_key, &bytes)?;
                txn.compare_and_set(
                    owned_key,
                    Some(bytes.to_vec()),
                    (count - 1).max(0).to_string().into_bytes(),
                )?;
            }
            for user in members {
                txn.delete(keys::lab_member(id, user.into()));
                txn.delete(keys::member_lab(user.into(), id));
            }

            match txn.commit().await {
                Ok(()) => {
                    tracing::debug!(lab_id = %id, "lab deleted");
                    return self.sweep_lab_members(id).await;
                },
                Err(StorageError::Conflict) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(StorageError::Conflict)
    }

    async fn members_of(&self, lab: LabId) -> StorageResult<Vec<UserId>> {
        let ids = self.scan_ids(&keys::lab_members_prefix(lab)).await?;
        Ok(ids.into_iter().map(UserId).collect())
    }

    async fn labs_of(&self, user: UserId) -> StorageResult<Vec<LabId>> {
        let ids = self.scan_ids(&keys::member_labs_prefix(user)).await?;
        Ok(ids.into_iter().map(LabId).collect())
    }

    async fn is_member(&self, lab: LabId, user: UserId) -> StorageResult<bool> {
        Ok(self.backend.get(&keys::lab_member(lab, user)).await?.is_some())
    }

    #[tracing::instrument(skip(self))]
    async fn add_member(&self, lab: LabId, user: UserId) -> StorageResult<bool> {
        self.toggle_membership(lab, user, true).await
    }

    #[tracing::instrument(skip(self))]
    async fn remove_member(&self, lab: LabId, user: UserId) -> StorageResult<bool> {
        self.toggle_membership(lab, user, false).await
    }
}
