//! Identity persistence: lookups, uniqueness, roles held.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::Utc;

use super::{
    Directory, MAX_CONFLICT_RETRIES, PRESENT, RoleStore, decode_i64, encode, keys,
    records::{Identity, NewIdentity, Profile, RoleName},
};
use crate::{
    backend::{StorageBackend, prefix_range},
    error::{StorageError, StorageResult},
    types::UserId,
};

/// Persistence for registered identities and the roles they hold.
///
/// Usernames and emails are each unique across all identities. Lookups are
/// exact-match on the stored value.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Loads an identity with its roles, or `None` if absent.
    async fn find_by_id(&self, id: UserId) -> StorageResult<Option<Identity>>;

    /// Loads the identity registered under `username`.
    async fn find_by_username(&self, username: &str) -> StorageResult<Option<Identity>>;

    /// Loads the identity registered under `email`.
    async fn find_by_email(&self, email: &str) -> StorageResult<Option<Identity>>;

    /// Returns `true` if `username` is taken.
    async fn exists_by_username(&self, username: &str) -> StorageResult<bool>;

    /// Returns `true` if `email` is taken.
    async fn exists_by_email(&self, email: &str) -> StorageResult<bool>;

    /// Creates an identity, its initial roles and, when
    /// [`NewIdentity::member_of`] is set, its membership of that lab in one
    /// transaction.
    ///
    /// # Errors
    ///
    /// - [`StorageError::AlreadyExists`] naming the occupied index key if the
    ///   username or email is taken, including when a concurrent
    ///   registration wins the race
    /// - [`StorageError::NotFound`] if the lab to join does not exist or is
    ///   deleted before the identity commits
    /// - [`StorageError::Conflict`] if the lab changes before the identity
    ///   commits
    async fn create(&self, new: NewIdentity) -> StorageResult<Identity>;

    /// Replaces the identity's profile fields.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if the identity does not exist.
    async fn update_profile(&self, id: UserId, profile: Profile) -> StorageResult<Identity>;

    /// Deletes the identity, its roles and its lab memberships.
    ///
    /// # Errors
    ///
    /// - [`StorageError::NotFound`] if the identity does not exist
    /// - [`StorageError::Referenced`] if the identity created any lab
    async fn delete(&self, id: UserId) -> StorageResult<()>;

    /// Returns the roles currently held by `id`.
    async fn roles_of(&self, id: UserId) -> StorageResult<BTreeSet<RoleName>>;

    /// Grants `role` to `id`.
    ///
    /// Returns `false` without writing if the role is already held.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if the identity does not exist.
    async fn assign_role(&self, id: UserId, role: RoleName) -> StorageResult<bool>;

    /// Revokes `role` from `id`.
    ///
    /// Returns `false` without writing if the role is not held.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if the identity does not exist.
    async fn remove_role(&self, id: UserId, role: RoleName) -> StorageResult<bool>;

    /// Lists every identity in id order.
    async fn list(&self) -> StorageResult<Vec<Identity>>;
}

impl<B: StorageBackend> Directory<B> {
    async fn load_roles(&self, id: UserId) -> StorageResult<BTreeSet<RoleName>> {
        let prefix = keys::identity_roles_prefix(id);
        let entries = self.backend.get_range(prefix_range(&prefix)).await?;
        entries
            .iter()
            .map(|kv| {
                let name = String::from_utf8_lossy(&kv.key[prefix.len()..]);
                name.parse::<RoleName>().map_err(|e| {
                    StorageError::serialization_with_source("unknown role under join key", e)
                })
            })
            .collect()
    }

    async fn hydrate(&self, mut identity: Identity) -> StorageResult<Identity> {
        identity.roles = self.load_roles(identity.id).await?;
        Ok(identity)
    }

    async fn identity_by_index(&self, index: &[u8]) -> StorageResult<Option<Identity>> {
        match self.lookup_index(index).await? {
            Some(id) => self.find_by_id(UserId(id)).await,
            None => Ok(None),
        }
    }

    /// Works out which index a lost creation race collided with.
    async fn identity_collision(
        &self,
        username: &str,
        email: &str,
    ) -> StorageResult<StorageError> {
        let username_key = keys::username_index(username);
        if self.backend.get(&username_key).await?.is_some() {
            return Ok(StorageError::already_exists(keys::display(&username_key)));
        }
        let email_key = keys::email_index(email);
        if self.backend.get(&email_key).await?.is_some() {
            return Ok(StorageError::already_exists(keys::display(&email_key)));
        }
        Ok(StorageError::Conflict)
    }

    /// Removes role and membership join keys left behind by relation
    /// mutations that committed while the identity was being deleted.
    async fn sweep_identity_relations(&self, id: UserId) -> StorageResult<()> {
        let roles = self.load_roles(id).await?;
        let labs = self.scan_ids(&keys::member_labs_prefix(id)).await?;
        if roles.is_empty() && labs.is_empty() {
            return Ok(());
        }

        tracing::debug!(
            user_id = %id,
            roles = roles.len(),
            labs = labs.len(),
            "sweeping relations left by concurrent writers"
        );
        let mut txn = self.backend.transaction().await?;
        for role in roles {
            txn.delete(keys::identity_role(id, role));
        }
        for lab in labs {
            txn.delete(keys::lab_member(lab.into(), id));
            txn.delete(keys::member_lab(id, lab.into()));
        }
        txn.commit().await
    }

    /// Guarded toggle of a role join key.
    async fn toggle_role(&self, id: UserId, role: RoleName, grant: bool) -> StorageResult<bool> {
        let identity_key = keys::identity(id);
        let join = keys::identity_role(id, role);

        for _ in 0..MAX_CONFLICT_RETRIES {
            let Some(raw) = self.backend.get(&identity_key).await? else {
                return Err(StorageError::not_found(keys::display(&identity_key)));
            };
            let held = self.backend.get(&join).await?.is_some();
            if held == grant {
                return Ok(false);
            }

            let mut txn = self.backend.transaction().await?;
            txn.compare_and_set(identity_key.clone(), Some(raw.to_vec()), raw.to_vec())?;
            if grant {
                txn.compare_and_set(join.clone(), None, PRESENT.to_vec())?;
            } else {
                txn.compare_and_delete(join.clone(), PRESENT.to_vec())?;
            }

            match txn.commit().await {
                Ok(()) => return Ok(true),
                Err(StorageError::Conflict) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(StorageError::Conflict)
    }
}

#[async_trait]
impl<B: StorageBackend> IdentityStore for Directory<B> {
    #[tracing::instrument(skip(self))]
    async fn find_by_id(&self, id: UserId) -> StorageResult<Option<Identity>> {
        match self.backend.get_json::<Identity>(&keys::identity(id)).await? {
            Some(identity) => Ok(Some(self.hydrate(identity).await?)),
            None => Ok(None),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn find_by_username(&self, username: &str) -> StorageResult<Option<Identity>> {
        self.identity_by_index(&keys::username_index(username)).await
    }

    #[tracing::instrument(skip(self))]
    async fn find_by_email(&self, email: &str) -> StorageResult<Option<Identity>> {
        self.identity_by_index(&keys::email_index(email)).await
    }

    async fn exists_by_username(&self, username: &str) -> StorageResult<bool> {
        Ok(self.backend.get(&keys::username_index(username)).await?.is_some())
    }

    async fn exists_by_email(&self, email: &str) -> StorageResult<bool> {
        Ok(self.backend.get(&keys::email_index(email)).await?.is_some())
    }

    #[tracing::instrument(skip(self, new), fields(username = %new.username))]
    async fn create(&self, new: NewIdentity) -> StorageResult<Identity> {
        let username_key = keys::username_index(&new.username);
        let email_key = keys::email_index(&new.email);
        if self.backend.get(&username_key).await?.is_some() {
            return Err(StorageError::already_exists(keys::display(&username_key)));
        }
        if self.backend.get(&email_key).await?.is_some() {
            return Err(StorageError::already_exists(keys::display(&email_key)));
        }

        let lab = match new.member_of {
            Some(lab) => {
                let lab_key = keys::lab(lab);
                let Some(raw) = self.backend.get(&lab_key).await? else {
                    return Err(StorageError::not_found(keys::display(&lab_key)));
                };
                Some((lab, lab_key, raw))
            },
            None => None,
        };

        for role in &new.roles {
            self.save(*role).await?;
        }

        let id = UserId(self.next_id("identities").await?);
        let now = Utc::now();
        let roles = new.roles;
        let mut identity = Identity {
            id,
            username: new.username,
            email: new.email,
            password_hash: new.password_hash,
            enabled: new.enabled,
            verified: new.verified,
            profile: new.profile,
            modules: new.modules,
            created_by: new.created_by,
            created_at: now,
            updated_at: now,
            roles: BTreeSet::new(),
        };

        let id_bytes = id.to_string().into_bytes();
        let mut txn = self.backend.transaction().await?;
        txn.compare_and_set(username_key, None, id_bytes.clone())?;
        txn.compare_and_set(email_key, None, id_bytes)?;
        txn.compare_and_set(keys::identity(id), None, encode(&identity)?)?;
        txn.compare_and_set(keys::owned_lab_count(id), None, b"0".to_vec())?;
        for role in &roles {
            txn.set(keys::identity_role(id, *role), PRESENT.to_vec());
        }
        if let Some((lab, lab_key, raw)) = &lab {
            txn.compare_and_set(lab_key.clone(), Some(raw.to_vec()), raw.to_vec())?;
            txn.set(keys::lab_member(*lab, id), PRESENT.to_vec());
            txn.set(keys::member_lab(id, *lab), PRESENT.to_vec());
        }

        match txn.commit().await {
            Ok(()) => {},
            Err(StorageError::Conflict) => {
                let collision =
                    self.identity_collision(&identity.username, &identity.email).await?;
                if let (StorageError::Conflict, Some((_, lab_key, _))) = (&collision, &lab) {
                    if self.backend.get(lab_key).await?.is_none() {
                        return Err(StorageError::not_found(keys::display(lab_key)));
                    }
                }
                return Err(collision);
            },
            Err(e) => return Err(e),
        }

        match &lab {
            Some((lab, ..)) => tracing::debug!(user_id = %id, lab_id = %lab, "identity created"),
            None => tracing::debug!(user_id = %id, "identity created"),
        }
        identity.roles = roles;
        Ok(identity)
    }

    #[tracing::instrument(skip(self, profile))]
    async fn update_profile(&self, id: UserId, profile: Profile) -> StorageResult<Identity> {
        let key = keys::identity(id);
        for _ in 0..MAX_CONFLICT_RETRIES {
            let Some((mut identity, raw)) = self.load_raw::<Identity>(&key).await? else {
                return Err(StorageError::not_found(keys::display(&key)));
            };
            identity.profile = profile.clone();
            identity.updated_at = Utc::now();

            match self.backend.compare_and_set(&key, Some(&raw), encode(&identity)?).await {
                Ok(()) => return self.hydrate(identity).await,
                Err(StorageError::Conflict) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(StorageError::Conflict)
    }

    #[tracing::instrument(skip(self))]
    async fn delete(&self, id: UserId) -> StorageResult<()> {
        let key = keys::identity(id);
        let owned_key = keys::owned_lab_count(id);

        for _ in 0..MAX_CONFLICT_RETRIES {
            let Some((identity, raw)) = self.load_raw::<Identity>(&key).await? else {
                return Err(StorageError::not_found(keys::display(&key)));
            };
            let owned = self.backend.get(&owned_key).await?;
            if let Some(count) = &owned {
                if decode_i64(&owned_key, count)? > 0 {
                    return Err(StorageError::referenced(keys::display(
                        &keys::lab_creator_prefix(id),
                    )));
                }
            }
            let roles = self.load_roles(id).await?;
            let labs = self.scan_ids(&keys::member_labs_prefix(id)).await?;

            let mut txn = self.backend.transaction().await?;
            txn.compare_and_delete(key.clone(), raw.to_vec())?;
            match owned {
                Some(count) => txn.compare_and_delete(owned_key.clone(), count.to_vec())?,
                None => {
                    // Guard absence, then drop the placeholder after guards apply.
                    txn.compare_and_set(owned_key.clone(), None, b"0".to_vec())?;
                    txn.delete(owned_key.clone());
                },
            }
            txn.delete(keys::username_index(&identity.username));
            txn.delete(keys::email_index(&identity.email));
            for role in roles {
                txn.delete(keys::identity_role(id, role));
            }
            for lab in labs {
                txn.delete(keys::lab_member(lab.into(), id));
                txn.delete(keys::member_lab(id, lab.into()));
            }

            match txn.commit().await {
                Ok(()) => {
                    tracing::debug!(user_id = %id, "identity deleted");
                    return self.sweep_identity_relations(id).await;
                },
                Err(StorageError::Conflict) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(StorageError::Conflict)
    }

    async fn roles_of(&self, id: UserId) -> StorageResult<BTreeSet<RoleName>> {
        self.load_roles(id).await
    }

    #[tracing::instrument(skip(self))]
    async fn assign_role(&self, id: UserId, role: RoleName) -> StorageResult<bool> {
        self.save(role).await?;
        self.toggle_role(id, role, true).await
    }

    #[tracing::instrument(skip(self))]
    async fn remove_role(&self, id: UserId, role: RoleName) -> StorageResult<bool> {
        self.toggle_role(id, role, false).await
    }

    async fn list(&self) -> StorageResult<Vec<Identity>> {
        let mut identities = Vec::new();
        for identity in self.scan_records::<Identity>(&keys::identity_prefix()).await? {
            identities.push(self.hydrate(identity).await?);
        }
        Ok(identities)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::{LabStore, MemoryBackend, records::NewLab};

    fn directory() -> Directory<MemoryBackend> {
        Directory::new(MemoryBackend::new())
    }

    fn new_identity(username: &str) -> NewIdentity {
        NewIdentity::builder()
            .username(username)
            .email(format!("{username}@example.com"))
            .password_hash(String::from("$argon2id$test"))
            .roles(BTreeSet::from([RoleName::Admin]))
            .build()
    }

    #[tokio::test]
    async fn test_create_and_lookup_by_each_key() {
        let dir = directory();
        let created = dir.create(new_identity("alice")).await.unwrap();

        let by_id = dir.find_by_id(created.id).await.unwrap().unwrap();
        let by_name = dir.find_by_username("alice").await.unwrap().unwrap();
        let by_email = dir.find_by_email("alice@example.com").await.unwrap().unwrap();

        assert_eq!(by_id.id, created.id);
        assert_eq!(by_name.id, created.id);
        assert_eq!(by_email.id, created.id);
        assert!(by_id.has_role(RoleName::Admin));
        assert!(dir.exists_by_username("alice").await.unwrap());
        assert!(!dir.exists_by_username("Alice").await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_username_and_email_rejected() {
        let dir = directory();
        dir.create(new_identity("alice")).await.unwrap();

        let same_name = NewIdentity::builder()
            .username("alice")
            .email("other@example.com")
            .password_hash(String::from("h"))
            .build();
        let err = dir.create(same_name).await.unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists { ref key } if key.contains("username")));

        let same_email = NewIdentity::builder()
            .username("alicia")
            .email("alice@example.com")
            .password_hash(String::from("h"))
            .build();
        let err = dir.create(same_email).await.unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists { ref key } if key.contains("email")));

        assert_eq!(dir.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_assign_and_remove_role_report_changes() {
        let dir = directory();
        let alice = dir.create(new_identity("alice")).await.unwrap();

        assert!(!dir.assign_role(alice.id, RoleName::Admin).await.unwrap());
        assert!(dir.assign_role(alice.id, RoleName::User).await.unwrap());
        assert_eq!(
            dir.roles_of(alice.id).await.unwrap(),
            BTreeSet::from([RoleName::Admin, RoleName::User])
        );

        assert!(dir.remove_role(alice.id, RoleName::User).await.unwrap());
        assert!(!dir.remove_role(alice.id, RoleName::User).await.unwrap());
        assert!(dir.find_by_name(RoleName::User).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_role_change_on_missing_identity_is_not_found() {
        let dir = directory();
        let err = dir.assign_role(UserId(99), RoleName::User).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_update_profile_keeps_roles() {
        let dir = directory();
        let alice = dir.create(new_identity("alice")).await.unwrap();

        let profile = Profile { city: Some("Pune".into()), ..Profile::default() };
        let updated = dir.update_profile(alice.id, profile).await.unwrap();

        assert_eq!(updated.profile.city.as_deref(), Some("Pune"));
        assert!(updated.has_role(RoleName::Admin));
        assert!(updated.updated_at >= alice.updated_at);
    }

    #[tokio::test]
    async fn test_delete_cascades_relations_and_frees_indexes() {
        let dir = directory();
        let owner = dir.create(new_identity("owner")).await.unwrap();
        let member = dir.create(new_identity("member")).await.unwrap();
        let lab = dir
            .create_lab(NewLab::builder().name("Central").created_by(owner.id).build())
            .await
            .unwrap();
        assert!(dir.add_member(lab.id, member.id).await.unwrap());

        dir.delete(member.id).await.unwrap();

        assert!(dir.find_by_id(member.id).await.unwrap().is_none());
        assert!(!dir.exists_by_username("member").await.unwrap());
        assert!(dir.members_of(lab.id).await.unwrap().is_empty());
        assert!(dir.roles_of(member.id).await.unwrap().is_empty());

        dir.create(new_identity("member")).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_refused_while_identity_owns_labs() {
        let dir = directory();
        let owner = dir.create(new_identity("owner")).await.unwrap();
        let lab = dir
            .create_lab(NewLab::builder().name("Central").created_by(owner.id).build())
            .await
            .unwrap();

        let err = dir.delete(owner.id).await.unwrap_err();
        assert!(matches!(err, StorageError::Referenced { .. }));

        dir.delete_lab(lab.id).await.unwrap();
        dir.delete(owner.id).await.unwrap();
        assert!(dir.find_by_id(owner.id).await.unwrap().is_none());
        assert!(dir.find_lab(lab.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_joins_lab_in_the_same_commit() {
        let dir = directory();
        let owner = dir.create(new_identity("owner")).await.unwrap();
        let lab = dir
            .create_lab(NewLab::builder().name("Central").created_by(owner.id).build())
            .await
            .unwrap();

        let new = NewIdentity { member_of: Some(lab.id), ..new_identity("tech1") };
        let tech = dir.create(new).await.unwrap();

        assert!(dir.is_member(lab.id, tech.id).await.unwrap());
        assert_eq!(dir.labs_of(tech.id).await.unwrap(), vec![lab.id]);
    }

    #[tokio::test]
    async fn test_create_into_missing_lab_writes_nothing() {
        let dir = directory();
        let owner = dir.create(new_identity("owner")).await.unwrap();
        let lab = dir
            .create_lab(NewLab::builder().name("Central").created_by(owner.id).build())
            .await
            .unwrap();
        dir.delete_lab(lab.id).await.unwrap();

        let new = NewIdentity { member_of: Some(lab.id), ..new_identity("tech1") };
        let err = dir.create(new).await.unwrap_err();

        assert!(matches!(err, StorageError::NotFound { .. }));
        assert!(!dir.exists_by_username("tech1").await.unwrap());
        assert!(!dir.exists_by_email("tech1@example.com").await.unwrap());
        assert_eq!(dir.list().await.unwrap().len(), 1);
    }
}
