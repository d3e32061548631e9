//! Lab, membership, sub-account and role administration.
//!
//! Every operation takes the authenticated [`Principal`], runs its
//! authorization decision through the [`AuthorizationEngine`], performs the
//! mutation through the directory stores, and records an audit event for
//! both outcomes.
//!
//! Relation mutations surface "nothing to change" as a conflict: adding an
//! existing member, removing a non-member, granting a held role, and
//! revoking an unheld role all fail with [`AccessError::Conflict`].

use std::{collections::BTreeMap, sync::Arc};

use labgate_authn::{
    AuthError, CredentialService, RegistrationRequest, validation::require_present,
};
use labgate_storage::{
    Identity, IdentityStore, Lab, LabChanges, LabId, LabStore, NewLab, Profile, RoleName,
    StorageError, UserId,
    audit::{
        AuditAction, AuditEvent, AuditLogger, AuditResult, TracingAuditLogger, lab_resource,
        user_resource,
    },
};

use crate::{
    engine::AuthorizationEngine,
    error::{AccessError, Result},
    policy::{OperationClass, Relation},
    principal::Principal,
};

const LAB_NAME_TAKEN: &str = "lab already exists";
const NOT_PROVISIONER: &str = "only the provisioning identity may manage this user";

/// Administrative operations for lab creators and super-admins.
#[derive(Clone)]
pub struct LabAdministration {
    engine: AuthorizationEngine,
    identities: Arc<dyn IdentityStore>,
    labs: Arc<dyn LabStore>,
    credentials: CredentialService,
    audit: Arc<dyn AuditLogger>,
}

impl std::fmt::Debug for LabAdministration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LabAdministration")
            .field("engine", &self.engine)
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

impl LabAdministration {
    /// Creates the service. Audit events go to [`TracingAuditLogger`]
    /// unless replaced with [`with_audit`](Self::with_audit).
    pub fn new(
        identities: Arc<dyn IdentityStore>,
        labs: Arc<dyn LabStore>,
        credentials: CredentialService,
    ) -> Self {
        Self {
            engine: AuthorizationEngine::new(Arc::clone(&labs)),
            identities,
            labs,
            credentials,
            audit: Arc::new(TracingAuditLogger),
        }
    }

    /// Sends audit events to `audit`.
    #[must_use]
    pub fn with_audit(mut self, audit: Arc<dyn AuditLogger>) -> Self {
        self.audit = audit;
        self
    }

    /// The engine used for every decision.
    #[must_use]
    pub fn engine(&self) -> &AuthorizationEngine {
        &self.engine
    }

    // ------------------------------------------------------------------
    // Labs
    // ------------------------------------------------------------------

    /// Creates an active lab owned by `principal`.
    ///
    /// # Errors
    ///
    /// - [`AccessError::Forbidden`] without the `ADMIN` role
    /// - [`AccessError::Validation`] for a blank name
    /// - [`AccessError::Conflict`] if the name is taken
    #[tracing::instrument(
        skip(self, principal, lab),
        fields(user_id = %principal.id(), name = %lab.name)
    )]
    pub async fn create_lab(&self, principal: &Principal, lab: LabChanges) -> Result<Lab> {
        let result = self.try_create_lab(principal, lab).await;
        let resource =
            result.as_ref().map_or_else(|_| "lab:new".to_owned(), |l| lab_resource(l.id));
        self.record(principal, AuditAction::CreateLab, resource, &result, &[]).await;
        result
    }

    async fn try_create_lab(&self, principal: &Principal, lab: LabChanges) -> Result<Lab> {
        self.engine.require_role(Some(principal), OperationClass::LabAdministration)?;
        require_present("name", &lab.name)?;
        if self.labs.lab_name_exists(&lab.name).await? {
            return Err(AccessError::conflict(LAB_NAME_TAKEN));
        }

        let new = NewLab::builder()
            .name(lab.name)
            .details(lab.details)
            .created_by(principal.id())
            .build();
        let created = self.labs.create_lab(new).await.map_err(lab_name_conflict)?;
        tracing::info!(lab_id = %created.id, "lab created");
        Ok(created)
    }

    /// Lists the labs `principal` created, active or not.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::Forbidden`] without the `ADMIN` role.
    pub async fn labs_created_by(&self, principal: &Principal) -> Result<Vec<Lab>> {
        self.engine.require_role(Some(principal), OperationClass::LabAdministration)?;
        Ok(self.labs.labs_created_by(principal.id()).await?)
    }

    /// Reads a lab. Any member, or the creator, may do so.
    ///
    /// # Errors
    ///
    /// See [`AuthorizationEngine::authorize`].
    pub async fn view_lab(&self, principal: &Principal, lab: LabId) -> Result<Lab> {
        self.engine.authorize(Some(principal), Relation::Member, lab).await
    }

    /// Replaces a lab's name and details. Creator only.
    ///
    /// # Errors
    ///
    /// - the decision errors of [`AuthorizationEngine::authorize_operation`]
    /// - [`AccessError::Validation`] for a blank name
    /// - [`AccessError::Conflict`] if renaming onto a taken name
    #[tracing::instrument(skip(self, principal, changes), fields(user_id = %principal.id()))]
    pub async fn update_lab(
        &self,
        principal: &Principal,
        lab: LabId,
        changes: LabChanges,
    ) -> Result<Lab> {
        let result = self.try_update_lab(principal, lab, changes).await;
        self.record(principal, AuditAction::UpdateLab, lab_resource(lab), &result, &[]).await;
        result
    }

    async fn try_update_lab(
        &self,
        principal: &Principal,
        lab: LabId,
        changes: LabChanges,
    ) -> Result<Lab> {
        let current = self.authorize_creator(principal, lab).await?;
        require_present("name", &changes.name)?;
        if changes.name != current.name && self.labs.lab_name_exists(&changes.name).await? {
            return Err(AccessError::conflict(LAB_NAME_TAKEN));
        }
        self.labs.update_lab(lab, changes).await.map_err(lab_name_conflict)
    }

    /// Deletes a lab and its memberships. Creator only, and only while the
    /// lab is active.
    ///
    /// # Errors
    ///
    /// See [`AuthorizationEngine::authorize_operation`].
    #[tracing::instrument(skip(self, principal), fields(user_id = %principal.id()))]
    pub async fn delete_lab(&self, principal: &Principal, lab: LabId) -> Result<()> {
        let result = async {
            self.authorize_creator(principal, lab).await?;
            self.labs.delete_lab(lab).await?;
            tracing::info!(lab_id = %lab, "lab deleted");
            Ok::<_, AccessError>(())
        }
        .await;
        self.record(principal, AuditAction::DeleteLab, lab_resource(lab), &result, &[]).await;
        result
    }

    // ------------------------------------------------------------------
    // Membership
    // ------------------------------------------------------------------

    /// Lists a lab's members. Creator only.
    ///
    /// # Errors
    ///
    /// See [`AuthorizationEngine::authorize_operation`].
    pub async fn list_members(&self, principal: &Principal, lab: LabId) -> Result<Vec<Identity>> {
        self.authorize_creator(principal, lab).await?;
        let mut members = Vec::new();
        for user in self.labs.members_of(lab).await? {
            // A member deleted since the scan is skipped.
            if let Some(identity) = self.identities.find_by_id(user).await? {
                members.push(identity);
            }
        }
        Ok(members)
    }

    /// Adds an existing identity to a lab. Creator only.
    ///
    /// # Errors
    ///
    /// - the decision errors of [`AuthorizationEngine::authorize_operation`]
    /// - [`AccessError::NotFound`] if `user` does not exist
    /// - [`AccessError::Conflict`] if `user` is already a member
    #[tracing::instrument(skip(self, principal), fields(user_id = %principal.id()))]
    pub async fn add_member(&self, principal: &Principal, lab: LabId, user: UserId) -> Result<()> {
        let result = async {
            self.authorize_creator(principal, lab).await?;
            self.require_identity(user).await?;
            if !self.labs.add_member(lab, user).await? {
                return Err(AccessError::conflict("user is already a member of the lab"));
            }
            tracing::info!(lab_id = %lab, member = %user, "member added");
            Ok::<_, AccessError>(())
        }
        .await;
        let metadata = [("member", user_resource(user))];
        self.record(principal, AuditAction::AddMember, lab_resource(lab), &result, &metadata).await;
        result
    }

    /// Removes an identity from a lab. Creator only.
    ///
    /// # Errors
    ///
    /// - the decision errors of [`AuthorizationEngine::authorize_operation`]
    /// - [`AccessError::NotFound`] if `user` does not exist
    /// - [`AccessError::Conflict`] if `user` is not a member
    #[tracing::instrument(skip(self, principal), fields(user_id = %principal.id()))]
    pub async fn remove_member(
        &self,
        principal: &Principal,
        lab: LabId,
        user: UserId,
    ) -> Result<()> {
        let result = async {
            self.authorize_creator(principal, lab).await?;
            self.require_identity(user).await?;
            if !self.labs.remove_member(lab, user).await? {
                return Err(AccessError::conflict("user is not a member of the lab"));
            }
            tracing::info!(lab_id = %lab, member = %user, "member removed");
            Ok::<_, AccessError>(())
        }
        .await;
        let metadata = [("member", user_resource(user))];
        self.record(principal, AuditAction::RemoveMember, lab_resource(lab), &result, &metadata)
            .await;
        result
    }

    // ------------------------------------------------------------------
    // Sub-accounts
    // ------------------------------------------------------------------

    /// Creates a new identity provisioned by `principal` as a member of
    /// `lab`. Creator only. The identity and its membership are written
    /// together, so a failure leaves neither behind.
    ///
    /// # Errors
    ///
    /// - the decision errors of [`AuthorizationEngine::authorize_operation`]
    /// - [`AccessError::Validation`] or [`AccessError::Conflict`] from
    ///   registration
    /// - [`AccessError::NotFound`] if the lab is deleted before the identity
    ///   is written
    #[tracing::instrument(skip(self, principal, request), fields(user_id = %principal.id()))]
    pub async fn provision_member(
        &self,
        principal: &Principal,
        lab: LabId,
        request: RegistrationRequest,
    ) -> Result<Identity> {
        let result = async {
            self.authorize_creator(principal, lab).await?;
            let identity = self
                .credentials
                .provision(request, principal.id(), lab)
                .await
                .map_err(|e| match e {
                    AuthError::Storage(StorageError::NotFound { .. }) => {
                        AccessError::not_found(lab_resource(lab))
                    },
                    other => other.into(),
                })?;
            tracing::info!(lab_id = %lab, member = %identity.id, "member provisioned");
            Ok::<_, AccessError>(identity)
        }
        .await;
        let resource =
            result.as_ref().map_or_else(|_| "user:new".to_owned(), |i| user_resource(i.id));
        let metadata = [("lab", lab_resource(lab))];
        self.record(principal, AuditAction::ProvisionIdentity, resource, &result, &metadata)
            .await;
        result
    }

    /// Replaces the profile of an identity `principal` provisioned.
    ///
    /// # Errors
    ///
    /// - [`AccessError::Forbidden`] without the `ADMIN` role, or if
    ///   `principal` did not provision `user`
    /// - [`AccessError::NotFound`] if `user` does not exist
    #[tracing::instrument(skip(self, principal, profile), fields(user_id = %principal.id()))]
    pub async fn update_provisioned(
        &self,
        principal: &Principal,
        user: UserId,
        profile: Profile,
    ) -> Result<Identity> {
        let result = async {
            self.authorize_provisioner(principal, user).await?;
            Ok::<_, AccessError>(self.identities.update_profile(user, profile).await?)
        }
        .await;
        self.record(principal, AuditAction::UpdateIdentity, user_resource(user), &result, &[])
            .await;
        result
    }

    /// Deletes an identity `principal` provisioned. Its memberships and
    /// roles go with it.
    ///
    /// # Errors
    ///
    /// - [`AccessError::Forbidden`] without the `ADMIN` role, or if
    ///   `principal` did not provision `user`
    /// - [`AccessError::NotFound`] if `user` does not exist
    /// - [`AccessError::Conflict`] if `user` still owns labs
    #[tracing::instrument(skip(self, principal), fields(user_id = %principal.id()))]
    pub async fn delete_provisioned(&self, principal: &Principal, user: UserId) -> Result<()> {
        let result = async {
            self.authorize_provisioner(principal, user).await?;
            self.identities.delete(user).await.map_err(|e| match e {
                StorageError::Referenced { .. } => AccessError::conflict("user still owns labs"),
                other => other.into(),
            })?;
            tracing::info!(deleted = %user, "provisioned identity deleted");
            Ok::<_, AccessError>(())
        }
        .await;
        self.record(principal, AuditAction::DeleteIdentity, user_resource(user), &result, &[])
            .await;
        result
    }

    /// Reads an identity `principal` provisioned that belongs to one of
    /// `principal`'s labs.
    ///
    /// # Errors
    ///
    /// See [`assign_role`](Self::assign_role).
    pub async fn view_member(&self, principal: &Principal, user: UserId) -> Result<Identity> {
        self.authorize_over_member(principal, user).await
    }

    // ------------------------------------------------------------------
    // Roles
    // ------------------------------------------------------------------

    /// Grants `role` to an identity `principal` provisioned that belongs to
    /// one of `principal`'s labs. Granting `SUPERADMIN` also requires
    /// holding it.
    ///
    /// # Errors
    ///
    /// - [`AccessError::Forbidden`] without the required role, if
    ///   `principal` did not provision `user`, or if `principal` created
    ///   none of the active labs `user` belongs to
    /// - [`AccessError::NotFound`] if `user` does not exist or belongs to
    ///   no lab
    /// - [`AccessError::Conflict`] if the role is already held
    #[tracing::instrument(skip(self, principal), fields(user_id = %principal.id()))]
    pub async fn assign_role(
        &self,
        principal: &Principal,
        user: UserId,
        role: RoleName,
    ) -> Result<()> {
        let result = async {
            self.authorize_role_change(principal, user, role).await?;
            if !self.identities.assign_role(user, role).await? {
                return Err(AccessError::conflict(format!("user already holds role {role}")));
            }
            tracing::info!(target_user = %user, %role, "role assigned");
            Ok::<_, AccessError>(())
        }
        .await;
        let metadata = [("role", role.to_string())];
        self.record(principal, AuditAction::AssignRole, user_resource(user), &result, &metadata)
            .await;
        result
    }

    /// Revokes `role` from an identity `principal` provisioned.
    ///
    /// # Errors
    ///
    /// As [`assign_role`](Self::assign_role), with
    /// [`AccessError::Conflict`] if the role is not held.
    #[tracing::instrument(skip(self, principal), fields(user_id = %principal.id()))]
    pub async fn remove_role(
        &self,
        principal: &Principal,
        user: UserId,
        role: RoleName,
    ) -> Result<()> {
        let result = async {
            self.authorize_role_change(principal, user, role).await?;
            if !self.identities.remove_role(user, role).await? {
                return Err(AccessError::conflict(format!("user does not hold role {role}")));
            }
            tracing::info!(target_user = %user, %role, "role removed");
            Ok::<_, AccessError>(())
        }
        .await;
        let metadata = [("role", role.to_string())];
        self.record(principal, AuditAction::RemoveRole, user_resource(user), &result, &metadata)
            .await;
        result
    }

    // ------------------------------------------------------------------
    // Cross-tenant
    // ------------------------------------------------------------------

    /// Lists every lab on the platform.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::Forbidden`] without the `SUPERADMIN` role.
    pub async fn list_all_labs(&self, principal: &Principal) -> Result<Vec<Lab>> {
        self.engine.require_role(Some(principal), OperationClass::CrossTenant)?;
        Ok(self.labs.list_labs().await?)
    }

    /// Activates or deactivates a lab. This is the one lab operation the
    /// accessibility gate does not block.
    ///
    /// # Errors
    ///
    /// - [`AccessError::Forbidden`] without the `SUPERADMIN` role
    /// - [`AccessError::NotFound`] if the lab does not exist
    #[tracing::instrument(skip(self, principal), fields(user_id = %principal.id()))]
    pub async fn set_lab_active(
        &self,
        principal: &Principal,
        lab: LabId,
        active: bool,
    ) -> Result<Lab> {
        let result = async {
            self.engine.require_role(Some(principal), OperationClass::CrossTenant)?;
            if self.labs.find_lab(lab).await?.is_none() {
                return Err(AccessError::not_found(lab_resource(lab)));
            }
            let updated = self.labs.set_lab_active(lab, active).await?;
            tracing::info!(lab_id = %lab, active, "lab status changed");
            Ok::<_, AccessError>(updated)
        }
        .await;
        let metadata = [("active", active.to_string())];
        self.record(principal, AuditAction::SetLabActive, lab_resource(lab), &result, &metadata)
            .await;
        result
    }

    // ------------------------------------------------------------------
    // Decisions
    // ------------------------------------------------------------------

    async fn authorize_creator(&self, principal: &Principal, lab: LabId) -> Result<Lab> {
        self.engine
            .authorize_operation(
                Some(principal),
                OperationClass::LabAdministration,
                Relation::Creator,
                lab,
            )
            .await
    }

    async fn require_identity(&self, user: UserId) -> Result<Identity> {
        self.identities
            .find_by_id(user)
            .await?
            .ok_or_else(|| AccessError::not_found(user_resource(user)))
    }

    async fn authorize_provisioner(
        &self,
        principal: &Principal,
        user: UserId,
    ) -> Result<Identity> {
        self.engine.require_role(Some(principal), OperationClass::LabAdministration)?;
        let identity = self.require_identity(user).await?;
        if identity.created_by != Some(principal.id()) {
            tracing::warn!(user_id = %principal.id(), target_user = %user, "not the provisioner");
            return Err(AccessError::forbidden(NOT_PROVISIONER));
        }
        Ok(identity)
    }

    async fn authorize_role_change(
        &self,
        principal: &Principal,
        user: UserId,
        role: RoleName,
    ) -> Result<Identity> {
        if role == RoleName::SuperAdmin {
            self.engine.require_role(Some(principal), OperationClass::CrossTenant)?;
        }
        self.authorize_over_member(principal, user).await
    }

    /// The principal must have provisioned `user` and created an active lab
    /// `user` belongs to.
    async fn authorize_over_member(
        &self,
        principal: &Principal,
        user: UserId,
    ) -> Result<Identity> {
        let identity = self.authorize_provisioner(principal, user).await?;

        let memberships = self.labs.labs_of(user).await?;
        if memberships.is_empty() {
            let resource = format!("lab membership of {}", user_resource(user));
            return Err(AccessError::not_found(resource));
        }

        let mut owns_inactive = false;
        for lab in memberships {
            let Some(record) = self.labs.find_lab(lab).await? else {
                continue;
            };
            if record.created_by != principal.id() {
                continue;
            }
            if record.active {
                return Ok(identity);
            }
            owns_inactive = true;
        }

        tracing::warn!(
            user_id = %principal.id(),
            target_user = %user,
            "not the creator of any shared lab"
        );
        if owns_inactive {
            Err(AccessError::forbidden("lab is inactive"))
        } else {
            Err(AccessError::forbidden("creator relation to one of the user's labs required"))
        }
    }

    async fn record<T>(
        &self,
        principal: &Principal,
        action: AuditAction,
        resource: String,
        result: &Result<T>,
        metadata: &[(&str, String)],
    ) {
        let outcome = match result {
            Ok(_) => AuditResult::Success,
            Err(e) => AuditResult::Failure(e.to_string()),
        };
        let metadata: BTreeMap<String, String> =
            metadata.iter().map(|(k, v)| ((*k).to_owned(), v.clone())).collect();
        let event = AuditEvent::builder()
            .actor(principal.username())
            .action(action)
            .resource(resource)
            .result(outcome)
            .metadata(metadata)
            .build();
        self.audit.log(&event).await;
    }
}

fn lab_name_conflict(err: StorageError) -> AccessError {
    match err {
        StorageError::AlreadyExists { .. } => AccessError::conflict(LAB_NAME_TAKEN),
        other => other.into(),
    }
}
