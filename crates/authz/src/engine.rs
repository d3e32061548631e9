//! Authorization decisions for lab-scoped operations.
//!
//! A decision runs these checks in order and stops at the first failure:
//!
//! 1. the caller is authenticated (401)
//! 2. the caller holds the operation class's role (403)
//! 3. the lab exists (404)
//! 4. the lab is active (403)
//! 5. the caller has the required relation to the lab (403)
//!
//! Existence is reported before the relation check, so any authenticated
//! caller holding the role can learn whether a lab id exists.

use std::sync::Arc;

use labgate_storage::{Lab, LabId, LabStore, audit::lab_resource};

use crate::{
    error::{AccessError, Result},
    lab_gate::LabGate,
    policy::{OperationClass, Relation},
    principal::Principal,
};

/// Role and relation checks over a lab store.
#[derive(Clone)]
pub struct AuthorizationEngine {
    labs: Arc<dyn LabStore>,
    gate: LabGate,
}

impl std::fmt::Debug for AuthorizationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationEngine").field("gate", &self.gate).finish_non_exhaustive()
    }
}

impl AuthorizationEngine {
    /// Creates an engine whose accessibility gate reads the same store.
    pub fn new(labs: Arc<dyn LabStore>) -> Self {
        let gate = LabGate::new(Arc::clone(&labs));
        Self { labs, gate }
    }

    /// The accessibility gate consulted by every lab decision.
    #[must_use]
    pub fn gate(&self) -> &LabGate {
        &self.gate
    }

    /// Checks authentication and the role gate only.
    ///
    /// # Errors
    ///
    /// - [`AccessError::Unauthenticated`] if `principal` is `None`
    /// - [`AccessError::Forbidden`] if the class's role is not held
    pub fn require_role<'p>(
        &self,
        principal: Option<&'p Principal>,
        class: OperationClass,
    ) -> Result<&'p Principal> {
        let principal = principal.ok_or_else(AccessError::unauthenticated)?;
        if let Some(role) = class.required_role() {
            if !principal.has_role(role) {
                tracing::warn!(user_id = %principal.id(), %role, "role gate denied");
                return Err(AccessError::forbidden(format!("role {role} required")));
            }
        }
        Ok(principal)
    }

    /// Authorizes a day-to-day lab operation, gated by relation only.
    ///
    /// Returns the lab record on success.
    ///
    /// # Errors
    ///
    /// See [`authorize_operation`](Self::authorize_operation).
    pub async fn authorize(
        &self,
        principal: Option<&Principal>,
        relation: Relation,
        lab: LabId,
    ) -> Result<Lab> {
        self.authorize_operation(principal, OperationClass::LabOperation, relation, lab).await
    }

    /// Runs the full decision for an operation of `class` on `lab`.
    ///
    /// Returns the lab record on success.
    ///
    /// # Errors
    ///
    /// - [`AccessError::Unauthenticated`] if `principal` is `None`
    /// - [`AccessError::Forbidden`] if the role is missing, the lab is
    ///   inactive, or the relation does not hold
    /// - [`AccessError::NotFound`] if the lab does not exist
    /// - [`AccessError::Internal`] if the store fails
    #[tracing::instrument(
        skip(self, principal),
        fields(user_id = principal.map(|p| p.id().0))
    )]
    pub async fn authorize_operation(
        &self,
        principal: Option<&Principal>,
        class: OperationClass,
        relation: Relation,
        lab: LabId,
    ) -> Result<Lab> {
        let principal = self.require_role(principal, class)?;

        let record = self
            .labs
            .find_lab(lab)
            .await?
            .ok_or_else(|| AccessError::not_found(lab_resource(lab)))?;

        if !LabGate::admits(&record) {
            tracing::warn!(user_id = %principal.id(), "lab is inactive");
            return Err(AccessError::forbidden("lab is inactive"));
        }

        if !self.holds(principal, relation, &record).await? {
            tracing::warn!(user_id = %principal.id(), %relation, "relation gate denied");
            return Err(AccessError::forbidden(format!("{relation} relation to the lab required")));
        }

        tracing::debug!(user_id = %principal.id(), %relation, "lab access granted");
        Ok(record)
    }

    /// Returns `true` if `principal` has `relation` to `lab`.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::Internal`] if the membership lookup fails.
    pub async fn holds(
        &self,
        principal: &Principal,
        relation: Relation,
        lab: &Lab,
    ) -> Result<bool> {
        if lab.created_by == principal.id() {
            return Ok(true);
        }
        match relation {
            Relation::Creator => Ok(false),
            Relation::Member => Ok(self.labs.is_member(lab.id, principal.id()).await?),
        }
    }
}
