//! The authenticated caller.

use std::collections::BTreeSet;

use labgate_storage::{Identity, RoleName, UserId};

/// An identity that passed bearer authentication.
///
/// Only produced by the guard chain or by wrapping an identity the
/// authenticator returned.
#[derive(Debug, Clone)]
pub struct Principal {
    identity: Identity,
}

impl Principal {
    /// Wraps an authenticated identity.
    #[must_use]
    pub fn new(identity: Identity) -> Self {
        Self { identity }
    }

    /// The identity's id.
    #[must_use]
    pub fn id(&self) -> UserId {
        self.identity.id
    }

    /// The identity's username.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.identity.username
    }

    /// Roles held when the request was authenticated.
    #[must_use]
    pub fn roles(&self) -> &BTreeSet<RoleName> {
        &self.identity.roles
    }

    /// Returns `true` if the principal holds `role`.
    #[must_use]
    pub fn has_role(&self, role: RoleName) -> bool {
        self.identity.has_role(role)
    }

    /// The full identity record.
    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Unwraps the identity record.
    #[must_use]
    pub fn into_identity(self) -> Identity {
        self.identity
    }
}

impl From<Identity> for Principal {
    fn from(identity: Identity) -> Self {
        Self::new(identity)
    }
}
