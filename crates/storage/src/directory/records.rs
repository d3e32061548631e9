//! Persisted records of the credential directory.
//!
//! Identities, labs and roles are stored as JSON documents. Relations
//! (roles held, lab membership) are not embedded in the documents; they
//! live under join keys so each relation can be guarded independently.

use std::{collections::BTreeSet, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::types::{LabId, RoleId, UserId};

/// The closed set of roles an identity can hold.
///
/// Serialized and displayed as the bare upper-case name (`ADMIN`). The
/// prefixed authority form (`ROLE_ADMIN`) only appears at the boundary via
/// [`RoleName::authority`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RoleName {
    /// Lab administrator. Granted to every self-registered identity.
    Admin,
    /// Plain lab user.
    User,
    /// Cross-tenant operator.
    SuperAdmin,
}

impl RoleName {
    /// Every role, in declaration order.
    pub const ALL: [RoleName; 3] = [RoleName::Admin, RoleName::User, RoleName::SuperAdmin];

    /// Returns the bare role name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "ADMIN",
            Self::User => "USER",
            Self::SuperAdmin => "SUPERADMIN",
        }
    }

    /// Returns the prefixed authority string, e.g. `ROLE_ADMIN`.
    #[must_use]
    pub fn authority(self) -> String {
        format!("ROLE_{}", self.as_str())
    }
}

impl fmt::Display for RoleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unrecognised role name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for RoleName {
    type Err = UnknownRole;

    /// Accepts both the bare name and the `ROLE_`-prefixed authority form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bare = s.strip_prefix("ROLE_").unwrap_or(s);
        Self::ALL
            .into_iter()
            .find(|role| role.as_str().eq_ignore_ascii_case(bare))
            .ok_or_else(|| UnknownRole(s.to_owned()))
    }
}

/// A stored role record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    /// Stable role identifier.
    pub id: RoleId,
    /// The role's name.
    pub name: RoleName,
}

/// Optional personal details attached to an identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
    pub country: Option<String>,
}

/// A registered user.
///
/// `roles` is populated from the role join keys when the identity is
/// loaded and is never written into the stored document.
#[derive(Clone, Serialize, Deserialize)]
pub struct Identity {
    /// Stable identifier.
    pub id: UserId,
    /// Unique login name.
    pub username: String,
    /// Unique email address.
    pub email: String,
    /// One-way password hash in PHC string format.
    pub password_hash: Zeroizing<String>,
    /// Disabled identities cannot log in.
    pub enabled: bool,
    /// Whether the email address was verified.
    pub verified: bool,
    #[serde(default)]
    pub profile: Profile,
    /// Feature modules enabled for this identity.
    #[serde(default)]
    pub modules: BTreeSet<String>,
    /// The identity that provisioned this one, if any.
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    pub roles: BTreeSet<RoleName>,
}

impl Identity {
    /// Returns `true` if the identity holds `role`.
    #[must_use]
    pub fn has_role(&self, role: RoleName) -> bool {
        self.roles.contains(&role)
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("email", &self.email)
            .field("password_hash", &"<redacted>")
            .field("enabled", &self.enabled)
            .field("roles", &self.roles)
            .field("created_by", &self.created_by)
            .finish_non_exhaustive()
    }
}

/// Input for [`IdentityStore::create`](crate::IdentityStore::create).
///
/// # Examples
///
/// ```
/// use labgate_storage::{NewIdentity, RoleName};
///
/// let new = NewIdentity::builder()
///     .username("alice")
///     .email("alice@example.com")
///     .password_hash(String::from("$argon2id$v=19$..."))
///     .roles([RoleName::Admin].into())
///     .build();
///
/// assert!(new.enabled);
/// assert!(new.created_by.is_none());
/// ```
#[derive(Clone, bon::Builder)]
pub struct NewIdentity {
    #[builder(into)]
    pub username: String,
    #[builder(into)]
    pub email: String,
    #[builder(into)]
    pub password_hash: Zeroizing<String>,
    #[builder(default = true)]
    pub enabled: bool,
    #[builder(default)]
    pub verified: bool,
    #[builder(default)]
    pub profile: Profile,
    #[builder(default)]
    pub modules: BTreeSet<String>,
    /// Roles written atomically with the identity.
    #[builder(default)]
    pub roles: BTreeSet<RoleName>,
    pub created_by: Option<UserId>,
    /// Lab joined in the same transaction as the identity is created.
    pub member_of: Option<LabId>,
}

impl fmt::Debug for NewIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewIdentity")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("roles", &self.roles)
            .field("member_of", &self.member_of)
            .finish_non_exhaustive()
    }
}

/// Descriptive fields of a lab.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabDetails {
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub description: Option<String>,
}

/// A lab, the tenant unit that owns patients, samples and reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lab {
    pub id: LabId,
    /// Unique lab name.
    pub name: String,
    #[serde(default)]
    pub details: LabDetails,
    /// Inactive labs are not accessible to any lab-scoped operation.
    pub active: bool,
    /// The identity that created the lab. Fixed for the lab's lifetime.
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for [`LabStore::create`](crate::LabStore::create).
///
/// New labs start active.
#[derive(Debug, Clone, bon::Builder)]
pub struct NewLab {
    #[builder(into)]
    pub name: String,
    #[builder(default)]
    pub details: LabDetails,
    pub created_by: UserId,
}

/// Replacement values for a lab's mutable fields.
#[derive(Debug, Clone, PartialEq, Eq, bon::Builder)]
pub struct LabChanges {
    #[builder(into)]
    pub name: String,
    #[builder(default)]
    pub details: LabDetails,
}
