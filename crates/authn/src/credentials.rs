//! Login and registration.
//!
//! Login accepts a username or an email and answers every failure with the
//! same [`AuthError::InvalidCredentials`], so callers cannot tell an
//! unknown identifier from a wrong password.

use std::{collections::BTreeSet, fmt, sync::Arc};

use labgate_storage::{
    Identity, IdentityStore, LabId, NewIdentity, Profile, RoleName, StorageError, UserId,
    audit::{AuditAction, AuditEvent, AuditLogger, AuditResult, NoopAuditLogger, user_resource},
};
use serde::Serialize;
use zeroize::Zeroizing;

use crate::{
    error::{AuthError, Result},
    jwt::TokenService,
    password::PasswordHasher,
    validation::{
        MIN_USERNAME_LEN, is_email_identifier, require_present, validate_email, validate_password,
        validate_username,
    },
};

/// Role granted to every newly registered identity.
pub const DEFAULT_ROLE: RoleName = RoleName::Admin;

/// Fields submitted when registering or provisioning an identity.
///
/// # Examples
///
/// ```
/// use labgate_authn::RegistrationRequest;
///
/// let request = RegistrationRequest::builder()
///     .username("bob")
///     .password("secret123")
///     .email("bob@example.com")
///     .first_name("Bob")
///     .last_name("Stone")
///     .city("Pune")
///     .build();
///
/// assert!(!request.verified);
/// ```
#[derive(Clone, bon::Builder)]
pub struct RegistrationRequest {
    /// Unique login name.
    #[builder(into)]
    pub username: String,
    /// Plaintext password. Hashed before storage and never logged.
    #[builder(with = |password: impl Into<String>| Zeroizing::new(password.into()))]
    pub password: Zeroizing<String>,
    /// Unique email address.
    #[builder(into)]
    pub email: String,
    /// Given name.
    #[builder(into)]
    pub first_name: String,
    /// Family name.
    #[builder(into)]
    pub last_name: String,
    /// Contact phone number.
    #[builder(into)]
    pub phone: Option<String>,
    /// Street address.
    #[builder(into)]
    pub address: Option<String>,
    /// City.
    #[builder(into)]
    pub city: Option<String>,
    /// State or province.
    #[builder(into)]
    pub state: Option<String>,
    /// Postal code.
    #[builder(into)]
    pub zip: Option<String>,
    /// Country.
    #[builder(into)]
    pub country: Option<String>,
    /// Whether the email address is already verified.
    #[builder(default)]
    pub verified: bool,
    /// Feature modules to enable.
    #[builder(default)]
    pub modules: BTreeSet<String>,
}

impl fmt::Debug for RegistrationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationRequest")
            .field("username", &self.username)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

impl RegistrationRequest {
    fn profile(&self) -> Profile {
        Profile {
            first_name: Some(self.first_name.clone()),
            last_name: Some(self.last_name.clone()),
            phone: self.phone.clone(),
            address: self.address.clone(),
            city: self.city.clone(),
            state: self.state.clone(),
            zip: self.zip.clone(),
            country: self.country.clone(),
        }
    }

    /// Checks every field in a fixed order and reports the first failure.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Validation`] naming the offending field.
    pub fn validate(&self, min_username_len: usize) -> Result<()> {
        require_present("username", &self.username)?;
        require_present("password", &self.password)?;
        require_present("email", &self.email)?;
        require_present("first_name", &self.first_name)?;
        require_present("last_name", &self.last_name)?;
        validate_email(&self.email)?;
        validate_password(&self.password)?;
        validate_username(&self.username, min_username_len)
    }
}

/// What a successful login returns.
#[derive(Clone, Serialize)]
pub struct LoginProfile {
    /// Bearer token for subsequent requests.
    pub token: String,
    /// Identity id.
    pub id: UserId,
    /// The resolved username, also the token subject.
    pub username: String,
    /// Email address.
    pub email: String,
    /// Personal details.
    #[serde(flatten)]
    pub profile: Profile,
    /// Role names, e.g. `["ADMIN"]`.
    pub roles: Vec<String>,
    /// Enabled feature modules.
    pub modules: Vec<String>,
    /// Always `true` for a successful login.
    pub enabled: bool,
    /// Whether the email address was verified.
    pub verified: bool,
}

impl fmt::Debug for LoginProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginProfile")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("roles", &self.roles)
            .finish_non_exhaustive()
    }
}

impl LoginProfile {
    fn new(token: String, identity: Identity) -> Self {
        Self {
            token,
            id: identity.id,
            username: identity.username,
            email: identity.email,
            profile: identity.profile,
            roles: identity.roles.iter().map(|r| r.as_str().to_owned()).collect(),
            modules: identity.modules.into_iter().collect(),
            enabled: identity.enabled,
            verified: identity.verified,
        }
    }
}

/// Login and registration over an identity store.
#[derive(Clone)]
pub struct CredentialService {
    tokens: Arc<TokenService>,
    hasher: PasswordHasher,
    identities: Arc<dyn IdentityStore>,
    audit: Arc<dyn AuditLogger>,
}

impl fmt::Debug for CredentialService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialService")
            .field("tokens", &self.tokens)
            .field("hasher", &self.hasher)
            .finish_non_exhaustive()
    }
}

impl CredentialService {
    /// Creates the service. Registrations are not audited until
    /// [`with_audit`](Self::with_audit) is called.
    pub fn new(
        tokens: Arc<TokenService>,
        hasher: PasswordHasher,
        identities: Arc<dyn IdentityStore>,
    ) -> Self {
        Self { tokens, hasher, identities, audit: Arc::new(NoopAuditLogger) }
    }

    /// Sends registration events to `audit`.
    #[must_use]
    pub fn with_audit(mut self, audit: Arc<dyn AuditLogger>) -> Self {
        self.audit = audit;
        self
    }

    /// Verifies a username or email and password, and issues a token.
    ///
    /// An identifier containing `@` is looked up by email, anything else by
    /// username.
    ///
    /// # Errors
    ///
    /// - [`AuthError::Validation`] if the identifier or password is blank
    /// - [`AuthError::InvalidCredentials`] for an unknown identifier, a wrong
    ///   password or a disabled identity
    /// - [`AuthError::Storage`] if the lookup fails
    #[tracing::instrument(skip(self, password))]
    pub async fn login(&self, identifier: &str, password: &str) -> Result<LoginProfile> {
        require_present("identifier", identifier)?;
        require_present("password", password)?;

        let found = if is_email_identifier(identifier) {
            self.identities.find_by_email(identifier).await?
        } else {
            self.identities.find_by_username(identifier).await?
        };

        let Some(identity) = found else {
            self.hasher.verify_decoy(password);
            tracing::warn!("login failed: unknown identifier");
            return Err(AuthError::InvalidCredentials);
        };

        match self.hasher.verify(password, &identity.password_hash) {
            Ok(true) if identity.enabled => {},
            Ok(true) => {
                tracing::warn!(user_id = %identity.id, "login failed: identity disabled");
                return Err(AuthError::InvalidCredentials);
            },
            Ok(false) => {
                tracing::warn!(user_id = %identity.id, "login failed: wrong password");
                return Err(AuthError::InvalidCredentials);
            },
            Err(e) => {
                tracing::error!(
                    user_id = %identity.id,
                    error = %e,
                    "stored password hash unusable"
                );
                return Err(AuthError::InvalidCredentials);
            },
        }

        let token = self.tokens.issue(&identity.username)?;
        tracing::info!(user_id = %identity.id, "login succeeded");
        Ok(LoginProfile::new(token, identity))
    }

    /// Self-registration. The new identity is enabled, holds
    /// [`DEFAULT_ROLE`], and belongs to no lab.
    ///
    /// Any non-blank username is accepted here; the length floor applies to
    /// [`provision`](Self::provision) only.
    ///
    /// # Errors
    ///
    /// - [`AuthError::Validation`] for the first rejected field
    /// - [`AuthError::Conflict`] if the email, then the username, is taken
    #[tracing::instrument(skip(self, request), fields(username = %request.username))]
    pub async fn register(&self, request: RegistrationRequest) -> Result<Identity> {
        let result = self.create_identity(request, 1, None).await;

        let (resource, outcome) = match &result {
            Ok(identity) => (user_resource(identity.id), AuditResult::Success),
            Err(e) => ("user:new".to_owned(), AuditResult::Failure(e.to_string())),
        };
        let event = AuditEvent::builder()
            .actor("anonymous")
            .action(AuditAction::RegisterIdentity)
            .resource(resource)
            .result(outcome)
            .build();
        self.audit.log(&event).await;

        result
    }

    /// Creates an identity on behalf of `created_by`, who is recorded as
    /// its provisioner, and makes it a member of `lab` in the same write.
    /// Usernames must be at least [`MIN_USERNAME_LEN`] characters.
    ///
    /// # Errors
    ///
    /// Same as [`register`](Self::register), plus
    /// [`AuthError::Storage`] wrapping `NotFound` if `lab` does not exist.
    #[tracing::instrument(skip(self, request), fields(username = %request.username))]
    pub async fn provision(
        &self,
        request: RegistrationRequest,
        created_by: UserId,
        lab: LabId,
    ) -> Result<Identity> {
        self.create_identity(request, MIN_USERNAME_LEN, Some((created_by, lab))).await
    }

    async fn create_identity(
        &self,
        request: RegistrationRequest,
        min_username_len: usize,
        provisioned: Option<(UserId, LabId)>,
    ) -> Result<Identity> {
        request.validate(min_username_len)?;

        if self.identities.exists_by_email(&request.email).await? {
            return Err(AuthError::conflict("email already exists"));
        }
        if self.identities.exists_by_username(&request.username).await? {
            return Err(AuthError::conflict("username already exists"));
        }

        let password_hash = self.hasher.hash(&request.password)?;
        let profile = request.profile();
        let new = NewIdentity::builder()
            .username(request.username)
            .email(request.email)
            .password_hash(password_hash)
            .verified(request.verified)
            .profile(profile)
            .modules(request.modules)
            .roles(BTreeSet::from([DEFAULT_ROLE]))
            .maybe_created_by(provisioned.map(|(creator, _)| creator))
            .maybe_member_of(provisioned.map(|(_, lab)| lab))
            .build();
        let email = new.email.clone();

        match self.identities.create(new).await {
            Ok(identity) => {
                tracing::info!(user_id = %identity.id, "identity registered");
                Ok(identity)
            },
            // Lost a race with a concurrent registration.
            Err(StorageError::AlreadyExists { .. }) => {
                if self.identities.exists_by_email(&email).await? {
                    Err(AuthError::conflict("email already exists"))
                } else {
                    Err(AuthError::conflict("username already exists"))
                }
            },
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use labgate_storage::{
        LabStore,
        audit::RecordingAuditLogger,
        testutil::{memory_directory, seed_lab},
    };

    use super::*;
    use crate::{
        error::INVALID_CREDENTIALS_MESSAGE,
        testutil::{credential_service, registration},
    };

    #[tokio::test]
    async fn test_register_then_login_by_username_and_email() {
        let (service, _) = credential_service();
        let bob = service.register(registration("bob", "secret123")).await.unwrap();
        assert_eq!(bob.roles, BTreeSet::from([RoleName::Admin]));
        assert!(bob.enabled);
        assert!(bob.created_by.is_none());

        let by_name = service.login("bob", "secret123").await.unwrap();
        assert_eq!(by_name.username, "bob");
        assert_eq!(by_name.roles, vec!["ADMIN".to_owned()]);
        assert_eq!(by_name.profile.first_name.as_deref(), Some("Bob"));

        let by_email = service.login("bob@example.com", "secret123").await.unwrap();
        assert_eq!(by_email.id, bob.id);
    }

    #[tokio::test]
    async fn test_stored_hash_is_not_the_plaintext() {
        let (service, dir) = credential_service();
        service.register(registration("carol", "secret123")).await.unwrap();

        let stored = dir.find_by_username("carol").await.unwrap().unwrap();
        assert_ne!(stored.password_hash.as_str(), "secret123");
    }

    #[tokio::test]
    async fn test_login_failures_are_indistinguishable() {
        let (service, _) = credential_service();
        service.register(registration("dave", "secret123")).await.unwrap();

        for (identifier, password) in [
            ("dave", "wrong-password"),
            ("nobody", "secret123"),
            ("nobody@example.com", "secret123"),
            // Routed to the email index, where "dave" is not an address.
            ("dave@", "secret123"),
        ] {
            let err = service.login(identifier, password).await.unwrap_err();
            assert!(matches!(err, AuthError::InvalidCredentials));
            assert_eq!(err.to_string(), INVALID_CREDENTIALS_MESSAGE);
        }
    }

    #[tokio::test]
    async fn test_disabled_identity_cannot_log_in() {
        let (service, dir) = credential_service();
        let hasher = PasswordHasher::new(&crate::testutil::fast_hash_config()).unwrap();
        let new = NewIdentity::builder()
            .username("erin")
            .email("erin@example.com")
            .password_hash(hasher.hash("secret123").unwrap())
            .enabled(false)
            .build();
        dir.create(new).await.unwrap();

        assert!(matches!(
            service.login("erin", "secret123").await,
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn test_blank_login_fields_are_validation_errors() {
        let (service, _) = credential_service();
        assert!(matches!(
            service.login("  ", "secret123").await,
            Err(AuthError::Validation { field: "identifier", .. })
        ));
        assert!(matches!(
            service.login("bob", "").await,
            Err(AuthError::Validation { field: "password", .. })
        ));
    }

    #[tokio::test]
    async fn test_registration_validation_order() {
        let cases = [
            (
                RegistrationRequest { username: " ".into(), ..registration("x", "secret123") },
                "username",
            ),
            (
                RegistrationRequest { last_name: String::new(), ..registration("frank", "pw") },
                "last_name",
            ),
            (
                RegistrationRequest {
                    email: "frank.example.com".into(),
                    ..registration("frank", "pw")
                },
                "email",
            ),
            (registration("frank", "short"), "password"),
        ];

        let (service, dir) = credential_service();
        for (request, expected) in cases {
            let err = service.register(request).await.unwrap_err();
            assert!(
                matches!(err, AuthError::Validation { field, .. } if field == expected),
                "expected {expected} rejection, got {err:?}"
            );
        }
        assert!(dir.list().await.unwrap().is_empty(), "nothing may be written");
    }

    #[tokio::test]
    async fn test_conflicts_report_email_before_username() {
        let (service, _) = credential_service();
        service.register(registration("grace", "secret123")).await.unwrap();

        let same_both = registration("grace", "secret123");
        let err = service.register(same_both).await.unwrap_err();
        assert!(matches!(err, AuthError::Conflict(ref m) if m.contains("email")));

        let same_name = RegistrationRequest {
            email: "other@example.com".into(),
            ..registration("grace", "x1234567")
        };
        let err = service.register(same_name).await.unwrap_err();
        assert!(matches!(err, AuthError::Conflict(ref m) if m.contains("username")));
    }

    #[tokio::test]
    async fn test_provision_enforces_username_length_and_records_creator() {
        let (service, dir) = credential_service();
        let admin = service.register(registration("heidi", "secret123")).await.unwrap();
        let lab = seed_lab(dir.as_ref(), "Central", admin.id).await;

        let err = service
            .provision(registration("ivy", "secret123"), admin.id, lab.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Validation { field: "username", .. }));

        let member = service
            .provision(registration("ivan", "secret123"), admin.id, lab.id)
            .await
            .unwrap();
        assert_eq!(member.created_by, Some(admin.id));
        assert!(member.has_role(DEFAULT_ROLE));
        assert!(dir.is_member(lab.id, member.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_provision_into_deleted_lab_leaves_no_identity() {
        let (service, dir) = credential_service();
        let admin = service.register(registration("heidi", "secret123")).await.unwrap();
        let lab = seed_lab(dir.as_ref(), "Central", admin.id).await;
        dir.delete_lab(lab.id).await.unwrap();

        let err = service
            .provision(registration("ivan", "secret123"), admin.id, lab.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Storage(StorageError::NotFound { .. })));
        assert!(dir.find_by_username("ivan").await.unwrap().is_none());

        // The username stays free for a retry into a live lab.
        let lab = seed_lab(dir.as_ref(), "North", admin.id).await;
        service.provision(registration("ivan", "secret123"), admin.id, lab.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_registration_is_audited() {
        let dir = memory_directory();
        let audit = RecordingAuditLogger::new();
        let service = CredentialService::new(
            Arc::new(crate::testutil::test_token_service()),
            PasswordHasher::new(&crate::testutil::fast_hash_config()).unwrap(),
            dir,
        )
        .with_audit(Arc::new(audit.clone()));

        service.register(registration("judy", "secret123")).await.unwrap();
        let _ = service.register(registration("judy", "secret123")).await;

        let events = audit.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].result, AuditResult::Success);
        assert!(matches!(events[1].result, AuditResult::Failure(_)));
        assert!(events.iter().all(|e| e.action == AuditAction::RegisterIdentity));
    }
}
