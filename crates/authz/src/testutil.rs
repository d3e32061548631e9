//! Shared fixtures for authorization tests.
//!
//! Wires the full stack over one in-memory directory: credentials,
//! authenticator, guard chain and lab administration with a recording
//! audit logger. Feature-gated behind `testutil`.
//!
//! ```toml
//! [dev-dependencies]
//! labgate-authz = { path = "../authz", features = ["testutil"] }
//! ```

use std::sync::Arc;

use labgate_authn::{
    Authenticator, CredentialService, TokenService,
    testutil::{credential_service, test_token_service},
};
use labgate_storage::{
    Directory, MemoryBackend, RoleName, audit::RecordingAuditLogger, testutil::seed_identity,
};

use crate::{
    admin::LabAdministration, guard::GuardChain, policy::RoutePolicy, principal::Principal,
};

/// Every service wired over one directory.
#[derive(Debug)]
pub struct TestStack {
    /// The shared directory.
    pub directory: Arc<Directory<MemoryBackend>>,
    /// Token service with the test secret.
    pub tokens: Arc<TokenService>,
    /// Login and registration.
    pub credentials: CredentialService,
    /// Bearer header resolution.
    pub authenticator: Authenticator,
    /// The standard guard chain over the default route table.
    pub chain: GuardChain,
    /// Lab administration, auditing into [`audit`](Self::audit).
    pub admin: LabAdministration,
    /// Captured audit events.
    pub audit: RecordingAuditLogger,
}

impl TestStack {
    /// Builds the stack over a fresh directory.
    #[must_use]
    pub fn new() -> Self {
        let (credentials, directory) = credential_service();
        let tokens = Arc::new(test_token_service());
        let audit = RecordingAuditLogger::new();
        let authenticator = Authenticator::new(Arc::clone(&tokens), directory.clone());
        let chain = GuardChain::standard(authenticator.clone(), RoutePolicy::default());
        let admin =
            LabAdministration::new(directory.clone(), directory.clone(), credentials.clone())
                .with_audit(Arc::new(audit.clone()));
        Self { directory, tokens, credentials, authenticator, chain, admin, audit }
    }

    /// Seeds an identity and wraps it as a principal.
    pub async fn principal(&self, username: &str, roles: &[RoleName]) -> Principal {
        Principal::new(seed_identity(self.directory.as_ref(), username, roles).await)
    }

    /// A bearer header for `username`.
    ///
    /// # Panics
    ///
    /// Panics if the token cannot be issued.
    #[must_use]
    pub fn bearer(&self, username: &str) -> String {
        format!("Bearer {}", self.tokens.issue(username).expect("issue test token"))
    }
}

impl Default for TestStack {
    fn default() -> Self {
        Self::new()
    }
}
