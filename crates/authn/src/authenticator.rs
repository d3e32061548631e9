//! Bearer header authentication.
//!
//! Turns a raw `Authorization` header value into a stored [`Identity`]. The
//! header must start with the exact, case-sensitive literal `Bearer `;
//! anything else is rejected before the token is looked at.

use std::sync::Arc;

use labgate_storage::{Identity, IdentityStore};

use crate::{
    error::{AuthError, Result},
    jwt::TokenService,
};

/// The literal scheme prefix, including its single trailing space.
pub const BEARER_PREFIX: &str = "Bearer ";

/// Extracts the token from a header value, verbatim.
///
/// # Errors
///
/// Returns [`AuthError::InvalidScheme`] unless `header` starts with
/// [`BEARER_PREFIX`].
///
/// # Examples
///
/// ```
/// use labgate_authn::authenticator::bearer_token;
///
/// assert_eq!(bearer_token("Bearer abc.def.ghi").unwrap(), "abc.def.ghi");
/// assert!(bearer_token("bearer abc").is_err());
/// assert!(bearer_token("Bearer").is_err());
/// ```
pub fn bearer_token(header: &str) -> Result<&str> {
    header.strip_prefix(BEARER_PREFIX).ok_or(AuthError::InvalidScheme)
}

/// Resolves bearer headers to identities.
#[derive(Clone)]
pub struct Authenticator {
    tokens: Arc<TokenService>,
    identities: Arc<dyn IdentityStore>,
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator").field("tokens", &self.tokens).finish_non_exhaustive()
    }
}

impl Authenticator {
    /// Creates an authenticator.
    pub fn new(tokens: Arc<TokenService>, identities: Arc<dyn IdentityStore>) -> Self {
        Self { tokens, identities }
    }

    /// The token service used for verification.
    #[must_use]
    pub fn tokens(&self) -> &Arc<TokenService> {
        &self.tokens
    }

    /// Returns the identity behind `header`, or `None` if the request is
    /// not authenticated for any reason.
    ///
    /// A store failure is logged and also yields `None`.
    pub async fn authenticate(&self, header: Option<&str>) -> Option<Identity> {
        match self.try_authenticate(header).await {
            Ok(identity) => Some(identity),
            Err(AuthError::Storage(e)) => {
                tracing::error!(error = %e, "identity lookup failed during authentication");
                None
            },
            Err(_) => None,
        }
    }

    /// Like [`authenticate`](Self::authenticate) but reports why it failed.
    ///
    /// # Errors
    ///
    /// - [`AuthError::MissingHeader`] if `header` is `None`
    /// - [`AuthError::InvalidScheme`] if the prefix is not exactly `Bearer `
    /// - any token verification error from [`TokenService::verify`]
    /// - [`AuthError::UnknownSubject`] if no identity matches the subject
    /// - [`AuthError::IdentityDisabled`] if the identity is disabled
    /// - [`AuthError::Storage`] if the lookup itself failed
    #[tracing::instrument(skip_all)]
    pub async fn try_authenticate(&self, header: Option<&str>) -> Result<Identity> {
        let header = header.ok_or(AuthError::MissingHeader)?;
        let token = bearer_token(header)?;

        let claims = self.tokens.verify(token).inspect_err(|e| {
            tracing::warn!(error = %e, "bearer token rejected");
        })?;

        let identity = self.resolve(&claims.sub).await?.ok_or_else(|| {
            tracing::warn!("token subject matches no identity");
            AuthError::UnknownSubject
        })?;
        if !identity.enabled {
            tracing::warn!(user_id = %identity.id, "token presented for disabled identity");
            return Err(AuthError::IdentityDisabled);
        }

        tracing::debug!(user_id = %identity.id, "request authenticated");
        Ok(identity)
    }

    /// Looks `subject` up by username first, then by email.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Storage`] if the store fails.
    pub async fn resolve(&self, subject: &str) -> Result<Option<Identity>> {
        if let Some(identity) = self.identities.find_by_username(subject).await? {
            return Ok(Some(identity));
        }
        Ok(self.identities.find_by_email(subject).await?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use chrono::Utc;
    use labgate_storage::{
        RoleName,
        testutil::{memory_directory, new_identity, seed_identity},
    };
    use proptest::prelude::*;

    use super::*;
    use crate::{jwt::TOKEN_LIFETIME, testutil::test_token_service};

    async fn setup() -> (Authenticator, Arc<TokenService>, Identity) {
        let dir = memory_directory();
        let alice = seed_identity(dir.as_ref(), "alice", &[RoleName::Admin]).await;
        let tokens = Arc::new(test_token_service());
        (Authenticator::new(Arc::clone(&tokens), dir), tokens, alice)
    }

    #[tokio::test]
    async fn test_valid_header_resolves_identity() {
        let (auth, tokens, alice) = setup().await;
        let header = format!("Bearer {}", tokens.issue("alice").unwrap());

        let identity = auth.authenticate(Some(&header)).await.expect("authenticated");
        assert_eq!(identity.id, alice.id);
        assert!(identity.has_role(RoleName::Admin));
    }

    #[tokio::test]
    async fn test_missing_and_malformed_headers() {
        let (auth, tokens, _) = setup().await;
        let token = tokens.issue("alice").unwrap();

        assert!(matches!(auth.try_authenticate(None).await, Err(AuthError::MissingHeader)));
        for header in [
            token.clone(),
            format!("bearer {token}"),
            format!("BEARER {token}"),
            format!("Bearer  {token}"),
            format!("Basic {token}"),
            format!(" Bearer {token}"),
        ] {
            assert!(auth.authenticate(Some(&header)).await.is_none(), "accepted {header:?}");
        }
    }

    #[tokio::test]
    async fn test_garbage_token_is_unauthenticated_not_an_error() {
        let (auth, _, _) = setup().await;
        let result = auth.try_authenticate(Some("Bearer garbage")).await;
        assert!(result.unwrap_err().is_authentication_failure());
    }

    #[tokio::test]
    async fn test_expired_token_rejected() {
        let (auth, tokens, _) = setup().await;
        let token = tokens.issue_at("alice", Utc::now() - TOKEN_LIFETIME).unwrap();
        let header = format!("Bearer {token}");

        assert!(matches!(auth.try_authenticate(Some(&header)).await, Err(AuthError::TokenExpired)));
    }

    #[tokio::test]
    async fn test_unknown_subject_rejected() {
        let (auth, tokens, _) = setup().await;
        let header = format!("Bearer {}", tokens.issue("mallory").unwrap());

        assert!(matches!(
            auth.try_authenticate(Some(&header)).await,
            Err(AuthError::UnknownSubject)
        ));
    }

    #[tokio::test]
    async fn test_subject_falls_back_to_email() {
        let (auth, tokens, alice) = setup().await;
        let header = format!("Bearer {}", tokens.issue("alice@example.com").unwrap());

        let identity = auth.authenticate(Some(&header)).await.expect("resolved by email");
        assert_eq!(identity.id, alice.id);
    }

    #[tokio::test]
    async fn test_disabled_identity_rejected() {
        let dir = memory_directory();
        let mut new = new_identity("dormant", &[]);
        new.enabled = false;
        dir.create(new).await.unwrap();
        let tokens = Arc::new(test_token_service());
        let auth = Authenticator::new(Arc::clone(&tokens), dir);

        let header = format!("Bearer {}", tokens.issue("dormant").unwrap());
        assert!(matches!(
            auth.try_authenticate(Some(&header)).await,
            Err(AuthError::IdentityDisabled)
        ));
    }

    proptest! {
        #[test]
        fn prop_non_bearer_prefix_is_rejected(header in "\\PC{0,40}") {
            prop_assume!(!header.starts_with(BEARER_PREFIX));
            prop_assert!(matches!(bearer_token(&header), Err(AuthError::InvalidScheme)));
        }

        #[test]
        fn prop_remainder_is_passed_verbatim(rest in "\\PC{0,40}") {
            let header = format!("{BEARER_PREFIX}{rest}");
            prop_assert_eq!(bearer_token(&header).unwrap(), rest.as_str());
        }
    }
}
