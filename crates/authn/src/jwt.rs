//! Bearer token issuance and verification.
//!
//! Tokens are HS256 JWTs carrying the username as `sub`, plus `iat` and
//! `exp`. Nothing is persisted: a token is valid iff its signature checks
//! out against the shared secret and `exp` is still in the future. There
//! is no revocation list.
//!
//! # Example
//!
//! ```
//! use labgate_authn::{AuthConfig, jwt::TokenService};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let tokens = TokenService::new(&AuthConfig::with_secret("0123456789abcdef0123456789abcdef"))?;
//!
//! let token = tokens.issue("alice")?;
//! let claims = tokens.verify(&token)?;
//! assert_eq!(claims.sub, "alice");
//! # Ok(())
//! # }
//! ```

use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, decode_header, encode,
};
use serde::{Deserialize, Serialize};

use crate::{
    config::{AuthConfig, ConfigError},
    error::{AuthError, Result},
    validation::validate_algorithm,
};

/// Lifetime of every issued token.
pub const TOKEN_LIFETIME: TimeDelta = TimeDelta::hours(10);

/// The only signing algorithm.
pub const SIGNING_ALGORITHM: Algorithm = Algorithm::HS256;

/// Claims carried by a bearer token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject - the username the token was issued for.
    pub sub: String,
    /// Issued at (seconds since epoch).
    pub iat: i64,
    /// Expiration time (seconds since epoch).
    pub exp: i64,
}

impl TokenClaims {
    /// Claims for `username` issued at `issued_at`.
    #[must_use]
    pub fn new(username: impl Into<String>, issued_at: DateTime<Utc>) -> Self {
        let iat = issued_at.timestamp();
        Self { sub: username.into(), iat, exp: iat + TOKEN_LIFETIME.num_seconds() }
    }

    /// Returns `true` once `now` has reached the expiry.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() >= self.exp
    }
}

/// Claims as they arrive on the wire. Absent `sub` or `exp` must surface
/// as [`AuthError::MissingClaim`], not as a deserialization failure.
#[derive(Deserialize)]
struct WireClaims {
    sub: Option<String>,
    #[serde(default)]
    iat: i64,
    exp: Option<i64>,
}

impl TryFrom<WireClaims> for TokenClaims {
    type Error = AuthError;

    fn try_from(wire: WireClaims) -> Result<Self> {
        let sub =
            wire.sub.filter(|s| !s.is_empty()).ok_or_else(|| AuthError::missing_claim("sub"))?;
        let exp = wire.exp.ok_or_else(|| AuthError::missing_claim("exp"))?;
        Ok(Self { sub, iat: wire.iat, exp })
    }
}

/// Outcome of checking a token, for callers that want the tri-state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TokenStatus {
    /// Signature and expiry both check out.
    Valid(TokenClaims),
    /// The signature is good but the token has expired.
    Expired(TokenClaims),
    /// Malformed, tampered, wrongly signed or otherwise unusable.
    Invalid,
}

impl TokenStatus {
    /// The username, if the token is currently valid.
    #[must_use]
    pub fn username(&self) -> Option<&str> {
        match self {
            Self::Valid(claims) => Some(&claims.sub),
            _ => None,
        }
    }
}

/// Stateless HS256 token issuer and verifier.
#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl fmt::Debug for TokenService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenService")
            .field("algorithm", &SIGNING_ALGORITHM)
            .field("lifetime", &TOKEN_LIFETIME)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    /// Creates the service from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if the configuration fails validation,
    /// most importantly when the signing secret is missing.
    pub fn new(config: &AuthConfig) -> Result<Self> {
        config.validate()?;
        Self::from_secret(config.jwt_secret.as_bytes())
    }

    /// Creates the service around a raw secret.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if `secret` is empty.
    pub fn from_secret(secret: &[u8]) -> Result<Self> {
        if secret.is_empty() {
            return Err(ConfigError::MissingSecret.into());
        }

        let mut validation = Validation::new(SIGNING_ALGORITHM);
        // Expiry is checked against an explicit clock in `verify_at`.
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Ok(Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
        })
    }

    /// Issues a token for `username`, valid for [`TOKEN_LIFETIME`].
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn issue(&self, username: &str) -> Result<String> {
        self.issue_at(username, Utc::now())
    }

    /// Issues a token as if the current time were `issued_at`.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    #[tracing::instrument(skip(self))]
    pub fn issue_at(&self, username: &str, issued_at: DateTime<Utc>) -> Result<String> {
        let claims = TokenClaims::new(username, issued_at);
        let token = encode(&Header::new(SIGNING_ALGORITHM), &claims, &self.encoding)?;
        tracing::debug!(exp = claims.exp, "token issued");
        Ok(token)
    }

    /// Verifies a token against the current time.
    ///
    /// # Errors
    ///
    /// See [`verify_at`](Self::verify_at).
    pub fn verify(&self, token: &str) -> Result<TokenClaims> {
        self.verify_at(token, Utc::now())
    }

    /// Verifies signature, structure and expiry as of `now`.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidTokenFormat`] if the token cannot be decoded
    /// - [`AuthError::UnsupportedAlgorithm`] if the header names anything but HS256
    /// - [`AuthError::InvalidSignature`] if the signature does not match
    /// - [`AuthError::MissingClaim`] if `sub` or `exp` is absent or `sub` is empty
    /// - [`AuthError::TokenExpired`] if `now` is at or past `exp`
    #[tracing::instrument(skip_all)]
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<TokenClaims> {
        let header = decode_header(token).map_err(|e| {
            AuthError::invalid_token_format(format!("Failed to decode JWT header: {e}"))
        })?;
        validate_algorithm(&format!("{:?}", header.alg))?;

        let claims = self.decode_claims(token)?;
        if claims.is_expired_at(now) {
            return Err(AuthError::TokenExpired);
        }

        tracing::debug!(exp = claims.exp, "token verified");
        Ok(claims)
    }

    /// Classifies a token as valid, expired or invalid. Never fails.
    #[must_use]
    pub fn status_at(&self, token: &str, now: DateTime<Utc>) -> TokenStatus {
        match self.verify_at(token, now) {
            Ok(claims) => TokenStatus::Valid(claims),
            Err(AuthError::TokenExpired) => {
                // The signature was already checked; decode again to surface the subject.
                match self.decode_claims(token) {
                    Ok(claims) => TokenStatus::Expired(claims),
                    Err(_) => TokenStatus::Invalid,
                }
            },
            Err(_) => TokenStatus::Invalid,
        }
    }

    fn decode_claims(&self, token: &str) -> Result<TokenClaims> {
        decode::<WireClaims>(token, &self.decoding, &self.validation)?.claims.try_into()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::testutil::{TEST_SECRET, sign_payload, test_token_service};

    #[test]
    fn test_round_trip() {
        let tokens = test_token_service();
        let token = tokens.issue("alice").unwrap();

        let claims = tokens.verify(&token).unwrap();
        assert_eq!(claims.sub, "alice");
        assert_eq!(claims.exp - claims.iat, 36_000);
    }

    #[test]
    fn test_expiry_boundary() {
        let tokens = test_token_service();
        let issued = Utc::now();
        let token = tokens.issue_at("alice", issued).unwrap();

        let just_before = issued + TOKEN_LIFETIME - TimeDelta::seconds(1);
        assert!(tokens.verify_at(&token, just_before).is_ok());

        let at_expiry = issued + TOKEN_LIFETIME;
        assert!(matches!(tokens.verify_at(&token, at_expiry), Err(AuthError::TokenExpired)));

        let after = issued + TOKEN_LIFETIME + TimeDelta::hours(1);
        assert!(matches!(tokens.verify_at(&token, after), Err(AuthError::TokenExpired)));
    }

    #[test]
    fn test_status_is_tri_state() {
        let tokens = test_token_service();
        let issued = Utc::now();
        let token = tokens.issue_at("alice", issued).unwrap();

        let status = tokens.status_at(&token, issued);
        assert_eq!(status.username(), Some("alice"));

        let status = tokens.status_at(&token, issued + TOKEN_LIFETIME);
        assert!(matches!(status, TokenStatus::Expired(ref c) if c.sub == "alice"));
        assert_eq!(status.username(), None);

        assert_eq!(tokens.status_at("garbage", issued), TokenStatus::Invalid);
    }

    #[test]
    fn test_absent_claims_are_reported_by_name() {
        let tokens = test_token_service();
        let now = Utc::now().timestamp();
        let secret = TEST_SECRET.as_bytes();

        let no_sub = sign_payload(&serde_json::json!({"iat": now, "exp": now + 60}), secret);
        assert!(matches!(tokens.verify(&no_sub), Err(AuthError::MissingClaim(c)) if c == "sub"));

        let no_exp = sign_payload(&serde_json::json!({"sub": "alice", "iat": now}), secret);
        assert!(matches!(tokens.verify(&no_exp), Err(AuthError::MissingClaim(c)) if c == "exp"));

        let no_iat = sign_payload(&serde_json::json!({"sub": "alice", "exp": now + 60}), secret);
        assert_eq!(tokens.verify(&no_iat).unwrap().sub, "alice");
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = test_token_service().issue("alice").unwrap();
        let other = TokenService::from_secret(b"a-completely-different-secret-value").unwrap();

        assert!(matches!(other.verify(&token), Err(AuthError::InvalidSignature)));
    }

    #[test]
    fn test_empty_secret_rejected() {
        assert!(matches!(
            TokenService::from_secret(b""),
            Err(AuthError::Config(ConfigError::MissingSecret))
        ));
        assert!(matches!(
            TokenService::new(&AuthConfig::default()),
            Err(AuthError::Config(ConfigError::MissingSecret))
        ));
    }

    #[test]
    fn test_new_from_config() {
        let tokens = TokenService::new(&AuthConfig::with_secret(TEST_SECRET)).unwrap();
        let token = tokens.issue("alice").unwrap();
        assert!(test_token_service().verify(&token).is_ok());
    }

    #[test]
    fn test_debug_hides_keys() {
        let debug = format!("{:?}", test_token_service());
        assert!(debug.contains("HS256"));
        assert!(!debug.contains(TEST_SECRET));
    }
}
