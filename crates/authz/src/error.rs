//! Caller-facing access errors.
//!
//! Every authorization decision and every lab administration operation
//! fails with an [`AccessError`]. Each variant maps onto one transport
//! status so request handlers never have to inspect the cause chain.
//!
//! | Variant | Status |
//! |---|---|
//! | [`Unauthenticated`](AccessError::Unauthenticated) | 401 |
//! | [`Forbidden`](AccessError::Forbidden) | 403 |
//! | [`NotFound`](AccessError::NotFound) | 404 |
//! | [`Validation`](AccessError::Validation) | 400 |
//! | [`Conflict`](AccessError::Conflict) | 409 |
//! | [`Internal`](AccessError::Internal) | 500 |

use http::StatusCode;
use labgate_authn::{AuthError, INVALID_CREDENTIALS_MESSAGE};
use labgate_storage::StorageError;
use serde::Serialize;
use thiserror::Error;

/// Message returned for every authentication failure except login.
pub const UNAUTHENTICATED_MESSAGE: &str = "authentication required";

/// Result type alias for access checks.
pub type Result<T> = std::result::Result<T, AccessError>;

/// Access errors.
///
/// # Non-exhaustive
///
/// This enum is marked `#[non_exhaustive]`. Downstream match expressions
/// must include a wildcard arm (`_ =>`).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum AccessError {
    /// The caller is not authenticated. The message never says why.
    #[error("{message}")]
    Unauthenticated {
        /// Uniform message shown to the caller.
        message: String,
    },

    /// The caller is authenticated but lacks a role or relation.
    #[error("forbidden: {reason}")]
    Forbidden {
        /// Which check denied the request.
        reason: String,
    },

    /// The target resource does not exist.
    #[error("{resource} not found")]
    NotFound {
        /// Resource identifier, e.g. `lab:3`.
        resource: String,
    },

    /// An input field was rejected.
    #[error("{field}: {message}")]
    Validation {
        /// The offending field.
        field: &'static str,
        /// Human-readable reason.
        message: String,
    },

    /// The request collides with existing state.
    #[error("{message}")]
    Conflict {
        /// What collided.
        message: String,
    },

    /// A collaborator failed.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the failure.
        message: String,
    },
}

impl AccessError {
    /// Creates an `Unauthenticated` error with the uniform message.
    #[must_use]
    pub fn unauthenticated() -> Self {
        Self::Unauthenticated { message: UNAUTHENTICATED_MESSAGE.to_owned() }
    }

    /// Creates a `Forbidden` error.
    #[must_use]
    pub fn forbidden(reason: impl Into<String>) -> Self {
        Self::Forbidden { reason: reason.into() }
    }

    /// Creates a `NotFound` error.
    #[must_use]
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound { resource: resource.into() }
    }

    /// Creates a `Validation` error.
    #[must_use]
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation { field, message: message.into() }
    }

    /// Creates a `Conflict` error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict { message: message.into() }
    }

    /// Creates an `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// The transport status for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// A stable snake_case label, for logs and response bodies.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unauthenticated { .. } => "unauthenticated",
            Self::Forbidden { .. } => "forbidden",
            Self::NotFound { .. } => "not_found",
            Self::Validation { .. } => "validation",
            Self::Conflict { .. } => "conflict",
            Self::Internal { .. } => "internal",
        }
    }
}

/// Response body for a rejected request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    /// Always `"error"`.
    pub status: &'static str,
    /// Numeric transport status.
    pub code: u16,
    /// See [`AccessError::kind`].
    pub kind: &'static str,
    /// The error's display text.
    pub message: String,
}

impl From<&AccessError> for ErrorBody {
    fn from(err: &AccessError) -> Self {
        Self {
            status: "error",
            code: err.status_code().as_u16(),
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl From<AuthError> for AccessError {
    fn from(err: AuthError) -> Self {
        if err.is_authentication_failure() {
            return Self::unauthenticated();
        }
        match err {
            AuthError::InvalidCredentials => {
                Self::Unauthenticated { message: INVALID_CREDENTIALS_MESSAGE.to_owned() }
            },
            AuthError::Validation { field, message } => Self::Validation { field, message },
            AuthError::Conflict(message) => Self::Conflict { message },
            AuthError::Storage(e) => e.into(),
            other => {
                tracing::error!(error = %other, "authentication collaborator failed");
                Self::internal(other.to_string())
            },
        }
    }
}

impl From<StorageError> for AccessError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { key } => Self::NotFound { resource: key },
            StorageError::AlreadyExists { key } => Self::conflict(format!("{key} already exists")),
            StorageError::Referenced { key } => {
                Self::conflict(format!("still referenced by {key}"))
            },
            StorageError::Conflict => Self::conflict("concurrent modification, try again"),
            other => {
                tracing::error!(error = %other, "storage failure");
                Self::internal(other.to_string())
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(AccessError::unauthenticated(), 401, "unauthenticated")]
    #[case(AccessError::forbidden("role ADMIN required"), 403, "forbidden")]
    #[case(AccessError::not_found("lab:3"), 404, "not_found")]
    #[case(AccessError::validation("name", "must not be blank"), 400, "validation")]
    #[case(AccessError::conflict("already a member"), 409, "conflict")]
    #[case(AccessError::internal("boom"), 500, "internal")]
    fn test_status_and_kind(
        #[case] err: AccessError,
        #[case] status: u16,
        #[case] kind: &str,
    ) {
        assert_eq!(err.status_code().as_u16(), status);
        assert_eq!(err.kind(), kind);
    }

    #[rstest]
    #[case(AuthError::MissingHeader)]
    #[case(AuthError::InvalidScheme)]
    #[case(AuthError::InvalidSignature)]
    #[case(AuthError::TokenExpired)]
    #[case(AuthError::UnknownSubject)]
    #[case(AuthError::IdentityDisabled)]
    #[case(AuthError::invalid_token_format("bad"))]
    fn test_authentication_causes_collapse(#[case] err: AuthError) {
        assert_eq!(AccessError::from(err), AccessError::unauthenticated());
    }

    #[test]
    fn test_login_failure_keeps_uniform_message() {
        let err = AccessError::from(AuthError::InvalidCredentials);
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(err.to_string(), "incorrect username or password");
    }

    #[test]
    fn test_registration_errors_keep_their_kind() {
        let err = AccessError::from(AuthError::validation("email", "must contain '@' and '.'"));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

        let err = AccessError::from(AuthError::conflict("username already exists"));
        assert_eq!(err, AccessError::conflict("username already exists"));
    }

    #[test]
    fn test_error_body_shape() {
        let body = ErrorBody::from(&AccessError::not_found("lab:3"));
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "status": "error",
                "code": 404,
                "kind": "not_found",
                "message": "lab:3 not found",
            })
        );
    }

    #[test]
    fn test_storage_errors_map_by_kind() {
        assert_eq!(
            AccessError::from(StorageError::not_found("labs/9")),
            AccessError::not_found("labs/9")
        );
        assert_eq!(
            AccessError::from(StorageError::referenced("lab-index/creator/1/2")).kind(),
            "conflict"
        );
        assert_eq!(AccessError::from(StorageError::internal("disk")).kind(), "internal");
        assert_eq!(
            AccessError::from(AuthError::Storage(StorageError::internal("disk"))).kind(),
            "internal"
        );
    }
}
