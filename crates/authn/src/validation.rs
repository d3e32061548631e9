//! Token algorithm and registration input validation.
//!
//! # Security
//!
//! - Only HS256 is accepted, matching the single shared signing secret
//! - The "none" algorithm is always rejected
//! - Registration input is checked field by field before anything is written

use crate::error::AuthError;

/// Forbidden JWT algorithms that are never accepted for security reasons.
///
/// - `none`: No signature verification (trivially bypassable)
pub const FORBIDDEN_ALGORITHMS: &[&str] = &["none"];

/// Accepted JWT algorithms.
///
/// Tokens are signed with one symmetric secret, so HS256 is the only
/// algorithm the verifier can check. Anything else is rejected up front
/// rather than failing later at signature verification.
pub const ACCEPTED_ALGORITHMS: &[&str] = &["HS256"];

/// Minimum password length, in characters.
pub const MIN_PASSWORD_LEN: usize = 8;

/// Minimum username length for identities provisioned into a lab.
pub const MIN_USERNAME_LEN: usize = 4;

/// Validate JWT algorithm against security policies.
///
/// # Errors
///
/// Returns [`AuthError::UnsupportedAlgorithm`] if:
/// - Algorithm is "none"
/// - Algorithm is not in [`ACCEPTED_ALGORITHMS`]
///
/// # Examples
///
/// ```
/// use labgate_authn::validation::validate_algorithm;
///
/// assert!(validate_algorithm("HS256").is_ok());
/// assert!(validate_algorithm("RS256").is_err());
/// assert!(validate_algorithm("none").is_err());
/// ```
pub fn validate_algorithm(alg: &str) -> Result<(), AuthError> {
    if FORBIDDEN_ALGORITHMS.iter().any(|forbidden| forbidden.eq_ignore_ascii_case(alg)) {
        return Err(AuthError::unsupported_algorithm(format!(
            "Algorithm '{alg}' is not allowed for security reasons"
        )));
    }

    if !ACCEPTED_ALGORITHMS.contains(&alg) {
        return Err(AuthError::unsupported_algorithm(format!(
            "Algorithm '{alg}' is not in accepted list (only HS256 is supported)"
        )));
    }

    Ok(())
}

/// Returns `true` if a login identifier should be looked up as an email.
///
/// Any `@` routes to the email index, even when the rest of the string is
/// not a plausible address.
#[must_use]
pub fn is_email_identifier(identifier: &str) -> bool {
    identifier.contains('@')
}

/// Rejects an empty or whitespace-only mandatory field.
///
/// # Errors
///
/// Returns [`AuthError::Validation`] naming `field`.
pub fn require_present(field: &'static str, value: &str) -> Result<(), AuthError> {
    if value.trim().is_empty() {
        return Err(AuthError::validation(field, "must not be blank"));
    }
    Ok(())
}

/// Checks the email shape: it must contain both `@` and `.`.
///
/// # Errors
///
/// Returns [`AuthError::Validation`] for field `email`.
pub fn validate_email(email: &str) -> Result<(), AuthError> {
    if !email.contains('@') || !email.contains('.') {
        return Err(AuthError::validation("email", "must be a valid email address"));
    }
    Ok(())
}

/// Checks the password length.
///
/// # Errors
///
/// Returns [`AuthError::Validation`] for field `password`.
pub fn validate_password(password: &str) -> Result<(), AuthError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::validation(
            "password",
            format!("must be at least {MIN_PASSWORD_LEN} characters long"),
        ));
    }
    Ok(())
}

/// Checks the username length against `min_len`.
///
/// # Errors
///
/// Returns [`AuthError::Validation`] for field `username`.
pub fn validate_username(username: &str, min_len: usize) -> Result<(), AuthError> {
    if username.chars().count() < min_len {
        return Err(AuthError::validation(
            "username",
            format!("must be at least {min_len} characters long"),
        ));
    }
    Ok(())
}
