//! Argon2id password hashing.
//!
//! Hashes are stored in PHC string format, so each hash carries its own
//! salt and cost parameters and verification keeps working after the
//! configured cost changes.

use std::fmt;

use argon2::{
    Algorithm, Argon2, PasswordHash, PasswordHasher as _, PasswordVerifier as _, Version,
    password_hash::SaltString,
};
use rand_core::OsRng;
use zeroize::Zeroizing;

use crate::{
    config::PasswordHashConfig,
    error::{AuthError, Result},
};

/// Salted one-way password hashing.
#[derive(Clone)]
pub struct PasswordHasher {
    argon2: Argon2<'static>,
    /// Verified against for unknown identifiers so that a miss costs as
    /// much as a wrong password.
    decoy: Zeroizing<String>,
}

impl fmt::Debug for PasswordHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordHasher").field("params", self.argon2.params()).finish()
    }
}

impl PasswordHasher {
    /// Creates a hasher with the given cost.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if the parameters are invalid.
    pub fn new(config: &PasswordHashConfig) -> Result<Self> {
        let params = config.params()?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        let salt = SaltString::generate(&mut OsRng);
        let decoy = argon2.hash_password(salt.as_str().as_bytes(), &salt)?.to_string();
        Ok(Self { argon2, decoy: Zeroizing::new(decoy) })
    }

    /// Hashes `plaintext` with a fresh random salt.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::PasswordHash`] if hashing fails.
    pub fn hash(&self, plaintext: &str) -> Result<Zeroizing<String>> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self.argon2.hash_password(plaintext.as_bytes(), &salt)?;
        Ok(Zeroizing::new(hash.to_string()))
    }

    /// Checks `plaintext` against a stored PHC hash.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::PasswordHash`] if `stored` is not a valid PHC
    /// string. A mismatch is `Ok(false)`, not an error.
    pub fn verify(&self, plaintext: &str, stored: &str) -> Result<bool> {
        let parsed = PasswordHash::new(stored)?;
        match self.argon2.verify_password(plaintext.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(AuthError::from(e)),
        }
    }

    /// Runs a verification that always fails.
    pub fn verify_decoy(&self, plaintext: &str) {
        let _ = self.verify(plaintext, &self.decoy);
    }
}
