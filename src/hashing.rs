//! Argon2id hashing for passwords and one-time codes.

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use rand::rngs::OsRng;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("failed to hash secret")]
pub struct HashError;

/// Produces PHC strings with a fresh random salt per call.
#[derive(Clone, Debug, Default)]
pub struct SecretHasher {
    params: Params,
}

impl SecretHasher {
    #[must_use]
    pub fn new(params: Params) -> Self {
        Self { params }
    }

    /// Minimal cost parameters, for tests and local development only.
    #[must_use]
    pub fn light() -> Self {
        Self::new(Params::new(Params::MIN_M_COST * 4, 1, 1, None).unwrap_or_default())
    }

    /// # Errors
    ///
    /// Returns `HashError` if argon2 rejects the input.
    pub fn hash(&self, secret: &str) -> Result<String, HashError> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
            .hash_password(secret.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|_| HashError)
    }

    /// Constant-time comparison against a stored PHC string. Cost parameters are read
    /// from the stored hash, so hashes made with other settings still verify.
    #[must_use]
    pub fn verify(&self, secret: &str, stored: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(stored) else {
            return false;
        };
        Argon2::default()
            .verify_password(secret.as_bytes(), &parsed)
            .is_ok()
    }
}
