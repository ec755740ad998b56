//! One-way hashing for passwords and refresh tokens.

use anyhow::{anyhow, Result};
use argon2::{
    password_hash::SaltString, Algorithm, Argon2, Params, PasswordHash, PasswordHasher,
    PasswordVerifier, Version,
};
use rand::rngs::OsRng;

/// Hash secrets and check them against stored hashes.
///
/// Implementations are CPU bound; async callers should run them on a blocking thread.
pub trait SecretHasher: Send + Sync {
    /// # Errors
    /// Returns an error if the secret cannot be hashed.
    fn hash(&self, secret: &str) -> Result<String>;

    /// Constant-time comparison of `secret` against `hash`. Unparseable hashes never match.
    fn verify(&self, secret: &str, hash: &str) -> bool;
}

/// Argon2id with a random salt per hash, encoded as a PHC string.
#[derive(Clone, Debug)]
pub struct Argon2Hasher {
    params: Params,
}

impl Argon2Hasher {
    #[must_use]
    pub fn new() -> Self {
        Self {
            params: Params::default(),
        }
    }

    /// Custom cost parameters, mostly useful to keep tests fast.
    #[must_use]
    pub fn with_params(params: Params) -> Self {
        Self { params }
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }
}

impl Default for Argon2Hasher {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretHasher for Argon2Hasher {
    fn hash(&self, secret: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()
            .hash_password(secret.as_bytes(), &salt)
            .map_err(|err| anyhow!("failed to hash secret: {err}"))?
            .to_string();
        Ok(hash)
    }

    fn verify(&self, secret: &str, hash: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(hash) else {
            return false;
        };
        // parameters come from the PHC string, not from `self.params`
        self.argon2()
            .verify_password(secret.as_bytes(), &parsed)
            .is_ok()
    }
}
