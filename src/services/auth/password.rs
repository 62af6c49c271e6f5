//! Argon2id password hashing.
//!
//! Every hash and verify runs on the blocking pool.
use argon2::password_hash::SaltString;
use argon2::{Algorithm, Argon2, Params, PasswordHash, PasswordHasher as _, PasswordVerifier, Version};
use rand::RngCore;
use rand::rngs::OsRng;
use std::sync::Arc;
use tracing::error;

use crate::services::auth::error::AuthError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PasswordHashSettings {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for PasswordHashSettings {
    fn default() -> Self {
        // argon2 crate defaults (OWASP minimum for Argon2id).
        Self {
            memory_kib: Params::DEFAULT_M_COST,
            iterations: Params::DEFAULT_T_COST,
            parallelism: Params::DEFAULT_P_COST,
        }
    }
}

#[derive(Clone)]
pub struct PasswordHasher {
    pepper: Option<Arc<[u8]>>,
    params: Params,
    // Hash of a random throwaway password; verified against on unknown usernames.
    dummy_hash: Arc<str>,
}

impl std::fmt::Debug for PasswordHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Do not print the pepper
        f.debug_struct("PasswordHasher")
            .field("params", &self.params)
            .finish()
    }
}

impl PasswordHasher {
    pub fn new(pepper: Option<Vec<u8>>, settings: PasswordHashSettings) -> Result<Self, AuthError> {
        let params = Params::new(
            settings.memory_kib,
            settings.iterations,
            settings.parallelism,
            None,
        )
        .map_err(|e| {
            error!(error = %e, "invalid argon2 parameters");
            AuthError::Store
        })?;

        let mut hasher = Self {
            pepper: pepper.map(Arc::from),
            params,
            dummy_hash: Arc::from(""),
        };

        let mut throwaway = [0u8; 24];
        OsRng.fill_bytes(&mut throwaway);
        let throwaway = base64_encode(&throwaway);
        hasher.dummy_hash = Arc::from(hasher.hash_blocking(&throwaway)?);

        Ok(hasher)
    }

    fn argon2(&self) -> Result<Argon2<'_>, AuthError> {
        match &self.pepper {
            Some(pepper) => Argon2::new_with_secret(
                pepper,
                Algorithm::Argon2id,
                Version::V0x13,
                self.params.clone(),
            )
            .map_err(|e| {
                error!(error = %e, "failed to initialize Argon2id");
                AuthError::Store
            }),
            None => Ok(Argon2::new(
                Algorithm::Argon2id,
                Version::V0x13,
                self.params.clone(),
            )),
        }
    }

    /// Produce a PHC-format hash. Blocks the calling thread.
    pub fn hash_blocking(&self, password: &str) -> Result<String, AuthError> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()?
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| {
                error!(error = %e, "failed to hash password");
                AuthError::Store
            })?;
        Ok(hash.to_string())
    }

    fn verify_blocking(&self, password: &str, stored_hash: &str) -> Result<bool, AuthError> {
        let parsed = match PasswordHash::new(stored_hash) {
            Ok(parsed) => parsed,
            Err(e) => {
                error!(error = %e, "stored password hash is not a valid PHC string");
                return Ok(false);
            }
        };
        Ok(self
            .argon2()?
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    }

    pub async fn hash(&self, password: String) -> Result<String, AuthError> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.hash_blocking(&password))
            .await
            .map_err(|e| {
                error!(error = %e, "password hashing task failed");
                AuthError::Store
            })?
    }

    pub async fn verify(&self, password: String, stored_hash: String) -> Result<bool, AuthError> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.verify_blocking(&password, &stored_hash))
            .await
            .map_err(|e| {
                error!(error = %e, "password verification task failed");
                AuthError::Store
            })?
    }

    /// Burn the same CPU as a real verification. Always reports a mismatch.
    pub async fn verify_dummy(&self, password: String) -> Result<bool, AuthError> {
        let dummy = self.dummy_hash.to_string();
        self.verify(password, dummy).await.map(|_| false)
    }
}

fn base64_encode(bytes: &[u8]) -> String {
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cheap() -> PasswordHashSettings {
        PasswordHashSettings {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        }
    }

    #[tokio::test]
    async fn hash_then_verify() {
        let hasher = PasswordHasher::new(None, cheap()).unwrap();
        let hash = hasher.hash("correct horse".to_string()).await.unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(hasher.verify("correct horse".into(), hash.clone()).await.unwrap());
        assert!(!hasher.verify("wrong".into(), hash).await.unwrap());
    }

    #[tokio::test]
    async fn pepper_is_part_of_the_hash() {
        let peppered = PasswordHasher::new(Some(b"pepper".to_vec()), cheap()).unwrap();
        let plain = PasswordHasher::new(None, cheap()).unwrap();
        let hash = peppered.hash("pw".to_string()).await.unwrap();
        assert!(peppered.verify("pw".into(), hash.clone()).await.unwrap());
        assert!(!plain.verify("pw".into(), hash).await.unwrap());
    }

    #[tokio::test]
    async fn garbage_hash_never_verifies() {
        let hasher = PasswordHasher::new(None, cheap()).unwrap();
        assert!(!hasher.verify("pw".into(), "not-a-hash".into()).await.unwrap());
        assert!(!hasher.verify_dummy("pw".into()).await.unwrap());
    }
}
