//! MFA challenge sessions.
//!
//! A session is written once when a password login needs a second factor and is
//! taken (GETDEL) by the first verification attempt, whatever its outcome.
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::services::auth::error::AuthError;
use crate::services::auth::mfa::MfaFactorStore;
use crate::services::auth::mfa::recovery::hash_recovery_code;
use crate::services::auth::mfa::totp::{looks_like_totp, verify_code};
use crate::services::auth::principal::Principal;
use crate::services::cache::{CacheBackend, CacheClient};

const KEY_PREFIX: &str = "mfa:session:";

/// Returned to the client instead of tokens.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MfaChallenge {
    pub session_id: String,
    pub expires_at: DateTime<Utc>,
}

/// Which factor satisfied the challenge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MfaFactor {
    Totp,
    RecoveryCode,
}

impl MfaFactor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Totp => "totp",
            Self::RecoveryCode => "recovery_code",
        }
    }
}

/// A consumed, successfully verified challenge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifiedChallenge {
    pub user_id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub remember_me: bool,
    pub factor: MfaFactor,
}

/// Cache payload.
#[derive(Debug, Serialize, Deserialize)]
struct StoredChallenge {
    user_id: Uuid,
    tenant_id: Option<Uuid>,
    remember_me: bool,
    expires_at: DateTime<Utc>,
}

/// A challenge that was taken from the cache but did not verify. Carries the
/// bound user (when the session existed) for the audit trail.
#[derive(Debug)]
pub struct ChallengeFailure {
    pub error: AuthError,
    pub user_id: Option<Uuid>,
}

impl From<ChallengeFailure> for AuthError {
    fn from(f: ChallengeFailure) -> Self {
        f.error
    }
}

#[derive(Clone)]
pub struct MfaChallengeManager<C = CacheBackend>
where
    C: CacheClient,
{
    cache: C,
    factors: Arc<dyn MfaFactorStore>,
    ttl: ChronoDuration,
}

impl<C: CacheClient> std::fmt::Debug for MfaChallengeManager<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MfaChallengeManager")
            .field("backend", &self.cache.backend_name())
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl<C: CacheClient> MfaChallengeManager<C> {
    pub fn new(cache: C, factors: Arc<dyn MfaFactorStore>, ttl: ChronoDuration) -> Self {
        Self {
            cache,
            factors,
            ttl,
        }
    }

    fn key(session_id: &str) -> String {
        format!("{KEY_PREFIX}{session_id}")
    }

    /// Open a challenge for `principal`. Fails closed if the cache is unavailable.
    pub async fn issue_challenge(
        &self,
        principal: &Principal,
        remember_me: bool,
        now: DateTime<Utc>,
    ) -> Result<MfaChallenge, AuthError> {
        let session_id = generate_session_id();
        let expires_at = now + self.ttl;
        let payload = serde_json::to_string(&StoredChallenge {
            user_id: principal.id,
            tenant_id: principal.tenant_id(),
            remember_me,
            expires_at,
        })
        .map_err(|e| {
            error!(error = %e, "failed to encode mfa session");
            AuthError::Store
        })?;

        let ttl = self.ttl.to_std().map_err(|e| {
            error!(error = %e, "invalid mfa session ttl");
            AuthError::Store
        })?;

        let created = self
            .cache
            .set_if_absent_with_ttl(&Self::key(&session_id), &payload, ttl)
            .await
            .map_err(|e| {
                error!(backend = self.cache.backend_name(), error = %e, "failed to store mfa session");
                AuthError::Store
            })?;
        if !created {
            // 256-bit ids; a collision means the generator is broken.
            error!("mfa session id collision");
            return Err(AuthError::Store);
        }

        debug!(user_id = %principal.id, expires_at = %expires_at, "mfa challenge issued");
        Ok(MfaChallenge {
            session_id,
            expires_at,
        })
    }

    /// Consume `session_id` and check `code` against the bound principal's factors.
    ///
    /// The session is gone after this call whether or not the code is right.
    pub async fn verify_challenge(
        &self,
        session_id: &str,
        code: &str,
        tenant_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<VerifiedChallenge, ChallengeFailure> {
        let invalid_session = |user_id| ChallengeFailure {
            error: AuthError::MfaSessionInvalid,
            user_id,
        };

        let raw = self
            .cache
            .take_string(&Self::key(session_id))
            .await
            .map_err(|e| {
                error!(backend = self.cache.backend_name(), error = %e, "failed to take mfa session");
                ChallengeFailure {
                    error: AuthError::Store,
                    user_id: None,
                }
            })?
            .ok_or_else(|| invalid_session(None))?;

        let stored: StoredChallenge = serde_json::from_str(&raw).map_err(|e| {
            warn!(error = %e, "undecodable mfa session");
            invalid_session(None)
        })?;

        if now > stored.expires_at {
            debug!(user_id = %stored.user_id, "mfa session past its deadline");
            return Err(invalid_session(Some(stored.user_id)));
        }
        if stored.tenant_id != tenant_id {
            warn!(user_id = %stored.user_id, "mfa session presented for a different tenant");
            return Err(invalid_session(Some(stored.user_id)));
        }

        let factor = self
            .check_code(stored.user_id, code, now)
            .await
            .map_err(|error| ChallengeFailure {
                error,
                user_id: Some(stored.user_id),
            })?;

        info!(user_id = %stored.user_id, factor = factor.as_str(), "mfa challenge verified");
        Ok(VerifiedChallenge {
            user_id: stored.user_id,
            tenant_id: stored.tenant_id,
            remember_me: stored.remember_me,
            factor,
        })
    }

    async fn check_code(
        &self,
        user_id: Uuid,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<MfaFactor, AuthError> {
        let code = code.trim();

        if looks_like_totp(code) {
            let secret = self.factors.totp_secret(user_id).await.map_err(|e| {
                error!(user_id = %user_id, error = %e, "failed to load totp secret");
                AuthError::Store
            })?;
            let Some(secret) = secret else {
                return Err(AuthError::MfaCodeInvalid);
            };
            return if verify_code(&secret, code, now)? {
                Ok(MfaFactor::Totp)
            } else {
                Err(AuthError::MfaCodeInvalid)
            };
        }

        let Some(hash) = hash_recovery_code(code) else {
            return Err(AuthError::MfaCodeInvalid);
        };
        let consumed = self
            .factors
            .consume_recovery_code(user_id, &hash, now)
            .await
            .map_err(|e| {
                error!(user_id = %user_id, error = %e, "failed to consume recovery code");
                AuthError::Store
            })?;
        if consumed {
            Ok(MfaFactor::RecoveryCode)
        } else {
            Err(AuthError::MfaCodeInvalid)
        }
    }
}

fn generate_session_id() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);

    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    URL_SAFE_NO_PAD.encode(bytes)
}
