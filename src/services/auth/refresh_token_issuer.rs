use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, error};
use uuid::Uuid;

use crate::repos::error::RepoResult;
use crate::services::auth::error::AuthError;

/// A persisted refresh token. Only the hash of the opaque value is ever stored.
#[derive(Clone, Debug)]
pub struct RefreshTokenRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub remember_me: bool,
    pub mfa_verified: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub replaced_by: Option<Uuid>,
    pub impersonation_session_id: Option<Uuid>,
    pub impersonated_by: Option<Uuid>,
}

impl RefreshTokenRecord {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at > now
    }
}

#[derive(Clone, Debug)]
pub struct NewRefreshToken {
    pub token_hash: Vec<u8>,
    pub user_id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub remember_me: bool,
    pub mfa_verified: bool,
    pub impersonation_session_id: Option<Uuid>,
    pub impersonated_by: Option<Uuid>,
}

/// What a refresh token carries forward into the next rotation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RefreshGrant {
    pub user_id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub remember_me: bool,
    pub mfa_verified: bool,
    pub impersonation_session_id: Option<Uuid>,
    pub impersonated_by: Option<Uuid>,
}

impl From<&RefreshTokenRecord> for RefreshGrant {
    fn from(r: &RefreshTokenRecord) -> Self {
        Self {
            user_id: r.user_id,
            tenant_id: r.tenant_id,
            remember_me: r.remember_me,
            mfa_verified: r.mfa_verified,
            impersonation_session_id: r.impersonation_session_id,
            impersonated_by: r.impersonated_by,
        }
    }
}

#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    async fn insert(&self, token: NewRefreshToken) -> RepoResult<Uuid>;

    /// Revoke the active row matching `token_hash` and return it, in one step.
    /// Concurrent callers presenting the same token: exactly one gets `Some`.
    async fn revoke_active_by_hash(
        &self,
        token_hash: &[u8],
        now: DateTime<Utc>,
    ) -> RepoResult<Option<RefreshTokenRecord>>;

    async fn set_replaced_by(&self, id: Uuid, replaced_by: Uuid) -> RepoResult<u64>;

    async fn revoke_all_for_user(&self, user_id: Uuid, now: DateTime<Utc>) -> RepoResult<u64>;

    async fn revoke_for_impersonation_session(
        &self,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> RepoResult<u64>;
}

#[derive(Clone)]
pub struct RefreshTokenService {
    store: Arc<dyn RefreshTokenStore>,
}

impl std::fmt::Debug for RefreshTokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshTokenService").finish_non_exhaustive()
    }
}

/// A freshly minted refresh token: the opaque value (returned once) and its row id.
#[derive(Clone)]
pub struct MintedRefreshToken {
    pub token: String,
    pub id: Uuid,
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for MintedRefreshToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the token itself
        f.debug_struct("MintedRefreshToken")
            .field("id", &self.id)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl RefreshTokenService {
    pub fn new(store: Arc<dyn RefreshTokenStore>) -> Self {
        Self { store }
    }

    /// Issue a new refresh token for `grant` and store its hash.
    pub async fn issue(
        &self,
        grant: RefreshGrant,
        ttl_seconds: u64,
        now: DateTime<Utc>,
    ) -> Result<MintedRefreshToken, AuthError> {
        let token = generate_refresh_token();
        let expires_at = now + ChronoDuration::seconds(ttl_seconds as i64);

        debug!(
            user_id = %grant.user_id,
            ttl_seconds,
            expires_at = %expires_at,
            "Issuing refresh token"
        );

        let id = self
            .store
            .insert(NewRefreshToken {
                token_hash: hash_refresh_token(&token),
                user_id: grant.user_id,
                tenant_id: grant.tenant_id,
                issued_at: now,
                expires_at,
                remember_me: grant.remember_me,
                mfa_verified: grant.mfa_verified,
                impersonation_session_id: grant.impersonation_session_id,
                impersonated_by: grant.impersonated_by,
            })
            .await
            .map_err(|e| {
                error!(user_id = %grant.user_id, error = ?e, "Failed to insert refresh token");
                AuthError::TokenGenerationFailed
            })?;

        Ok(MintedRefreshToken {
            token,
            id,
            expires_at,
        })
    }

    /// Revoke-and-return the active row for `refresh_token`. `None` means the token is
    /// unknown, expired, already revoked, or lost a race with another consumer.
    pub async fn consume(
        &self,
        refresh_token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshTokenRecord>, AuthError> {
        self.store
            .revoke_active_by_hash(&hash_refresh_token(refresh_token), now)
            .await
            .map_err(|e| {
                error!(error = ?e, "Failed to consume refresh token");
                AuthError::Store
            })
    }

    pub async fn link_replacement(&self, old_id: Uuid, new_id: Uuid) -> Result<(), AuthError> {
        self.store
            .set_replaced_by(old_id, new_id)
            .await
            .map(|_| ())
            .map_err(|e| {
                error!(id = %old_id, error = ?e, "Failed to link rotated refresh token");
                AuthError::Store
            })
    }

    /// Revoke a refresh token by the raw token. Unknown or already revoked tokens are a no-op.
    pub async fn revoke_by_token(
        &self,
        refresh_token: &str,
        revoked_at: DateTime<Utc>,
    ) -> Result<u64, AuthError> {
        let revoked = self.consume(refresh_token, revoked_at).await?;
        match revoked {
            Some(row) => {
                debug!(id = %row.id, user_id = %row.user_id, revoked_at = %revoked_at, "Revoked refresh token");
                Ok(1)
            }
            None => {
                debug!("Refresh token not found or already inactive");
                Ok(0)
            }
        }
    }

    pub async fn revoke_all_for_user(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, AuthError> {
        self.store
            .revoke_all_for_user(user_id, now)
            .await
            .map_err(|e| {
                error!(user_id = %user_id, error = %e, "Failed to revoke refresh tokens");
                AuthError::Store
            })
    }

    pub async fn revoke_for_impersonation_session(
        &self,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, AuthError> {
        self.store
            .revoke_for_impersonation_session(session_id, now)
            .await
            .map_err(|e| {
                error!(session_id = %session_id, error = %e, "Failed to revoke impersonation refresh tokens");
                AuthError::Store
            })
    }
}

fn generate_refresh_token() -> String {
    // 32 bytes of entropy -> URL-safe base64 without padding.
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);

    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    URL_SAFE_NO_PAD.encode(bytes)
}

pub(crate) fn hash_refresh_token(token: &str) -> Vec<u8> {
    // sha256(token) -> raw 32 bytes (stored as BYTEA)
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}
