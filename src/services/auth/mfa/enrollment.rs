//! TOTP enrollment and recovery-code issuance.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::repos::error::RepoResult;
use crate::services::auth::error::AuthError;
use crate::services::auth::mfa::recovery::RecoveryCodeBatch;
use crate::services::auth::mfa::totp::{build_totp, generate_secret, verify_code};
use crate::services::auth::principal::Principal;

#[async_trait]
pub trait MfaEnrollmentStore: Send + Sync {
    /// Replace any pending (unconfirmed) secret for `user_id`.
    async fn save_pending_totp(
        &self,
        user_id: Uuid,
        secret: &str,
        now: DateTime<Utc>,
    ) -> RepoResult<()>;

    async fn pending_totp(&self, user_id: Uuid) -> RepoResult<Option<String>>;

    /// Promote the pending secret, flag the principal `mfa_enabled` and replace its
    /// recovery codes. One transaction.
    async fn activate_totp(
        &self,
        user_id: Uuid,
        recovery_code_hashes: &[Vec<u8>],
        now: DateTime<Utc>,
    ) -> RepoResult<()>;

    async fn replace_recovery_codes(
        &self,
        user_id: Uuid,
        recovery_code_hashes: &[Vec<u8>],
        now: DateTime<Utc>,
    ) -> RepoResult<()>;
}

/// Secret handed to the user once, for their authenticator app.
#[derive(Clone)]
pub struct TotpEnrollment {
    pub secret: String,
    pub otpauth_url: String,
}

impl std::fmt::Debug for TotpEnrollment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TotpEnrollment").finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct MfaEnrollmentService {
    store: Arc<dyn MfaEnrollmentStore>,
    issuer: String,
}

impl std::fmt::Debug for MfaEnrollmentService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MfaEnrollmentService")
            .field("issuer", &self.issuer)
            .finish_non_exhaustive()
    }
}

impl MfaEnrollmentService {
    pub fn new(store: Arc<dyn MfaEnrollmentStore>, issuer: String) -> Self {
        Self { store, issuer }
    }

    pub async fn begin(
        &self,
        principal: &Principal,
        now: DateTime<Utc>,
    ) -> Result<TotpEnrollment, AuthError> {
        let secret = generate_secret();
        let otpauth_url = build_totp(&secret, &self.issuer, &principal.username)?.get_url();

        self.store
            .save_pending_totp(principal.id, &secret, now)
            .await
            .map_err(|e| {
                error!(user_id = %principal.id, error = %e, "failed to store pending totp secret");
                AuthError::Store
            })?;

        info!(user_id = %principal.id, "totp enrollment started");
        Ok(TotpEnrollment {
            secret,
            otpauth_url,
        })
    }

    /// Verify the first code from the authenticator and activate MFA.
    ///
    /// Returns the plaintext recovery codes; they are not retrievable later.
    pub async fn confirm(
        &self,
        principal: &Principal,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>, AuthError> {
        let pending = self
            .store
            .pending_totp(principal.id)
            .await
            .map_err(|e| {
                error!(user_id = %principal.id, error = %e, "failed to load pending totp secret");
                AuthError::Store
            })?
            .ok_or(AuthError::MfaNotEnrolled)?;

        if !verify_code(&pending, code.trim(), now)? {
            return Err(AuthError::MfaCodeInvalid);
        }

        let batch = RecoveryCodeBatch::generate();
        self.store
            .activate_totp(principal.id, &batch.hashes, now)
            .await
            .map_err(|e| {
                error!(user_id = %principal.id, error = %e, "failed to activate totp");
                AuthError::Store
            })?;

        info!(user_id = %principal.id, "totp enrollment confirmed");
        Ok(batch.codes)
    }

    pub async fn regenerate_recovery_codes(
        &self,
        principal: &Principal,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>, AuthError> {
        if !principal.mfa_enabled {
            return Err(AuthError::MfaNotEnrolled);
        }

        let batch = RecoveryCodeBatch::generate();
        self.store
            .replace_recovery_codes(principal.id, &batch.hashes, now)
            .await
            .map_err(|e| {
                error!(user_id = %principal.id, error = %e, "failed to replace recovery codes");
                AuthError::Store
            })?;

        info!(user_id = %principal.id, "recovery codes regenerated");
        Ok(batch.codes)
    }
}
