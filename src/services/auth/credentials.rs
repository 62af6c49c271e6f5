//! Username/password verification with lockout bookkeeping.
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::repos::error::RepoResult;
use crate::services::auth::error::AuthError;
use crate::services::auth::password::PasswordHasher;
use crate::services::auth::principal::{Principal, PrincipalDirectory, PrincipalStatus};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LockoutPolicy {
    pub threshold: u32,
    pub duration: ChronoDuration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            threshold: 5,
            duration: ChronoDuration::minutes(30),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Credential {
    pub user_id: Uuid,
    pub password_hash: String,
    pub failed_login_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| now <= until)
    }
}

/// Credential persistence.
///
/// `record_failure` must be a single atomic read-modify-write so concurrent
/// failures against one credential are all counted.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn credential(&self, user_id: Uuid) -> RepoResult<Option<Credential>>;

    /// Count one failed attempt. An expired lock restarts the count at 1; reaching
    /// `policy.threshold` sets `locked_until = now + policy.duration`.
    async fn record_failure(
        &self,
        user_id: Uuid,
        policy: &LockoutPolicy,
        now: DateTime<Utc>,
    ) -> RepoResult<Credential>;

    async fn record_success(&self, user_id: Uuid) -> RepoResult<()>;
}

/// A rejected verification, with what the audit trail needs.
#[derive(Debug)]
pub struct CredentialFailure {
    pub error: AuthError,
    pub principal_id: Option<Uuid>,
    pub locked_now: bool,
}

impl CredentialFailure {
    fn new(error: AuthError, principal_id: Option<Uuid>) -> Self {
        Self {
            error,
            principal_id,
            locked_now: false,
        }
    }
}

impl From<CredentialFailure> for AuthError {
    fn from(f: CredentialFailure) -> Self {
        f.error
    }
}

#[derive(Clone)]
pub struct CredentialVerifier {
    principals: Arc<dyn PrincipalDirectory>,
    credentials: Arc<dyn CredentialStore>,
    hasher: PasswordHasher,
    policy: LockoutPolicy,
}

impl std::fmt::Debug for CredentialVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialVerifier")
            .field("policy", &self.policy)
            .finish()
    }
}

impl CredentialVerifier {
    pub fn new(
        principals: Arc<dyn PrincipalDirectory>,
        credentials: Arc<dyn CredentialStore>,
        hasher: PasswordHasher,
        policy: LockoutPolicy,
    ) -> Self {
        Self {
            principals,
            credentials,
            hasher,
            policy,
        }
    }

    pub fn policy(&self) -> &LockoutPolicy {
        &self.policy
    }

    /// Verify `username`/`password` within `tenant_id` (SYSTEM principals when `None`).
    ///
    /// Order: lookup → status → lock → password. Unknown usernames and wrong
    /// passwords both surface as `InvalidCredentials`.
    pub async fn verify(
        &self,
        username: &str,
        password: &str,
        tenant_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<Principal, CredentialFailure> {
        let principal = self
            .principals
            .find_by_username(username, tenant_id)
            .await
            .map_err(|e| {
                error!(error = %e, "failed to look up principal");
                CredentialFailure::new(AuthError::Store, None)
            })?;

        let Some(principal) = principal else {
            debug!("login for unknown username");
            self.hasher
                .verify_dummy(password.to_owned())
                .await
                .map_err(|e| CredentialFailure::new(e, None))?;
            return Err(CredentialFailure::new(AuthError::InvalidCredentials, None));
        };

        match principal.status {
            PrincipalStatus::Active => {}
            PrincipalStatus::Inactive => {
                return Err(CredentialFailure::new(
                    AuthError::AccountInactive,
                    Some(principal.id),
                ));
            }
            PrincipalStatus::Locked => {
                return Err(CredentialFailure::new(
                    AuthError::AccountLocked,
                    Some(principal.id),
                ));
            }
        }

        let credential = self
            .credentials
            .credential(principal.id)
            .await
            .map_err(|e| {
                error!(user_id = %principal.id, error = %e, "failed to load credential");
                CredentialFailure::new(AuthError::Store, Some(principal.id))
            })?;

        let Some(credential) = credential else {
            // A principal without a password (e.g. federated only) cannot log in here.
            self.hasher
                .verify_dummy(password.to_owned())
                .await
                .map_err(|e| CredentialFailure::new(e, Some(principal.id)))?;
            return Err(CredentialFailure::new(
                AuthError::InvalidCredentials,
                Some(principal.id),
            ));
        };

        if credential.is_locked(now) {
            debug!(user_id = %principal.id, locked_until = ?credential.locked_until, "credential locked");
            return Err(CredentialFailure::new(
                AuthError::AccountLocked,
                Some(principal.id),
            ));
        }

        let matches = self
            .hasher
            .verify(password.to_owned(), credential.password_hash.clone())
            .await
            .map_err(|e| CredentialFailure::new(e, Some(principal.id)))?;

        if !matches {
            let updated = self
                .credentials
                .record_failure(principal.id, &self.policy, now)
                .await
                .map_err(|e| {
                    error!(user_id = %principal.id, error = %e, "failed to record failed login");
                    CredentialFailure::new(AuthError::Store, Some(principal.id))
                })?;

            // The early return above means the credential was unlocked before this attempt.
            let locked_now = updated.is_locked(now);
            if locked_now {
                warn!(
                    user_id = %principal.id,
                    attempts = updated.failed_login_attempts,
                    locked_until = ?updated.locked_until,
                    "account locked after repeated failures"
                );
            }

            return Err(CredentialFailure {
                error: AuthError::InvalidCredentials,
                principal_id: Some(principal.id),
                locked_now,
            });
        }

        if credential.failed_login_attempts > 0 || credential.locked_until.is_some() {
            self.credentials
                .record_success(principal.id)
                .await
                .map_err(|e| {
                    error!(user_id = %principal.id, error = %e, "failed to reset failed logins");
                    CredentialFailure::new(AuthError::Store, Some(principal.id))
                })?;
        }

        info!(user_id = %principal.id, "password verified");
        Ok(principal)
    }
}
