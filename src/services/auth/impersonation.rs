//! Issue tokens that authenticate as another principal, with an auditable
//! session row linking them back to the impersonator.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::repos::error::RepoResult;
use crate::services::auth::claims::ClaimsBuilder;
use crate::services::auth::error::{AuthError, DenialReason};
use crate::services::auth::principal::{Principal, PrincipalDirectory, PrincipalType};
use crate::services::auth::token_service::{AuthMethod, IssueRequest, IssuedTokens, TokenService};

/// Permission a SYSTEM principal needs to impersonate.
pub const SYSTEM_IMPERSONATE_PERMISSION: &str = "system.users:impersonate";
/// Permission a TENANT principal needs to impersonate within its tenant.
pub const TENANT_IMPERSONATE_PERMISSION: &str = "tenant.users:impersonate";

/// The permission that lets a principal of `principal_type` impersonate others.
pub fn impersonate_permission(principal_type: PrincipalType) -> Option<&'static str> {
    match principal_type {
        PrincipalType::System => Some(SYSTEM_IMPERSONATE_PERMISSION),
        PrincipalType::Tenant => Some(TENANT_IMPERSONATE_PERMISSION),
        PrincipalType::Service => None,
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ImpersonationSession {
    pub id: Uuid,
    pub impersonator_id: Uuid,
    pub target_user_id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub ended_by: Option<Uuid>,
    pub token_jti: Option<Uuid>,
    pub reason: Option<String>,
    pub metadata: serde_json::Value,
}

impl ImpersonationSession {
    pub fn is_active(&self) -> bool {
        self.ended_at.is_none()
    }
}

#[derive(Clone, Debug)]
pub struct NewImpersonationSession {
    pub id: Uuid,
    pub impersonator_id: Uuid,
    pub target_user_id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub started_at: DateTime<Utc>,
    pub token_jti: Uuid,
    pub reason: Option<String>,
    pub metadata: serde_json::Value,
}

#[async_trait]
pub trait ImpersonationSessionStore: Send + Sync {
    async fn insert(&self, session: NewImpersonationSession) -> RepoResult<ImpersonationSession>;

    async fn find(&self, id: Uuid) -> RepoResult<Option<ImpersonationSession>>;

    /// Look a session up by the JTI of any access token issued for it.
    async fn find_by_jti(&self, jti: Uuid) -> RepoResult<Option<ImpersonationSession>>;

    /// Attach a newly minted access-token JTI to a still active session. Returns
    /// `false` when the session is unknown or already ended.
    async fn record_token(&self, id: Uuid, jti: Uuid, now: DateTime<Utc>) -> RepoResult<bool>;

    /// End the session if it is still active and return it. `None` when the session
    /// is unknown or already ended.
    async fn end(
        &self,
        id: Uuid,
        ended_by: Uuid,
        now: DateTime<Utc>,
    ) -> RepoResult<Option<ImpersonationSession>>;

    async fn active_for_impersonator(
        &self,
        impersonator_id: Uuid,
    ) -> RepoResult<Vec<ImpersonationSession>>;
}

/// A started session and the tokens issued for it.
#[derive(Clone, Debug)]
pub struct ImpersonationGrant {
    pub session: ImpersonationSession,
    pub tokens: IssuedTokens,
}

#[derive(Clone)]
pub struct ImpersonationManager {
    principals: Arc<dyn PrincipalDirectory>,
    claims: ClaimsBuilder,
    tokens: TokenService,
    sessions: Arc<dyn ImpersonationSessionStore>,
}

impl std::fmt::Debug for ImpersonationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImpersonationManager").finish_non_exhaustive()
    }
}

/// Plane rules between an impersonator and a target, checked in order.
pub fn check_impersonation(impersonator: &Principal, target: &Principal) -> Result<(), DenialReason> {
    if impersonator.id == target.id {
        return Err(DenialReason::SelfImpersonation);
    }
    if !impersonator.kind.is_system() {
        if target.kind.is_system() {
            return Err(DenialReason::TenantToSystem);
        }
        if impersonator.tenant_id() != target.tenant_id() {
            return Err(DenialReason::CrossTenant);
        }
    }
    Ok(())
}

impl ImpersonationManager {
    pub fn new(
        principals: Arc<dyn PrincipalDirectory>,
        claims: ClaimsBuilder,
        tokens: TokenService,
        sessions: Arc<dyn ImpersonationSessionStore>,
    ) -> Self {
        Self {
            principals,
            claims,
            tokens,
            sessions,
        }
    }

    async fn load(&self, id: Uuid) -> Result<Principal, AuthError> {
        self.principals
            .find_by_id(id)
            .await
            .map_err(|e| {
                error!(user_id = %id, error = %e, "failed to load principal");
                AuthError::Store
            })?
            .ok_or(AuthError::PrincipalNotFound)
    }

    /// Start impersonating `target_id`.
    ///
    /// The caller is expected to hold the impersonate permission for its plane.
    pub async fn start(
        &self,
        impersonator_id: Uuid,
        target_id: Uuid,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<ImpersonationGrant, AuthError> {
        let impersonator = self.load(impersonator_id).await?;
        let target = self.load(target_id).await?;

        if let Err(denial) = check_impersonation(&impersonator, &target) {
            warn!(
                impersonator_id = %impersonator.id,
                target_id = %target.id,
                reason = denial.as_str(),
                "impersonation denied"
            );
            return Err(AuthError::ImpersonationDenied(denial));
        }
        if !target.is_active() {
            return Err(AuthError::AccountInactive);
        }

        let session_id = Uuid::new_v4();
        let access_jti = Uuid::new_v4();
        let claims = self
            .claims
            .build(&target)
            .await?
            .impersonated(impersonator.id, session_id);

        let session = self
            .sessions
            .insert(NewImpersonationSession {
                id: session_id,
                impersonator_id: impersonator.id,
                target_user_id: target.id,
                tenant_id: target.tenant_id(),
                started_at: now,
                token_jti: access_jti,
                reason,
                metadata: json!({
                    "impersonator_username": impersonator.username,
                    "target_username": target.username,
                }),
            })
            .await
            .map_err(|e| {
                error!(session_id = %session_id, error = %e, "failed to store impersonation session");
                AuthError::Store
            })?;

        let issued = self
            .tokens
            .issue_tokens(
                IssueRequest::new(claims, false, AuthMethod::Impersonation)
                    .with_access_jti(access_jti),
            )
            .await;

        let tokens = match issued {
            Ok(tokens) => tokens,
            Err(e) => {
                // No tokens exist for this session; close it so it does not linger as active.
                if let Err(end_err) = self.sessions.end(session_id, impersonator.id, now).await {
                    error!(session_id = %session_id, error = %end_err, "failed to close session after issuance failure");
                }
                return Err(e);
            }
        };

        info!(
            session_id = %session.id,
            impersonator_id = %impersonator.id,
            target_id = %target.id,
            "impersonation started"
        );
        Ok(ImpersonationGrant { session, tokens })
    }

    pub async fn find_session(&self, session_id: Uuid) -> Result<ImpersonationSession, AuthError> {
        self.sessions
            .find(session_id)
            .await
            .map_err(|e| {
                error!(session_id = %session_id, error = %e, "failed to load impersonation session");
                AuthError::Store
            })?
            .ok_or(AuthError::ImpersonationSessionNotFound)
    }

    pub async fn find_session_by_token(&self, jti: Uuid) -> Result<ImpersonationSession, AuthError> {
        self.sessions
            .find_by_jti(jti)
            .await
            .map_err(|e| {
                error!(jti = %jti, error = %e, "failed to load impersonation session by token");
                AuthError::Store
            })?
            .ok_or(AuthError::ImpersonationSessionNotFound)
    }

    /// End an active session and revoke the refresh tokens minted for it.
    pub async fn end(
        &self,
        session_id: Uuid,
        ended_by: Uuid,
        now: DateTime<Utc>,
    ) -> Result<ImpersonationSession, AuthError> {
        let ended = self.sessions.end(session_id, ended_by, now).await.map_err(|e| {
            error!(session_id = %session_id, error = %e, "failed to end impersonation session");
            AuthError::Store
        })?;

        let Some(session) = ended else {
            return match self.find_session(session_id).await {
                Ok(_) => Err(AuthError::ImpersonationSessionAlreadyEnded),
                Err(e) => Err(e),
            };
        };

        let revoked = self
            .tokens
            .revoke_for_impersonation_session(session.id, now)
            .await?;

        info!(
            session_id = %session.id,
            ended_by = %ended_by,
            revoked_refresh_tokens = revoked,
            "impersonation ended"
        );
        Ok(session)
    }

    /// Same as [`Self::end`], addressing the session by its access-token JTI.
    pub async fn end_by_token(
        &self,
        jti: Uuid,
        ended_by: Uuid,
        now: DateTime<Utc>,
    ) -> Result<ImpersonationSession, AuthError> {
        let session = self.find_session_by_token(jti).await?;
        self.end(session.id, ended_by, now).await
    }

    pub async fn active_sessions(
        &self,
        impersonator_id: Uuid,
    ) -> Result<Vec<ImpersonationSession>, AuthError> {
        self.sessions
            .active_for_impersonator(impersonator_id)
            .await
            .map_err(|e| {
                error!(impersonator_id = %impersonator_id, error = %e, "failed to list impersonation sessions");
                AuthError::Store
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::auth::principal::{PrincipalKind, PrincipalStatus};

    fn principal(kind: PrincipalKind) -> Principal {
        Principal {
            id: Uuid::new_v4(),
            username: "p".to_string(),
            email: "p@example.com".to_string(),
            kind,
            status: PrincipalStatus::Active,
            mfa_enabled: false,
        }
    }

    #[test]
    fn rules_apply_in_order() {
        let t1 = Uuid::new_v4();
        let t2 = Uuid::new_v4();
        let admin = principal(PrincipalKind::System);
        let tenant_admin = principal(PrincipalKind::Tenant { tenant_id: t1 });

        assert_eq!(
            check_impersonation(&admin, &admin),
            Err(DenialReason::SelfImpersonation)
        );
        assert_eq!(
            check_impersonation(&tenant_admin, &admin),
            Err(DenialReason::TenantToSystem)
        );
        assert_eq!(
            check_impersonation(&tenant_admin, &principal(PrincipalKind::Tenant { tenant_id: t2 })),
            Err(DenialReason::CrossTenant)
        );
        assert!(check_impersonation(&tenant_admin, &principal(PrincipalKind::Service { tenant_id: t1 })).is_ok());
        assert!(check_impersonation(&admin, &principal(PrincipalKind::Tenant { tenant_id: t2 })).is_ok());
        assert!(check_impersonation(&admin, &principal(PrincipalKind::System)).is_ok());
    }
}
