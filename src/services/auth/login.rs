//! Password login, with a second step when the principal has MFA enabled.
use chrono::{DateTime, Utc};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::services::audit::{AuditAction, AuditEvent, AuditQueue};
use crate::services::auth::claims::ClaimsBuilder;
use crate::services::auth::credentials::CredentialVerifier;
use crate::services::auth::error::AuthError;
use crate::services::auth::mfa::{MfaChallengeManager, MfaFactor};
use crate::services::auth::principal::PrincipalDirectory;
use crate::services::auth::token_service::{AuthMethod, IssueRequest, IssuedTokens, TokenService};
use crate::services::cache::{CacheBackend, CacheClient};

#[derive(Clone)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    pub tenant_id: Option<Uuid>,
    pub remember_me: bool,
    pub source_ip: Option<IpAddr>,
}

impl std::fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginRequest")
            .field("tenant_id", &self.tenant_id)
            .field("remember_me", &self.remember_me)
            .field("source_ip", &self.source_ip)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Debug)]
pub enum LoginOutcome {
    /// Password accepted; the client must complete the challenge to get tokens.
    MfaRequired {
        mfa_session_id: String,
        expires_at: DateTime<Utc>,
    },
    Authenticated(Box<IssuedTokens>),
}

#[derive(Clone)]
pub struct LoginService<C = CacheBackend>
where
    C: CacheClient,
{
    verifier: CredentialVerifier,
    mfa: MfaChallengeManager<C>,
    claims: ClaimsBuilder,
    tokens: TokenService,
    principals: Arc<dyn PrincipalDirectory>,
    audit: Arc<AuditQueue>,
}

impl<C: CacheClient> std::fmt::Debug for LoginService<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginService")
            .field("verifier", &self.verifier)
            .field("mfa", &self.mfa)
            .finish_non_exhaustive()
    }
}

impl<C: CacheClient> LoginService<C> {
    pub fn new(
        verifier: CredentialVerifier,
        mfa: MfaChallengeManager<C>,
        claims: ClaimsBuilder,
        tokens: TokenService,
        principals: Arc<dyn PrincipalDirectory>,
        audit: Arc<AuditQueue>,
    ) -> Self {
        Self {
            verifier,
            mfa,
            claims,
            tokens,
            principals,
            audit,
        }
    }

    pub async fn login(&self, req: LoginRequest) -> Result<LoginOutcome, AuthError> {
        let now = Utc::now();

        let principal = match self
            .verifier
            .verify(&req.username, &req.password, req.tenant_id, now)
            .await
        {
            Ok(principal) => principal,
            Err(failure) => {
                self.audit.publish(
                    AuditEvent::failure(AuditAction::Login, failure.error.code())
                        .actor(failure.principal_id)
                        .tenant(req.tenant_id)
                        .source_ip(req.source_ip),
                );
                if failure.locked_now {
                    self.audit.publish(
                        AuditEvent::success(AuditAction::AccountLocked)
                            .target(failure.principal_id)
                            .tenant(req.tenant_id)
                            .source_ip(req.source_ip),
                    );
                }
                return Err(failure.error);
            }
        };

        if principal.mfa_enabled {
            let challenge = self
                .mfa
                .issue_challenge(&principal, req.remember_me, now)
                .await?;
            self.audit.publish(
                AuditEvent::success(AuditAction::MfaChallengeIssued)
                    .actor(principal.id)
                    .tenant(principal.tenant_id())
                    .source_ip(req.source_ip),
            );
            return Ok(LoginOutcome::MfaRequired {
                mfa_session_id: challenge.session_id,
                expires_at: challenge.expires_at,
            });
        }

        let claims = self.claims.build(&principal).await?;
        let tokens = self
            .tokens
            .issue_tokens(IssueRequest::new(claims, req.remember_me, AuthMethod::Password))
            .await?;

        self.audit.publish(
            AuditEvent::success(AuditAction::Login)
                .actor(principal.id)
                .tenant(principal.tenant_id())
                .source_ip(req.source_ip),
        );
        info!(user_id = %principal.id, "login succeeded");
        Ok(LoginOutcome::Authenticated(Box::new(tokens)))
    }

    /// Second step: consume the MFA session and issue tokens with `amr = [pwd, otp]`.
    pub async fn complete_mfa(
        &self,
        session_id: &str,
        code: &str,
        tenant_id: Option<Uuid>,
        source_ip: Option<IpAddr>,
    ) -> Result<IssuedTokens, AuthError> {
        let now = Utc::now();

        let verified = match self
            .mfa
            .verify_challenge(session_id, code, tenant_id, now)
            .await
        {
            Ok(verified) => verified,
            Err(failure) => {
                self.audit.publish(
                    AuditEvent::failure(AuditAction::MfaVerify, failure.error.code())
                        .actor(failure.user_id)
                        .tenant(tenant_id)
                        .source_ip(source_ip),
                );
                return Err(failure.error);
            }
        };

        let principal = self
            .principals
            .find_by_id(verified.user_id)
            .await
            .map_err(|e| {
                error!(user_id = %verified.user_id, error = %e, "failed to load principal after mfa");
                AuthError::Store
            })?
            .ok_or(AuthError::MfaSessionInvalid)?;
        if !principal.is_active() {
            return Err(AuthError::AccountInactive);
        }

        let claims = self.claims.build(&principal).await?;
        let tokens = self
            .tokens
            .issue_tokens(IssueRequest::new(
                claims,
                verified.remember_me,
                AuthMethod::PasswordAndOtp,
            ))
            .await?;

        let mut event = AuditEvent::success(AuditAction::MfaVerify)
            .actor(principal.id)
            .tenant(principal.tenant_id())
            .source_ip(source_ip);
        if verified.factor == MfaFactor::RecoveryCode {
            event = event.reason("recovery_code_used");
        }
        self.audit.publish(event);
        info!(user_id = %principal.id, factor = verified.factor.as_str(), "login completed with mfa");
        Ok(tokens)
    }
}
