use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::repos::error::RepoResult;
use crate::services::auth::claims::{AuthClaims, ClaimsBuilder};
use crate::services::auth::error::AuthError;
use crate::services::auth::impersonation::ImpersonationSessionStore;
use crate::services::auth::jwt::{JwtIssuer, TokenClaims, TokenUse, TokenVerifyError};
use crate::services::auth::principal::PrincipalDirectory;
use crate::services::auth::refresh_token_issuer::{RefreshGrant, RefreshTokenService};

/// Lifetimes of one token bundle, in seconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TokenLifetimes {
    pub access_seconds: u64,
    pub id_seconds: u64,
    pub refresh_seconds: u64,
}

/// Standard and remember-me lifetimes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TokenTtls {
    pub standard: TokenLifetimes,
    pub remember_me: TokenLifetimes,
}

impl TokenTtls {
    pub fn for_session(&self, remember_me: bool) -> TokenLifetimes {
        if remember_me {
            self.remember_me
        } else {
            self.standard
        }
    }
}

impl Default for TokenTtls {
    fn default() -> Self {
        Self {
            standard: TokenLifetimes {
                access_seconds: 900,
                id_seconds: 3_600,
                refresh_seconds: 604_800, // 7 days
            },
            remember_me: TokenLifetimes {
                access_seconds: 3_600,
                id_seconds: 86_400,
                refresh_seconds: 2_592_000, // 30 days
            },
        }
    }
}

/// Per-tenant TTL overrides.
#[async_trait]
pub trait TokenSettingsSource: Send + Sync {
    async fn token_ttls(&self, tenant_id: Uuid) -> RepoResult<Option<TokenTtls>>;
}

/// How the caller reached token issuance; drives the `amr` claim.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthMethod {
    Password,
    PasswordAndOtp,
    Impersonation,
}

impl AuthMethod {
    pub fn amr(&self) -> Vec<String> {
        match self {
            Self::Password => vec!["pwd".to_string()],
            Self::PasswordAndOtp => vec!["pwd".to_string(), "otp".to_string()],
            Self::Impersonation => vec!["imp".to_string()],
        }
    }
}

#[derive(Clone, Debug)]
pub struct IssueRequest {
    pub claims: AuthClaims,
    pub tenant_id: Option<Uuid>,
    pub remember_me: bool,
    pub method: AuthMethod,
    /// JTI of the access token. Pre-allocated so callers can persist it before signing.
    pub access_jti: Uuid,
}

impl IssueRequest {
    pub fn new(claims: AuthClaims, remember_me: bool, method: AuthMethod) -> Self {
        Self {
            tenant_id: claims.tenant_id,
            claims,
            remember_me,
            method,
            access_jti: Uuid::new_v4(),
        }
    }

    pub fn with_access_jti(mut self, jti: Uuid) -> Self {
        self.access_jti = jti;
        self
    }
}

/// Service-level return type to keep handlers thin.
///
/// Handlers map this into the HTTP DTO (TokenResponse).
#[derive(Clone)]
pub struct IssuedTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub id_token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
    pub refresh_expires_in: u64,
    pub remember_me: bool,
    pub access_jti: Uuid,
    pub refresh_token_id: Uuid,
    pub claims: AuthClaims,
}

impl std::fmt::Debug for IssuedTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Tokens are bearer secrets
        f.debug_struct("IssuedTokens")
            .field("expires_in", &self.expires_in)
            .field("refresh_expires_in", &self.refresh_expires_in)
            .field("remember_me", &self.remember_me)
            .field("access_jti", &self.access_jti)
            .finish_non_exhaustive()
    }
}

/// Orchestrates JWT issuance and refresh-token issuance/rotation/revocation.
///
/// - JwtIssuer signs access and ID tokens.
/// - RefreshTokenService owns opaque refresh tokens and their persistence.
#[derive(Clone)]
pub struct TokenService {
    jwt: JwtIssuer,
    refresh: RefreshTokenService,
    claims: ClaimsBuilder,
    principals: Arc<dyn PrincipalDirectory>,
    settings: Arc<dyn TokenSettingsSource>,
    sessions: Arc<dyn ImpersonationSessionStore>,
    defaults: TokenTtls,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("jwt", &self.jwt)
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    pub fn new(
        jwt: JwtIssuer,
        refresh: RefreshTokenService,
        claims: ClaimsBuilder,
        principals: Arc<dyn PrincipalDirectory>,
        settings: Arc<dyn TokenSettingsSource>,
        sessions: Arc<dyn ImpersonationSessionStore>,
        defaults: TokenTtls,
    ) -> Self {
        Self {
            jwt,
            refresh,
            claims,
            principals,
            settings,
            sessions,
            defaults,
        }
    }

    async fn lifetimes_for(&self, tenant_id: Option<Uuid>, remember_me: bool) -> TokenLifetimes {
        let ttls = match tenant_id {
            Some(tenant_id) => match self.settings.token_ttls(tenant_id).await {
                Ok(Some(ttls)) => ttls,
                Ok(None) => self.defaults,
                Err(e) => {
                    warn!(tenant_id = %tenant_id, error = %e, "tenant token settings unavailable, using defaults");
                    self.defaults
                }
            },
            None => self.defaults,
        };
        ttls.for_session(remember_me)
    }

    /// Sign access + ID tokens and persist a refresh token.
    ///
    /// Both JWTs are signed before the refresh row is written, so a signing failure
    /// leaves nothing behind.
    pub async fn issue_tokens(&self, req: IssueRequest) -> Result<IssuedTokens, AuthError> {
        let now = Utc::now();
        let lifetimes = self.lifetimes_for(req.tenant_id, req.remember_me).await;

        let mut claims = req.claims;
        claims.amr = req.method.amr();

        let access_token = self.jwt.sign(&self.registered(
            &claims,
            TokenUse::Access,
            req.access_jti,
            now,
            lifetimes.access_seconds,
        ))?;
        let id_token = self.jwt.sign(&self.registered(
            &claims,
            TokenUse::Id,
            Uuid::new_v4(),
            now,
            lifetimes.id_seconds,
        ))?;

        let grant = RefreshGrant {
            user_id: claims.sub,
            tenant_id: claims.tenant_id,
            remember_me: req.remember_me,
            mfa_verified: req.method == AuthMethod::PasswordAndOtp,
            impersonation_session_id: claims.impersonation_session_id,
            impersonated_by: claims.impersonated_by,
        };
        let refresh = self
            .refresh
            .issue(grant, lifetimes.refresh_seconds, now)
            .await?;

        debug!(user_id = %claims.sub, jti = %req.access_jti, method = ?req.method, "issued token bundle");

        Ok(IssuedTokens {
            access_token,
            refresh_token: refresh.token,
            id_token,
            token_type: "Bearer",
            expires_in: lifetimes.access_seconds,
            refresh_expires_in: lifetimes.refresh_seconds,
            remember_me: req.remember_me,
            access_jti: req.access_jti,
            refresh_token_id: refresh.id,
            claims,
        })
    }

    fn registered(
        &self,
        claims: &AuthClaims,
        token_use: TokenUse,
        jti: Uuid,
        now: DateTime<Utc>,
        ttl_seconds: u64,
    ) -> TokenClaims {
        let iat = now.timestamp();
        TokenClaims {
            iss: self.jwt.issuer().to_string(),
            aud: self.jwt.audience().to_string(),
            exp: iat + ttl_seconds as i64,
            iat,
            nbf: iat,
            jti,
            token_use,
            claims: claims.clone(),
        }
    }

    /// Exchange a refresh token for a new bundle.
    ///
    /// Revoke-then-issue: the presented token is revoked before anything new is
    /// minted, so it never validates again even if issuance fails below. Claims are
    /// rebuilt from current role assignments.
    pub async fn rotate_refresh_token(&self, refresh_token: &str) -> Result<IssuedTokens, AuthError> {
        let now: DateTime<Utc> = Utc::now();

        let row = self
            .refresh
            .consume(refresh_token, now)
            .await?
            .ok_or(AuthError::InvalidToken)?;

        let principal = self
            .principals
            .find_by_id(row.user_id)
            .await
            .map_err(|e| {
                error!(user_id = %row.user_id, error = %e, "failed to load principal for refresh");
                AuthError::Store
            })?
            .ok_or(AuthError::InvalidToken)?;

        if !principal.is_active() {
            info!(user_id = %principal.id, "refresh refused for inactive principal");
            return Err(AuthError::InvalidToken);
        }
        if principal.tenant_id() != row.tenant_id {
            warn!(user_id = %principal.id, "refresh token tenant no longer matches principal");
            return Err(AuthError::InvalidToken);
        }

        let mut claims = self.claims.build(&principal).await?;
        let access_jti = Uuid::new_v4();
        let method = match (row.impersonation_session_id, row.impersonated_by) {
            (Some(session_id), Some(impersonator)) => {
                // Only an active session accepts a new JTI.
                let recorded = self
                    .sessions
                    .record_token(session_id, access_jti, now)
                    .await
                    .map_err(|e| {
                        error!(session_id = %session_id, error = %e, "failed to record impersonation token");
                        AuthError::Store
                    })?;
                if !recorded {
                    info!(session_id = %session_id, "refresh refused for ended impersonation session");
                    return Err(AuthError::InvalidToken);
                }
                claims = claims.impersonated(impersonator, session_id);
                AuthMethod::Impersonation
            }
            _ if row.mfa_verified => AuthMethod::PasswordAndOtp,
            _ => AuthMethod::Password,
        };

        let issued = self
            .issue_tokens(
                IssueRequest::new(claims, row.remember_me, method).with_access_jti(access_jti),
            )
            .await?;

        // Lineage is bookkeeping only; the old token is already dead.
        if let Err(e) = self
            .refresh
            .link_replacement(row.id, issued.refresh_token_id)
            .await
        {
            warn!(id = %row.id, error = %e, "refresh token lineage not recorded");
        }

        Ok(issued)
    }

    /// Idempotent: unknown or already revoked tokens are not an error.
    pub async fn revoke_token(&self, refresh_token: &str) -> Result<(), AuthError> {
        self.refresh
            .revoke_by_token(refresh_token, Utc::now())
            .await
            .map(|_| ())
    }

    pub async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<u64, AuthError> {
        let n = self
            .refresh
            .revoke_all_for_user(user_id, Utc::now())
            .await?;
        info!(user_id = %user_id, revoked = n, "revoked all refresh tokens");
        Ok(n)
    }

    pub async fn revoke_for_impersonation_session(
        &self,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, AuthError> {
        self.refresh
            .revoke_for_impersonation_session(session_id, now)
            .await
    }

    /// Verify an access token presented as a bearer credential.
    pub fn verify_access_token(&self, token: &str) -> Result<TokenClaims, TokenVerifyError> {
        self.jwt.verify_strict(token, TokenUse::Access)
    }

    pub fn verify_id_token(&self, token: &str) -> Result<TokenClaims, TokenVerifyError> {
        self.jwt.verify_strict(token, TokenUse::Id)
    }
}
