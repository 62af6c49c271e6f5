/// Factory: wire the auth services from settings and store implementations.
use chrono::Duration as ChronoDuration;
use sqlx::PgPool;
use std::sync::Arc;

use crate::config::Config;
use crate::repos::{
    CredentialRepo, ImpersonationRepo, MfaRepo, PrincipalRepo, RefreshTokenRepo, RoleRepo,
    TenantSettingsRepo,
};
use crate::services::audit::AuditQueue;
use crate::services::auth::claims::{ClaimsBuilder, SystemRoleSource, TenantRoleSource};
use crate::services::auth::credentials::{CredentialStore, CredentialVerifier, LockoutPolicy};
use crate::services::auth::error::AuthError;
use crate::services::auth::impersonation::{ImpersonationManager, ImpersonationSessionStore};
use crate::services::auth::jwt::{JwtIssuer, SigningKey};
use crate::services::auth::login::LoginService;
use crate::services::auth::mfa::{
    MfaChallengeManager, MfaEnrollmentService, MfaEnrollmentStore, MfaFactorStore,
};
use crate::services::auth::password::{PasswordHashSettings, PasswordHasher};
use crate::services::auth::principal::PrincipalDirectory;
use crate::services::auth::refresh_token_issuer::{RefreshTokenService, RefreshTokenStore};
use crate::services::auth::token_service::{TokenService, TokenSettingsSource, TokenTtls};
use crate::services::cache::{CacheBackend, CacheClient};

/// Every store the auth services read or write.
#[derive(Clone)]
pub struct AuthStores {
    pub principals: Arc<dyn PrincipalDirectory>,
    pub credentials: Arc<dyn CredentialStore>,
    pub system_roles: Arc<dyn SystemRoleSource>,
    pub tenant_roles: Arc<dyn TenantRoleSource>,
    pub refresh_tokens: Arc<dyn RefreshTokenStore>,
    pub impersonation: Arc<dyn ImpersonationSessionStore>,
    pub mfa_factors: Arc<dyn MfaFactorStore>,
    pub mfa_enrollment: Arc<dyn MfaEnrollmentStore>,
    pub token_settings: Arc<dyn TokenSettingsSource>,
}

impl AuthStores {
    pub fn postgres(pool: PgPool) -> Self {
        let roles = Arc::new(RoleRepo::new(pool.clone()));
        let mfa = Arc::new(MfaRepo::new(pool.clone()));
        Self {
            principals: Arc::new(PrincipalRepo::new(pool.clone())),
            credentials: Arc::new(CredentialRepo::new(pool.clone())),
            system_roles: roles.clone(),
            tenant_roles: roles,
            refresh_tokens: Arc::new(RefreshTokenRepo::new(pool.clone())),
            impersonation: Arc::new(ImpersonationRepo::new(pool.clone())),
            mfa_factors: mfa.clone(),
            mfa_enrollment: mfa,
            token_settings: Arc::new(TenantSettingsRepo::new(pool)),
        }
    }
}

/// The subset of `Config` the auth services need.
#[derive(Clone, Debug)]
pub struct AuthSettings {
    pub signing_key: SigningKey,
    pub issuer: String,
    pub audience: String,
    pub leeway_seconds: u64,
    pub token_ttls: TokenTtls,
    pub mfa_session_ttl: ChronoDuration,
    pub totp_issuer: String,
    pub lockout: LockoutPolicy,
    pub password_pepper: Option<Vec<u8>>,
    pub password_hash: PasswordHashSettings,
}

impl AuthSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            signing_key: config.signing_key.clone(),
            issuer: config.auth_issuer.clone(),
            audience: config.auth_audience.clone(),
            leeway_seconds: config.access_token_leeway_seconds,
            token_ttls: config.token_ttls,
            mfa_session_ttl: config.mfa_session_ttl,
            totp_issuer: config.mfa_totp_issuer.clone(),
            lockout: config.lockout,
            password_pepper: config.password_pepper.as_ref().map(|p| p.as_bytes().to_vec()),
            password_hash: PasswordHashSettings::default(),
        }
    }
}

#[derive(Clone)]
pub struct AuthServices<C = CacheBackend>
where
    C: CacheClient,
{
    pub login: LoginService<C>,
    pub tokens: TokenService,
    pub impersonation: ImpersonationManager,
    pub mfa_enrollment: MfaEnrollmentService,
    pub principals: Arc<dyn PrincipalDirectory>,
    pub hasher: PasswordHasher,
}

impl<C: CacheClient> std::fmt::Debug for AuthServices<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthServices")
            .field("login", &self.login)
            .field("tokens", &self.tokens)
            .finish_non_exhaustive()
    }
}

pub fn build_auth_services<C: CacheClient>(
    settings: &AuthSettings,
    stores: AuthStores,
    cache: C,
    audit: Arc<AuditQueue>,
) -> Result<AuthServices<C>, AuthError> {
    let jwt = JwtIssuer::new(
        &settings.signing_key,
        settings.issuer.clone(),
        settings.audience.clone(),
        settings.leeway_seconds,
    )?;
    let hasher = PasswordHasher::new(settings.password_pepper.clone(), settings.password_hash)?;

    let claims = ClaimsBuilder::new(stores.system_roles.clone(), stores.tenant_roles.clone());
    let tokens = TokenService::new(
        jwt,
        RefreshTokenService::new(stores.refresh_tokens.clone()),
        claims.clone(),
        stores.principals.clone(),
        stores.token_settings.clone(),
        stores.impersonation.clone(),
        settings.token_ttls,
    );
    let verifier = CredentialVerifier::new(
        stores.principals.clone(),
        stores.credentials.clone(),
        hasher.clone(),
        settings.lockout,
    );
    let mfa = MfaChallengeManager::new(cache, stores.mfa_factors.clone(), settings.mfa_session_ttl);

    let login = LoginService::new(
        verifier,
        mfa,
        claims.clone(),
        tokens.clone(),
        stores.principals.clone(),
        audit,
    );
    let impersonation = ImpersonationManager::new(
        stores.principals.clone(),
        claims,
        tokens.clone(),
        stores.impersonation.clone(),
    );
    let mfa_enrollment =
        MfaEnrollmentService::new(stores.mfa_enrollment.clone(), settings.totp_issuer.clone());

    Ok(AuthServices {
        login,
        tokens,
        impersonation,
        mfa_enrollment,
        principals: stores.principals,
        hasher,
    })
}
