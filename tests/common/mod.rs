//! In-memory fakes of every store trait plus a builder for the real services on top.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use tenant_auth::api::v1::extractors::client_meta::TrustedProxies;
use tenant_auth::repos::error::RepoResult;
use tenant_auth::services::audit::{AuditQueue, TracingAuditSink};
use tenant_auth::services::auth::claims::{Permission, Role, SystemRoleSource, TenantRoleSource};
use tenant_auth::services::auth::credentials::{Credential, CredentialStore, LockoutPolicy};
use tenant_auth::services::auth::impersonation::{
    ImpersonationSession, ImpersonationSessionStore, NewImpersonationSession,
};
use tenant_auth::services::auth::jwt::SigningKey;
use tenant_auth::services::auth::mfa::totp::{build_totp, generate_secret};
use tenant_auth::services::auth::mfa::{MfaEnrollmentStore, MfaFactorStore};
use tenant_auth::services::auth::password::{PasswordHashSettings, PasswordHasher};
use tenant_auth::services::auth::principal::{
    Principal, PrincipalDirectory, PrincipalKind, PrincipalStatus,
};
use tenant_auth::services::auth::refresh_token_issuer::{
    NewRefreshToken, RefreshTokenRecord, RefreshTokenStore,
};
use tenant_auth::services::auth::token_service::{TokenSettingsSource, TokenTtls};
use tenant_auth::services::auth::{AuthServices, AuthSettings, AuthStores, build_auth_services};
use tenant_auth::services::cache::{CacheBackend, CacheClient, MemoryCache};
use tenant_auth::services::rate_limit::{RateLimitPolicy, RateLimiter};
use tenant_auth::state::AppState;

pub const JWT_SECRET: &str = "integration-test-secret-0123456789abcdef";
pub const ISSUER: &str = "https://auth.test";
pub const AUDIENCE: &str = "tenant-api";

#[derive(Default)]
struct Tables {
    principals: HashMap<Uuid, Principal>,
    credentials: HashMap<Uuid, Credential>,
    system_roles: HashMap<Uuid, Vec<Role>>,
    system_role_permissions: HashMap<Uuid, Vec<Permission>>,
    tenant_roles: HashMap<(Uuid, Uuid), Vec<Role>>,
    tenant_role_permissions: HashMap<(Uuid, Uuid), Vec<Permission>>,
    refresh_tokens: Vec<(Vec<u8>, RefreshTokenRecord)>,
    impersonation: HashMap<Uuid, ImpersonationSession>,
    impersonation_tokens: HashMap<Uuid, Uuid>,
    totp_secrets: HashMap<Uuid, String>,
    pending_totp: HashMap<Uuid, String>,
    recovery_codes: HashMap<Uuid, Vec<(Vec<u8>, bool)>>,
    token_ttls: HashMap<Uuid, TokenTtls>,
}

/// One fake database implementing every store trait the services depend on.
#[derive(Default)]
pub struct FakeDb {
    tables: Mutex<Tables>,
}

impl FakeDb {
    fn with<R>(&self, f: impl FnOnce(&mut Tables) -> R) -> R {
        let mut tables = self.tables.lock().unwrap();
        f(&mut tables)
    }

    pub fn set_status(&self, user_id: Uuid, status: PrincipalStatus) {
        self.with(|t| {
            if let Some(p) = t.principals.get_mut(&user_id) {
                p.status = status;
            }
        });
    }

    pub fn set_token_ttls(&self, tenant_id: Uuid, ttls: TokenTtls) {
        self.with(|t| t.token_ttls.insert(tenant_id, ttls));
    }

    pub fn credential_of(&self, user_id: Uuid) -> Option<Credential> {
        self.with(|t| t.credentials.get(&user_id).cloned())
    }

    pub fn refresh_tokens_of(&self, user_id: Uuid) -> Vec<RefreshTokenRecord> {
        self.with(|t| {
            t.refresh_tokens
                .iter()
                .filter(|(_, r)| r.user_id == user_id)
                .map(|(_, r)| r.clone())
                .collect()
        })
    }

    pub fn principal(&self, user_id: Uuid) -> Option<Principal> {
        self.with(|t| t.principals.get(&user_id).cloned())
    }
}

#[async_trait]
impl PrincipalDirectory for FakeDb {
    async fn find_by_username(
        &self,
        username: &str,
        tenant_id: Option<Uuid>,
    ) -> RepoResult<Option<Principal>> {
        Ok(self.with(|t| {
            t.principals
                .values()
                .find(|p| p.username == username && p.tenant_id() == tenant_id)
                .cloned()
        }))
    }

    async fn find_by_id(&self, id: Uuid) -> RepoResult<Option<Principal>> {
        Ok(self.with(|t| t.principals.get(&id).cloned()))
    }
}

#[async_trait]
impl CredentialStore for FakeDb {
    async fn credential(&self, user_id: Uuid) -> RepoResult<Option<Credential>> {
        Ok(self.with(|t| t.credentials.get(&user_id).cloned()))
    }

    async fn record_failure(
        &self,
        user_id: Uuid,
        policy: &LockoutPolicy,
        now: DateTime<Utc>,
    ) -> RepoResult<Credential> {
        Ok(self.with(|t| {
            let c = t
                .credentials
                .get_mut(&user_id)
                .expect("credential exists for failing user");
            let lock_expired = c.locked_until.is_some_and(|until| until < now);
            let still_locked = c.locked_until.is_some_and(|until| until >= now);
            let attempts = if lock_expired {
                1
            } else {
                c.failed_login_attempts + 1
            };
            c.failed_login_attempts = attempts;
            c.locked_until = if still_locked {
                c.locked_until
            } else if attempts >= policy.threshold {
                Some(now + policy.duration)
            } else {
                None
            };
            c.clone()
        }))
    }

    async fn record_success(&self, user_id: Uuid) -> RepoResult<()> {
        self.with(|t| {
            if let Some(c) = t.credentials.get_mut(&user_id) {
                c.failed_login_attempts = 0;
                c.locked_until = None;
            }
        });
        Ok(())
    }
}

#[async_trait]
impl SystemRoleSource for FakeDb {
    async fn system_roles(&self, user_id: Uuid) -> RepoResult<Vec<Role>> {
        Ok(self.with(|t| t.system_roles.get(&user_id).cloned().unwrap_or_default()))
    }

    async fn system_role_permissions(&self, role_id: Uuid) -> RepoResult<Vec<Permission>> {
        Ok(self.with(|t| {
            t.system_role_permissions
                .get(&role_id)
                .cloned()
                .unwrap_or_default()
        }))
    }
}

#[async_trait]
impl TenantRoleSource for FakeDb {
    async fn tenant_roles(&self, tenant_id: Uuid, user_id: Uuid) -> RepoResult<Vec<Role>> {
        Ok(self.with(|t| {
            t.tenant_roles
                .get(&(tenant_id, user_id))
                .cloned()
                .unwrap_or_default()
        }))
    }

    async fn tenant_role_permissions(
        &self,
        tenant_id: Uuid,
        role_id: Uuid,
    ) -> RepoResult<Vec<Permission>> {
        Ok(self.with(|t| {
            t.tenant_role_permissions
                .get(&(tenant_id, role_id))
                .cloned()
                .unwrap_or_default()
        }))
    }
}

#[async_trait]
impl RefreshTokenStore for FakeDb {
    async fn insert(&self, token: NewRefreshToken) -> RepoResult<Uuid> {
        let id = Uuid::new_v4();
        self.with(|t| {
            t.refresh_tokens.push((
                token.token_hash,
                RefreshTokenRecord {
                    id,
                    user_id: token.user_id,
                    tenant_id: token.tenant_id,
                    issued_at: token.issued_at,
                    expires_at: token.expires_at,
                    remember_me: token.remember_me,
                    mfa_verified: token.mfa_verified,
                    revoked_at: None,
                    replaced_by: None,
                    impersonation_session_id: token.impersonation_session_id,
                    impersonated_by: token.impersonated_by,
                },
            ))
        });
        Ok(id)
    }

    async fn revoke_active_by_hash(
        &self,
        token_hash: &[u8],
        now: DateTime<Utc>,
    ) -> RepoResult<Option<RefreshTokenRecord>> {
        Ok(self.with(|t| {
            t.refresh_tokens
                .iter_mut()
                .find(|(h, r)| h == token_hash && r.is_active(now))
                .map(|(_, r)| {
                    r.revoked_at = Some(now);
                    r.clone()
                })
        }))
    }

    async fn set_replaced_by(&self, id: Uuid, replaced_by: Uuid) -> RepoResult<u64> {
        Ok(self.with(|t| {
            t.refresh_tokens
                .iter_mut()
                .filter(|(_, r)| r.id == id)
                .map(|(_, r)| r.replaced_by = Some(replaced_by))
                .count() as u64
        }))
    }

    async fn revoke_all_for_user(&self, user_id: Uuid, now: DateTime<Utc>) -> RepoResult<u64> {
        Ok(self.with(|t| {
            t.refresh_tokens
                .iter_mut()
                .filter(|(_, r)| r.user_id == user_id && r.revoked_at.is_none())
                .map(|(_, r)| r.revoked_at = Some(now))
                .count() as u64
        }))
    }

    async fn revoke_for_impersonation_session(
        &self,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> RepoResult<u64> {
        Ok(self.with(|t| {
            t.refresh_tokens
                .iter_mut()
                .filter(|(_, r)| {
                    r.impersonation_session_id == Some(session_id) && r.revoked_at.is_none()
                })
                .map(|(_, r)| r.revoked_at = Some(now))
                .count() as u64
        }))
    }
}

#[async_trait]
impl ImpersonationSessionStore for FakeDb {
    async fn insert(&self, s: NewImpersonationSession) -> RepoResult<ImpersonationSession> {
        let session = ImpersonationSession {
            id: s.id,
            impersonator_id: s.impersonator_id,
            target_user_id: s.target_user_id,
            tenant_id: s.tenant_id,
            started_at: s.started_at,
            ended_at: None,
            ended_by: None,
            token_jti: Some(s.token_jti),
            reason: s.reason,
            metadata: s.metadata,
        };
        self.with(|t| {
            t.impersonation_tokens.insert(s.token_jti, session.id);
            t.impersonation.insert(session.id, session.clone())
        });
        Ok(session)
    }

    async fn find(&self, id: Uuid) -> RepoResult<Option<ImpersonationSession>> {
        Ok(self.with(|t| t.impersonation.get(&id).cloned()))
    }

    async fn find_by_jti(&self, jti: Uuid) -> RepoResult<Option<ImpersonationSession>> {
        Ok(self.with(|t| {
            t.impersonation_tokens
                .get(&jti)
                .and_then(|id| t.impersonation.get(id))
                .cloned()
        }))
    }

    async fn record_token(&self, id: Uuid, jti: Uuid, _now: DateTime<Utc>) -> RepoResult<bool> {
        Ok(self.with(|t| {
            let Some(session) = t.impersonation.get_mut(&id).filter(|s| s.ended_at.is_none())
            else {
                return false;
            };
            session.token_jti = Some(jti);
            t.impersonation_tokens.insert(jti, id);
            true
        }))
    }

    async fn end(
        &self,
        id: Uuid,
        ended_by: Uuid,
        now: DateTime<Utc>,
    ) -> RepoResult<Option<ImpersonationSession>> {
        Ok(self.with(|t| {
            t.impersonation
                .get_mut(&id)
                .filter(|s| s.ended_at.is_none())
                .map(|s| {
                    s.ended_at = Some(now);
                    s.ended_by = Some(ended_by);
                    s.clone()
                })
        }))
    }

    async fn active_for_impersonator(
        &self,
        impersonator_id: Uuid,
    ) -> RepoResult<Vec<ImpersonationSession>> {
        Ok(self.with(|t| {
            t.impersonation
                .values()
                .filter(|s| s.impersonator_id == impersonator_id && s.ended_at.is_none())
                .cloned()
                .collect()
        }))
    }
}

#[async_trait]
impl MfaFactorStore for FakeDb {
    async fn totp_secret(&self, user_id: Uuid) -> RepoResult<Option<String>> {
        Ok(self.with(|t| t.totp_secrets.get(&user_id).cloned()))
    }

    async fn consume_recovery_code(
        &self,
        user_id: Uuid,
        code_hash: &[u8],
        _now: DateTime<Utc>,
    ) -> RepoResult<bool> {
        Ok(self.with(|t| {
            t.recovery_codes
                .get_mut(&user_id)
                .and_then(|codes| {
                    codes
                        .iter_mut()
                        .find(|(hash, used)| !*used && hash.as_slice() == code_hash)
                })
                .map(|(_, used)| *used = true)
                .is_some()
        }))
    }
}

#[async_trait]
impl MfaEnrollmentStore for FakeDb {
    async fn save_pending_totp(
        &self,
        user_id: Uuid,
        secret: &str,
        _now: DateTime<Utc>,
    ) -> RepoResult<()> {
        self.with(|t| t.pending_totp.insert(user_id, secret.to_string()));
        Ok(())
    }

    async fn pending_totp(&self, user_id: Uuid) -> RepoResult<Option<String>> {
        Ok(self.with(|t| t.pending_totp.get(&user_id).cloned()))
    }

    async fn activate_totp(
        &self,
        user_id: Uuid,
        recovery_code_hashes: &[Vec<u8>],
        _now: DateTime<Utc>,
    ) -> RepoResult<()> {
        self.with(|t| {
            if let Some(secret) = t.pending_totp.remove(&user_id) {
                t.totp_secrets.insert(user_id, secret);
            }
            if let Some(p) = t.principals.get_mut(&user_id) {
                p.mfa_enabled = true;
            }
            t.recovery_codes.insert(
                user_id,
                recovery_code_hashes.iter().map(|h| (h.clone(), false)).collect(),
            );
        });
        Ok(())
    }

    async fn replace_recovery_codes(
        &self,
        user_id: Uuid,
        recovery_code_hashes: &[Vec<u8>],
        _now: DateTime<Utc>,
    ) -> RepoResult<()> {
        self.with(|t| {
            t.recovery_codes.insert(
                user_id,
                recovery_code_hashes.iter().map(|h| (h.clone(), false)).collect(),
            )
        });
        Ok(())
    }
}

#[async_trait]
impl TokenSettingsSource for FakeDb {
    async fn token_ttls(&self, tenant_id: Uuid) -> RepoResult<Option<TokenTtls>> {
        Ok(self.with(|t| t.token_ttls.get(&tenant_id).copied()))
    }
}

/// Real services over `FakeDb`, with the given cache.
pub struct TestEnv<C: CacheClient> {
    pub db: Arc<FakeDb>,
    pub services: AuthServices<C>,
    pub audit: Arc<AuditQueue>,
    pub settings: AuthSettings,
    pub cache: C,
}

pub fn settings() -> AuthSettings {
    AuthSettings {
        signing_key: SigningKey::Hs256 {
            secret: JWT_SECRET.to_string(),
        },
        issuer: ISSUER.to_string(),
        audience: AUDIENCE.to_string(),
        leeway_seconds: 0,
        token_ttls: TokenTtls::default(),
        mfa_session_ttl: ChronoDuration::minutes(5),
        totp_issuer: "TenantAuthTest".to_string(),
        lockout: LockoutPolicy::default(),
        password_pepper: None,
        // Cheap parameters keep tests fast; production uses the crate defaults.
        password_hash: PasswordHashSettings {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        },
    }
}

pub fn stores(db: &Arc<FakeDb>) -> AuthStores {
    AuthStores {
        principals: db.clone(),
        credentials: db.clone(),
        system_roles: db.clone(),
        tenant_roles: db.clone(),
        refresh_tokens: db.clone(),
        impersonation: db.clone(),
        mfa_factors: db.clone(),
        mfa_enrollment: db.clone(),
        token_settings: db.clone(),
    }
}

pub fn env_with<C: CacheClient + Clone>(cache: C) -> TestEnv<C> {
    let db = Arc::new(FakeDb::default());
    let audit = Arc::new(AuditQueue::start(Arc::new(TracingAuditSink), 64, 1));
    let settings = settings();
    let services = build_auth_services(&settings, stores(&db), cache.clone(), audit.clone())
        .expect("services build");
    TestEnv {
        db,
        services,
        audit,
        settings,
        cache,
    }
}

pub fn env() -> TestEnv<MemoryCache> {
    env_with(MemoryCache::new())
}

impl<C: CacheClient> TestEnv<C> {
    pub fn hasher(&self) -> &PasswordHasher {
        &self.services.hasher
    }

    pub fn add_principal(&self, username: &str, password: &str, kind: PrincipalKind) -> Principal {
        let principal = Principal {
            id: Uuid::new_v4(),
            username: username.to_string(),
            email: format!("{username}@example.com"),
            kind,
            status: PrincipalStatus::Active,
            mfa_enabled: false,
        };
        let hash = self.hasher().hash_blocking(password).expect("hash");
        self.db.with(|t| {
            t.principals.insert(principal.id, principal.clone());
            t.credentials.insert(
                principal.id,
                Credential {
                    user_id: principal.id,
                    password_hash: hash,
                    failed_login_attempts: 0,
                    locked_until: None,
                },
            );
        });
        principal
    }

    pub fn add_tenant_user(&self, username: &str, password: &str, tenant_id: Uuid) -> Principal {
        self.add_principal(username, password, PrincipalKind::Tenant { tenant_id })
    }

    pub fn add_system_user(&self, username: &str, password: &str) -> Principal {
        self.add_principal(username, password, PrincipalKind::System)
    }

    /// Give `user_id` a SYSTEM role granting `permissions` (`resource:action`).
    pub fn grant_system_role(&self, user_id: Uuid, role: &str, permissions: &[(&str, &str)]) {
        let role = Role {
            id: Uuid::new_v4(),
            name: role.to_string(),
        };
        let perms = permissions
            .iter()
            .map(|(r, a)| Permission::new(*r, *a))
            .collect();
        self.db.with(|t| {
            t.system_role_permissions.insert(role.id, perms);
            t.system_roles.entry(user_id).or_default().push(role);
        });
    }

    pub fn grant_tenant_role(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        role: &str,
        permissions: &[(&str, &str)],
    ) {
        let role = Role {
            id: Uuid::new_v4(),
            name: role.to_string(),
        };
        let perms = permissions
            .iter()
            .map(|(r, a)| Permission::new(*r, *a))
            .collect();
        self.db.with(|t| {
            t.tenant_role_permissions.insert((tenant_id, role.id), perms);
            t.tenant_roles
                .entry((tenant_id, user_id))
                .or_default()
                .push(role);
        });
    }

    /// Turn on TOTP for `user_id` with a fresh secret and the given recovery code hashes.
    pub fn enable_mfa(&self, user_id: Uuid, recovery_hashes: Vec<Vec<u8>>) -> String {
        let secret = generate_secret();
        self.db.with(|t| {
            t.totp_secrets.insert(user_id, secret.clone());
            t.recovery_codes
                .insert(user_id, recovery_hashes.into_iter().map(|h| (h, false)).collect());
            if let Some(p) = t.principals.get_mut(&user_id) {
                p.mfa_enabled = true;
            }
        });
        secret
    }
}

pub fn totp_now(secret: &str) -> String {
    build_totp(secret, "test", "user")
        .expect("totp")
        .generate(Utc::now().timestamp() as u64)
}

/// Router state over a memory-backed `CacheBackend`.
/// Peer address the HTTP tests' requests arrive from; trusted as a reverse proxy.
pub const PROXY_IP: IpAddr = IpAddr::V4(std::net::Ipv4Addr::LOCALHOST);

pub fn http_env(policy: RateLimitPolicy) -> (TestEnv<CacheBackend>, AppState) {
    let env = env_with(CacheBackend::from(MemoryCache::new()));
    let state = AppState::new(
        Arc::new(env.services.clone()),
        RateLimiter::new(env.cache.clone(), policy),
        env.audit.clone(),
    )
    .with_trusted_proxies(TrustedProxies::new([PROXY_IP]));
    (env, state)
}
