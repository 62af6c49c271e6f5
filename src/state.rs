/*
 * Responsibility
 * - Router に紐づける共有コンテキスト (AppState)
 *   - auth services, rate limiter, audit queue, trusted proxies
 * - Clone 前提で持つ (内部は Arc/Clone cheap)
 */
use std::sync::Arc;

use crate::api::v1::extractors::client_meta::TrustedProxies;
use crate::services::audit::AuditQueue;
use crate::services::auth::AuthServices;
use crate::services::rate_limit::RateLimiter;

#[derive(Clone, Debug)]
pub struct AppState {
    pub auth: Arc<AuthServices>,
    pub rate_limiter: RateLimiter,
    pub audit: Arc<AuditQueue>,
    pub trusted_proxies: TrustedProxies,
}

impl AppState {
    pub fn new(auth: Arc<AuthServices>, rate_limiter: RateLimiter, audit: Arc<AuditQueue>) -> Self {
        Self {
            auth,
            rate_limiter,
            audit,
            trusted_proxies: TrustedProxies::default(),
        }
    }

    pub fn with_trusted_proxies(mut self, proxies: TrustedProxies) -> Self {
        self.trusted_proxies = proxies;
        self
    }
}
