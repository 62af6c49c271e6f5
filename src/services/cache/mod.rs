pub mod client;
pub mod memory;
pub mod valkey;

use async_trait::async_trait;
use std::time::Duration;
use tracing::{info, warn};

pub use client::{CacheClient, CacheError, CacheResult, Counter};
pub use memory::MemoryCache;
pub use valkey::ValkeyClient;

/// The cache backend selected at startup.
///
/// Callers hold this type and never learn which store is active.
#[derive(Clone, Debug)]
pub enum CacheBackend {
    Valkey(ValkeyClient),
    Memory(MemoryCache),
}

impl CacheBackend {
    /// Connect to Valkey when a URL is configured; otherwise (or on failure) fall back
    /// to the in-process cache with a background sweeper.
    pub async fn connect(url: Option<&str>, sweep_every: Duration) -> Self {
        if let Some(url) = url {
            match ValkeyClient::new(url).await {
                Ok(client) => {
                    info!("cache backend: valkey");
                    return Self::Valkey(client);
                }
                Err(e) => {
                    warn!(error = %e, "valkey unavailable, running with in-memory cache (degraded: per-process isolation only)");
                }
            }
        } else {
            warn!("VALKEY_URL not set, running with in-memory cache (degraded: per-process isolation only)");
        }

        let memory = MemoryCache::new();
        // Detached on purpose: the sweeper exits when the last cache clone is dropped.
        let _sweeper = memory.spawn_sweeper(sweep_every);
        Self::Memory(memory)
    }
}

impl From<MemoryCache> for CacheBackend {
    fn from(cache: MemoryCache) -> Self {
        Self::Memory(cache)
    }
}

impl From<ValkeyClient> for CacheBackend {
    fn from(client: ValkeyClient) -> Self {
        Self::Valkey(client)
    }
}

#[async_trait]
impl CacheClient for CacheBackend {
    fn backend_name(&self) -> &'static str {
        match self {
            Self::Valkey(c) => c.backend_name(),
            Self::Memory(c) => c.backend_name(),
        }
    }

    async fn get_string(&self, key: &str) -> CacheResult<Option<String>> {
        match self {
            Self::Valkey(c) => c.get_string(key).await,
            Self::Memory(c) => c.get_string(key).await,
        }
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        match self {
            Self::Valkey(c) => c.set_with_ttl(key, value, ttl).await,
            Self::Memory(c) => c.set_with_ttl(key, value, ttl).await,
        }
    }

    async fn set_if_absent_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> CacheResult<bool> {
        match self {
            Self::Valkey(c) => c.set_if_absent_with_ttl(key, value, ttl).await,
            Self::Memory(c) => c.set_if_absent_with_ttl(key, value, ttl).await,
        }
    }

    async fn take_string(&self, key: &str) -> CacheResult<Option<String>> {
        match self {
            Self::Valkey(c) => c.take_string(key).await,
            Self::Memory(c) => c.take_string(key).await,
        }
    }

    async fn del(&self, key: &str) -> CacheResult<u64> {
        match self {
            Self::Valkey(c) => c.del(key).await,
            Self::Memory(c) => c.del(key).await,
        }
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        match self {
            Self::Valkey(c) => c.exists(key).await,
            Self::Memory(c) => c.exists(key).await,
        }
    }

    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> CacheResult<Counter> {
        match self {
            Self::Valkey(c) => c.incr_with_ttl(key, ttl).await,
            Self::Memory(c) => c.incr_with_ttl(key, ttl).await,
        }
    }

    async fn ttl(&self, key: &str) -> CacheResult<Option<Duration>> {
        match self {
            Self::Valkey(c) => c.ttl(key).await,
            Self::Memory(c) => c.ttl(key).await,
        }
    }
}
