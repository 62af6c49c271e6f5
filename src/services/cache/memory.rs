//! In-process cache used when Valkey is not configured or unreachable.
//!
//! Same `CacheClient` contract as the Valkey client, but isolation only holds
//! within one process. Expired entries are hidden on read and evicted by a
//! background sweeper.
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::services::cache::client::{CacheClient, CacheError, CacheResult, Counter};

#[derive(Clone, Debug)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    fn remaining(&self, now: Instant) -> Option<Duration> {
        self.expires_at.map(|at| at.saturating_duration_since(now))
    }
}

#[derive(Clone, Debug, Default)]
pub struct MemoryCache {
    entries: Arc<DashMap<String, Entry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn the background sweep. The task exits once every clone of the cache is dropped.
    pub fn spawn_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let entries: Weak<DashMap<String, Entry>> = Arc::downgrade(&self.entries);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let Some(entries) = entries.upgrade() else {
                    break;
                };
                let now = Instant::now();
                let before = entries.len();
                entries.retain(|_, e| !e.is_expired(now));
                let evicted = before.saturating_sub(entries.len());
                if evicted > 0 {
                    debug!(evicted, "memory cache sweep");
                }
            }
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn live(&self, key: &str, now: Instant) -> Option<Entry> {
        let entry = self.entries.get(key)?;
        if entry.is_expired(now) {
            return None;
        }
        Some(entry.clone())
    }
}

#[async_trait]
impl CacheClient for MemoryCache {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn get_string(&self, key: &str) -> CacheResult<Option<String>> {
        Ok(self.live(key, Instant::now()).map(|e| e.value))
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        let now = Instant::now();
        self.entries.insert(
            key.to_owned(),
            Entry {
                value: value.to_owned(),
                expires_at: Some(now + ttl),
            },
        );
        Ok(())
    }

    async fn set_if_absent_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> CacheResult<bool> {
        let now = Instant::now();
        let mut entry = self.entries.entry(key.to_owned()).or_insert_with(|| Entry {
            value: String::new(),
            expires_at: Some(now),
        });

        // A fresh placeholder expires at `now`, so it reads as absent too.
        if !entry.is_expired(now) {
            return Ok(false);
        }

        *entry = Entry {
            value: value.to_owned(),
            expires_at: Some(now + ttl),
        };
        Ok(true)
    }

    async fn take_string(&self, key: &str) -> CacheResult<Option<String>> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .filter(|(_, e)| !e.is_expired(now))
            .map(|(_, e)| e.value))
    }

    async fn del(&self, key: &str) -> CacheResult<u64> {
        let now = Instant::now();
        Ok(match self.entries.remove(key) {
            Some((_, e)) if !e.is_expired(now) => 1,
            _ => 0,
        })
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        Ok(self.live(key, Instant::now()).is_some())
    }

    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> CacheResult<Counter> {
        let now = Instant::now();
        // The entry guard holds the shard lock, so read-modify-write is atomic per key.
        let mut entry = self.entries.entry(key.to_owned()).or_insert_with(|| Entry {
            value: "0".to_owned(),
            expires_at: None,
        });

        if entry.is_expired(now) {
            *entry = Entry {
                value: "0".to_owned(),
                expires_at: None,
            };
        }

        let current: u64 = entry
            .value
            .parse()
            .map_err(|_| CacheError::InvalidValue(format!("non-integer counter at {key}")))?;
        let count = current + 1;
        entry.value = count.to_string();
        if count == 1 {
            entry.expires_at = Some(now + ttl);
        }

        Ok(Counter {
            count,
            ttl: entry.remaining(now).unwrap_or(ttl),
        })
    }

    async fn ttl(&self, key: &str) -> CacheResult<Option<Duration>> {
        let now = Instant::now();
        Ok(self.live(key, now).and_then(|e| e.remaining(now)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn incr_sets_ttl_only_on_first_increment() {
        let cache = MemoryCache::new();
        let window = Duration::from_secs(60);

        let first = cache.incr_with_ttl("k", window).await.unwrap();
        assert_eq!(first.count, 1);
        assert_eq!(first.ttl, window);

        tokio::time::advance(Duration::from_secs(20)).await;
        let second = cache.incr_with_ttl("k", window).await.unwrap();
        assert_eq!(second.count, 2);
        assert_eq!(second.ttl, Duration::from_secs(40));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_counter_restarts() {
        let cache = MemoryCache::new();
        let window = Duration::from_secs(10);

        cache.incr_with_ttl("k", window).await.unwrap();
        cache.incr_with_ttl("k", window).await.unwrap();
        tokio::time::advance(Duration::from_secs(11)).await;

        let again = cache.incr_with_ttl("k", window).await.unwrap();
        assert_eq!(again.count, 1);
    }

    #[tokio::test]
    async fn take_is_single_use() {
        let cache = MemoryCache::new();
        assert!(
            cache
                .set_if_absent_with_ttl("s", "v", Duration::from_secs(5))
                .await
                .unwrap()
        );
        assert!(
            !cache
                .set_if_absent_with_ttl("s", "w", Duration::from_secs(5))
                .await
                .unwrap()
        );

        assert_eq!(cache.take_string("s").await.unwrap().as_deref(), Some("v"));
        assert_eq!(cache.take_string("s").await.unwrap(), None);
        assert!(!cache.exists("s").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_evicts_expired_entries() {
        let cache = MemoryCache::new();
        let sweeper = cache.spawn_sweeper(Duration::from_secs(1));

        cache
            .set_with_ttl("short", "1", Duration::from_millis(500))
            .await
            .unwrap();
        cache
            .set_with_ttl("long", "1", Duration::from_secs(60))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(cache.len(), 1);
        assert!(cache.exists("long").await.unwrap());

        sweeper.abort();
    }
}
