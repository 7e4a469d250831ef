//! In-process TTL cache backend.
//!
//! Expiry is measured on the tokio clock, so tests can pause time and
//! advance past a TTL without sleeping. Expired entries are evicted lazily
//! on the next read of their key.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;
use warehouse_core::CacheError;

use super::key::CacheKey;
use super::traits::{CacheBackend, CacheStats};
use crate::context::OpContext;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

/// Map-backed [`CacheBackend`].
#[derive(Debug, Default)]
pub struct InMemoryCacheBackend {
    entries: RwLock<HashMap<CacheKey, Entry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl InMemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remaining lifetime of a live entry.
    pub async fn ttl(&self, key: &CacheKey) -> Option<Duration> {
        let entries = self.entries.read().await;
        let entry = entries.get(key)?;
        entry.expires_at.checked_duration_since(Instant::now())
    }

    /// Number of stored entries, expired ones included until evicted.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

#[async_trait]
impl CacheBackend for InMemoryCacheBackend {
    async fn get(&self, ctx: &OpContext, key: &CacheKey) -> Result<Option<String>, CacheError> {
        let now = Instant::now();
        let expired = {
            let entries = ctx.run(self.entries.read()).await?;
            match entries.get(key) {
                Some(entry) if entry.expires_at > now => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(Some(entry.value.clone()));
                }
                Some(_) => true,
                None => false,
            }
        };

        if expired {
            let mut entries = ctx.run(self.entries.write()).await?;
            // A writer may have refreshed the entry between the two locks.
            if let Some(entry) = entries.get(key) {
                if entry.expires_at <= now {
                    entries.remove(key);
                } else {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(Some(entry.value.clone()));
                }
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }

    async fn set(
        &self,
        ctx: &OpContext,
        key: &CacheKey,
        value: String,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let mut entries = ctx.run(self.entries.write()).await?;
        entries.insert(
            key.clone(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn del(&self, ctx: &OpContext, key: &CacheKey) -> Result<(), CacheError> {
        let mut entries = ctx.run(self.entries.write()).await?;
        entries.remove(key);
        Ok(())
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        Ok(CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            errors: 0,
            entry_count: self.entries.read().await.len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warehouse_core::{PageRequest, ProductId};

    fn key(id: u64) -> CacheKey {
        CacheKey::entity(ProductId::new(id))
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_then_get_before_and_after_expiry() {
        let cache = InMemoryCacheBackend::new();
        let ctx = OpContext::background();

        cache
            .set(&ctx, &key(1), "v".to_string(), Duration::from_secs(600))
            .await
            .unwrap();
        assert_eq!(cache.get(&ctx, &key(1)).await.unwrap().as_deref(), Some("v"));

        tokio::time::advance(Duration::from_secs(599)).await;
        assert!(cache.get(&ctx, &key(1)).await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get(&ctx, &key(1)).await.unwrap(), None);
        assert!(cache.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_page_ttl_is_independent() {
        let cache = InMemoryCacheBackend::new();
        let ctx = OpContext::background();
        let page = CacheKey::page(PageRequest::new(1, 10));

        cache.set(&ctx, &key(1), "p".into(), Duration::from_secs(600)).await.unwrap();
        cache.set(&ctx, &page, "[]".into(), Duration::from_secs(60)).await.unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(cache.get(&ctx, &page).await.unwrap(), None);
        assert!(cache.get(&ctx, &key(1)).await.unwrap().is_some());
        assert!(cache.ttl(&key(1)).await.unwrap() <= Duration::from_secs(539));
    }

    #[tokio::test]
    async fn test_set_overwrites_and_del_removes() {
        let cache = InMemoryCacheBackend::new();
        let ctx = OpContext::background();
        let ttl = Duration::from_secs(60);

        cache.set(&ctx, &key(2), "a".into(), ttl).await.unwrap();
        cache.set(&ctx, &key(2), "b".into(), ttl).await.unwrap();
        assert_eq!(cache.get(&ctx, &key(2)).await.unwrap().as_deref(), Some("b"));

        cache.del(&ctx, &key(2)).await.unwrap();
        cache.del(&ctx, &key(2)).await.unwrap();
        assert_eq!(cache.get(&ctx, &key(2)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_stats_count_hits_and_misses() {
        let cache = InMemoryCacheBackend::new();
        let ctx = OpContext::background();
        cache.set(&ctx, &key(3), "x".into(), Duration::from_secs(60)).await.unwrap();

        cache.get(&ctx, &key(3)).await.unwrap();
        cache.get(&ctx, &key(4)).await.unwrap();

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entry_count, 1);
    }

    #[tokio::test]
    async fn test_cancelled_context_fails() {
        let cache = InMemoryCacheBackend::new();
        let ctx = OpContext::background();
        ctx.cancel();
        let err = cache.get(&ctx, &key(1)).await.unwrap_err();
        assert!(matches!(err, CacheError::Cancelled(_)));
    }
}
