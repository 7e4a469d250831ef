//! Cache-aside layer.
//!
//! Reads check the cache first and fall back to a loader (normally the
//! store) on a miss, then populate the cache with the loaded value. Writers
//! call [`CacheAside::put`] and [`CacheAside::invalidate`] after a store
//! mutation commits.
//!
//! The cache is never a source of truth. Any backend failure during a read
//! is logged, counted, and answered from the loader; the read result says
//! so through [`CacheRead::was_degraded`].

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};
use warehouse_core::{CacheError, StoreError, WarehouseConfig};

use super::key::{CacheKey, CacheKeyKind};
use super::read::CacheRead;
use super::traits::{CacheBackend, CacheStats};
use crate::context::OpContext;

/// TTLs for the two key classes, and the deadline for a single backend call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// TTL for single-product entries.
    pub entity_ttl: Duration,
    /// TTL for list pages. Pages are never invalidated explicitly, so this
    /// bounds how long a deleted product can linger in a list.
    pub page_ttl: Duration,
    /// Upper bound on each backend call. A backend that stops answering
    /// costs a read at most this much before it falls back to the loader.
    pub timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            entity_ttl: Duration::from_secs(600),
            page_ttl: Duration::from_secs(60),
            timeout: Duration::from_millis(10),
        }
    }
}

impl CacheConfig {
    /// Create a new cache config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &WarehouseConfig) -> Self {
        Self {
            entity_ttl: config.entity_ttl,
            page_ttl: config.page_ttl,
            timeout: config.cache_timeout,
        }
    }

    /// Set the entity TTL.
    pub fn with_entity_ttl(mut self, ttl: Duration) -> Self {
        self.entity_ttl = ttl;
        self
    }

    /// Set the page TTL.
    pub fn with_page_ttl(mut self, ttl: Duration) -> Self {
        self.page_ttl = ttl;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn ttl_for(&self, key: &CacheKey) -> Duration {
        match key.kind() {
            CacheKeyKind::Entity => self.entity_ttl,
            CacheKeyKind::Page => self.page_ttl,
        }
    }
}

/// Cache-aside access to a [`CacheBackend`].
pub struct CacheAside {
    backend: Arc<dyn CacheBackend>,
    config: CacheConfig,
    errors: AtomicU64,
}

impl CacheAside {
    pub fn new(backend: Arc<dyn CacheBackend>, config: CacheConfig) -> Self {
        Self {
            backend,
            config,
            errors: AtomicU64::new(0),
        }
    }

    /// Create a new cache-aside layer with default TTLs.
    pub fn with_defaults(backend: Arc<dyn CacheBackend>) -> Self {
        Self::new(backend, CacheConfig::default())
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    fn record_error(&self, key: &CacheKey, op: &'static str, err: &CacheError) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        warn!(cache_key = %key, op, error = %err, "Cache operation failed");
    }

    /// Each backend call runs under a child of `ctx` capped at
    /// [`CacheConfig::timeout`], whether or not the backend honours it.
    fn call_context(&self, ctx: &OpContext) -> OpContext {
        ctx.child_with_timeout(self.config.timeout)
    }

    /// Read `key` from the cache, or run `load` and populate the cache.
    ///
    /// Loader errors are returned as-is. Cache errors never are. The cache
    /// lookup only spends its own short deadline, so `load` should bound its
    /// store call with a deadline taken when it starts, not one shared with
    /// the lookup.
    pub async fn read_through<T, F, Fut>(
        &self,
        ctx: &OpContext,
        key: &CacheKey,
        load: F,
    ) -> Result<CacheRead<T>, StoreError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let call = self.call_context(ctx);
        let lookup = call
            .run(self.backend.get(&call, key))
            .await
            .map_err(CacheError::from)
            .and_then(|result| result);

        let degraded = match lookup {
            Ok(Some(raw)) => match serde_json::from_str::<T>(&raw) {
                Ok(value) => {
                    debug!(cache_key = %key, "Cache hit");
                    return Ok(CacheRead::from_cache(value));
                }
                Err(e) => {
                    // Overwritten below once the loader answers.
                    let err = CacheError::Serialization {
                        reason: e.to_string(),
                    };
                    self.record_error(key, "decode", &err);
                    false
                }
            },
            Ok(None) => false,
            Err(err) => {
                self.record_error(key, "get", &err);
                true
            }
        };

        let value = load().await?;

        if degraded {
            return Ok(CacheRead::degraded(value));
        }

        if let Err(err) = self.put(ctx, key, &value).await {
            self.record_error(key, "set", &err);
        }
        Ok(CacheRead::from_store(value))
    }

    /// Serialize `value` and store it under `key` with the key's TTL class.
    pub async fn put<T: Serialize + ?Sized>(
        &self,
        ctx: &OpContext,
        key: &CacheKey,
        value: &T,
    ) -> Result<(), CacheError> {
        let raw = serde_json::to_string(value).map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })?;
        let call = self.call_context(ctx);
        call.run(self.backend.set(&call, key, raw, self.config.ttl_for(key)))
            .await?
    }

    /// Remove `key` from the cache.
    pub async fn invalidate(&self, ctx: &OpContext, key: &CacheKey) -> Result<(), CacheError> {
        let call = self.call_context(ctx);
        call.run(self.backend.del(&call, key)).await?
    }

    /// Backend statistics plus failures observed by this layer.
    ///
    /// If the backend cannot report in time, its counters read as zero.
    pub async fn stats(&self) -> CacheStats {
        let call = self.call_context(&OpContext::background());
        let mut stats = match call.run(self.backend.stats()).await {
            Ok(Ok(stats)) => stats,
            _ => CacheStats::default(),
        };
        stats.errors += self.errors.load(Ordering::Relaxed);
        stats
    }
}

// =============================================================================
// TESTS
// =============================================================================
