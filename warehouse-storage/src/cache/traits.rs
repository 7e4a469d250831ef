//! Cache backend trait.
//!
//! Backends store opaque string values under typed [`CacheKey`]s with a
//! per-entry TTL. A miss is `Ok(None)`; `Err` is reserved for the backend
//! itself failing, which callers treat as "go to the store".

use std::time::Duration;

use async_trait::async_trait;
use warehouse_core::CacheError;

use super::key::CacheKey;
use crate::context::OpContext;

/// Cache backend trait for pluggable cache implementations.
///
/// Implementations must be safe to share across tasks. `set` overwrites
/// unconditionally and `del` of an absent key is not an error.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Look up a live entry. Expired entries are misses.
    async fn get(&self, ctx: &OpContext, key: &CacheKey) -> Result<Option<String>, CacheError>;

    /// Store `value` under `key`, replacing any previous entry.
    async fn set(
        &self,
        ctx: &OpContext,
        key: &CacheKey,
        value: String,
        ttl: Duration,
    ) -> Result<(), CacheError>;

    /// Remove `key` if present.
    async fn del(&self, ctx: &OpContext, key: &CacheKey) -> Result<(), CacheError>;

    /// Get cache statistics.
    async fn stats(&self) -> Result<CacheStats, CacheError>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses, expired entries included.
    pub misses: u64,
    /// Backend failures observed by callers.
    pub errors: u64,
    /// Number of entries currently stored, expired-but-unevicted included.
    pub entry_count: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
