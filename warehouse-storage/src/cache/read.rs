//! Provenance of a cache-aside read.
//!
//! Reads go cache first, store on miss. The caller always learns which one
//! answered, and whether the cache was skipped because it failed, so a
//! degraded cache is never hidden behind a successful result.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Where a read was answered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadSource {
    /// A live cache entry.
    Cache,
    /// The store, after a cache miss.
    Store,
    /// The store, because the cache backend failed.
    Degraded,
}

/// Result of a cache-aside read.
#[derive(Debug, Clone)]
pub struct CacheRead<T> {
    value: T,
    source: ReadSource,
    read_at: DateTime<Utc>,
}

impl<T> CacheRead<T> {
    /// Create a new cache read from a cache hit.
    pub fn from_cache(value: T) -> Self {
        Self::new(value, ReadSource::Cache)
    }

    /// Create a new cache read from a store fetch after a miss.
    pub fn from_store(value: T) -> Self {
        Self::new(value, ReadSource::Store)
    }

    /// Create a new cache read from a store fetch that bypassed a failed cache.
    pub fn degraded(value: T) -> Self {
        Self::new(value, ReadSource::Degraded)
    }

    fn new(value: T, source: ReadSource) -> Self {
        Self {
            value,
            source,
            read_at: Utc::now(),
        }
    }

    /// Consume the wrapper and return the underlying value.
    pub fn into_value(self) -> T {
        self.value
    }

    /// Get a reference to the underlying value.
    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn source(&self) -> ReadSource {
        self.source
    }

    /// Check if this was a cache hit.
    pub fn was_cache_hit(&self) -> bool {
        self.source == ReadSource::Cache
    }

    /// Check if the cache backend failed during this read.
    pub fn was_degraded(&self) -> bool {
        self.source == ReadSource::Degraded
    }

    pub fn read_at(&self) -> DateTime<Utc> {
        self.read_at
    }

    /// Time elapsed since the read completed.
    pub fn age(&self) -> Duration {
        (Utc::now() - self.read_at).to_std().unwrap_or(Duration::ZERO)
    }

    /// Map the inner value to a new type.
    pub fn map<U, F>(self, f: F) -> CacheRead<U>
    where
        F: FnOnce(T) -> U,
    {
        CacheRead {
            value: f(self.value),
            source: self.source,
            read_at: self.read_at,
        }
    }
}

impl<T> AsRef<T> for CacheRead<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_read_from_cache() {
        let read = CacheRead::from_cache("v".to_string());
        assert!(read.was_cache_hit());
        assert!(!read.was_degraded());
        assert_eq!(read.source(), ReadSource::Cache);
        assert_eq!(read.value(), "v");
    }

    #[test]
    fn test_cache_read_from_store() {
        let read = CacheRead::from_store(42i32);
        assert!(!read.was_cache_hit());
        assert_eq!(read.into_value(), 42);
    }

    #[test]
    fn test_degraded_read_is_flagged() {
        let read = CacheRead::degraded(());
        assert!(read.was_degraded());
        assert!(!read.was_cache_hit());
    }

    #[test]
    fn test_cache_read_map_keeps_source() {
        let read = CacheRead::from_cache(42i32).map(|v| v.to_string());
        assert!(read.was_cache_hit());
        assert_eq!(read.into_value(), "42");
    }

    #[test]
    fn test_age_is_small() {
        let read = CacheRead::from_store(1u8);
        assert!(read.age() < Duration::from_secs(5));
    }
}
