//! Warehouse Storage - Store Trait, Guarded Store and Cache
//!
//! Defines the product store abstraction, the admission-controlled
//! in-memory store that implements it, and the cache-aside layer that
//! fronts it on the read path.

pub mod admission;
pub mod cache;
pub mod context;
pub mod guarded_store;
pub mod store;

pub use admission::{AdmissionGuard, AdmissionLock, AdmittedRead, AdmittedWrite};
pub use context::OpContext;
pub use guarded_store::{ConcurrencyGuardedStore, DEFAULT_ADMISSION_CAPACITY};
pub use store::{ProductStore, StoreStatistics};

// Re-export cache types for gateway integration
pub use cache::{
    CacheAside, CacheBackend, CacheConfig, CacheKey, CacheKeyKind, CacheRead, CacheStats,
    InMemoryCacheBackend, LmdbCacheBackend, LmdbCacheError, ReadSource,
};
