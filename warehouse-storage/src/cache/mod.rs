//! Cache layer: typed keys, TTL backends and the cache-aside read path.
//!
//! Two key classes exist. Product entries live long and are refreshed or
//! invalidated by every applied mutation. List pages live briefly and are
//! never invalidated; a deleted product can stay visible in a page until
//! that page's TTL lapses.
//!
//! # Example
//!
//! ```ignore
//! let cache = CacheAside::new(Arc::new(InMemoryCacheBackend::new()), CacheConfig::default());
//! let key = CacheKey::entity(id);
//! let read = cache
//!     .read_through(&ctx, &key, || store.get_product_by_id(&ctx, id))
//!     .await?;
//! if read.was_degraded() {
//!     tracing::warn!("served without cache");
//! }
//! ```

pub mod aside;
pub mod key;
pub mod lmdb_backend;
pub mod memory;
pub mod read;
pub mod traits;

pub use aside::{CacheAside, CacheConfig};
pub use key::{CacheKey, CacheKeyKind};
pub use lmdb_backend::{LmdbCacheBackend, LmdbCacheError};
pub use memory::InMemoryCacheBackend;
pub use read::{CacheRead, ReadSource};
pub use traits::{CacheBackend, CacheStats};
