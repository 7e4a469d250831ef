//! In-memory product store behind an admission-controlled lock.
//!
//! At most `capacity` callers may be waiting on or holding the lock at
//! once. Reads take it shared, writes exclusive. Ids come from an atomic
//! counter bumped before the lock is taken, so a create that times out
//! waiting still consumes its id; ids are never reused.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tracing::debug;
use warehouse_core::{PageRequest, Product, ProductId, StoreError, WarehouseConfig, DEFAULT_PAGE_SIZE};

use crate::admission::AdmissionLock;
use crate::context::OpContext;
use crate::store::{ProductStore, StoreStatistics};

/// Default number of admission slots.
pub const DEFAULT_ADMISSION_CAPACITY: usize = 10;

/// Thread-safe in-memory [`ProductStore`].
#[derive(Debug)]
pub struct ConcurrencyGuardedStore {
    products: AdmissionLock<BTreeMap<ProductId, Product>>,
    last_id: AtomicU64,
    default_page_size: u64,
}

impl ConcurrencyGuardedStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_ADMISSION_CAPACITY, DEFAULT_PAGE_SIZE)
    }

    pub fn with_capacity(capacity: usize, default_page_size: u64) -> Self {
        Self {
            products: AdmissionLock::new(BTreeMap::new(), capacity),
            last_id: AtomicU64::new(0),
            default_page_size,
        }
    }

    pub fn from_config(config: &WarehouseConfig) -> Self {
        Self::with_capacity(config.admission_capacity, config.default_page_size)
    }

    fn next_id(&self) -> ProductId {
        ProductId::new(self.last_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Number of stored products.
    pub async fn len(&self, ctx: &OpContext) -> Result<usize, StoreError> {
        let products = self.products.read(ctx).await?;
        Ok(products.len())
    }

    pub async fn is_empty(&self, ctx: &OpContext) -> Result<bool, StoreError> {
        Ok(self.len(ctx).await? == 0)
    }

    pub async fn statistics(&self, ctx: &OpContext) -> Result<StoreStatistics, StoreError> {
        let product_count = self.len(ctx).await?;
        Ok(StoreStatistics {
            product_count,
            last_assigned_id: ProductId::new(self.last_id.load(Ordering::SeqCst)),
            admission_capacity: self.products.capacity(),
            available_slots: self.products.available_slots(),
        })
    }
}

impl Default for ConcurrencyGuardedStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProductStore for ConcurrencyGuardedStore {
    async fn get_product_by_id(&self, ctx: &OpContext, id: ProductId) -> Result<Product, StoreError> {
        let products = self.products.read(ctx).await?;
        products.get(&id).cloned().ok_or(StoreError::NotFound { id })
    }

    async fn get_all_products(
        &self,
        ctx: &OpContext,
        page: u64,
        size: u64,
    ) -> Result<Vec<Product>, StoreError> {
        let request = PageRequest::with_default_size(page, size, self.default_page_size);
        let products = self.products.read(ctx).await?;
        let start = request.offset().min(products.len() as u64) as usize;
        // BTreeMap iterates in ascending id order.
        Ok(products
            .values()
            .skip(start)
            .take(request.size().min(usize::MAX as u64) as usize)
            .cloned()
            .collect())
    }

    async fn create_product(&self, ctx: &OpContext, product: Product) -> Result<Product, StoreError> {
        if product.id().is_assigned() {
            return Err(StoreError::IdAlreadySet { id: product.id() });
        }

        let id = self.next_id();
        let mut products = self.products.write(ctx).await?;
        if products.contains_key(&id) {
            return Err(StoreError::AlreadyExists { id });
        }

        let stored = product.assigned(id);
        products.insert(id, stored.clone());
        debug!(product_id = %id, "Product created");
        Ok(stored)
    }

    async fn update_product(&self, ctx: &OpContext, product: Product) -> Result<Product, StoreError> {
        let id = product.id();
        let mut products = self.products.write(ctx).await?;
        match products.get_mut(&id) {
            Some(existing) => {
                *existing = product.clone();
                Ok(product)
            }
            None => Err(StoreError::NotFound { id }),
        }
    }

    async fn delete_product(&self, ctx: &OpContext, id: ProductId) -> Result<(), StoreError> {
        let mut products = self.products.write(ctx).await?;
        products
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound { id })
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use warehouse_core::CancelReason;

    fn product(name: &str) -> Product {
        Product::new(name, 1, 1).unwrap()
    }

    #[tokio::test]
    async fn test_create_assigns_increasing_ids() {
        let store = ConcurrencyGuardedStore::new();
        let ctx = OpContext::background();

        let a = store.create_product(&ctx, product("a")).await.unwrap();
        let b = store.create_product(&ctx, product("b")).await.unwrap();
        assert_eq!(a.id(), ProductId::new(1));
        assert_eq!(b.id(), ProductId::new(2));
        assert_eq!(a.name(), "a");
    }

    #[tokio::test]
    async fn test_create_rejects_preset_id() {
        let store = ConcurrencyGuardedStore::new();
        let ctx = OpContext::background();
        let preset = Product::with_id(ProductId::new(5), "x", 1, 1).unwrap();

        let err = store.create_product(&ctx, preset).await.unwrap_err();
        assert_eq!(err, StoreError::IdAlreadySet { id: ProductId::new(5) });
        assert!(store.is_empty(&ctx).await.unwrap());
    }

    #[tokio::test]
    async fn test_get_returns_independent_copy() {
        let store = ConcurrencyGuardedStore::new();
        let ctx = OpContext::background();
        let created = store.create_product(&ctx, product("lamp")).await.unwrap();

        let mut fetched = store.get_product_by_id(&ctx, created.id()).await.unwrap();
        fetched.set_name("changed").unwrap();

        let again = store.get_product_by_id(&ctx, created.id()).await.unwrap();
        assert_eq!(again.name(), "lamp");
    }

    #[tokio::test]
    async fn test_missing_product_errors() {
        let store = ConcurrencyGuardedStore::new();
        let ctx = OpContext::background();
        let id = ProductId::new(99);

        assert_eq!(
            store.get_product_by_id(&ctx, id).await.unwrap_err(),
            StoreError::NotFound { id }
        );
        let ghost = Product::with_id(id, "ghost", 1, 1).unwrap();
        assert_eq!(
            store.update_product(&ctx, ghost).await.unwrap_err(),
            StoreError::NotFound { id }
        );
        assert_eq!(
            store.delete_product(&ctx, id).await.unwrap_err(),
            StoreError::NotFound { id }
        );
    }

    #[tokio::test]
    async fn test_update_replaces_wholesale() {
        let store = ConcurrencyGuardedStore::new();
        let ctx = OpContext::background();
        let created = store.create_product(&ctx, product("p1")).await.unwrap();

        let replacement = Product::with_id(created.id(), "p2", 2, 3).unwrap();
        let updated = store.update_product(&ctx, replacement.clone()).await.unwrap();
        assert_eq!(updated, replacement);
        assert_eq!(store.get_product_by_id(&ctx, created.id()).await.unwrap(), replacement);
    }

    #[tokio::test]
    async fn test_deleted_ids_are_not_reused() {
        let store = ConcurrencyGuardedStore::new();
        let ctx = OpContext::background();
        let first = store.create_product(&ctx, product("a")).await.unwrap();
        store.delete_product(&ctx, first.id()).await.unwrap();

        let second = store.create_product(&ctx, product("b")).await.unwrap();
        assert_eq!(second.id(), ProductId::new(2));
    }

    #[tokio::test]
    async fn test_pagination() {
        let store = ConcurrencyGuardedStore::with_capacity(4, 2);
        let ctx = OpContext::background();
        for name in ["a", "b", "c", "d", "e"] {
            store.create_product(&ctx, product(name)).await.unwrap();
        }

        let names = |page: Vec<Product>| page.iter().map(|p| p.name().to_string()).collect::<Vec<_>>();

        assert_eq!(names(store.get_all_products(&ctx, 0, 0).await.unwrap()), ["a", "b"]);
        assert_eq!(names(store.get_all_products(&ctx, 1, 2).await.unwrap()), ["a", "b"]);
        assert_eq!(names(store.get_all_products(&ctx, 3, 2).await.unwrap()), ["e"]);
        assert!(store.get_all_products(&ctx, 4, 2).await.unwrap().is_empty());
        assert_eq!(store.get_all_products(&ctx, 1, 100).await.unwrap().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_times_out_while_writer_holds_lock() {
        let store = ConcurrencyGuardedStore::with_capacity(2, 20);
        let holder = store.products.write(&OpContext::background()).await.unwrap();

        let ctx = OpContext::with_timeout(Duration::from_millis(27));
        let err = store.create_product(&ctx, product("late")).await.unwrap_err();
        assert_eq!(err, StoreError::Cancelled(CancelReason::DeadlineExceeded));
        holder.release();

        let ctx = OpContext::background();
        assert!(store.is_empty(&ctx).await.unwrap());
        // The timed-out create burned id 1.
        let next = store.create_product(&ctx, product("next")).await.unwrap();
        assert_eq!(next.id(), ProductId::new(2));

        let stats = store.statistics(&ctx).await.unwrap();
        assert_eq!(stats.available_slots, 2);
        assert_eq!(stats.last_assigned_id, ProductId::new(2));
    }

    #[tokio::test]
    async fn test_cancelled_context_has_no_effect() {
        let store = ConcurrencyGuardedStore::new();
        let ctx = OpContext::background();
        ctx.cancel();

        let err = store.create_product(&ctx, product("x")).await.unwrap_err();
        assert_eq!(err, StoreError::Cancelled(CancelReason::Cancelled));
        assert!(store.is_empty(&OpContext::background()).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creates_get_unique_ids() {
        let store = Arc::new(ConcurrencyGuardedStore::with_capacity(3, 20));
        let handles: Vec<_> = (0..64)
            .map(|i| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    let ctx = OpContext::background();
                    store
                        .create_product(&ctx, Product::new(format!("p{i}"), 1, 1).unwrap())
                        .await
                        .unwrap()
                        .id()
                })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().get());
        }
        ids.sort_unstable();
        assert_eq!(ids, (1..=64).collect::<Vec<_>>());

        let ctx = OpContext::background();
        assert_eq!(store.len(&ctx).await.unwrap(), 64);
        assert_eq!(store.statistics(&ctx).await.unwrap().available_slots, 3);
    }
}
