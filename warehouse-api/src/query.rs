//! Query gateway: cache-aside reads.
//!
//! Point lookups and list pages are served from the cache when present and
//! otherwise loaded from the store and written back. An unreachable cache
//! only costs latency; the store answers every read it cannot.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;
use warehouse_core::{PageRequest, Product, ProductId, WarehouseConfig, DEFAULT_PAGE_SIZE};
use warehouse_storage::{CacheAside, CacheKey, CacheRead, CacheStats, OpContext, ProductStore};

use crate::command::{GatewayMetrics, GatewayMetricsSnapshot};
use crate::error::ApiResult;

pub struct QueryGateway {
    store: Arc<dyn ProductStore>,
    cache: Arc<CacheAside>,
    operation_timeout: Duration,
    default_page_size: u64,
    metrics: GatewayMetrics,
}

impl QueryGateway {
    pub fn new(store: Arc<dyn ProductStore>, cache: Arc<CacheAside>, operation_timeout: Duration) -> Self {
        Self {
            store,
            cache,
            operation_timeout,
            default_page_size: DEFAULT_PAGE_SIZE,
            metrics: GatewayMetrics::new(),
        }
    }

    pub fn from_config(
        store: Arc<dyn ProductStore>,
        cache: Arc<CacheAside>,
        config: &WarehouseConfig,
    ) -> Self {
        Self::new(store, cache, config.operation_timeout).with_default_page_size(config.default_page_size)
    }

    pub fn with_default_page_size(mut self, size: u64) -> Self {
        self.default_page_size = size.max(1);
        self
    }

    /// Normalize a raw page request the way list reads do.
    pub fn page_request(&self, page: u64, size: u64) -> PageRequest {
        PageRequest::with_default_size(page, size, self.default_page_size)
    }

    pub async fn get_product(&self, ctx: &OpContext, id: ProductId) -> ApiResult<CacheRead<Product>> {
        self.metrics.incoming.fetch_add(1, Ordering::Relaxed);
        let key = CacheKey::entity(id);

        // The store deadline starts after the cache lookup, so a stalled
        // cache cannot use up the store's budget.
        let result = self
            .cache
            .read_through(ctx, &key, || async move {
                let ctx = ctx.child_with_timeout(self.operation_timeout);
                self.store.get_product_by_id(&ctx, id).await
            })
            .await
            .map_err(Into::into);
        self.metrics.record(&result);
        result
    }

    /// One page of products, sorted by id.
    ///
    /// `(0, 0)` and `(1, default)` share one cache entry.
    pub async fn list_products(
        &self,
        ctx: &OpContext,
        page: u64,
        size: u64,
    ) -> ApiResult<CacheRead<Vec<Product>>> {
        self.metrics.incoming.fetch_add(1, Ordering::Relaxed);
        let request = self.page_request(page, size);
        let key = CacheKey::page(request);

        let result = self
            .cache
            .read_through(ctx, &key, || async move {
                let ctx = ctx.child_with_timeout(self.operation_timeout);
                self.store
                    .get_all_products(&ctx, request.page(), request.size())
                    .await
            })
            .await
            .map_err(Into::into);
        self.metrics.record(&result);
        result
    }

    /// Load a page from the store and overwrite its cache entry.
    ///
    /// A cache write failure is logged; the page is still returned.
    pub async fn warm_page(&self, ctx: &OpContext, page: u64, size: u64) -> ApiResult<Vec<Product>> {
        let request = self.page_request(page, size);
        let key = CacheKey::page(request);

        let products = self
            .store
            .get_all_products(
                &ctx.child_with_timeout(self.operation_timeout),
                request.page(),
                request.size(),
            )
            .await?;

        if let Err(err) = self.cache.put(ctx, &key, &products).await {
            warn!(cache_key = %key, error = %err, "Page warm-up could not write cache");
        }
        Ok(products)
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    pub fn metrics(&self) -> GatewayMetricsSnapshot {
        self.metrics.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warehouse_storage::{ConcurrencyGuardedStore, InMemoryCacheBackend, ReadSource};

    async fn seeded(n: u64) -> (QueryGateway, Arc<ConcurrencyGuardedStore>) {
        let store = Arc::new(ConcurrencyGuardedStore::new());
        let ctx = OpContext::background();
        for i in 1..=n {
            store
                .create_product(&ctx, Product::new(format!("p{i}"), i, i).unwrap())
                .await
                .unwrap();
        }
        let cache = Arc::new(CacheAside::with_defaults(Arc::new(InMemoryCacheBackend::new())));
        let gateway = QueryGateway::new(store.clone(), cache, Duration::from_secs(1));
        (gateway, store)
    }

    #[tokio::test]
    async fn test_second_read_is_a_cache_hit() {
        let (gateway, _) = seeded(1).await;
        let ctx = OpContext::background();

        let first = gateway.get_product(&ctx, ProductId::new(1)).await.unwrap();
        assert_eq!(first.source(), ReadSource::Store);
        let second = gateway.get_product(&ctx, ProductId::new(1)).await.unwrap();
        assert!(second.was_cache_hit());
        assert_eq!(second.value(), first.value());
    }

    #[tokio::test]
    async fn test_missing_product_is_not_found() {
        let (gateway, _) = seeded(0).await;
        let err = gateway
            .get_product(&OpContext::background(), ProductId::new(9))
            .await
            .unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::NotFound);
        assert_eq!(gateway.metrics().unsuccessful, 1);
    }

    #[tokio::test]
    async fn test_zero_page_shares_default_entry() {
        let (gateway, _) = seeded(3).await;
        let ctx = OpContext::background();

        let raw = gateway.list_products(&ctx, 0, 0).await.unwrap();
        assert_eq!(raw.source(), ReadSource::Store);
        let explicit = gateway.list_products(&ctx, 1, DEFAULT_PAGE_SIZE).await.unwrap();
        assert!(explicit.was_cache_hit());
        assert_eq!(explicit.value().len(), 3);
    }

    #[tokio::test]
    async fn test_warm_page_overwrites_stale_entry() {
        let (gateway, store) = seeded(1).await;
        let ctx = OpContext::background();

        gateway.list_products(&ctx, 1, 10).await.unwrap();
        store
            .create_product(&ctx, Product::new("p2", 2, 2).unwrap())
            .await
            .unwrap();

        let stale = gateway.list_products(&ctx, 1, 10).await.unwrap();
        assert_eq!(stale.value().len(), 1);

        let warmed = gateway.warm_page(&ctx, 1, 10).await.unwrap();
        assert_eq!(warmed.len(), 2);
        let fresh = gateway.list_products(&ctx, 1, 10).await.unwrap();
        assert!(fresh.was_cache_hit());
        assert_eq!(fresh.value().len(), 2);
    }
}
