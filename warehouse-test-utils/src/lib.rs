//! Warehouse Test Utilities
//!
//! Shared test infrastructure for the warehouse workspace:
//! - Fault-injecting collaborators (store, cache backend, broker)
//! - Proptest generators for products, mutations and page requests
//! - Fixtures for common scenarios
//! - An `eventually` helper for asserting on background tasks

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

pub use warehouse_core::{
    BrokerError, CacheError, PageRequest, Product, ProductId, StoreError, WarehouseConfig,
};
pub use warehouse_events::{Broker, InMemoryBroker, Mutation, Subscription};
pub use warehouse_storage::{
    CacheBackend, CacheKey, CacheStats, ConcurrencyGuardedStore, OpContext, ProductStore,
};

// ============================================================================
// FLAKY STORE
// ============================================================================

/// Store operation a fault can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Get,
    List,
    Create,
    Update,
    Delete,
}

/// How an injected fault behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// Fail without reaching the inner store.
    BeforeApply,
    /// Run against the inner store, then report failure anyway.
    AfterApply,
}

/// A [`ProductStore`] that fails on demand.
///
/// Faults are queued per operation and consumed one call at a time. Every
/// injected failure is a transient `StoreError::Internal`.
pub struct FlakyStore<S = ConcurrencyGuardedStore> {
    inner: S,
    faults: Mutex<HashMap<StoreOp, VecDeque<FailureMode>>>,
    calls: Mutex<HashMap<StoreOp, u64>>,
}

impl<S: ProductStore> FlakyStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            faults: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Fail the next call to `op`.
    pub fn fail_next(&self, op: StoreOp, mode: FailureMode) {
        self.fail_times(op, 1, mode);
    }

    /// Fail the next `times` calls to `op`.
    pub fn fail_times(&self, op: StoreOp, times: usize, mode: FailureMode) {
        let mut faults = lock(&self.faults);
        let queue = faults.entry(op).or_default();
        queue.extend(std::iter::repeat(mode).take(times));
    }

    /// Calls made to `op` so far, failed ones included.
    pub fn calls(&self, op: StoreOp) -> u64 {
        lock(&self.calls).get(&op).copied().unwrap_or(0)
    }

    /// Faults still queued for `op`.
    pub fn pending_faults(&self, op: StoreOp) -> usize {
        lock(&self.faults).get(&op).map_or(0, VecDeque::len)
    }

    fn take_fault(&self, op: StoreOp) -> Option<FailureMode> {
        *lock(&self.calls).entry(op).or_insert(0) += 1;
        lock(&self.faults).get_mut(&op).and_then(VecDeque::pop_front)
    }

    async fn with_faults<T>(
        &self,
        op: StoreOp,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        match self.take_fault(op) {
            Some(FailureMode::BeforeApply) => Err(injected(op)),
            Some(FailureMode::AfterApply) => {
                call.await?;
                Err(injected(op))
            }
            None => call.await,
        }
    }
}

fn injected(op: StoreOp) -> StoreError {
    StoreError::internal(format!("injected {:?} failure", op))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl<S: ProductStore> ProductStore for FlakyStore<S> {
    async fn get_product_by_id(&self, ctx: &OpContext, id: ProductId) -> Result<Product, StoreError> {
        self.with_faults(StoreOp::Get, self.inner.get_product_by_id(ctx, id))
            .await
    }

    async fn get_all_products(
        &self,
        ctx: &OpContext,
        page: u64,
        size: u64,
    ) -> Result<Vec<Product>, StoreError> {
        self.with_faults(StoreOp::List, self.inner.get_all_products(ctx, page, size))
            .await
    }

    async fn create_product(&self, ctx: &OpContext, product: Product) -> Result<Product, StoreError> {
        self.with_faults(StoreOp::Create, self.inner.create_product(ctx, product))
            .await
    }

    async fn update_product(&self, ctx: &OpContext, product: Product) -> Result<Product, StoreError> {
        self.with_faults(StoreOp::Update, self.inner.update_product(ctx, product))
            .await
    }

    async fn delete_product(&self, ctx: &OpContext, id: ProductId) -> Result<(), StoreError> {
        self.with_faults(StoreOp::Delete, self.inner.delete_product(ctx, id))
            .await
    }
}

// ============================================================================
// UNREACHABLE CACHE
// ============================================================================

/// A [`CacheBackend`] whose every call fails as if the server were down.
#[derive(Debug, Default)]
pub struct UnreachableCache {
    attempts: AtomicU64,
}

impl UnreachableCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls made so far.
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    fn refuse(&self) -> CacheError {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        CacheError::Unavailable {
            reason: "connection refused".to_string(),
        }
    }
}

#[async_trait]
impl CacheBackend for UnreachableCache {
    async fn get(&self, _ctx: &OpContext, _key: &CacheKey) -> Result<Option<String>, CacheError> {
        Err(self.refuse())
    }

    async fn set(&self, _ctx: &OpContext, _key: &CacheKey, _value: String, _ttl: Duration) -> Result<(), CacheError> {
        Err(self.refuse())
    }

    async fn del(&self, _ctx: &OpContext, _key: &CacheKey) -> Result<(), CacheError> {
        Err(self.refuse())
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        Err(self.refuse())
    }
}

// ============================================================================
// HANGING CACHE
// ============================================================================

/// A [`CacheBackend`] that accepts calls and never answers, ignoring its
/// context, like a server that stopped responding mid-connection.
#[derive(Debug, Default)]
pub struct HangingCache {
    calls: AtomicU64,
}

impl HangingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls started so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    async fn hang<T>(&self) -> T {
        self.calls.fetch_add(1, Ordering::Relaxed);
        std::future::pending().await
    }
}

#[async_trait]
impl CacheBackend for HangingCache {
    async fn get(&self, _ctx: &OpContext, _key: &CacheKey) -> Result<Option<String>, CacheError> {
        self.hang().await
    }

    async fn set(&self, _ctx: &OpContext, _key: &CacheKey, _value: String, _ttl: Duration) -> Result<(), CacheError> {
        self.hang().await
    }

    async fn del(&self, _ctx: &OpContext, _key: &CacheKey) -> Result<(), CacheError> {
        self.hang().await
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        self.hang().await
    }
}

// ============================================================================
// FAILING BROKER
// ============================================================================

/// A [`Broker`] that fails a set number of publishes or subscribes, then
/// delegates to the wrapped broker.
pub struct FailingBroker<B = InMemoryBroker> {
    inner: B,
    publish_failures: AtomicU64,
    subscribe_failures: AtomicU64,
}

impl<B: Broker> FailingBroker<B> {
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            publish_failures: AtomicU64::new(0),
            subscribe_failures: AtomicU64::new(0),
        }
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    pub fn fail_publishes(&self, times: u64) {
        self.publish_failures.fetch_add(times, Ordering::SeqCst);
    }

    pub fn fail_subscribes(&self, times: u64) {
        self.subscribe_failures.fetch_add(times, Ordering::SeqCst);
    }

    pub fn pending_subscribe_failures(&self) -> u64 {
        self.subscribe_failures.load(Ordering::SeqCst)
    }
}

fn take_one(counter: &AtomicU64) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl<B: Broker> Broker for FailingBroker<B> {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: Vec<u8>,
    ) -> Result<warehouse_events::PublishAck, BrokerError> {
        if take_one(&self.publish_failures) {
            return Err(BrokerError::Unavailable {
                reason: "injected publish failure".to_string(),
            });
        }
        self.inner.publish(topic, key, payload).await
    }

    async fn subscribe(&self, topic: &str, group: &str) -> Result<Box<dyn Subscription>, BrokerError> {
        if take_one(&self.subscribe_failures) {
            return Err(BrokerError::Unavailable {
                reason: "injected subscribe failure".to_string(),
            });
        }
        self.inner.subscribe(topic, group).await
    }
}

// ============================================================================
// ASYNC HELPERS
// ============================================================================

/// Poll `condition` until it holds or `timeout` elapses.
///
/// Returns whether the condition held. Works under a paused clock: each
/// poll sleeps one millisecond, which lets other tasks run.
pub async fn eventually<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for warehouse types.

    use super::*;
    use proptest::prelude::*;

    /// Generate a valid product name.
    pub fn arb_name() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9][a-zA-Z0-9 ]{0,31}"
    }

    /// Generate a valid price.
    pub fn arb_price() -> impl Strategy<Value = u64> {
        1u64..1_000_000
    }

    /// Generate a valid quantity.
    pub fn arb_quantity() -> impl Strategy<Value = u64> {
        1u64..10_000
    }

    /// Generate raw fields, valid or not, biased toward edge values.
    pub fn arb_raw_fields() -> impl Strategy<Value = (String, u64, u64)> {
        (
            prop_oneof![Just(String::new()), arb_name()],
            prop_oneof![Just(0u64), arb_price()],
            prop_oneof![Just(0u64), arb_quantity()],
        )
    }

    /// Generate an unassigned, valid product.
    pub fn arb_product() -> impl Strategy<Value = Product> {
        (arb_name(), arb_price(), arb_quantity()).prop_filter_map("valid product", |(n, p, q)| {
            Product::new(n, p, q).ok()
        })
    }

    pub fn arb_product_id() -> impl Strategy<Value = ProductId> {
        (1u64..1_000).prop_map(ProductId::new)
    }

    /// Generate a valid mutation of any kind.
    pub fn arb_mutation() -> impl Strategy<Value = Mutation> {
        prop_oneof![
            (arb_name(), arb_price(), arb_quantity())
                .prop_filter_map("valid create", |(n, p, q)| Mutation::create(n, p, q).ok()),
            (arb_product_id(), arb_name(), arb_price(), arb_quantity())
                .prop_filter_map("valid update", |(id, n, p, q)| Mutation::update(id, n, p, q).ok()),
            arb_product_id().prop_map(Mutation::delete),
        ]
    }

    /// Generate raw `(page, size)` arguments, zeros included.
    pub fn arb_page_args() -> impl Strategy<Value = (u64, u64)> {
        (0u64..6, 0u64..40)
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built values for common test scenarios.

    use super::*;

    /// Configuration with short backoff so redelivery tests finish quickly.
    pub fn fast_config() -> WarehouseConfig {
        WarehouseConfig {
            operation_timeout: Duration::from_secs(1),
            cache_timeout: Duration::from_millis(500),
            apply_timeout: Duration::from_secs(1),
            reconnect_backoff: Duration::from_millis(20),
            broker_partitions: 2,
            ..WarehouseConfig::default()
        }
    }

    /// A valid, unassigned product.
    pub fn product(name: &str, price: u64, quantity: u64) -> Product {
        match Product::new(name, price, quantity) {
            Ok(p) => p,
            Err(e) => panic!("fixture product is invalid: {e}"),
        }
    }

    /// A valid product carrying `id`.
    pub fn stored_product(id: u64, name: &str, price: u64, quantity: u64) -> Product {
        match Product::with_id(ProductId::new(id), name, price, quantity) {
            Ok(p) => p,
            Err(e) => panic!("fixture product is invalid: {e}"),
        }
    }

    /// A guarded store holding products `p1..=pn`, with ids 1..=n.
    pub async fn seeded_store(n: u64) -> Arc<ConcurrencyGuardedStore> {
        let store = Arc::new(ConcurrencyGuardedStore::new());
        let ctx = OpContext::background();
        for i in 1..=n {
            if let Err(e) = store.create_product(&ctx, product(&format!("p{i}"), i, i)).await {
                panic!("seeding product {i} failed: {e}");
            }
        }
        store
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[tokio::test]
    async fn test_flaky_store_fails_before_apply() {
        let store = FlakyStore::new(ConcurrencyGuardedStore::new());
        store.fail_next(StoreOp::Create, FailureMode::BeforeApply);
        let ctx = OpContext::background();

        let err = store
            .create_product(&ctx, fixtures::product("a", 1, 1))
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert!(store.inner().is_empty(&ctx).await.unwrap());

        store.create_product(&ctx, fixtures::product("a", 1, 1)).await.unwrap();
        assert_eq!(store.calls(StoreOp::Create), 2);
        assert_eq!(store.pending_faults(StoreOp::Create), 0);
    }

    #[tokio::test]
    async fn test_flaky_store_fails_after_apply() {
        let store = FlakyStore::new(ConcurrencyGuardedStore::new());
        store.fail_next(StoreOp::Create, FailureMode::AfterApply);
        let ctx = OpContext::background();

        assert!(store
            .create_product(&ctx, fixtures::product("a", 1, 1))
            .await
            .is_err());
        assert_eq!(store.inner().len(&ctx).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_cache_counts_attempts() {
        let cache = UnreachableCache::new();
        let key = CacheKey::entity(ProductId::new(1));
        let ctx = OpContext::background();
        assert!(cache.get(&ctx, &key).await.is_err());
        assert!(cache.del(&ctx, &key).await.is_err());
        assert_eq!(cache.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_cache_never_answers() {
        let cache = HangingCache::new();
        let key = CacheKey::entity(ProductId::new(1));
        let ctx = OpContext::with_timeout(Duration::from_millis(5));
        let waited = tokio::time::timeout(Duration::from_secs(60), cache.get(&ctx, &key)).await;
        assert!(waited.is_err());
        assert_eq!(cache.calls(), 1);
    }

    #[tokio::test]
    async fn test_failing_broker_recovers() {
        let broker = FailingBroker::new(InMemoryBroker::new(1));
        broker.fail_publishes(1);
        assert!(broker.publish("productCreate", "k", vec![1]).await.is_err());
        assert!(broker.publish("productCreate", "k", vec![1]).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_eventually_times_out() {
        let held = eventually(Duration::from_millis(50), || async { false }).await;
        assert!(!held);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn prop_generated_products_are_unassigned(product in generators::arb_product()) {
            prop_assert!(!product.id().is_assigned());
        }

        #[test]
        fn prop_generated_mutations_validate(mutation in generators::arb_mutation()) {
            prop_assert!(mutation.validate().is_ok());
        }
    }
}
