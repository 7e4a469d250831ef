//! Shared harness for the service-level tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use warehouse_api::{
    ApiError, ConsumerMetricsSnapshot, ConsumerSet, CreateProductRequest, ErrorCode,
    UpdateProductRequest, WarehouseService,
};
use warehouse_core::{Product, ProductId, StoreError};
use warehouse_events::{InMemoryBroker, MutationKind};
use warehouse_storage::{OpContext, ProductStore};
use warehouse_test_utils::eventually;

/// Upper bound for waiting on a consumer to catch up.
pub const SETTLE: Duration = Duration::from_secs(5);

/// A service with its consumers running.
pub struct Harness {
    pub service: WarehouseService,
    pub consumers: ConsumerSet,
    shutdown: watch::Sender<bool>,
}

impl Harness {
    pub fn start(service: WarehouseService) -> Self {
        let (shutdown, rx) = watch::channel(false);
        let consumers = service.spawn_consumers(rx);
        Self {
            service,
            consumers,
            shutdown,
        }
    }

    pub async fn stop(self) -> Vec<(MutationKind, ConsumerMetricsSnapshot)> {
        let _ = self.shutdown.send(true);
        self.consumers.join().await
    }

    /// Wait until the store holds exactly `expected` under its id.
    pub async fn await_stored(&self, expected: &Product) -> bool {
        let store = Arc::clone(self.service.store());
        let expected = expected.clone();
        eventually(SETTLE, || {
            let store = Arc::clone(&store);
            let expected = expected.clone();
            async move {
                store
                    .get_product_by_id(&OpContext::background(), expected.id())
                    .await
                    .map(|p| p == expected)
                    .unwrap_or(false)
            }
        })
        .await
    }

    /// Wait until the store no longer holds `id`.
    pub async fn await_absent(&self, id: ProductId) -> bool {
        let store = Arc::clone(self.service.store());
        eventually(SETTLE, || {
            let store = Arc::clone(&store);
            async move {
                matches!(
                    store.get_product_by_id(&OpContext::background(), id).await,
                    Err(StoreError::NotFound { .. })
                )
            }
        })
        .await
    }

    /// Wait until the store holds `n` products.
    pub async fn await_count(&self, n: usize) -> bool {
        let store = Arc::clone(self.service.store());
        eventually(SETTLE, || {
            let store = Arc::clone(&store);
            async move {
                store
                    .get_all_products(&OpContext::background(), 1, 1_000)
                    .await
                    .map(|all| all.len() == n)
                    .unwrap_or(false)
            }
        })
        .await
    }
}

/// Wait until `group` has committed everything published to `topic`.
pub async fn await_drained(broker: &InMemoryBroker, topic: &str, group: &str) -> bool {
    eventually(SETTLE, || async move {
        broker.lag(topic, group).map(|lag| lag == 0).unwrap_or(false)
    })
    .await
}

pub fn create(name: &str, price: u64, quantity: u64) -> CreateProductRequest {
    CreateProductRequest {
        name: name.to_string(),
        price,
        quantity,
    }
}

pub fn update(id: u64, name: &str, price: u64, quantity: u64) -> UpdateProductRequest {
    UpdateProductRequest {
        id: ProductId::new(id),
        name: name.to_string(),
        price,
        quantity,
    }
}

#[track_caller]
pub fn assert_code<T: std::fmt::Debug>(result: &Result<T, ApiError>, code: ErrorCode) {
    match result {
        Err(e) => assert_eq!(e.code, code, "unexpected error: {e}"),
        Ok(v) => panic!("Expected {code} error, got Ok: {v:?}"),
    }
}
