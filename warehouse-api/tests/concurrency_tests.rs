//! Concurrent writers and paging properties.

mod support;

use std::collections::HashSet;
use std::sync::Arc;

use proptest::prelude::*;
use support::create;
use warehouse_api::WarehouseService;
use warehouse_core::{GatewayStrategy, WarehouseConfig};
use warehouse_events::InMemoryBroker;
use warehouse_storage::{InMemoryCacheBackend, OpContext, ProductStore};
use warehouse_test_utils::{fixtures, generators::arb_page_args};

fn sync_service(store: Arc<warehouse_storage::ConcurrencyGuardedStore>) -> WarehouseService {
    WarehouseService::new(
        WarehouseConfig {
            gateway_strategy: GatewayStrategy::Sync,
            ..fixtures::fast_config()
        },
        store,
        Arc::new(InMemoryCacheBackend::new()),
        Arc::new(InMemoryBroker::new(1)),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates_get_distinct_ids() {
    const WRITERS: usize = 32;
    let service = sync_service(Arc::new(warehouse_storage::ConcurrencyGuardedStore::new()));

    let mut handles = Vec::with_capacity(WRITERS);
    for i in 0..WRITERS {
        let commands = Arc::clone(service.commands());
        handles.push(tokio::spawn(async move {
            let ack = commands
                .create_product(&OpContext::background(), create(&format!("w{i}"), 1, 1))
                .await
                .unwrap();
            ack.product().unwrap().id()
        }));
    }

    let mut ids = HashSet::new();
    for handle in handles {
        assert!(ids.insert(handle.await.unwrap()));
    }
    assert_eq!(ids.len(), WRITERS);
    assert!(ids.iter().all(|id| (1..=WRITERS as u64).contains(&id.get())));

    let stored = service
        .store()
        .get_all_products(&OpContext::background(), 1, 1_000)
        .await
        .unwrap();
    assert_eq!(stored.len(), WRITERS);

    let metrics = service.commands().metrics();
    assert_eq!(metrics.incoming, WRITERS as u64);
    assert_eq!(metrics.successful, WRITERS as u64);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_list_is_sorted_and_bounded((page, size) in arb_page_args(), seeded in 0u64..30) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let service = sync_service(fixtures::seeded_store(seeded).await);
            let ctx = OpContext::background();
            let queries = service.queries();

            let listed = queries.list_products(&ctx, page, size).await.unwrap().into_value();
            let request = queries.page_request(page, size);
            prop_assert!(listed.len() as u64 <= request.size());
            prop_assert!(listed.windows(2).all(|w| w[0].id() < w[1].id()));

            let expected_len = seeded.saturating_sub(request.offset()).min(request.size());
            prop_assert_eq!(listed.len() as u64, expected_len);

            let defaulted = queries.list_products(&ctx, 0, 0).await.unwrap().into_value();
            let explicit = queries.list_products(&ctx, 1, 20).await.unwrap().into_value();
            prop_assert_eq!(defaulted, explicit);
            Ok(())
        })?;
    }
}
