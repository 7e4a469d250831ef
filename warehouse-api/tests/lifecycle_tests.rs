//! End-to-end product lifecycle through the asynchronous write path.

mod support;

use support::{assert_code, create, update, Harness, SETTLE};
use warehouse_api::{ErrorCode, WarehouseService};
use warehouse_core::ProductId;
use warehouse_events::MutationKind;
use warehouse_storage::OpContext;
use warehouse_test_utils::{eventually, fixtures};

#[tokio::test]
async fn test_create_get_update_list_delete() {
    let harness = Harness::start(WarehouseService::in_memory(fixtures::fast_config()));
    let commands = harness.service.commands().clone();
    let queries = harness.service.queries().clone();
    let ctx = OpContext::background();

    let ack = commands.create_product(&ctx, create("p1", 1, 1)).await.unwrap();
    assert!(ack.receipt().is_some());
    assert!(harness.await_stored(&fixtures::stored_product(1, "p1", 1, 1)).await);

    let read = queries.get_product(&ctx, ProductId::new(1)).await.unwrap();
    assert_eq!(read.value(), &fixtures::stored_product(1, "p1", 1, 1));

    commands.update_product(&ctx, update(1, "p2", 2, 2)).await.unwrap();
    assert!(harness.await_stored(&fixtures::stored_product(1, "p2", 2, 2)).await);

    // The consumer overwrites the entity entry after committing.
    let (gateway, ctx_ref) = (&queries, &ctx);
    let refreshed = eventually(SETTLE, || async move {
        gateway
            .get_product(ctx_ref, ProductId::new(1))
            .await
            .map(|read| read.was_cache_hit() && read.value().name() == "p2")
            .unwrap_or(false)
    })
    .await;
    assert!(refreshed);

    let page = queries.list_products(&ctx, 1, 10).await.unwrap();
    assert_eq!(page.value(), &vec![fixtures::stored_product(1, "p2", 2, 2)]);

    commands.delete_product(&ctx, ProductId::new(1)).await.unwrap();
    assert!(harness.await_absent(ProductId::new(1)).await);

    // The entity entry is invalidated once the delete is committed.
    let invalidated = eventually(SETTLE, || async move {
        gateway.get_product(ctx_ref, ProductId::new(1)).await.is_err()
    })
    .await;
    assert!(invalidated);
    assert_code(&queries.get_product(&ctx, ProductId::new(1)).await, ErrorCode::NotFound);

    let results = harness.stop().await;
    assert_eq!(results.len(), MutationKind::ALL.len());
    for (kind, snapshot) in results {
        assert_eq!(snapshot.applied, 1, "{kind} consumer");
        assert_eq!(snapshot.dropped, 0);
    }
}

#[tokio::test]
async fn test_invalid_request_publishes_nothing() {
    let harness = Harness::start(WarehouseService::in_memory(fixtures::fast_config()));
    let ctx = OpContext::background();

    let result = harness
        .service
        .commands()
        .create_product(&ctx, create("", 0, 5))
        .await;
    assert_code(&result, ErrorCode::InvalidArgument);
    let err = result.unwrap_err();
    assert_eq!(
        err.message,
        "name length must be greater than 0; price must be greater than 0"
    );

    let metrics = harness.service.commands().metrics();
    assert_eq!(metrics.unsuccessful, 1);
    assert_eq!(metrics.successful, 0);

    let results = harness.stop().await;
    assert!(results.iter().all(|(_, s)| s.received == 0));
}

#[tokio::test]
async fn test_ids_are_never_reused_after_delete() {
    let harness = Harness::start(WarehouseService::in_memory(fixtures::fast_config()));
    let commands = harness.service.commands().clone();
    let ctx = OpContext::background();

    commands.create_product(&ctx, create("a", 1, 1)).await.unwrap();
    assert!(harness.await_stored(&fixtures::stored_product(1, "a", 1, 1)).await);
    commands.delete_product(&ctx, ProductId::new(1)).await.unwrap();
    assert!(harness.await_absent(ProductId::new(1)).await);

    commands.create_product(&ctx, create("b", 1, 1)).await.unwrap();
    assert!(harness.await_stored(&fixtures::stored_product(2, "b", 1, 1)).await);

    harness.stop().await;
}
