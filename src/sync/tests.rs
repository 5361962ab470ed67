use super::*;
use crate::cache::MemoryKeyValueStore;
use crate::model::{parse_timestamp, NewCustomer, NewOrder, NewProduct, PricedLines};
use crate::store::{CustomerStore, MemoryStore, OrderStore, ProductStore};
use rust_decimal::Decimal;

fn immediate() -> OutboxConfig {
    OutboxConfig {
        min_age_secs: 0,
        ..Default::default()
    }
}

fn setup(config: OutboxConfig) -> (Arc<MemoryStore>, Arc<MemoryKeyValueStore>, Arc<ProjectionSync>) {
    let store = Arc::new(MemoryStore::new());
    let kv = Arc::new(MemoryKeyValueStore::new());
    let sync = Arc::new(ProjectionSync::new(
        store.clone(),
        kv.clone(),
        config,
        crate::projection::DEFAULT_SUMMARY_TTL,
    ));
    (store, kv, sync)
}

fn new_customer(email: &str) -> NewCustomer {
    NewCustomer {
        name: "Ann".to_string(),
        email: email.to_string(),
        address: "1 Main St".to_string(),
        city: "Springfield".to_string(),
        postal_code: "12345".to_string(),
        country: "US".to_string(),
        created_at: parse_timestamp("2025-07-04 04:56:34").unwrap(),
    }
}

fn new_product() -> NewProduct {
    NewProduct {
        name: "Mug".to_string(),
        description: "Stoneware".to_string(),
        price: Decimal::from(10),
        created_at: parse_timestamp("2025-07-01 10:00:00").unwrap(),
    }
}

fn new_order(customer_id: EntityId) -> NewOrder {
    NewOrder {
        customer_id,
        order_number: "ORD-1".to_string(),
        status: "pending".to_string(),
        lines: vec![],
        created_at: parse_timestamp("2025-07-07 15:22:59").unwrap(),
    }
}

#[tokio::test]
async fn test_settled_write_completes_outbox_entry() {
    let (store, _, sync) = setup(immediate());
    let committed = CustomerStore::insert(store.as_ref(), new_customer("ann@x.com"))
        .await
        .unwrap();

    let status = sync.customer_saved(&committed).await;

    assert_eq!(status, SyncStatus::Synced);
    assert_eq!(store.backlog().await.unwrap(), 0);
    assert!(sync
        .customers()
        .repository()
        .find(committed.value.id)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_cache_failure_defers_and_recovery_converges() {
    let (store, kv, sync) = setup(immediate());
    let committed = ProductStore::insert(store.as_ref(), new_product()).await.unwrap();
    kv.set_fail_writes(true).await;

    let status = sync.product_saved(&committed).await;

    assert_eq!(status, SyncStatus::Deferred);
    assert_eq!(store.backlog().await.unwrap(), 1);
    assert!(SourceOfTruth::<Product>::load(store.as_ref(), committed.value.id)
        .await
        .unwrap()
        .is_some());

    kv.set_fail_writes(false).await;
    assert_eq!(sync.recover_pending().await.unwrap(), 1);

    assert_eq!(store.backlog().await.unwrap(), 0);
    let projected = sync
        .products()
        .repository()
        .find(committed.value.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(projected.price.to_string(), "10.00");
    assert!(sync
        .summaries()
        .find(committed.value.id)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_recovery_skips_young_entries() {
    let (store, kv, sync) = setup(OutboxConfig::default());
    let committed = ProductStore::insert(store.as_ref(), new_product()).await.unwrap();
    kv.set_fail_writes(true).await;
    sync.product_saved(&committed).await;
    kv.set_fail_writes(false).await;

    assert_eq!(sync.recover_pending().await.unwrap(), 0);
    assert_eq!(store.backlog().await.unwrap(), 1);
}

#[tokio::test]
async fn test_recovery_stops_after_max_retries() {
    let (store, kv, sync) = setup(OutboxConfig {
        max_retries: 2,
        ..immediate()
    });
    let committed = CustomerStore::insert(store.as_ref(), new_customer("ann@x.com"))
        .await
        .unwrap();
    kv.set_fail_writes(true).await;
    sync.customer_saved(&committed).await;

    assert_eq!(sync.recover_pending().await.unwrap(), 0);
    assert_eq!(sync.recover_pending().await.unwrap(), 0);
    assert_eq!(store.outbox_entries().await[0].retry_count, 2);

    kv.set_fail_writes(false).await;
    assert_eq!(sync.recover_pending().await.unwrap(), 0);
    assert_eq!(store.backlog().await.unwrap(), 1);
}

#[tokio::test]
async fn test_recovered_delete_cleans_customer_index_without_record() {
    let (store, kv, sync) = setup(immediate());
    let ann = CustomerStore::insert(store.as_ref(), new_customer("ann@x.com"))
        .await
        .unwrap();
    sync.customer_saved(&ann).await;
    let order = OrderStore::insert(store.as_ref(), new_order(ann.value.id), PricedLines::default())
        .await
        .unwrap();
    sync.order_saved(&order).await;
    let index = format!("orders:customer:{}", ann.value.id);
    assert_eq!(kv.smembers(&index).await.unwrap().len(), 1);

    kv.del(&[format!("order:{}", order.value.id)]).await.unwrap();
    kv.set_fail_writes(true).await;
    let removed = OrderStore::remove(store.as_ref(), order.value.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sync.order_removed(&removed).await, SyncStatus::Deferred);

    kv.set_fail_writes(false).await;
    assert_eq!(sync.recover_pending().await.unwrap(), 1);

    assert!(kv.smembers(&index).await.unwrap().is_empty());
    assert!(kv.smembers("orders:all").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_recovering_stale_upsert_of_deleted_row_removes_projection() {
    let (store, kv, sync) = setup(immediate());
    let committed = ProductStore::insert(store.as_ref(), new_product()).await.unwrap();
    kv.set_fail_writes(true).await;
    sync.product_saved(&committed).await;
    let removed = ProductStore::remove(store.as_ref(), committed.value.id)
        .await
        .unwrap()
        .unwrap();
    sync.product_removed(&removed).await;
    kv.set_fail_writes(false).await;

    assert_eq!(sync.recover_pending().await.unwrap(), 2);

    assert!(kv.keys().await.is_empty());
}

#[tokio::test]
async fn test_rebuild_everything_counts() {
    let (store, kv, sync) = setup(immediate());
    let ann = CustomerStore::insert(store.as_ref(), new_customer("ann@x.com"))
        .await
        .unwrap();
    CustomerStore::insert(store.as_ref(), new_customer("bo@x.com"))
        .await
        .unwrap();
    ProductStore::insert(store.as_ref(), new_product()).await.unwrap();
    OrderStore::insert(store.as_ref(), new_order(ann.value.id), PricedLines::default())
        .await
        .unwrap();

    let report = sync.rebuild_everything().await.unwrap();

    assert_eq!(
        report,
        RebuildReport {
            customers: 2,
            products: 1,
            orders: 1,
            summaries: 1,
        }
    );
    assert_eq!(
        kv.smembers(&format!("orders:customer:{}", ann.value.id))
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn test_recovery_task_drains_outbox_and_stops() {
    let (store, kv, sync) = setup(immediate());
    let committed = CustomerStore::insert(store.as_ref(), new_customer("ann@x.com"))
        .await
        .unwrap();
    kv.set_fail_writes(true).await;
    sync.customer_saved(&committed).await;
    kv.set_fail_writes(false).await;

    let handle = spawn_recovery_task(sync.clone(), Duration::from_millis(10));

    let drained = tokio::time::timeout(Duration::from_secs(5), async {
        while store.backlog().await.unwrap() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    handle.stop();

    assert!(drained.is_ok(), "recovery task did not drain the outbox");
    assert!(sync
        .customers()
        .repository()
        .find(committed.value.id)
        .await
        .unwrap()
        .is_some());
}
