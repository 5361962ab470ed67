use super::*;
use crate::cache::{KeyValueStore, MemoryKeyValueStore};
use crate::model::{parse_timestamp, NewCustomer, NewOrder, NewProduct, OrderLine, ProductChanges};
use crate::projection::{CustomerProjection, Projection, DEFAULT_SUMMARY_TTL};
use crate::store::MemoryStore;
use crate::sync::OutboxConfig;
use rust_decimal::Decimal;
use std::str::FromStr;

struct Fixture {
    store: Arc<MemoryStore>,
    kv: Arc<MemoryKeyValueStore>,
    app: Storefront,
}

fn fixture() -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let kv = Arc::new(MemoryKeyValueStore::new());
    let sync = Arc::new(ProjectionSync::new(
        store.clone(),
        kv.clone(),
        OutboxConfig {
            min_age_secs: 0,
            ..Default::default()
        },
        DEFAULT_SUMMARY_TTL,
    ));
    let app = Storefront::new(store.clone(), sync);
    Fixture { store, kv, app }
}

fn ann() -> NewCustomer {
    NewCustomer {
        name: "Ann".to_string(),
        email: "ann@x.com".to_string(),
        address: "1 Main St".to_string(),
        city: "Springfield".to_string(),
        postal_code: "12345".to_string(),
        country: "US".to_string(),
        created_at: parse_timestamp("2025-07-04 04:56:34").unwrap(),
    }
}

fn product(name: &str, price: &str) -> NewProduct {
    NewProduct {
        name: name.to_string(),
        description: format!("{name} description"),
        price: Decimal::from_str(price).unwrap(),
        created_at: parse_timestamp("2025-07-01 10:00:00").unwrap(),
    }
}

fn order(customer_id: EntityId, lines: Vec<OrderLine>) -> NewOrder {
    NewOrder {
        customer_id,
        order_number: "ORD-0001".to_string(),
        status: "pending".to_string(),
        lines,
        created_at: parse_timestamp("2025-07-07 15:22:59").unwrap(),
    }
}

#[tokio::test]
async fn test_created_customer_is_readable_from_projection() {
    let f = fixture();

    let outcome = f.app.customers.add(ann()).await.unwrap();

    assert_eq!(outcome.projection, SyncStatus::Synced);
    let found = f.app.customers.get(outcome.value.id).await.unwrap().unwrap();
    assert_eq!(found.email, "ann@x.com");
    assert_eq!(found, CustomerProjection::build(&outcome.value).unwrap());
}

#[tokio::test]
async fn test_duplicate_email_is_store_conflict() {
    let f = fixture();
    f.app.customers.add(ann()).await.unwrap();

    let err = f.app.customers.add(ann()).await.unwrap_err();

    assert!(matches!(err, CommandError::Store(StoreError::Conflict(_))));
    assert_eq!(f.app.customers.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_order_for_unknown_customer_writes_nothing() {
    let f = fixture();

    let err = f.app.orders.add(order(9999, vec![])).await.unwrap_err();

    assert!(matches!(
        err,
        CommandError::ReferenceNotFound {
            entity: EntityKind::Customer,
            id: 9999
        }
    ));
    assert!(f.app.orders.list().await.unwrap().is_empty());
    assert!(f.kv.keys().await.is_empty());
    assert_eq!(f.store.outbox_entries().await.len(), 0);
}

#[tokio::test]
async fn test_order_total_from_two_lines() {
    let f = fixture();
    let customer = f.app.customers.add(ann()).await.unwrap().value;
    let mug = f.app.products.add(product("Mug", "10.00")).await.unwrap().value;
    let spoon = f.app.products.add(product("Spoon", "5.00")).await.unwrap().value;

    let outcome = f
        .app
        .orders
        .add(order(
            customer.id,
            vec![
                OrderLine { product_id: mug.id, quantity: Some(2) },
                OrderLine { product_id: spoon.id, quantity: Some(1) },
                OrderLine { product_id: 4040, quantity: Some(7) },
            ],
        ))
        .await
        .unwrap();

    let projected = f.app.orders.get(outcome.value.id).await.unwrap().unwrap();
    assert_eq!(projected.total_amount.to_string(), "25.00");
    assert_eq!(projected.customer_name, "Ann");
    assert_eq!(projected.items.len(), 2);

    let for_customer = f.app.orders.list_for_customer(customer.id).await.unwrap();
    assert_eq!(for_customer.len(), 1);
    assert_eq!(for_customer[0].id, outcome.value.id);
}

#[tokio::test]
async fn test_order_keeps_price_snapshot_after_product_update() {
    let f = fixture();
    let customer = f.app.customers.add(ann()).await.unwrap().value;
    let mug = f.app.products.add(product("Mug", "10.00")).await.unwrap().value;
    let placed = f
        .app
        .orders
        .add(order(customer.id, vec![OrderLine { product_id: mug.id, quantity: Some(1) }]))
        .await
        .unwrap()
        .value;

    f.app
        .products
        .update(
            mug.id,
            ProductChanges {
                price: Some(Decimal::from(99)),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let projected = f.app.orders.get(placed.id).await.unwrap().unwrap();
    assert_eq!(projected.items[0].price.to_string(), "10.00");
    let product = f.app.products.get(mug.id).await.unwrap().unwrap();
    assert_eq!(product.price.to_string(), "99.00");
}

#[tokio::test]
async fn test_update_unknown_product_is_not_found() {
    let f = fixture();

    let err = f
        .app
        .products
        .update(
            12,
            ProductChanges {
                name: Some("Cup".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CommandError::NotFound {
            entity: EntityKind::Product,
            id: 12
        }
    ));
}

#[tokio::test]
async fn test_negative_price_is_invalid() {
    let f = fixture();
    let err = f.app.products.add(product("Mug", "-1")).await.unwrap_err();
    assert!(matches!(err, CommandError::Invalid(_)));
}

#[tokio::test]
async fn test_product_delete_removes_projection_and_summary() {
    let f = fixture();
    let mug = f.app.products.add(product("Mug", "10.00")).await.unwrap().value;
    assert!(f.app.products.get_summary(mug.id).await.unwrap().is_some());

    let outcome = f.app.products.delete(mug.id).await.unwrap();

    assert_eq!(outcome.value.map(|p| p.id), Some(mug.id));
    assert!(f.app.products.get(mug.id).await.unwrap().is_none());
    assert!(f.app.products.get_summary(mug.id).await.unwrap().is_none());
    assert!(f.app.products.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_delete_unknown_is_noop() {
    let f = fixture();

    let outcome = f.app.customers.delete(31).await.unwrap();

    assert!(outcome.value.is_none());
    assert_eq!(outcome.projection, SyncStatus::Synced);
    assert!(f.app.orders.delete(31).await.unwrap().value.is_none());
    assert!(f.app.products.delete(31).await.unwrap().value.is_none());
}

#[tokio::test]
async fn test_order_delete_cleans_customer_index() {
    let f = fixture();
    let customer = f.app.customers.add(ann()).await.unwrap().value;
    let placed = f.app.orders.add(order(customer.id, vec![])).await.unwrap().value;

    f.app.orders.delete(placed.id).await.unwrap();

    assert!(f.app.orders.get(placed.id).await.unwrap().is_none());
    assert!(f
        .app
        .orders
        .list_for_customer(customer.id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_cache_outage_keeps_source_write_and_defers() {
    let f = fixture();
    f.kv.set_fail_writes(true).await;

    let outcome = f.app.customers.add(ann()).await.unwrap();

    assert_eq!(outcome.projection, SyncStatus::Deferred);
    assert_eq!(f.store.outbox_entries().await.len(), 1);

    f.kv.set_fail_writes(false).await;
    f.app.sync().recover_pending().await.unwrap();

    assert!(f.app.customers.get(outcome.value.id).await.unwrap().is_some());
    assert!(f.store.outbox_entries().await.is_empty());
}

#[tokio::test]
async fn test_source_failure_is_reported() {
    let f = fixture();
    f.store.set_fail_writes(true).await;

    let err = f.app.products.add(product("Mug", "1")).await.unwrap_err();

    assert!(matches!(err, CommandError::Store(StoreError::Unavailable(_))));
    assert!(f.kv.keys().await.is_empty());
}

#[tokio::test]
async fn test_rebuild_on_empty_source_clears_cache() {
    let f = fixture();
    let cache: Arc<dyn KeyValueStore> = f.kv.clone();
    cache
        .set("customer:5", r#"{"id":5,"name":"Old","email":"o@x.com","address":"","city":"","postal_code":"","country":"","created_at":"2025-07-04 04:56:34"}"#)
        .await
        .unwrap();
    cache.sadd("customers:all", "5").await.unwrap();

    let written = f.app.sync().rebuild(EntityKind::Customer).await.unwrap();

    assert_eq!(written, 0);
    assert!(f.app.customers.list().await.unwrap().is_empty());
    assert!(f.kv.keys().await.is_empty());
}

#[tokio::test]
async fn test_order_total_overflow_is_invalid() {
    let f = fixture();
    let customer = f.app.customers.add(ann()).await.unwrap().value;
    let yacht = f
        .app
        .products
        .add(product("Yacht", "1000000000000000000000000000"))
        .await
        .unwrap()
        .value;
    let outbox_before = f.store.outbox_entries().await.len();

    let err = f
        .app
        .orders
        .add(order(customer.id, vec![OrderLine { product_id: yacht.id, quantity: Some(100) }]))
        .await
        .unwrap_err();

    assert!(matches!(err, CommandError::Invalid(_)));
    assert!(f.app.orders.list().await.unwrap().is_empty());
    assert_eq!(f.store.outbox_entries().await.len(), outbox_before);
}

#[tokio::test]
async fn test_explicit_zero_quantity_is_not_charged() {
    let f = fixture();
    let customer = f.app.customers.add(ann()).await.unwrap().value;
    let mug = f.app.products.add(product("Mug", "10.00")).await.unwrap().value;
    let spoon = f.app.products.add(product("Spoon", "5.00")).await.unwrap().value;

    let placed = f
        .app
        .orders
        .add(order(
            customer.id,
            vec![
                OrderLine { product_id: mug.id, quantity: Some(0) },
                OrderLine { product_id: spoon.id, quantity: None },
            ],
        ))
        .await
        .unwrap()
        .value;

    let projected = f.app.orders.get(placed.id).await.unwrap().unwrap();
    assert_eq!(projected.total_amount.to_string(), "5.00");
    assert_eq!(projected.items[0].quantity, 0);
    assert_eq!(projected.items[1].quantity, 1);
}

#[tokio::test]
async fn test_empty_product_update_is_invalid() {
    let f = fixture();
    let mug = f.app.products.add(product("Mug", "10.00")).await.unwrap().value;

    let err = f
        .app
        .products
        .update(mug.id, ProductChanges::default())
        .await
        .unwrap_err();

    assert!(matches!(err, CommandError::Invalid(_)));
    assert_eq!(f.store.outbox_entries().await.len(), 0);
}
