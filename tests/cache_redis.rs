//! Redis projection cache integration tests using testcontainers.
//!
//! Run with: cargo test --test cache_redis -- --ignored --nocapture
//!
//! Each test starts its own Redis container, so keys never collide between
//! tests. The source of truth is the in-memory store; only the cache is real.

use std::sync::Arc;
use std::time::Duration;

use redis::{aio::ConnectionManager, AsyncCommands};
use rust_decimal::Decimal;
use testcontainers::{
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
    GenericImage, ImageExt,
};

use storefront::cache::{KeyValueStore, RedisKeyValueStore};
use storefront::commands::Storefront;
use storefront::model::{parse_timestamp, NewCustomer, NewOrder, NewProduct, OrderLine};
use storefront::projection::DEFAULT_SUMMARY_TTL;
use storefront::store::MemoryStore;
use storefront::sync::{OutboxConfig, ProjectionSync, SyncStatus};

/// Start Redis container.
///
/// Returns (container, url) where url is suitable for `redis::Client::open`.
async fn start_redis() -> (testcontainers::ContainerAsync<GenericImage>, String) {
    let container = GenericImage::new("redis", "7-alpine")
        .with_exposed_port(6379.tcp())
        .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"))
        .with_startup_timeout(Duration::from_secs(60))
        .start()
        .await
        .expect("Failed to start redis container");

    let host_port = container
        .get_host_port_ipv4(6379)
        .await
        .expect("Failed to get mapped port");
    let host = container
        .get_host()
        .await
        .expect("Failed to get container host");

    let url = format!("redis://{}:{}", host, host_port);
    println!("Redis available at: {}", url);

    (container, url)
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

fn mug() -> NewProduct {
    NewProduct {
        name: "Mug".to_string(),
        description: "Stoneware".to_string(),
        price: Decimal::new(1000, 2),
        created_at: parse_timestamp("2025-07-01 10:00:00").unwrap(),
    }
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_redis_key_value_contract() {
    let (_container, url) = start_redis().await;
    let kv = RedisKeyValueStore::new(&url).await.expect("Failed to connect to Redis");

    kv.set("customer:1", "{}").await.unwrap();
    assert_eq!(kv.get("customer:1").await.unwrap().as_deref(), Some("{}"));
    assert_eq!(kv.get("customer:2").await.unwrap(), None);

    let values = kv
        .mget(&["customer:1".to_string(), "customer:2".to_string()])
        .await
        .unwrap();
    assert_eq!(values, vec![Some("{}".to_string()), None]);

    kv.sadd("customers:all", "1").await.unwrap();
    kv.sadd("customers:all", "1").await.unwrap();
    kv.sadd("customers:all", "2").await.unwrap();
    let mut members = kv.smembers("customers:all").await.unwrap();
    members.sort();
    assert_eq!(members, vec!["1", "2"]);
    kv.srem("customers:all", "2").await.unwrap();
    assert_eq!(kv.smembers("customers:all").await.unwrap(), vec!["1"]);
    assert!(kv.smembers("products:all").await.unwrap().is_empty());

    kv.sadd("orders:customer:1", "10").await.unwrap();
    kv.sadd("orders:customer:2", "11").await.unwrap();
    let removed = kv.delete_matching("orders:customer:*").await.unwrap();
    assert_eq!(removed, 2);
    assert!(kv.smembers("orders:customer:1").await.unwrap().is_empty());

    kv.del(&["customer:1".to_string(), "missing".to_string()]).await.unwrap();
    assert_eq!(kv.get("customer:1").await.unwrap(), None);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_redis_hash_with_ttl() {
    let (_container, url) = start_redis().await;
    let client = redis::Client::open(url.as_str()).expect("Invalid Redis URL");
    let mut conn = ConnectionManager::new(client)
        .await
        .expect("Failed to connect to Redis");
    let kv = RedisKeyValueStore::from_connection(conn.clone());

    let fields = vec![
        ("name".to_string(), "Mug".to_string()),
        ("price".to_string(), "10.00".to_string()),
    ];
    kv.hset_all("product_summary:3", &fields).await.unwrap();
    kv.expire("product_summary:3", Duration::from_secs(120)).await.unwrap();

    let stored = kv.hgetall("product_summary:3").await.unwrap();
    assert_eq!(stored.get("price").map(String::as_str), Some("10.00"));
    assert!(kv.hgetall("product_summary:4").await.unwrap().is_empty());

    let ttl: i64 = conn.ttl("product_summary:3").await.unwrap();
    assert!(ttl > 0 && ttl <= 120, "unexpected ttl {ttl}");
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_projection_key_layout_in_redis() {
    let (_container, url) = start_redis().await;
    let kv: Arc<dyn KeyValueStore> =
        Arc::new(RedisKeyValueStore::new(&url).await.expect("Failed to connect to Redis"));
    let store = Arc::new(MemoryStore::new());
    let sync = Arc::new(ProjectionSync::new(
        store.clone(),
        kv.clone(),
        OutboxConfig::default(),
        DEFAULT_SUMMARY_TTL,
    ));
    let app = Storefront::new(store.clone(), sync);

    let customer = app.customers.add(ann()).await.unwrap();
    assert_eq!(customer.projection, SyncStatus::Synced);
    let customer = customer.value;
    let product = app.products.add(mug()).await.unwrap().value;
    let order = app
        .orders
        .add(NewOrder {
            customer_id: customer.id,
            order_number: "ORD-0001".to_string(),
            status: "pending".to_string(),
            lines: vec![OrderLine {
                product_id: product.id,
                quantity: Some(3),
            }],
            created_at: parse_timestamp("2025-07-07 15:22:59").unwrap(),
        })
        .await
        .unwrap()
        .value;

    let raw = kv
        .get(&format!("customer:{}", customer.id))
        .await
        .unwrap()
        .expect("customer record missing");
    let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(json["email"], "ann@x.com");
    assert_eq!(json["created_at"], "2025-07-04 04:56:34");

    let raw = kv.get(&format!("order:{}", order.id)).await.unwrap().unwrap();
    let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(json["customer_name"], "Ann");
    assert_eq!(json["total_amount"], "30.00");

    assert_eq!(
        kv.smembers(&format!("orders:customer:{}", customer.id)).await.unwrap(),
        vec![order.id.to_string()]
    );
    let summary = kv.hgetall(&format!("product_summary:{}", product.id)).await.unwrap();
    assert_eq!(summary.get("name").map(String::as_str), Some("Mug"));

    app.orders.delete(order.id).await.unwrap();
    assert!(kv
        .smembers(&format!("orders:customer:{}", customer.id))
        .await
        .unwrap()
        .is_empty());
    assert!(app.orders.list().await.unwrap().is_empty());
    assert!(store.outbox_entries().await.is_empty());
}
