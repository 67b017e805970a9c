//! Integration tests against a live Redis server.
//!
//! Run with `TOLLGATE_TEST_REDIS_URL=redis://127.0.0.1:6379 cargo test -- --ignored`.

use std::sync::Arc;
use std::time::Duration;

use tollgate::ratelimit::{RateLimitClient, RateLimitResult};
use tollgate::store::{BucketStore, RedisStore};

fn redis_url() -> String {
    std::env::var("TOLLGATE_TEST_REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

async fn client() -> RateLimitClient<RedisStore> {
    let store = RedisStore::connect(&redis_url()).await.unwrap();
    RateLimitClient::new(Arc::new(store)).with_key_prefix(format!("tollgate-test:{}:", uuid::Uuid::new_v4()))
}

#[tokio::test]
#[ignore = "requires a Redis server"]
async fn test_server_time_is_epoch_micros() {
    let store = RedisStore::connect(&redis_url()).await.unwrap();
    let first = store.server_time().await.unwrap();
    let second = store.server_time().await.unwrap();

    // Later than 2020-01-01 in microseconds.
    assert!(first > 1_577_836_800_000_000);
    assert!(second >= first);
    store.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a Redis server"]
async fn test_bucket_lifecycle() {
    let client = client().await;

    assert_eq!(client.acquire("svc").await, RateLimitResult::NotFound);
    assert_eq!(
        client.init("svc", 5, 5, Duration::from_secs(3600)).await,
        RateLimitResult::Success
    );

    let fields = client.store().read_fields(&client.store_key("svc")).await.unwrap().unwrap();
    assert_eq!(fields.get("stored_permits").map(String::as_str), Some("5"));
    assert_eq!(fields.get("app").map(String::as_str), Some("svc"));

    assert_eq!(client.acquire_permits("svc", 3).await, RateLimitResult::Success);
    assert_eq!(client.acquire_permits("svc", 3).await, RateLimitResult::AcquireFail);
    assert_eq!(client.inspect("svc").await.unwrap().stored_permits, 2);

    assert_eq!(
        client.modify("svc", 1, Duration::from_secs(3600)).await,
        RateLimitResult::Success
    );
    let snapshot = client.inspect("svc").await.unwrap();
    assert_eq!(snapshot.stored_permits, 1);
    assert_eq!(snapshot.max_permits, 1);

    assert_eq!(client.delete("svc").await, RateLimitResult::Success);
    assert_eq!(client.delete("svc").await, RateLimitResult::Success);
    assert_eq!(client.acquire("svc").await, RateLimitResult::NotFound);
}

#[tokio::test]
#[ignore = "requires a Redis server"]
async fn test_refill_over_time() {
    let client = client().await;
    client.init("svc", 0, 10, Duration::from_millis(20)).await;

    tokio::time::sleep(Duration::from_millis(110)).await;

    // At least five 20ms intervals have passed.
    assert_eq!(client.acquire_permits("svc", 5).await, RateLimitResult::Success);
    client.delete("svc").await;
}

#[tokio::test]
#[ignore = "requires a Redis server"]
async fn test_failed_acquire_persists_whole_token_refill() {
    let client = client().await;
    client.init("svc", 0, 10, Duration::from_millis(100)).await;
    let start = client.inspect("svc").await.unwrap().last_refill_micros;

    tokio::time::sleep(Duration::from_millis(250)).await;

    // Two whole intervals have passed; the half interval carries over.
    assert_eq!(client.acquire_permits("svc", 5).await, RateLimitResult::AcquireFail);
    let snapshot = client.inspect("svc").await.unwrap();
    assert_eq!(snapshot.stored_permits, 2);
    assert_eq!(snapshot.last_refill_micros, start + 200_000);

    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(client.acquire_permits("svc", 3).await, RateLimitResult::Success);
    let snapshot = client.inspect("svc").await.unwrap();
    assert_eq!(snapshot.stored_permits, 0);
    assert_eq!(snapshot.last_refill_micros, start + 300_000);

    client.delete("svc").await;
}

#[tokio::test]
#[ignore = "requires a Redis server"]
async fn test_init_replaces_bucket_and_label() {
    let client = client().await;
    client
        .init_with_app("svc", 1, 5, Duration::from_secs(3600), "billing")
        .await;
    assert_eq!(client.inspect("svc").await.unwrap().app.as_deref(), Some("billing"));

    assert_eq!(
        client.init_with_app("svc", 9, 3, Duration::from_secs(60), "").await,
        RateLimitResult::Success
    );
    let snapshot = client.inspect("svc").await.unwrap();
    assert_eq!(snapshot.stored_permits, 3);
    assert_eq!(snapshot.max_permits, 3);
    assert_eq!(snapshot.interval_micros, 60_000_000);
    assert_eq!(snapshot.app, None);

    client.delete("svc").await;
}

#[tokio::test]
#[ignore = "requires a Redis server"]
async fn test_values_beyond_exact_integer_range_rejected_by_script() {
    let client = client().await;
    let store = client.store();
    let key = client.store_key("svc");
    let over = (1u64 << 53).to_string();

    let init = |initial: &str, max: &str| {
        vec![
            "init".to_string(),
            "0".to_string(),
            initial.to_string(),
            max.to_string(),
            "1000".to_string(),
            "svc".to_string(),
        ]
    };
    assert!(store.execute(&key, &init("1", &over)).await.is_err());
    assert!(store.execute(&key, &init(&over, "10")).await.is_err());
    assert!(store.read_fields(&key).await.unwrap().is_none());

    assert_eq!(store.execute(&key, &init("1", "10")).await.unwrap(), 1);
    let acquire = vec!["acquire".to_string(), "0".to_string(), over.clone()];
    assert!(store.execute(&key, &acquire).await.is_err());
    assert_eq!(client.inspect("svc").await.unwrap().stored_permits, 1);

    client.delete("svc").await;
}

#[tokio::test]
#[ignore = "requires a Redis server"]
async fn test_hash_without_bucket_fields_is_an_error() {
    use redis::AsyncCommands;

    let client = client().await;
    let key = client.store_key("svc");
    let mut conn = redis::Client::open(redis_url())
        .unwrap()
        .get_multiplexed_async_connection()
        .await
        .unwrap();
    let _: () = conn.hset(&key, "app", "svc").await.unwrap();

    assert_eq!(client.acquire("svc").await, RateLimitResult::Error);
    assert_eq!(
        client.modify("svc", 1, Duration::from_secs(1)).await,
        RateLimitResult::Error
    );

    client.delete("svc").await;
    assert_eq!(client.acquire("svc").await, RateLimitResult::NotFound);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires a Redis server"]
async fn test_concurrent_acquires_from_separate_connections() {
    let mut clients = Vec::new();
    let prefix = format!("tollgate-test:{}:", uuid::Uuid::new_v4());
    for _ in 0..4 {
        let store = RedisStore::connect(&redis_url()).await.unwrap();
        clients.push(Arc::new(RateLimitClient::new(Arc::new(store)).with_key_prefix(prefix.clone())));
    }
    clients[0].init("svc", 20, 20, Duration::from_secs(3600)).await;

    let calls = (0..100).map(|i| {
        let client = Arc::clone(&clients[i % clients.len()]);
        tokio::spawn(async move { client.acquire("svc").await })
    });
    let results = futures::future::join_all(calls).await;

    let granted = results
        .into_iter()
        .map(|joined| joined.unwrap())
        .filter(|result| *result == RateLimitResult::Success)
        .count();
    assert_eq!(granted, 20);

    clients[0].delete("svc").await;
}

#[tokio::test]
#[ignore = "requires a Redis server"]
async fn test_closed_store_reports_error() {
    let client = client().await;
    client.store().close().await.unwrap();
    assert_eq!(client.acquire("svc").await, RateLimitResult::Error);
}
