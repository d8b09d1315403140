//! Integration tests for the Redis store using testcontainers.
//!
//! These tests start a Redis container and run the store, limiter and
//! idempotency coordinator against it. Docker must be available.
//!
//! Run with: `cargo test --test redis_store_tests`
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use mailer_guard::{
    IdempotencyConfig, IdempotencyCoordinator, LockAcquisition, RateLimiterConfig, RedisStore,
    SetOptions, Store, TokenBucketLimiter,
};
use serde_json::json;
use testcontainers::core::{IntoContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage};
use tokio::time::sleep;

/// Redis container configuration
struct RedisContainer;

impl RedisContainer {
    const IMAGE: &'static str = "redis";
    const TAG: &'static str = "7-alpine";
    const PORT: u16 = 6379;

    /// Start a Redis container and connect a store to it
    async fn start() -> (ContainerAsync<GenericImage>, RedisStore) {
        let container = GenericImage::new(Self::IMAGE, Self::TAG)
            .with_exposed_port(Self::PORT.tcp())
            .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"))
            .start()
            .await
            .expect("Failed to start Redis container");

        let port = container
            .get_host_port_ipv4(Self::PORT)
            .await
            .expect("Failed to get Redis port");

        let store = RedisStore::connect(&format!("redis://127.0.0.1:{port}/"))
            .await
            .expect("Failed to connect to Redis");

        (container, store)
    }
}

#[tokio::test]
async fn test_get_set_delete() {
    let (_container, store) = RedisContainer::start().await;
    let options = SetOptions::with_ttl(Duration::from_secs(60));

    assert!(store.get("k").await.unwrap().is_none());
    assert!(store.set("k", "v1", options).await.unwrap());
    assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v1"));

    assert!(store.set("k", "v2", options).await.unwrap());
    assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v2"));

    store.delete("k").await.unwrap();
    assert!(store.get("k").await.unwrap().is_none());

    // Deleting a missing key is not an error
    store.delete("k").await.unwrap();
    store.ping().await.unwrap();
}

#[tokio::test]
async fn test_only_if_absent() {
    let (_container, store) = RedisContainer::start().await;
    let options = SetOptions::with_ttl(Duration::from_secs(60)).only_if_absent();

    assert!(store.set("lock", "first", options).await.unwrap());
    assert!(!store.set("lock", "second", options).await.unwrap());
    assert_eq!(store.get("lock").await.unwrap().as_deref(), Some("first"));
}

#[tokio::test]
async fn test_ttl_expiry() {
    let (_container, store) = RedisContainer::start().await;
    let options = SetOptions::with_ttl(Duration::from_millis(200)).only_if_absent();

    assert!(store.set("short", "v", options).await.unwrap());
    sleep(Duration::from_millis(400)).await;

    assert!(store.get("short").await.unwrap().is_none());
    assert!(store.set("short", "again", options).await.unwrap());
}

#[tokio::test]
async fn test_concurrent_set_if_absent_has_single_winner() {
    let (_container, store) = RedisContainer::start().await;
    let store = Arc::new(store);

    let mut handles = Vec::new();
    for i in 0..16 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .set(
                    "race",
                    &format!("worker-{i}"),
                    SetOptions::with_ttl(Duration::from_secs(60)).only_if_absent(),
                )
                .await
                .unwrap()
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn test_limiter_and_coordinator_over_redis() {
    let (_container, store) = RedisContainer::start().await;
    let store: Arc<dyn Store> = Arc::new(store);

    let limiter =
        TokenBucketLimiter::new(store.clone(), RateLimiterConfig::new(2, 0.01)).unwrap();
    assert!(limiter.limit("ws_1", 1).await.unwrap().allowed);
    assert!(limiter.limit("ws_1", 1).await.unwrap().allowed);
    assert!(!limiter.limit("ws_1", 1).await.unwrap().allowed);
    limiter.reset("ws_1").await.unwrap();
    assert_eq!(limiter.get_info("ws_1").await.unwrap().tokens_remaining, 2);

    let coordinator = IdempotencyCoordinator::new(store, IdempotencyConfig::default());
    let body = json!({"to": ["user@example.com"], "subject": "Hi"});

    let LockAcquisition::Acquired { body_hash, .. } =
        coordinator.acquire_lock("req-1", &body).await.unwrap()
    else {
        panic!("first acquisition must succeed");
    };
    assert_eq!(
        coordinator.acquire_lock("req-1", &body).await.unwrap(),
        LockAcquisition::Duplicate
    );

    coordinator
        .store_result("req-1", &json!({"id": "email_1"}), &body_hash)
        .await
        .unwrap();
    coordinator.release_lock("req-1").await.unwrap();

    let stored = coordinator.get_result("req-1").await.unwrap().unwrap();
    assert_eq!(stored.result, json!({"id": "email_1"}));
}
