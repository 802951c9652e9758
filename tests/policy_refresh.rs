// Policy caching and single-flight refresh against the stub service.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{Reply, Route, StubServer};
use modgate::{ClientConfig, ContentMeta, Policy};
use serde_json::json;

#[tokio::test]
async fn fresh_policy_is_fetched_once() {
    let server = StubServer::start().await;
    let client = server.client();

    let first = client.policy().await;
    let second = client.policy().await;
    let third = client.policy().await;

    assert_eq!(server.hits(Route::Policy), 1);
    assert!(Arc::ptr_eq(&first, &second));
    assert!(Arc::ptr_eq(&first, &third));
    assert_eq!(first.toxicity_threshold, 0.8);
    assert_eq!(first.sexual_threshold, 0.9);
}

#[tokio::test]
async fn stale_policy_is_refetched() {
    let server = StubServer::start().await;
    let client = server.client_with(ClientConfig {
        policy_refresh_seconds: 0,
        ..server.config()
    });

    client.policy().await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    client.policy().await;

    assert_eq!(server.hits(Route::Policy), 2);
}

#[tokio::test]
async fn concurrent_stale_callers_share_one_request() {
    let server = StubServer::start().await;
    server.set(
        Route::Policy,
        Reply::json(common::default_policy()).delayed(Duration::from_millis(100)),
    );
    let client = server.client();

    let policies = futures::future::join_all((0..12).map(|_| client.policy())).await;

    assert_eq!(server.hits(Route::Policy), 1);
    for policy in &policies[1..] {
        assert!(Arc::ptr_eq(&policies[0], policy));
    }
    assert!(!client.policy_store().is_refreshing().await);
}

#[tokio::test]
async fn concurrent_checks_share_one_refresh() {
    let server = StubServer::start().await;
    server.set(
        Route::Policy,
        Reply::json(common::default_policy()).delayed(Duration::from_millis(50)),
    );
    let client = server.client();
    let meta = ContentMeta::default();

    let results =
        futures::future::join_all((0..8).map(|i| {
            let text = format!("message {i}");
            let client = &client;
            let meta = &meta;
            async move { client.check_text(&text, meta).await }
        }))
        .await;

    assert!(results.iter().all(|permitted| *permitted));
    assert_eq!(server.hits(Route::Policy), 1);
    assert_eq!(server.hits(Route::CheckText), 8);
}

#[tokio::test]
async fn failed_refresh_keeps_defaults_and_retries() {
    let server = StubServer::start().await;
    server.set(Route::Policy, Reply::status(500));
    let client = server.client();

    let served = client.policy().await;
    assert_eq!(*served, Policy::default());
    assert!(client.policy_store().last_fetch().await.is_none());

    server.set(Route::Policy, Reply::json(json!({"nsfwThreshold": 0.6})));
    let recovered = client.policy().await;

    assert_eq!(server.hits(Route::Policy), 2);
    assert_eq!(recovered.nsfw_threshold, 0.6);
    assert!(client.policy_store().last_fetch().await.is_some());
}

#[tokio::test]
async fn failure_after_success_keeps_last_good_policy() {
    let server = StubServer::start().await;
    let client = server.client_with(ClientConfig {
        policy_refresh_seconds: 0,
        ..server.config()
    });

    let good = client.policy().await;
    let fetched_at = client.policy_store().last_fetch().await;

    server.set(Route::Policy, Reply::status(503));
    tokio::time::sleep(Duration::from_millis(10)).await;
    let served = client.policy().await;

    assert!(Arc::ptr_eq(&good, &served));
    assert_eq!(client.policy_store().last_fetch().await, fetched_at);
}

#[tokio::test]
async fn malformed_policy_body_is_a_failed_refresh() {
    let server = StubServer::start().await;
    server.set(Route::Policy, Reply::garbage());
    let client = server.client();

    let served = client.policy().await;

    assert_eq!(*served, Policy::default());
    assert!(client.policy_store().last_fetch().await.is_none());
}

#[tokio::test]
async fn slow_policy_endpoint_times_out() {
    let server = StubServer::start().await;
    server.set(
        Route::Policy,
        Reply::json(common::default_policy()).delayed(Duration::from_secs(3)),
    );
    let client = server.client_with(ClientConfig {
        timeout_ms: 50,
        ..server.config()
    });

    let start = Instant::now();
    let served = client.policy().await;

    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(*served, Policy::default());
    assert!(!client.policy_store().is_refreshing().await);
}

#[tokio::test]
async fn loosely_typed_policy_is_coerced() {
    let server = StubServer::start().await;
    server.set(
        Route::Policy,
        Reply::json(json!({
            "blockToxicity": "false",
            "blockNsfwImages": 1,
            "sexualThreshold": "0.9",
            "nsfwThreshold": null
        })),
    );
    let client = server.client();

    let policy = client.policy().await;

    assert!(!policy.block_toxicity);
    assert!(policy.block_sexual);
    assert!(policy.block_nsfw_images);
    assert_eq!(policy.sexual_threshold, 0.9);
    assert_eq!(policy.nsfw_threshold, 0.85);
}

#[tokio::test]
async fn requests_carry_bearer_token() {
    let server = StubServer::start().await;
    let client = server.client();

    client.policy().await;

    let requests = server.requests(Route::Policy);
    assert_eq!(
        requests[0].authorization.as_deref(),
        Some("Bearer test-key")
    );
}
