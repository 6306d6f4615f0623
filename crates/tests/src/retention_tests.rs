//! Unused data is retained for its window after the last subscriber leaves, then dropped.

use crate::mock_infrastructure::{create_posts_api, create_test_config};
use serde_json::json;
use spectra_core::{api::EndpointSet, ApiConfig, QueryEndpoint, QueryStatus, SubscriptionOptions};
use std::time::Duration;
use tokio::time::sleep;

fn retention_config() -> ApiConfig {
    ApiConfig { keep_unused_data_for_ms: 1_000, ..create_test_config() }
}

#[tokio::test(start_paused = true)]
async fn test_last_of_many_subscribers_starts_retention() {
    let (api, _backend) = create_posts_api(retention_config()).expect("api");

    let first = api.subscribe("getPost", &1, SubscriptionOptions::default()).expect("subscribes");
    let second = api.subscribe("getPost", &1, SubscriptionOptions::default()).expect("subscribes");
    api.settled().await;

    first.unsubscribe();
    sleep(Duration::from_secs(5)).await;
    assert_eq!(api.stats().entries, 1, "one subscriber still holds the entry");

    second.unsubscribe();
    sleep(Duration::from_millis(999)).await;
    assert_eq!(api.stats().entries, 1);
    sleep(Duration::from_millis(2)).await;
    assert_eq!(api.stats().entries, 0);
}

#[tokio::test(start_paused = true)]
async fn test_endpoint_retention_overrides_default() {
    let (api, _backend) = create_posts_api(retention_config()).expect("api");
    api.inject_endpoints(
        EndpointSet::new().query(
            "peekPost",
            QueryEndpoint::new()
                .query(|id| json!({ "path": format!("/posts/{id}") }))
                .keep_unused_data_for(Duration::from_millis(200)),
        ),
        false,
    )
    .expect("injects");

    let post = api.subscribe("getPost", &1, SubscriptionOptions::default()).expect("subscribes");
    let peek = api.subscribe("peekPost", &1, SubscriptionOptions::default()).expect("subscribes");
    api.settled().await;
    post.unsubscribe();
    peek.unsubscribe();

    sleep(Duration::from_millis(201)).await;
    assert_eq!(api.select("peekPost", &1).expect("known endpoint").status, QueryStatus::Uninitialized);
    assert_eq!(api.select("getPost", &1).expect("known endpoint").status, QueryStatus::Fulfilled);

    sleep(Duration::from_millis(800)).await;
    assert_eq!(api.stats().entries, 0);
}

#[tokio::test(start_paused = true)]
async fn test_collected_entry_fetches_again() {
    let (api, backend) = create_posts_api(retention_config()).expect("api");

    let sub = api.subscribe("getPost", &1, SubscriptionOptions::default()).expect("subscribes");
    api.settled().await;
    sub.unsubscribe();
    sleep(Duration::from_millis(1_001)).await;

    let again = api.subscribe("getPost", &1, SubscriptionOptions::default()).expect("subscribes");
    assert_eq!(again.snapshot().status, QueryStatus::Pending);
    assert_eq!(again.snapshot().data, None);
    api.settled().await;
    assert_eq!(backend.count("GET", "/posts/1"), 2);
}

#[tokio::test(start_paused = true)]
async fn test_subscription_dropped_mid_request_collects_after_settle() {
    let (api, backend) = create_posts_api(ApiConfig { keep_unused_data_for_ms: 0, ..create_test_config() })
        .expect("api");
    let gate = backend.hold_next("/posts/1");

    let sub = api.subscribe("getPost", &1, SubscriptionOptions::default()).expect("subscribes");
    backend.wait_for_requests(1).await;
    drop(sub);
    sleep(Duration::from_millis(50)).await;
    assert_eq!(api.stats().entries, 1, "pending entries are not collected");

    gate.notify_one();
    api.settled().await;
    sleep(Duration::from_millis(1)).await;
    assert_eq!(api.stats().entries, 0);
}
