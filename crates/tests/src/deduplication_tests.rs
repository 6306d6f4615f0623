//! One in-flight request per cache key, shared by every subscriber.

use crate::mock_infrastructure::{create_posts_api, create_test_config};
use serde_json::json;
use spectra_core::{QueryStatus, SubscriptionOptions};

#[tokio::test(start_paused = true)]
async fn test_concurrent_subscribers_share_one_request() {
    let (api, backend) = create_posts_api(create_test_config()).expect("api");

    let subscriptions: Vec<_> = (0..10)
        .map(|_| api.subscribe("getPost", &1, SubscriptionOptions::default()).expect("subscribes"))
        .collect();
    assert_eq!(api.get_active_subscriber_count("getPost", &1).expect("known endpoint"), 10);
    assert_eq!(api.running_queries().len(), 1);

    api.settled().await;

    assert_eq!(backend.count("GET", "/posts/1"), 1);
    for subscription in &subscriptions {
        let entry = subscription.snapshot();
        assert_eq!(entry.status, QueryStatus::Fulfilled);
        assert_eq!(entry.data, Some(json!({ "id": 1, "title": "first", "likes": 0, "labels": [] })));
    }
}

#[tokio::test(start_paused = true)]
async fn test_distinct_arguments_fetch_separately() {
    let (api, backend) = create_posts_api(create_test_config()).expect("api");

    let _first = api.subscribe("getPost", &1, SubscriptionOptions::default()).expect("subscribes");
    let _second = api.subscribe("getPost", &2, SubscriptionOptions::default()).expect("subscribes");
    let _list = api.subscribe("listPosts", &(), SubscriptionOptions::default()).expect("subscribes");
    api.settled().await;

    assert_eq!(backend.requests().len(), 3);
    assert_eq!(api.stats().entries, 3);
}

#[tokio::test(start_paused = true)]
async fn test_late_subscriber_reads_cached_data() {
    let (api, backend) = create_posts_api(create_test_config()).expect("api");

    let _first = api.subscribe("getPost", &1, SubscriptionOptions::default()).expect("subscribes");
    api.settled().await;

    let late = api.subscribe("getPost", &1, SubscriptionOptions::default()).expect("subscribes");
    assert_eq!(late.snapshot().status, QueryStatus::Fulfilled);
    api.settled().await;
    assert_eq!(backend.count("GET", "/posts/1"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_prefetch_joins_subscription_request() {
    let (api, backend) = create_posts_api(create_test_config()).expect("api");

    let _sub = api.subscribe("getPost", &1, SubscriptionOptions::default()).expect("subscribes");
    api.prefetch("getPost", &1, spectra_core::PrefetchOptions { force: true, if_older_than: None })
        .expect("prefetches");
    api.settled().await;

    assert_eq!(backend.count("GET", "/posts/1"), 1);
}
