//! A superseded request can never overwrite the result of a newer one.

use crate::mock_infrastructure::{create_posts_api, create_test_config};
use serde_json::json;
use spectra_core::{QueryError, QueryStatus, SubscriptionOptions};
use std::time::Duration;
use tokio::time::sleep;

#[tokio::test(start_paused = true)]
async fn test_refetch_supersedes_slow_request() {
    let (api, backend) = create_posts_api(create_test_config()).expect("api");
    let gate = backend.hold_next("/posts/1");

    let mut sub = api.subscribe("getPost", &1, SubscriptionOptions::default()).expect("subscribes");
    backend.wait_for_requests(1).await;

    backend.rename_post(1, "renamed");
    assert_eq!(api.refetch("getPost", &1), Ok(true));

    let entry = sub.wait_for(|entry| entry.status == QueryStatus::Fulfilled).await.expect("entry alive");
    assert_eq!(entry.data.as_ref().map(|data| data["title"].clone()), Some(json!("renamed")));

    gate.notify_one();
    sleep(Duration::from_millis(100)).await;

    let latest = sub.snapshot();
    assert_eq!(latest.data.as_ref().map(|data| data["title"].clone()), Some(json!("renamed")));
    assert_eq!(latest.revision, entry.revision, "nothing landed after the newer result");
    assert_eq!(backend.count("GET", "/posts/1"), 2);
}

#[tokio::test(start_paused = true)]
async fn test_superseded_failure_does_not_reject_entry() {
    let (api, backend) = create_posts_api(create_test_config()).expect("api");
    let gate = backend.hold_next("/posts/1");
    backend.fail_next("/posts/1", QueryError::http(503, json!("busy")));

    let mut sub = api.subscribe("getPost", &1, SubscriptionOptions::default()).expect("subscribes");
    backend.wait_for_requests(1).await;
    assert!(sub.refetch());

    let entry = sub.wait_for(|entry| entry.status != QueryStatus::Pending).await.expect("entry alive");
    gate.notify_one();
    api.settled().await;

    assert_eq!(entry.status, QueryStatus::Fulfilled);
    assert_eq!(sub.snapshot().status, QueryStatus::Fulfilled);
    assert_eq!(sub.snapshot().error, None);
}

#[tokio::test(start_paused = true)]
async fn test_stale_while_revalidate_keeps_previous_data() {
    let (api, backend) = create_posts_api(create_test_config()).expect("api");

    let sub = api.subscribe("getPost", &1, SubscriptionOptions::default()).expect("subscribes");
    api.settled().await;
    let before = sub.snapshot().data.clone();

    backend.rename_post(1, "renamed");
    let gate = backend.hold_next("/posts/1");
    assert!(sub.refetch());
    backend.wait_for_requests(2).await;

    let pending = sub.snapshot();
    assert_eq!(pending.status, QueryStatus::Pending);
    assert_eq!(pending.data, before, "previous data stays visible while refetching");
    assert!(pending.is_fetching());
    assert!(!pending.is_loading());

    gate.notify_one();
    api.settled().await;
    assert_eq!(sub.snapshot().data.as_ref().map(|data| data["title"].clone()), Some(json!("renamed")));
}
