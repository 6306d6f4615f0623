//! Optimistic edits show immediately, survive success and roll back exactly on failure.

use crate::mock_infrastructure::{create_posts_api, create_test_config};
use serde_json::{json, Value};
use spectra_core::{Api, QueryError, QuerySubscription, SubscriptionOptions};

async fn watch_post(api: &Api, id: i64) -> QuerySubscription {
    let sub = api.subscribe("getPost", &id, SubscriptionOptions::default()).expect("subscribes");
    api.settled().await;
    sub
}

fn field(sub: &QuerySubscription, name: &str) -> Value {
    sub.snapshot().data.as_ref().map(|data| data[name].clone()).unwrap_or(Value::Null)
}

#[tokio::test(start_paused = true)]
async fn test_like_shows_immediately_and_is_kept() {
    let (api, backend) = create_posts_api(create_test_config()).expect("api");
    let post = watch_post(&api, 1).await;

    let like = api.trigger("likePost", &1).expect("triggers");
    assert_eq!(field(&post, "likes"), json!(1), "visible before the server answers");

    like.unwrap().await.expect("like succeeds");
    assert_eq!(field(&post, "likes"), json!(1));
    assert_eq!(backend.post(1).map(|post| post["likes"].clone()), Some(json!(1)));
}

#[tokio::test(start_paused = true)]
async fn test_failed_like_restores_exact_snapshot() {
    let (api, backend) = create_posts_api(create_test_config()).expect("api");
    let post = watch_post(&api, 1).await;
    let original = post.snapshot().data.clone();

    backend.fail_next("/posts/1/like", QueryError::http(409, json!("conflict")));
    let like = api.trigger("likePost", &1).expect("triggers");
    assert_ne!(post.snapshot().data, original);

    assert_eq!(like.unwrap().await, Err(QueryError::http(409, json!("conflict"))));
    assert_eq!(post.snapshot().data, original);
}

#[tokio::test(start_paused = true)]
async fn test_rollback_keeps_later_unrelated_edit() {
    let (api, backend) = create_posts_api(create_test_config()).expect("api");
    let post = watch_post(&api, 1).await;

    let gate = backend.hold_next("/posts/1/like");
    backend.fail_next("/posts/1/like", QueryError::network("reset"));
    let like = api.trigger("likePost", &1).expect("triggers");
    let label = api.trigger("labelPost", &json!({ "id": 1, "label": "rust" })).expect("triggers");
    assert_eq!(field(&post, "likes"), json!(1));
    assert_eq!(field(&post, "labels"), json!(["rust"]));

    label.unwrap().await.expect("label succeeds");
    gate.notify_one();
    assert!(like.result().await.is_error());

    assert_eq!(field(&post, "likes"), json!(0), "the failed like is undone");
    assert_eq!(field(&post, "labels"), json!(["rust"]), "the committed label stays");
}

#[tokio::test(start_paused = true)]
async fn test_rollback_under_pending_later_edit() {
    let (api, backend) = create_posts_api(create_test_config()).expect("api");
    let post = watch_post(&api, 1).await;

    backend.fail_next("/posts/1/like", QueryError::network("reset"));
    let gate = backend.hold_next("/posts/1/labels");
    let like = api.trigger("likePost", &1).expect("triggers");
    let label = api.trigger("labelPost", &json!({ "id": 1, "label": "rust" })).expect("triggers");

    assert!(like.result().await.is_error());
    assert_eq!(field(&post, "likes"), json!(0));
    assert_eq!(field(&post, "labels"), json!(["rust"]), "the pending label is re-applied");

    gate.notify_one();
    label.unwrap().await.expect("label succeeds");
    assert_eq!(field(&post, "labels"), json!(["rust"]));
    assert_eq!(backend.post(1).map(|post| post["labels"].clone()), Some(json!(["rust"])));
}

#[tokio::test(start_paused = true)]
async fn test_failed_edit_rolls_back_then_refetches() {
    let (api, backend) = create_posts_api(create_test_config()).expect("api");
    let post = watch_post(&api, 1).await;
    let original = post.snapshot().data.clone();

    backend.fail_next("/posts/1", QueryError::http(422, json!("title taken")));
    let edit = api
        .trigger("editPost", &json!({ "id": 1, "changes": { "title": "taken" } }))
        .expect("triggers");
    assert_eq!(field(&post, "title"), json!("taken"));

    assert!(edit.result().await.is_error());
    assert_eq!(post.snapshot().data, original);

    tokio::time::sleep(std::time::Duration::from_millis(1)).await;
    api.settled().await;
    assert_eq!(backend.count("GET", "/posts/1"), 2, "derived tags invalidate on failure too");
    assert_eq!(post.snapshot().data, original);
}
