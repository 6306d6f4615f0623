//! End-to-end runs through `HttpBaseQuery` against a mockito server.

use crate::mock_infrastructure::{create_test_config, HttpMockBuilder};
use serde_json::json;
use spectra_core::{
    executor::{HttpBaseQuery, HttpBaseQueryConfig},
    Api, MutationEndpoint, QueryEndpoint, QueryError, QueryStatus, SubscriptionOptions, Tag,
};
use std::time::Duration;

fn create_http_api(base_url: String) -> Api {
    let base_query = HttpBaseQuery::new(HttpBaseQueryConfig::new(base_url)).expect("http client");
    Api::builder()
        .base_query(base_query)
        .config(create_test_config())
        .query(
            "getTodo",
            QueryEndpoint::new()
                .query(|id| json!({ "path": format!("/todos/{id}") }))
                .provides_tags(vec![Tag::new("Todo")]),
        )
        .mutation(
            "addTodo",
            MutationEndpoint::new()
                .query(|body| json!({ "path": "/todos", "method": "POST", "body": body }))
                .invalidates_tags(vec![Tag::new("Todo")]),
        )
        .build()
        .expect("valid http api")
}

#[tokio::test]
async fn test_query_fulfils_over_http() {
    let mut mock = HttpMockBuilder::new().await;
    mock.mock_get("/todos/1", 200, &json!({ "id": 1, "done": false }), 1).await;
    let api = create_http_api(mock.url());

    let mut sub = api.subscribe("getTodo", &1, SubscriptionOptions::default()).expect("subscribes");
    let entry = tokio::time::timeout(
        Duration::from_secs(5),
        sub.wait_for(|entry| entry.status == QueryStatus::Fulfilled),
    )
    .await
    .expect("settles in time")
    .expect("entry alive");

    assert_eq!(entry.data, Some(json!({ "id": 1, "done": false })));
    mock.assert_all().await;
}

#[tokio::test]
async fn test_http_error_status_rejects_entry() {
    let mut mock = HttpMockBuilder::new().await;
    mock.mock_get("/todos/7", 404, &json!({ "message": "missing" }), 1).await;
    let api = create_http_api(mock.url());

    let mut sub = api.subscribe("getTodo", &7, SubscriptionOptions::default()).expect("subscribes");
    let entry = tokio::time::timeout(
        Duration::from_secs(5),
        sub.wait_for(|entry| entry.status == QueryStatus::Rejected),
    )
    .await
    .expect("settles in time")
    .expect("entry alive");

    assert_eq!(entry.error, Some(QueryError::http(404, json!({ "message": "missing" }))));
    assert_eq!(entry.data, None);
}

#[tokio::test]
async fn test_mutation_posts_json_and_invalidates() {
    let mut mock = HttpMockBuilder::new().await;
    mock.mock_get("/todos/1", 200, &json!({ "id": 1, "done": false }), 2).await;
    mock.mock_json("POST", "/todos", &json!({ "title": "write tests" }), 201, &json!({ "id": 2 })).await;
    let api = create_http_api(mock.url());

    let mut sub = api.subscribe("getTodo", &1, SubscriptionOptions::default()).expect("subscribes");
    sub.wait_for(|entry| entry.status == QueryStatus::Fulfilled).await.expect("entry alive");
    let first_revision = sub.snapshot().revision;

    let created = api.trigger("addTodo", &json!({ "title": "write tests" })).expect("triggers");
    assert_eq!(created.unwrap().await, Ok(json!({ "id": 2 })));

    tokio::time::timeout(
        Duration::from_secs(5),
        sub.wait_for(|entry| entry.status == QueryStatus::Fulfilled && entry.revision > first_revision + 1),
    )
    .await
    .expect("refetch in time")
    .expect("entry alive");
    api.settled().await;

    mock.assert_all().await;
}
