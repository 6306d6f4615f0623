//! Endpoint definitions and constructors shared by the integration suites.

use super::backend::InMemoryBackend;
use serde_json::{json, Value};
use spectra_core::{
    api::{EndpointSet, OptimisticUpdate},
    Api, ApiConfig, ApiError, MutationEndpoint, QueryEndpoint, Tag,
};
use std::{sync::Arc, time::Duration};

/// Default backend latency.
pub const LATENCY: Duration = Duration::from_millis(20);

fn id_of(args: &Value) -> i64 {
    args.get("id").and_then(Value::as_i64).or_else(|| args.as_i64()).unwrap_or_default()
}

/// `getPost`/`listPosts` queries and `createPost`/`editPost`/`likePost`/`labelPost` mutations
/// over the in-memory posts backend.
#[must_use]
pub fn create_posts_endpoints() -> EndpointSet {
    EndpointSet::new()
        .query(
            "getPost",
            QueryEndpoint::new()
                .query(|id| json!({ "path": format!("/posts/{id}") }))
                .provides_tags_with(|_, _, id| vec![Tag::with_id("Post", id_of(id))]),
        )
        .query(
            "listPosts",
            QueryEndpoint::new()
                .query(|_| json!({ "path": "/posts" }))
                .provides_tags_with(|data, _, _| {
                    let mut tags = vec![Tag::with_id("Post", "LIST")];
                    if let Some(posts) = data.and_then(Value::as_array) {
                        tags.extend(posts.iter().map(|post| Tag::with_id("Post", id_of(post))));
                    }
                    tags
                }),
        )
        .mutation(
            "createPost",
            MutationEndpoint::new()
                .query(|body| json!({ "path": "/posts", "method": "POST", "body": body }))
                .invalidates_tags(vec![Tag::with_id("Post", "LIST")]),
        )
        .mutation(
            "editPost",
            MutationEndpoint::new()
                .query(|args| {
                    json!({ "path": format!("/posts/{}", id_of(args)), "method": "PATCH", "body": args["changes"] })
                })
                .invalidates_tags_with(|_, _, args| vec![Tag::with_id("Post", id_of(args))])
                .optimistic(|args| {
                    let changes = args["changes"].clone();
                    vec![OptimisticUpdate::new("getPost", json!(id_of(args)), move |draft| {
                        if let (Some(draft), Some(changes)) = (draft.as_object_mut(), changes.as_object()) {
                            for (field, value) in changes {
                                draft.insert(field.clone(), value.clone());
                            }
                        }
                    })]
                }),
        )
        .mutation(
            "likePost",
            MutationEndpoint::new()
                .query(|id| json!({ "path": format!("/posts/{id}/like"), "method": "POST" }))
                .optimistic(|id| {
                    vec![OptimisticUpdate::new("getPost", id.clone(), |draft| {
                        let likes = draft["likes"].as_i64().unwrap_or_default();
                        draft["likes"] = json!(likes + 1);
                    })]
                }),
        )
        .mutation(
            "labelPost",
            MutationEndpoint::new()
                .query(|args| {
                    json!({
                        "path": format!("/posts/{}/labels", id_of(args)),
                        "method": "POST",
                        "body": { "label": args["label"] },
                    })
                })
                .optimistic(|args| {
                    let label = args["label"].clone();
                    vec![OptimisticUpdate::new("getPost", json!(id_of(args)), move |draft| {
                        if let Some(labels) = draft["labels"].as_array_mut() {
                            labels.push(label);
                        }
                    })]
                }),
        )
}

/// Config with retries disabled so failures surface on the first attempt.
#[must_use]
pub fn create_test_config() -> ApiConfig {
    ApiConfig { retry: spectra_core::executor::RetryPolicy::none(), ..ApiConfig::default() }
}

/// Creates an `Api` over a fresh backend seeded with posts 1 ("first") and 2 ("second").
///
/// # Errors
///
/// Returns [`ApiError`] when called outside a Tokio runtime or with an invalid config.
pub fn create_posts_api(config: ApiConfig) -> Result<(Api, Arc<InMemoryBackend>), ApiError> {
    let backend = InMemoryBackend::new(LATENCY);
    backend.insert_post("first");
    backend.insert_post("second");

    let api = Api::builder()
        .base_query_arc(backend.clone())
        .config(config)
        .endpoints(create_posts_endpoints())
        .build()?;
    Ok((api, backend))
}
