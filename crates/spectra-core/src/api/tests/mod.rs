//! Tests for the `Api` cache instance.
//!
//! Organised by functionality area. All timer-driven tests run on a paused clock.

use crate::{
    api::{Api, EndpointSet, MutationEndpoint, OptimisticUpdate, QueryEndpoint},
    cache::{QueryStatus, SubscriptionOptions},
    config::ApiConfig,
    executor::{BaseQuery, QueryContext, QueryError},
    types::Tag,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::{sync::Arc, time::Duration};

// ============================================================================
// Shared Test Helpers
// ============================================================================

struct ScriptedReply {
    request: Option<Value>,
    delay: Duration,
    result: Result<Value, QueryError>,
}

/// Base query that records every request and replays scripted replies.
///
/// A scripted reply is consumed by the first request it matches; unmatched requests answer
/// `{"request": <descriptor>, "call": <n>}` after the default delay.
pub(crate) struct ScriptedBaseQuery {
    requests: Mutex<Vec<Value>>,
    replies: Mutex<Vec<ScriptedReply>>,
    default_delay: Duration,
}

impl ScriptedBaseQuery {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            replies: Mutex::new(Vec::new()),
            default_delay: Duration::from_millis(10),
        })
    }

    /// Scripts the reply for the next request, whatever it is.
    pub(crate) fn reply(&self, delay_ms: u64, result: Result<Value, QueryError>) {
        self.replies.lock().push(ScriptedReply {
            request: None,
            delay: Duration::from_millis(delay_ms),
            result,
        });
    }

    /// Scripts the reply for the next request equal to `request`.
    pub(crate) fn reply_to(&self, request: Value, delay_ms: u64, result: Result<Value, QueryError>) {
        self.replies.lock().push(ScriptedReply {
            request: Some(request),
            delay: Duration::from_millis(delay_ms),
            result,
        });
    }

    pub(crate) fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    pub(crate) fn requests(&self) -> Vec<Value> {
        self.requests.lock().clone()
    }

    pub(crate) async fn wait_for_calls(&self, expected: usize) {
        while self.calls() < expected {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }
}

#[async_trait]
impl BaseQuery for ScriptedBaseQuery {
    async fn execute(&self, request: Value, _ctx: &QueryContext) -> Result<Value, QueryError> {
        let call = {
            let mut requests = self.requests.lock();
            requests.push(request.clone());
            requests.len()
        };

        let scripted = {
            let mut replies = self.replies.lock();
            replies
                .iter()
                .position(|reply| reply.request.as_ref().is_none_or(|expected| *expected == request))
                .map(|index| replies.remove(index))
        };

        let (delay, result) = match scripted {
            Some(reply) => (reply.delay, reply.result),
            None => (self.default_delay, Ok(json!({ "request": request, "call": call }))),
        };
        tokio::time::sleep(delay).await;
        result
    }
}

fn post_id(args: &Value) -> i64 {
    args.get("id").and_then(Value::as_i64).or_else(|| args.as_i64()).unwrap_or_default()
}

/// Endpoints shared by the suites:
/// - `getPost(id)` provides `{Post, id}`
/// - `getPosts()` provides `{Post}`
/// - `getUser(id)` provides `{User, id}`
/// - `addPost` invalidates `{Post}` on success
/// - `updatePost({id, ..})` invalidates `{Post, id}`, replacing the cached post with the
///   response
/// - `likePost({id})` optimistically increments `likes`
/// - `renamePost({id, title})` optimistically sets `title`
pub(crate) fn create_test_endpoints() -> EndpointSet {
    EndpointSet::new()
        .query(
            "getPost",
            QueryEndpoint::new()
                .query(|id| json!({ "path": format!("/posts/{id}") }))
                .provides_tags_with(|_, _, id| vec![Tag::with_id("Post", post_id(id))]),
        )
        .query(
            "getPosts",
            QueryEndpoint::new()
                .query(|_| json!({ "path": "/posts" }))
                .provides_tags(vec![Tag::new("Post")]),
        )
        .query(
            "getUser",
            QueryEndpoint::new()
                .query(|id| json!({ "path": format!("/users/{id}") }))
                .provides_tags_with(|_, _, id| vec![Tag::with_id("User", post_id(id))]),
        )
        .mutation(
            "addPost",
            MutationEndpoint::new()
                .query(|body| json!({ "path": "/posts", "method": "POST", "body": body }))
                .invalidates_tags(vec![Tag::new("Post")]),
        )
        .mutation(
            "updatePost",
            MutationEndpoint::new()
                .query(|body| json!({ "path": "/posts/update", "method": "PATCH", "body": body }))
                .invalidates_tags_with(|_, _, args| vec![Tag::with_id("Post", post_id(args))])
                .optimistic(|args| {
                    let patch = args.clone();
                    vec![OptimisticUpdate::new("getPost", json!(post_id(args)), move |draft| {
                        if let (Some(draft), Some(fields)) = (draft.as_object_mut(), patch.as_object()) {
                            for (field, value) in fields {
                                draft.insert(field.clone(), value.clone());
                            }
                        }
                    })
                    .replace_with_response()]
                }),
        )
        .mutation(
            "likePost",
            MutationEndpoint::new()
                .query(|body| json!({ "path": "/posts/like", "method": "POST", "body": body }))
                .optimistic(|args| {
                    vec![OptimisticUpdate::new("getPost", json!(post_id(args)), |draft| {
                        let likes = draft["likes"].as_i64().unwrap_or_default();
                        draft["likes"] = json!(likes + 1);
                    })]
                }),
        )
        .mutation(
            "renamePost",
            MutationEndpoint::new()
                .query(|body| json!({ "path": "/posts/rename", "method": "POST", "body": body }))
                .optimistic(|args| {
                    let title = args["title"].clone();
                    vec![OptimisticUpdate::new("getPost", json!(post_id(args)), move |draft| {
                        draft["title"] = title;
                    })]
                }),
        )
}

/// Creates a test `Api` with default configuration and the shared endpoints.
pub(crate) fn create_test_api() -> (Api, Arc<ScriptedBaseQuery>) {
    create_test_api_with(ApiConfig::default())
}

pub(crate) fn create_test_api_with(config: ApiConfig) -> (Api, Arc<ScriptedBaseQuery>) {
    let base_query = ScriptedBaseQuery::new();
    let api = Api::builder()
        .base_query_arc(base_query.clone())
        .config(config)
        .endpoints(create_test_endpoints())
        .build()
        .expect("valid test api");
    (api, base_query)
}

/// Config with short retention windows for GC tests.
pub(crate) fn create_test_config(keep_unused_ms: u64, keep_prefetch_ms: u64) -> ApiConfig {
    ApiConfig {
        keep_unused_data_for_ms: keep_unused_ms,
        keep_prefetch_subscriptions_for_ms: keep_prefetch_ms,
        ..ApiConfig::default()
    }
}

pub(crate) fn no_options() -> SubscriptionOptions {
    SubscriptionOptions::default()
}

pub(crate) async fn wait_until_fulfilled(api: &Api, endpoint: &str, args: &Value) -> Value {
    loop {
        let entry = api.select(endpoint, args).expect("known endpoint");
        if entry.status == QueryStatus::Fulfilled {
            return entry.data.unwrap_or(Value::Null);
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

// ============================================================================
// Test Submodules
// ============================================================================
