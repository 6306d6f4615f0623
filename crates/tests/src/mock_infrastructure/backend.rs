//! In-memory REST backend implementing [`BaseQuery`].
//!
//! Serves a small posts collection from request descriptors of the form
//! `{ "path": "/posts/1", "method": "GET", "body": ... }`.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use spectra_core::{
    executor::{BaseQuery, QueryContext},
    QueryError,
};
use std::{
    collections::{BTreeMap, VecDeque},
    sync::Arc,
    time::Duration,
};
use tokio::sync::Notify;

/// A request as seen by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub body: Value,
    pub attempt: u32,
}

#[derive(Default)]
struct BackendState {
    posts: BTreeMap<i64, Value>,
    next_id: i64,
    log: Vec<RecordedRequest>,
    failures: VecDeque<(String, QueryError)>,
    gates: VecDeque<(String, Arc<Notify>)>,
}

pub struct InMemoryBackend {
    state: Mutex<BackendState>,
    latency: Duration,
}

impl InMemoryBackend {
    /// Creates a backend answering after `latency`.
    #[must_use]
    pub fn new(latency: Duration) -> Arc<Self> {
        Arc::new(Self { state: Mutex::new(BackendState { next_id: 1, ..BackendState::default() }), latency })
    }

    /// Stores a post, returning its id.
    pub fn insert_post(&self, title: &str) -> i64 {
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.posts.insert(id, json!({ "id": id, "title": title, "likes": 0, "labels": [] }));
        id
    }

    /// Changes a stored post behind the cache's back.
    pub fn rename_post(&self, id: i64, title: &str) {
        if let Some(post) = self.state.lock().posts.get_mut(&id) {
            post["title"] = json!(title);
        }
    }

    #[must_use]
    pub fn post(&self, id: i64) -> Option<Value> {
        self.state.lock().posts.get(&id).cloned()
    }

    /// Fails the next request whose path starts with `path_prefix`.
    pub fn fail_next(&self, path_prefix: &str, error: QueryError) {
        self.state.lock().failures.push_back((path_prefix.to_string(), error));
    }

    /// Holds the next request whose path starts with `path_prefix` until the returned
    /// handle is notified.
    pub fn hold_next(&self, path_prefix: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state.lock().gates.push_back((path_prefix.to_string(), gate.clone()));
        gate
    }

    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().log.clone()
    }

    #[must_use]
    pub fn count(&self, method: &str, path: &str) -> usize {
        self.state.lock().log.iter().filter(|r| r.method == method && r.path == path).count()
    }

    pub async fn wait_for_requests(&self, expected: usize) {
        while self.state.lock().log.len() < expected {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    fn take_matching<T>(queue: &mut VecDeque<(String, T)>, path: &str) -> Option<T> {
        let index = queue.iter().position(|(prefix, _)| path.starts_with(prefix.as_str()))?;
        queue.remove(index).map(|(_, item)| item)
    }

    fn route(&self, method: &str, path: &str, body: &Value) -> Result<Value, QueryError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

        match (method, segments.as_slice()) {
            ("GET", ["posts"]) => Ok(Value::Array(state.posts.values().cloned().collect())),
            ("GET", ["posts", id]) => post_mut(&mut state.posts, id).map(|post| post.clone()),
            ("POST", ["posts"]) => {
                let id = state.next_id;
                state.next_id += 1;
                let mut post = json!({ "id": id, "likes": 0, "labels": [] });
                if let (Some(post), Some(fields)) = (post.as_object_mut(), body.as_object()) {
                    for (field, value) in fields {
                        post.entry(field.clone()).or_insert_with(|| value.clone());
                    }
                }
                state.posts.insert(id, post.clone());
                Ok(post)
            }
            ("PATCH", ["posts", id]) => {
                let post = post_mut(&mut state.posts, id)?;
                if let (Some(post), Some(fields)) = (post.as_object_mut(), body.as_object()) {
                    for (field, value) in fields {
                        post.insert(field.clone(), value.clone());
                    }
                }
                Ok(post.clone())
            }
            ("POST", ["posts", id, "like"]) => {
                let post = post_mut(&mut state.posts, id)?;
                let likes = post["likes"].as_i64().unwrap_or_default();
                post["likes"] = json!(likes + 1);
                Ok(post.clone())
            }
            ("POST", ["posts", id, "labels"]) => {
                let post = post_mut(&mut state.posts, id)?;
                if let Some(labels) = post["labels"].as_array_mut() {
                    labels.push(body["label"].clone());
                }
                Ok(post.clone())
            }
            _ => Err(QueryError::http(405, json!({ "message": format!("{method} {path}") }))),
        }
    }
}

fn post_mut<'a>(posts: &'a mut BTreeMap<i64, Value>, id: &str) -> Result<&'a mut Value, QueryError> {
    let not_found = || QueryError::http(404, json!({ "message": "post not found" }));
    let Ok(id) = id.parse::<i64>() else {
        return Err(not_found());
    };
    posts.get_mut(&id).ok_or_else(not_found)
}

#[async_trait]
impl BaseQuery for InMemoryBackend {
    async fn execute(&self, request: Value, ctx: &QueryContext) -> Result<Value, QueryError> {
        let method = request["method"].as_str().unwrap_or("GET").to_string();
        let path = request["path"].as_str().unwrap_or("/").to_string();
        let body = request.get("body").cloned().unwrap_or(Value::Null);

        let (failure, gate) = {
            let mut state = self.state.lock();
            state.log.push(RecordedRequest {
                method: method.clone(),
                path: path.clone(),
                body: body.clone(),
                attempt: ctx.attempt,
            });
            let failure = Self::take_matching(&mut state.failures, &path);
            let gate = Self::take_matching(&mut state.gates, &path);
            (failure, gate)
        };

        tokio::time::sleep(self.latency).await;
        if let Some(gate) = gate {
            gate.notified().await;
        }

        match failure {
            Some(error) => Err(error),
            None => self.route(&method, &path, &body),
        }
    }
}
