//! Shared identifiers and value types used across the cache engine.

use serde::{Deserialize, Serialize};
use std::{borrow::Borrow, fmt, sync::Arc};

/// Deterministic identifier for one endpoint + arguments combination.
///
/// Built by [`build_cache_key`](crate::cache::key::build_cache_key). Cloning is an `Arc` bump.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(Arc<str>);

impl CacheKey {
    pub(crate) fn from_canonical(raw: String) -> Self {
        Self(Arc::from(raw))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for CacheKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Identifier of one request issued through the executor.
///
/// Monotonic per [`Api`](crate::api::Api) instance, so a larger id was always issued later.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// Opaque handle identifying one subscriber of a cache key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriberToken(pub u64);

impl fmt::Display for SubscriberToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Whether an endpoint reads (`Query`) or writes (`Mutation`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKind {
    Query,
    Mutation,
}

impl EndpointKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Mutation => "mutation",
        }
    }
}

/// Identifier part of a [`Tag`]. Accepts the string and integer ids clients usually use.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagId {
    Num(i64),
    Str(String),
}

impl fmt::Display for TagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Num(n) => write!(f, "{n}"),
            Self::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for TagId {
    fn from(value: i64) -> Self {
        Self::Num(value)
    }
}

impl From<i32> for TagId {
    fn from(value: i32) -> Self {
        Self::Num(i64::from(value))
    }
}

impl From<u32> for TagId {
    fn from(value: u32) -> Self {
        Self::Num(i64::from(value))
    }
}

impl From<&str> for TagId {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for TagId {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

/// Invalidation label declared by query results and referenced by mutations.
///
/// Matching rules:
/// - invalidating `{type}` reaches every entry that provides any tag of that type
/// - invalidating `{type, id}` reaches only entries that provide exactly `{type, id}`
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tag {
    #[serde(rename = "type")]
    pub tag_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<TagId>,
}

impl Tag {
    /// Type-level tag without an id.
    #[must_use]
    pub fn new(tag_type: impl Into<String>) -> Self {
        Self { tag_type: tag_type.into(), id: None }
    }

    #[must_use]
    pub fn with_id(tag_type: impl Into<String>, id: impl Into<TagId>) -> Self {
        Self { tag_type: tag_type.into(), id: Some(id.into()) }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            Some(id) => write!(f, "{}:{id}", self.tag_type),
            None => f.write_str(&self.tag_type),
        }
    }
}

/// Aggregated counters describing the cache at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub uninitialized: usize,
    pub pending: usize,
    pub fulfilled: usize,
    pub rejected: usize,
    pub invalidated: usize,
    /// Subscriptions held by UI consumers.
    pub ui_subscriptions: usize,
    /// Subscriptions held on behalf of `prefetch` calls.
    pub prefetch_subscriptions: usize,
    pub tagged_keys: usize,
    pub distinct_tags: usize,
    pub polling_keys: usize,
    pub gc_timers: usize,
    pub running_mutations: usize,
    pub retained_mutations: usize,
}
