//! Per-key lifecycle record and its transitions.

use crate::{
    executor::QueryError,
    types::{CacheKey, RequestId, Tag},
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::{collections::BTreeSet, sync::Arc, time::Duration};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryStatus {
    Uninitialized,
    Pending,
    Fulfilled,
    Rejected,
}

impl QueryStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Pending => "pending",
            Self::Fulfilled => "fulfilled",
            Self::Rejected => "rejected",
        }
    }
}

/// Snapshot of one cached query.
///
/// While a refetch is pending the previous `data` and `error` stay in place
/// (stale-while-revalidate). `revision` increases on every observable change.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub endpoint: Arc<str>,
    pub args: Value,
    pub status: QueryStatus,
    pub data: Option<Value>,
    pub error: Option<QueryError>,
    pub started_at: Option<Instant>,
    pub fulfilled_at: Option<Instant>,
    pub provided_tags: BTreeSet<Tag>,
    /// Request whose result the entry accepts; older responses are discarded.
    pub request_id: Option<RequestId>,
    /// Set when invalidated without an active subscriber; the next subscribe refetches.
    pub invalidated: bool,
    pub revision: u64,
}

impl CacheEntry {
    #[must_use]
    pub fn new(key: CacheKey, endpoint: Arc<str>, args: Value) -> Self {
        Self {
            key,
            endpoint,
            args,
            status: QueryStatus::Uninitialized,
            data: None,
            error: None,
            started_at: None,
            fulfilled_at: None,
            provided_tags: BTreeSet::new(),
            request_id: None,
            invalidated: false,
            revision: 0,
        }
    }

    /// `uninitialized | fulfilled | rejected | pending --trigger--> pending`.
    ///
    /// A trigger on a pending entry supersedes the in-flight request.
    pub fn begin(&mut self, request_id: RequestId, now: Instant) {
        self.status = QueryStatus::Pending;
        self.request_id = Some(request_id);
        self.started_at = Some(now);
        self.invalidated = false;
        self.bump();
    }

    /// `pending --success--> fulfilled`. Returns `false` for a superseded request.
    pub fn fulfill(&mut self, request_id: RequestId, data: Value, now: Instant) -> bool {
        if !self.accepts(request_id) {
            return false;
        }
        self.status = QueryStatus::Fulfilled;
        self.data = Some(data);
        self.error = None;
        self.fulfilled_at = Some(now);
        self.bump();
        true
    }

    /// `pending --failure--> rejected`. Returns `false` for a superseded request.
    pub fn reject(&mut self, request_id: RequestId, error: QueryError, keep_data: bool) -> bool {
        if !self.accepts(request_id) {
            return false;
        }
        self.status = QueryStatus::Rejected;
        self.error = Some(error);
        if !keep_data {
            self.data = None;
        }
        self.bump();
        true
    }

    /// Writes data without a request, as a manual cache upsert does.
    pub fn upsert(&mut self, data: Value, now: Instant) {
        self.status = QueryStatus::Fulfilled;
        self.data = Some(data);
        self.error = None;
        self.fulfilled_at = Some(now);
        self.invalidated = false;
        self.bump();
    }

    /// Replaces `data` in place (optimistic or manual patch). Status is untouched.
    pub fn replace_data(&mut self, data: Value) {
        self.data = Some(data);
        self.bump();
    }

    pub fn mark_invalidated(&mut self) {
        if !self.invalidated {
            self.invalidated = true;
            self.bump();
        }
    }

    /// Whether a settle for `request_id` may be applied.
    #[must_use]
    pub fn accepts(&self, request_id: RequestId) -> bool {
        self.status == QueryStatus::Pending && self.request_id == Some(request_id)
    }

    /// Whether a new subscriber must fetch instead of being served from cache.
    #[must_use]
    pub fn needs_fetch(&self) -> bool {
        self.invalidated || matches!(self.status, QueryStatus::Uninitialized | QueryStatus::Rejected)
    }

    /// Whether the last successful fetch is older than `max_age` (or never happened).
    #[must_use]
    pub fn is_older_than(&self, max_age: Duration, now: Instant) -> bool {
        self.fulfilled_at.is_none_or(|at| now.saturating_duration_since(at) >= max_age)
    }

    /// Pending with no data to show yet.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.status == QueryStatus::Pending && self.data.is_none()
    }

    /// Pending, with or without stale data.
    #[must_use]
    pub fn is_fetching(&self) -> bool {
        self.status == QueryStatus::Pending
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == QueryStatus::Fulfilled
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.status == QueryStatus::Rejected
    }

    /// Deserializes `data` into `T`.
    ///
    /// # Errors
    ///
    /// Returns the deserializer error if `data` does not match `T`.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<Option<T>, serde_json::Error> {
        self.data.as_ref().map(|d| T::deserialize(d)).transpose()
    }

    fn bump(&mut self) {
        self.revision += 1;
    }
}
