//! Endpoint definitions and the registry that resolves them by name.

use super::errors::ApiError;
use crate::{
    config::{ApiConfig, InvalidationTiming, RefetchOnMount},
    executor::{ExecutionPolicy, QueryError, RetryPolicy},
    types::{EndpointKind, Tag},
};
use ahash::AHashMap;
use serde_json::Value;
use std::{collections::BTreeSet, fmt, sync::Arc, time::Duration};

/// Builds the transport request descriptor from endpoint arguments.
pub type RequestBuilder = Arc<dyn Fn(&Value) -> Value + Send + Sync>;
/// Post-processes a successful response. May turn it into an error.
pub type ResponseTransform = Arc<dyn Fn(Value, &Value) -> Result<Value, QueryError> + Send + Sync>;
pub type ErrorTransform = Arc<dyn Fn(QueryError, &Value) -> QueryError + Send + Sync>;
/// Derives tags from `(data, error, args)`.
pub type TagFn = Arc<dyn Fn(Option<&Value>, Option<&QueryError>, &Value) -> Vec<Tag> + Send + Sync>;
/// Produces the optimistic edits a mutation applies when triggered with `args`.
pub type OptimisticFn = Arc<dyn Fn(&Value) -> Vec<OptimisticUpdate> + Send + Sync>;

/// Tags provided by a query or invalidated by a mutation.
#[derive(Clone, Default)]
pub enum TagProvider {
    #[default]
    None,
    Fixed(Vec<Tag>),
    Derived(TagFn),
}

impl fmt::Debug for TagProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Fixed(tags) => f.debug_tuple("Fixed").field(tags).finish(),
            Self::Derived(_) => f.write_str("Derived(..)"),
        }
    }
}

impl TagProvider {
    #[must_use]
    pub fn resolve(&self, data: Option<&Value>, error: Option<&QueryError>, args: &Value) -> BTreeSet<Tag> {
        match self {
            Self::None => BTreeSet::new(),
            Self::Fixed(tags) => tags.iter().cloned().collect(),
            Self::Derived(derive) => derive(data, error, args).into_iter().collect(),
        }
    }
}

/// Request settings shared by queries and mutations.
#[derive(Clone, Default)]
struct RequestSettings {
    query: Option<RequestBuilder>,
    transform_response: Option<ResponseTransform>,
    transform_error: Option<ErrorTransform>,
    retry: Option<RetryPolicy>,
    timeout: Option<Option<Duration>>,
}

impl RequestSettings {
    fn request(&self, args: &Value) -> Value {
        match &self.query {
            Some(build) => build(args),
            None => args.clone(),
        }
    }

    fn transform(&self, result: Result<Value, QueryError>, args: &Value) -> Result<Value, QueryError> {
        match result {
            Ok(data) => match &self.transform_response {
                Some(transform) => transform(data, args),
                None => Ok(data),
            },
            Err(error) => Err(match &self.transform_error {
                Some(transform) => transform(error, args),
                None => error,
            }),
        }
    }

    fn policy(&self, default_retry: RetryPolicy, config: &ApiConfig) -> ExecutionPolicy {
        ExecutionPolicy {
            retry: self.retry.clone().unwrap_or(default_retry),
            timeout: self.timeout.unwrap_or_else(|| config.request_timeout()),
        }
    }
}

/// A read endpoint.
///
/// ```
/// use spectra_core::{api::QueryEndpoint, Tag};
/// use serde_json::json;
///
/// let get_post = QueryEndpoint::new()
///     .query(|id| json!(format!("/posts/{id}")))
///     .provides_tags_with(|_data, _err, id| vec![Tag::with_id("Post", id.as_i64().unwrap_or_default())]);
/// ```
#[derive(Clone, Default)]
pub struct QueryEndpoint {
    request: RequestSettings,
    provides_tags: TagProvider,
    keep_unused_data_for: Option<Duration>,
    refetch_on_mount_or_arg_change: Option<RefetchOnMount>,
    keep_data_on_error: Option<bool>,
}

impl QueryEndpoint {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the request descriptor builder. Without one the arguments are sent as-is.
    #[must_use]
    pub fn query(mut self, build: impl Fn(&Value) -> Value + Send + Sync + 'static) -> Self {
        self.request.query = Some(Arc::new(build));
        self
    }

    #[must_use]
    pub fn provides_tags(mut self, tags: Vec<Tag>) -> Self {
        self.provides_tags = TagProvider::Fixed(tags);
        self
    }

    #[must_use]
    pub fn provides_tags_with(
        mut self,
        derive: impl Fn(Option<&Value>, Option<&QueryError>, &Value) -> Vec<Tag> + Send + Sync + 'static,
    ) -> Self {
        self.provides_tags = TagProvider::Derived(Arc::new(derive));
        self
    }

    #[must_use]
    pub fn transform_response(
        mut self,
        transform: impl Fn(Value, &Value) -> Result<Value, QueryError> + Send + Sync + 'static,
    ) -> Self {
        self.request.transform_response = Some(Arc::new(transform));
        self
    }

    #[must_use]
    pub fn transform_error(mut self, transform: impl Fn(QueryError, &Value) -> QueryError + Send + Sync + 'static) -> Self {
        self.request.transform_error = Some(Arc::new(transform));
        self
    }

    #[must_use]
    pub fn keep_unused_data_for(mut self, retention: Duration) -> Self {
        self.keep_unused_data_for = Some(retention);
        self
    }

    #[must_use]
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.request.retry = Some(policy);
        self
    }

    /// Overrides the request timeout; `None` disables it for this endpoint.
    #[must_use]
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn refetch_on_mount_or_arg_change(mut self, policy: RefetchOnMount) -> Self {
        self.refetch_on_mount_or_arg_change = Some(policy);
        self
    }

    #[must_use]
    pub fn keep_data_on_error(mut self, keep: bool) -> Self {
        self.keep_data_on_error = Some(keep);
        self
    }

    pub(crate) fn request(&self, args: &Value) -> Value {
        self.request.request(args)
    }

    pub(crate) fn transform(&self, result: Result<Value, QueryError>, args: &Value) -> Result<Value, QueryError> {
        self.request.transform(result, args)
    }

    pub(crate) fn policy(&self, config: &ApiConfig) -> ExecutionPolicy {
        self.request.policy(config.retry.clone(), config)
    }

    pub(crate) fn tags(&self, data: Option<&Value>, error: Option<&QueryError>, args: &Value) -> BTreeSet<Tag> {
        self.provides_tags.resolve(data, error, args)
    }

    pub(crate) fn retention(&self, config: &ApiConfig) -> Duration {
        self.keep_unused_data_for.unwrap_or_else(|| config.keep_unused_data_for())
    }

    pub(crate) fn refetch_on_mount(&self, config: &ApiConfig) -> RefetchOnMount {
        self.refetch_on_mount_or_arg_change.unwrap_or(config.refetch_on_mount_or_arg_change)
    }

    pub(crate) fn keeps_data_on_error(&self, config: &ApiConfig) -> bool {
        self.keep_data_on_error.unwrap_or(config.keep_data_on_error)
    }
}

/// Speculative edit of one cached query applied when a mutation is triggered.
pub struct OptimisticUpdate {
    pub endpoint: String,
    pub args: Value,
    pub(crate) recipe: Box<dyn FnOnce(&mut Value) + Send>,
    pub(crate) merge_response: Option<Box<dyn FnOnce(&mut Value, &Value) + Send>>,
}

impl fmt::Debug for OptimisticUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptimisticUpdate")
            .field("endpoint", &self.endpoint)
            .field("args", &self.args)
            .field("merge_response", &self.merge_response.is_some())
            .finish_non_exhaustive()
    }
}

impl OptimisticUpdate {
    /// Edits the cached data of `endpoint(args)` with `recipe`. The edit stays in place when the
    /// mutation succeeds and is rolled back when it fails.
    pub fn new(
        endpoint: impl Into<String>,
        args: Value,
        recipe: impl FnOnce(&mut Value) + Send + 'static,
    ) -> Self {
        Self { endpoint: endpoint.into(), args, recipe: Box::new(recipe), merge_response: None }
    }

    /// On success with a non-null response, undoes the speculative edit and applies `merge`
    /// to fold the authoritative response into the cached data instead.
    #[must_use]
    pub fn merge_response(mut self, merge: impl FnOnce(&mut Value, &Value) + Send + 'static) -> Self {
        self.merge_response = Some(Box::new(merge));
        self
    }

    /// On success with a non-null response, replaces the cached data with the response.
    #[must_use]
    pub fn replace_with_response(self) -> Self {
        self.merge_response(|draft, response| *draft = response.clone())
    }
}

/// A write endpoint.
#[derive(Clone, Default)]
pub struct MutationEndpoint {
    request: RequestSettings,
    invalidates_tags: TagProvider,
    optimistic: Option<OptimisticFn>,
    invalidation_timing: Option<InvalidationTiming>,
}

impl MutationEndpoint {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn query(mut self, build: impl Fn(&Value) -> Value + Send + Sync + 'static) -> Self {
        self.request.query = Some(Arc::new(build));
        self
    }

    /// Tags invalidated when the mutation succeeds.
    #[must_use]
    pub fn invalidates_tags(mut self, tags: Vec<Tag>) -> Self {
        self.invalidates_tags = TagProvider::Fixed(tags);
        self
    }

    /// Tags derived from the outcome; evaluated on success and on failure.
    #[must_use]
    pub fn invalidates_tags_with(
        mut self,
        derive: impl Fn(Option<&Value>, Option<&QueryError>, &Value) -> Vec<Tag> + Send + Sync + 'static,
    ) -> Self {
        self.invalidates_tags = TagProvider::Derived(Arc::new(derive));
        self
    }

    #[must_use]
    pub fn optimistic(mut self, updates: impl Fn(&Value) -> Vec<OptimisticUpdate> + Send + Sync + 'static) -> Self {
        self.optimistic = Some(Arc::new(updates));
        self
    }

    #[must_use]
    pub fn invalidation_timing(mut self, timing: InvalidationTiming) -> Self {
        self.invalidation_timing = Some(timing);
        self
    }

    /// Mutations do not retry unless a policy is set here.
    #[must_use]
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.request.retry = Some(policy);
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn transform_response(
        mut self,
        transform: impl Fn(Value, &Value) -> Result<Value, QueryError> + Send + Sync + 'static,
    ) -> Self {
        self.request.transform_response = Some(Arc::new(transform));
        self
    }

    #[must_use]
    pub fn transform_error(mut self, transform: impl Fn(QueryError, &Value) -> QueryError + Send + Sync + 'static) -> Self {
        self.request.transform_error = Some(Arc::new(transform));
        self
    }

    pub(crate) fn request(&self, args: &Value) -> Value {
        self.request.request(args)
    }

    pub(crate) fn transform(&self, result: Result<Value, QueryError>, args: &Value) -> Result<Value, QueryError> {
        self.request.transform(result, args)
    }

    pub(crate) fn policy(&self, config: &ApiConfig) -> ExecutionPolicy {
        self.request.policy(RetryPolicy::none(), config)
    }

    pub(crate) fn timing(&self, config: &ApiConfig) -> InvalidationTiming {
        self.invalidation_timing.unwrap_or(config.invalidation_timing)
    }

    pub(crate) fn optimistic_updates(&self, args: &Value) -> Vec<OptimisticUpdate> {
        self.optimistic.as_ref().map(|updates| updates(args)).unwrap_or_default()
    }

    /// Tags to invalidate for an outcome. Fixed tags apply only on success.
    pub(crate) fn tags(&self, result: &Result<Value, QueryError>, args: &Value) -> BTreeSet<Tag> {
        match (&self.invalidates_tags, result) {
            (TagProvider::Fixed(_), Err(_)) => BTreeSet::new(),
            (provider, Ok(data)) => provider.resolve(Some(data), None, args),
            (provider, Err(error)) => provider.resolve(None, Some(error), args),
        }
    }

    /// Tags known before the request runs, for immediate invalidation.
    pub(crate) fn tags_before_request(&self, args: &Value) -> BTreeSet<Tag> {
        self.invalidates_tags.resolve(None, None, args)
    }
}

#[derive(Clone)]
pub enum EndpointDefinition {
    Query(Arc<QueryEndpoint>),
    Mutation(Arc<MutationEndpoint>),
}

impl EndpointDefinition {
    #[must_use]
    pub fn kind(&self) -> EndpointKind {
        match self {
            Self::Query(_) => EndpointKind::Query,
            Self::Mutation(_) => EndpointKind::Mutation,
        }
    }
}

/// Named endpoint definitions, used at build time and for later injection.
#[derive(Clone, Default)]
pub struct EndpointSet {
    definitions: Vec<(String, EndpointDefinition)>,
}

impl EndpointSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn query(mut self, name: impl Into<String>, endpoint: QueryEndpoint) -> Self {
        self.definitions.push((name.into(), EndpointDefinition::Query(Arc::new(endpoint))));
        self
    }

    #[must_use]
    pub fn mutation(mut self, name: impl Into<String>, endpoint: MutationEndpoint) -> Self {
        self.definitions.push((name.into(), EndpointDefinition::Mutation(Arc::new(endpoint))));
        self
    }

    /// Appends every definition of `other`.
    #[must_use]
    pub fn merge(mut self, other: EndpointSet) -> Self {
        self.definitions.extend(other.definitions);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

#[derive(Default)]
pub(crate) struct EndpointRegistry {
    definitions: AHashMap<String, EndpointDefinition>,
}

impl EndpointRegistry {
    /// Adds every definition in `set`, all or nothing.
    pub(crate) fn insert_all(&mut self, set: EndpointSet, override_existing: bool) -> Result<(), ApiError> {
        let mut seen = ahash::AHashSet::new();
        for (name, _) in &set.definitions {
            if !seen.insert(name.as_str()) || (!override_existing && self.definitions.contains_key(name)) {
                return Err(ApiError::DuplicateEndpoint(name.clone()));
            }
        }

        for (name, definition) in set.definitions {
            self.definitions.insert(name, definition);
        }
        Ok(())
    }

    pub(crate) fn query(&self, name: &str) -> Result<Arc<QueryEndpoint>, ApiError> {
        match self.definitions.get(name) {
            Some(EndpointDefinition::Query(endpoint)) => Ok(Arc::clone(endpoint)),
            Some(other) => Err(ApiError::wrong_kind(name, EndpointKind::Query, other.kind())),
            None => Err(ApiError::UnknownEndpoint(name.to_string())),
        }
    }

    pub(crate) fn mutation(&self, name: &str) -> Result<Arc<MutationEndpoint>, ApiError> {
        match self.definitions.get(name) {
            Some(EndpointDefinition::Mutation(endpoint)) => Ok(Arc::clone(endpoint)),
            Some(other) => Err(ApiError::wrong_kind(name, EndpointKind::Mutation, other.kind())),
            None => Err(ApiError::UnknownEndpoint(name.to_string())),
        }
    }

    pub(crate) fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.definitions.keys().cloned().collect();
        names.sort_unstable();
        names
    }
}
