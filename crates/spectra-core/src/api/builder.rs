//! Construction of an [`Api`]: base query, configuration and the initial endpoint set.

use super::{
    background::run_maintenance_worker,
    endpoints::{EndpointRegistry, EndpointSet, MutationEndpoint, QueryEndpoint},
    errors::ApiError,
    invalidation::InvalidationQueue,
    state::CacheState,
    Api, ApiInner, Environment,
};
use crate::{
    config::ApiConfig,
    executor::{BaseQuery, RequestExecutor},
};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::{
    atomic::{AtomicBool, AtomicU64},
    Arc,
};
use tokio::{
    runtime::Handle,
    sync::{broadcast, mpsc, Notify},
};
use tracing::info;

/// Builder for [`Api`].
///
/// ```no_run
/// # async fn demo() -> Result<(), spectra_core::ApiError> {
/// use spectra_core::{
///     api::{Api, MutationEndpoint, QueryEndpoint},
///     executor::{fn_base_query, QueryError},
///     Tag,
/// };
/// use serde_json::json;
///
/// let api = Api::builder()
///     .base_query(fn_base_query(|request, _ctx| async move { Ok::<_, QueryError>(request) }))
///     .query("getPosts", QueryEndpoint::new().provides_tags(vec![Tag::new("Post")]))
///     .mutation("addPost", MutationEndpoint::new().invalidates_tags(vec![Tag::new("Post")]))
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct ApiBuilder {
    base_query: Option<Arc<dyn BaseQuery>>,
    config: ApiConfig,
    endpoints: EndpointSet,
}

impl ApiBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn base_query(self, base_query: impl BaseQuery) -> Self {
        self.base_query_arc(Arc::new(base_query))
    }

    #[must_use]
    pub fn base_query_arc(mut self, base_query: Arc<dyn BaseQuery>) -> Self {
        self.base_query = Some(base_query);
        self
    }

    #[must_use]
    pub fn config(mut self, config: ApiConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn query(mut self, name: impl Into<String>, endpoint: QueryEndpoint) -> Self {
        self.endpoints = self.endpoints.query(name, endpoint);
        self
    }

    #[must_use]
    pub fn mutation(mut self, name: impl Into<String>, endpoint: MutationEndpoint) -> Self {
        self.endpoints = self.endpoints.mutation(name, endpoint);
        self
    }

    /// Adds every definition in `set`.
    #[must_use]
    pub fn endpoints(mut self, set: EndpointSet) -> Self {
        self.endpoints = self.endpoints.merge(set);
        self
    }

    /// Validates the setup and starts the maintenance worker on the current runtime.
    ///
    /// # Errors
    ///
    /// - [`ApiError::NoRuntime`] outside a tokio runtime
    /// - [`ApiError::InvalidConfig`] if the configuration does not validate
    /// - [`ApiError::MissingBaseQuery`] without a base query
    /// - [`ApiError::DuplicateEndpoint`] if two endpoints share a name
    pub fn build(self) -> Result<Api, ApiError> {
        let runtime = Handle::try_current().map_err(|_| ApiError::NoRuntime)?;
        self.config.validate().map_err(ApiError::InvalidConfig)?;
        let base_query = self.base_query.ok_or(ApiError::MissingBaseQuery)?;

        let endpoint_count = self.endpoints.len();
        let mut registry = EndpointRegistry::default();
        registry.insert_all(self.endpoints, false)?;

        let (maintenance, commands) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = broadcast::channel(1);

        let inner = Arc::new_cyclic(|self_ref| ApiInner {
            config: self.config,
            endpoints: RwLock::new(registry),
            state: Mutex::new(CacheState::default()),
            executor: RequestExecutor::new(base_query),
            environment: Environment::default(),
            runtime: runtime.clone(),
            self_ref: self_ref.clone(),
            next_request: AtomicU64::new(0),
            next_token: AtomicU64::new(0),
            next_patch: AtomicU64::new(0),
            next_gc_generation: AtomicU64::new(0),
            invalidations: InvalidationQueue::default(),
            maintenance,
            shutdown,
            disposed: AtomicBool::new(false),
            settled: Notify::new(),
            mutations: DashMap::new(),
        });

        runtime.spawn(run_maintenance_worker(commands, Arc::downgrade(&inner), shutdown_rx));
        info!(endpoints = endpoint_count, "api built");

        Ok(Api { inner })
    }
}
