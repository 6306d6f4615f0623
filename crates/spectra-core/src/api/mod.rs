//! The cache instance: endpoint registry, entry lifecycle, subscriptions, invalidation,
//! optimistic updates and polling behind one handle.
//!
//! # Architecture
//!
//! ```text
//!            Api (Clone, Arc<ApiInner>)
//!              │
//!   ┌──────────┼──────────────┬───────────────────┐
//!   ▼          ▼              ▼                   ▼
//! subscribe  trigger      invalidate_tags     update_query_data
//!   │          │              │                   │
//!   ▼          ▼              ▼                   ▼
//!  Mutex<CacheState>: entries, tag index, subscriptions, timers
//!   │                         ▲
//!   ▼                         │
//! RequestExecutor ──settle────┘     maintenance worker: GC, prefetch expiry,
//!                                   drop releases, invalidation flushes
//! ```
//!
//! Every state transition runs under the state mutex and never across an await; requests run
//! on spawned tasks and re-enter the lock only to settle.

mod background;
pub mod builder;
pub mod endpoints;
pub mod errors;
mod fetch;
mod invalidation;
pub mod mutation;
mod polling;
mod state;
pub mod subscription;

#[cfg(test)]
mod tests;

pub use builder::ApiBuilder;
pub use endpoints::{
    EndpointDefinition, EndpointSet, MutationEndpoint, OptimisticUpdate, QueryEndpoint,
    TagProvider,
};
pub use errors::ApiError;
pub use mutation::{MutationExecution, MutationHandle, MutationResult, MutationStatus};
pub use subscription::QuerySubscription;

use crate::{
    cache::{
        build_cache_key, serialize_args, CacheEntry, PatchId, PatchOp, QueryStatus, Rollback,
        SubscriptionKind, SubscriptionOptions,
    },
    config::{ApiConfig, RefetchOnMount},
    executor::RequestExecutor,
    metrics,
    types::{CacheKey, CacheStats, RequestId, SubscriberToken, Tag},
};
use background::MaintenanceCommand;
use dashmap::DashMap;
use endpoints::EndpointRegistry;
use invalidation::InvalidationQueue;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use state::{CacheState, EntryRecord};
use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Weak,
    },
    time::Duration,
};
use tokio::{
    runtime::Handle,
    sync::{broadcast, mpsc, Notify},
    time::Instant,
};
use tracing::{debug, info};

/// Options for [`Api::prefetch`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrefetchOptions {
    /// Fetch even if cached data exists. An in-flight request is still reused.
    pub force: bool,
    /// Fetch if the cached data is older than this.
    pub if_older_than: Option<Duration>,
}

/// Record of one manual edit, as returned by [`Api::update_query_data`].
///
/// `id` is `None` when the edit changed nothing or the entry had no data to edit.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchCollection {
    pub key: CacheKey,
    pub id: Option<PatchId>,
    pub patches: Vec<PatchOp>,
    pub inverse_patches: Vec<PatchOp>,
}

impl PatchCollection {
    fn unchanged(key: CacheKey) -> Self {
        Self { key, id: None, patches: Vec::new(), inverse_patches: Vec::new() }
    }
}

/// Host signals consulted by polling and refetch-on-focus/reconnect.
#[derive(Debug)]
struct Environment {
    focused: AtomicBool,
    online: AtomicBool,
}

impl Default for Environment {
    fn default() -> Self {
        Self { focused: AtomicBool::new(true), online: AtomicBool::new(true) }
    }
}

pub(crate) struct ApiInner {
    config: ApiConfig,
    endpoints: RwLock<EndpointRegistry>,
    state: Mutex<CacheState>,
    executor: RequestExecutor,
    environment: Environment,
    runtime: Handle,
    /// Handed to polling tasks so they never keep a dropped `Api` alive.
    self_ref: Weak<ApiInner>,

    next_request: AtomicU64,
    next_token: AtomicU64,
    next_patch: AtomicU64,
    next_gc_generation: AtomicU64,

    invalidations: InvalidationQueue,
    maintenance: mpsc::UnboundedSender<MaintenanceCommand>,
    shutdown: broadcast::Sender<()>,
    disposed: AtomicBool,
    /// Signalled whenever a query or mutation settles.
    settled: Notify,
    mutations: DashMap<RequestId, MutationExecution>,
}

impl ApiInner {
    fn next_request_id(&self) -> RequestId {
        RequestId(self.next_request.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn next_token(&self) -> SubscriberToken {
        SubscriberToken(self.next_token.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn next_patch_id(&self) -> PatchId {
        PatchId(self.next_patch.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn next_gc_generation(&self) -> u64 {
        self.next_gc_generation.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn has_running_mutations(&self) -> bool {
        self.mutations.iter().any(|record| record.status == MutationStatus::Pending)
    }

    /// Applies `recipe` to the cached data of `key` and records the edit on the patch stack.
    fn update_entry_data(
        &self,
        key: &CacheKey,
        recipe: impl FnOnce(&mut Value),
    ) -> PatchCollection {
        let mut state = self.state.lock();
        let Some(record) = state.entries.get_mut(key) else {
            return PatchCollection::unchanged(key.clone());
        };
        let Some(current) = record.entry.data.as_ref() else {
            return PatchCollection::unchanged(key.clone());
        };

        let mut draft = current.clone();
        recipe(&mut draft);
        let (patches, inverse_patches) = crate::cache::diff(current, &draft);
        if patches.is_empty() {
            return PatchCollection::unchanged(key.clone());
        }

        let id = self.next_patch_id();
        record.patches.push(id, patches.clone(), inverse_patches.clone());
        record.entry.replace_data(draft);
        record.publish();
        debug!(key = %key, patch = %id, ops = patches.len(), "patch applied");

        PatchCollection { key: key.clone(), id: Some(id), patches, inverse_patches }
    }

    /// Undoes patch `id` on `key`. Returns `false` if the patch is no longer applied.
    fn rollback_patch(&self, key: &CacheKey, id: PatchId) -> Result<bool, ApiError> {
        let mut state = self.state.lock();
        let Some(record) = state.entries.get_mut(key) else {
            return Ok(false);
        };
        let Some(mut data) = record.entry.data.clone() else {
            return Ok(false);
        };

        match record.patches.rollback(&mut data, id)? {
            Rollback::NotFound => Ok(false),
            Rollback::Undone { dropped } => {
                record.entry.replace_data(data);
                record.publish();
                metrics::record_optimistic_rollback(&record.entry.endpoint);
                debug!(key = %key, patch = %id, dropped = dropped.len(), "patch rolled back");
                Ok(true)
            }
        }
    }

    /// Refetches every subscribed key whose subscribers match `predicate`.
    fn refetch_where(self: &Arc<Self>, predicate: impl Fn(&SubscriptionOptions) -> bool) -> usize {
        let plans: Vec<_> = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let keys = state.subscriptions.keys_where(predicate);
            keys.iter().filter_map(|key| self.prepare_fetch(state, key, false)).collect()
        };
        let started = plans.len();
        self.spawn_fetches(plans);
        started
    }

    /// Whether a new subscriber should trigger a fetch for an existing entry.
    fn fetch_on_mount(&self, definition: &QueryEndpoint, entry: &CacheEntry, force: bool) -> bool {
        if force || entry.needs_fetch() {
            return true;
        }
        match definition.refetch_on_mount(&self.config) {
            RefetchOnMount::Never => false,
            RefetchOnMount::Always => true,
            RefetchOnMount::OlderThan(ms) => {
                entry.is_older_than(Duration::from_millis(ms), Instant::now())
            }
        }
    }
}

impl Drop for ApiInner {
    fn drop(&mut self) {
        self.state.get_mut().clear();
    }
}

/// Handle to one cache instance.
///
/// Cheap to clone; all clones share the same state. Independent instances can coexist in one
/// process.
#[derive(Clone)]
pub struct Api {
    inner: Arc<ApiInner>,
}

impl std::fmt::Debug for Api {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Api")
            .field("endpoints", &self.inner.endpoints.read().names())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

impl Api {
    #[must_use]
    pub fn builder() -> ApiBuilder {
        ApiBuilder::new()
    }

    #[must_use]
    pub fn config(&self) -> &ApiConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn endpoint_names(&self) -> Vec<String> {
        self.inner.endpoints.read().names()
    }

    /// Registers additional endpoints after construction.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::DuplicateEndpoint`] if a name is already taken and
    /// `override_existing` is unset; nothing from the set is registered in that case.
    pub fn inject_endpoints(&self, set: EndpointSet, override_existing: bool) -> Result<(), ApiError> {
        let added = set.len();
        self.inner.endpoints.write().insert_all(set, override_existing)?;
        debug!(added, override_existing, "endpoints injected");
        Ok(())
    }

    /// Subscribes to `endpoint(args)`, fetching if nothing usable is cached.
    ///
    /// Concurrent subscribers to the same key share one request. Transport failures never
    /// surface here; they land on the entry.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] for an unknown endpoint, a mutation endpoint, arguments that
    /// cannot be serialized, or a disposed `Api`.
    pub fn subscribe<A: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        args: &A,
        options: SubscriptionOptions,
    ) -> Result<QuerySubscription, ApiError> {
        self.ensure_active()?;
        let (definition, args, key) = self.resolve_query(endpoint, args)?;
        let inner = &self.inner;
        let token = inner.next_token();

        let (plan, receiver) = {
            let mut guard = inner.state.lock();
            let state = &mut *guard;

            ApiInner::cancel_gc(state, &key);
            let record = state.entries.entry(key.clone()).or_insert_with(|| {
                let entry = CacheEntry::new(key.clone(), Arc::from(endpoint), args);
                EntryRecord::new(entry, Arc::clone(&definition))
            });
            let receiver = record.notifier.subscribe();
            let should_fetch = inner.fetch_on_mount(&definition, &record.entry, options.force_refetch);
            if !should_fetch && record.entry.status == QueryStatus::Fulfilled {
                metrics::record_cache_hit(endpoint);
            }

            state.subscriptions.add(&key, token, SubscriptionKind::Ui, options);
            debug!(
                key = %key,
                token = %token,
                subscribers = state.subscriptions.active_count(&key),
                "subscribed"
            );

            let plan = if should_fetch { inner.prepare_fetch(state, &key, false) } else { None };
            inner.reconcile_polling(state, &key);
            metrics::record_entries(state.entries.len());
            (plan, receiver)
        };

        if let Some(plan) = plan {
            inner.spawn_fetch(plan);
        }

        Ok(QuerySubscription::new(inner, key, token, receiver))
    }

    /// Current state of `endpoint(args)`. Never fetches; a missing entry reads as
    /// uninitialized.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] for an unknown or non-query endpoint or unserializable arguments.
    pub fn select<A: Serialize + ?Sized>(&self, endpoint: &str, args: &A) -> Result<CacheEntry, ApiError> {
        let (_, args, key) = self.resolve_query(endpoint, args)?;
        let state = self.inner.state.lock();
        Ok(match state.entries.get(&key) {
            Some(record) => record.entry.clone(),
            None => CacheEntry::new(key, Arc::from(endpoint), args),
        })
    }

    /// Like [`select`](Self::select), but returns the shared snapshot, which stays the same
    /// allocation until the entry changes.
    ///
    /// # Errors
    ///
    /// Same as [`select`](Self::select).
    pub fn select_memo<A: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        args: &A,
    ) -> Result<Arc<CacheEntry>, ApiError> {
        let (_, args, key) = self.resolve_query(endpoint, args)?;
        let state = self.inner.state.lock();
        Ok(match state.entries.get(&key) {
            Some(record) => record.snapshot(),
            None => Arc::new(CacheEntry::new(key, Arc::from(endpoint), args)),
        })
    }

    /// Warms the cache for `endpoint(args)` without a UI subscription.
    ///
    /// The entry is held for `keep_prefetch_subscriptions_for_ms`, then follows the normal
    /// retention rules.
    ///
    /// # Errors
    ///
    /// Same as [`subscribe`](Self::subscribe).
    pub fn prefetch<A: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        args: &A,
        options: PrefetchOptions,
    ) -> Result<(), ApiError> {
        self.ensure_active()?;
        let (definition, args, key) = self.resolve_query(endpoint, args)?;
        let inner = &self.inner;
        let token = inner.next_token();

        let plan = {
            let mut guard = inner.state.lock();
            let state = &mut *guard;

            ApiInner::cancel_gc(state, &key);
            let record = state.entries.entry(key.clone()).or_insert_with(|| {
                let entry = CacheEntry::new(key.clone(), Arc::from(endpoint), args);
                EntryRecord::new(entry, Arc::clone(&definition))
            });
            let stale = options
                .if_older_than
                .is_some_and(|max_age| record.entry.is_older_than(max_age, Instant::now()));
            let should_fetch = options.force || stale || record.entry.needs_fetch();

            let options = SubscriptionOptions::default();
            state.subscriptions.add(&key, token, SubscriptionKind::Prefetch, options);
            debug!(key = %key, token = %token, fetch = should_fetch, "prefetch registered");
            if should_fetch { inner.prepare_fetch(state, &key, false) } else { None }
        };

        let _ = inner.maintenance.send(MaintenanceCommand::ExpirePrefetch {
            key,
            token,
            after: inner.config.keep_prefetch_subscriptions_for(),
        });
        if let Some(plan) = plan {
            inner.spawn_fetch(plan);
        }
        Ok(())
    }

    /// Refetches `endpoint(args)` now, superseding a request already in flight.
    ///
    /// Returns `false` if nothing is cached for the key.
    ///
    /// # Errors
    ///
    /// Same as [`select`](Self::select), plus [`ApiError::Disposed`].
    pub fn refetch<A: Serialize + ?Sized>(&self, endpoint: &str, args: &A) -> Result<bool, ApiError> {
        self.ensure_active()?;
        let (_, _, key) = self.resolve_query(endpoint, args)?;
        Ok(self.inner.refetch_key(&key, true))
    }

    /// Queues `tags` for invalidation. Everything queued before the next flush is resolved in
    /// one pass, so overlapping invalidations refetch each key once.
    pub fn invalidate_tags(&self, tags: impl IntoIterator<Item = Tag>) {
        self.inner.invalidate_tags(tags);
    }

    /// Resolves queued invalidations immediately. Returns the number of affected keys.
    pub fn flush_invalidations(&self) -> usize {
        self.inner.flush_invalidations()
    }

    /// Edits the cached data of `endpoint(args)` in place and records an undoable patch.
    ///
    /// Does nothing if the entry has no data yet.
    ///
    /// # Errors
    ///
    /// Same as [`select`](Self::select).
    pub fn update_query_data<A: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        args: &A,
        recipe: impl FnOnce(&mut Value),
    ) -> Result<PatchCollection, ApiError> {
        let (_, _, key) = self.resolve_query(endpoint, args)?;
        Ok(self.inner.update_entry_data(&key, recipe))
    }

    /// Reverts an edit made by [`update_query_data`](Self::update_query_data), keeping later
    /// edits. Returns `false` if the edit is no longer applied.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Patch`] if the inverse no longer fits the cached data.
    pub fn undo(&self, patch: &PatchCollection) -> Result<bool, ApiError> {
        match patch.id {
            Some(id) => self.inner.rollback_patch(&patch.key, id),
            None => Ok(false),
        }
    }

    /// Applies recorded patch operations to the cached data of `endpoint(args)`.
    ///
    /// Does nothing if the entry has no data.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Patch`] if an operation does not fit; the data is left untouched.
    pub fn patch_query_data<A: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        args: &A,
        patches: &[PatchOp],
    ) -> Result<(), ApiError> {
        let (_, _, key) = self.resolve_query(endpoint, args)?;
        let mut state = self.inner.state.lock();
        let Some(record) = state.entries.get_mut(&key) else {
            return Ok(());
        };
        let Some(mut data) = record.entry.data.clone() else {
            return Ok(());
        };

        crate::cache::apply_patches(&mut data, patches)?;
        record.entry.replace_data(data);
        record.publish();
        debug!(key = %key, ops = patches.len(), "patches applied");
        Ok(())
    }

    /// Writes `data` as the fulfilled value of `endpoint(args)` without a request.
    ///
    /// Creates the entry if needed and supersedes any in-flight request for it.
    ///
    /// # Errors
    ///
    /// Same as [`subscribe`](Self::subscribe).
    pub fn upsert_query_data<A: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        args: &A,
        data: Value,
    ) -> Result<(), ApiError> {
        self.ensure_active()?;
        let (definition, args, key) = self.resolve_query(endpoint, args)?;
        let inner = &self.inner;

        {
            let mut guard = inner.state.lock();
            let state = &mut *guard;

            let record = state.entries.entry(key.clone()).or_insert_with(|| {
                let entry = CacheEntry::new(key.clone(), Arc::from(endpoint), args.clone());
                EntryRecord::new(entry, Arc::clone(&definition))
            });
            let tags = record.definition.tags(Some(&data), None, &args);

            record.cancel_inflight();
            record.entry.upsert(data, Instant::now());
            record.entry.provided_tags.clone_from(&tags);
            record.patches.clear();
            record.publish();
            state.tags.register_provided_tags(&key, &tags);
            debug!(key = %key, "entry upserted");

            if state.subscriptions.active_count(&key) == 0 {
                inner.ensure_gc(state, &key);
            }
            metrics::record_entries(state.entries.len());
        }

        inner.settled.notify_waiters();
        Ok(())
    }

    /// Runs mutation `endpoint` with `args`.
    ///
    /// Optimistic updates are applied before this returns. The request always runs to
    /// completion unless aborted through the handle.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] for an unknown or non-mutation endpoint, unserializable
    /// arguments, or a disposed `Api`.
    pub fn trigger<A: Serialize + ?Sized>(&self, endpoint: &str, args: &A) -> Result<MutationHandle, ApiError> {
        self.ensure_active()?;
        let definition = self.inner.endpoints.read().mutation(endpoint)?;
        let args = serialize_args(args).map_err(|e| ApiError::InvalidArgs {
            endpoint: endpoint.to_string(),
            message: e.to_string(),
        })?;
        Ok(self.inner.start_mutation(endpoint, definition, args))
    }

    /// Record of a mutation that is running or settled within its retention window.
    #[must_use]
    pub fn select_mutation(&self, request_id: RequestId) -> Option<MutationExecution> {
        self.inner.mutations.get(&request_id).map(|record| record.clone())
    }

    /// Reports host focus. Regaining focus refetches subscriptions that opted in.
    pub fn set_focused(&self, focused: bool) {
        let was = self.inner.environment.focused.swap(focused, Ordering::AcqRel);
        if focused && !was && self.is_online() {
            let started = self.inner.refetch_where(|options| options.refetch_on_focus);
            info!(refetched = started, "focus regained");
        }
    }

    /// Reports connectivity. Reconnecting refetches subscriptions that opted in.
    pub fn set_online(&self, online: bool) {
        let was = self.inner.environment.online.swap(online, Ordering::AcqRel);
        if online && !was {
            let started = self.inner.refetch_where(|options| options.refetch_on_reconnect);
            info!(refetched = started, "connection restored");
        }
    }

    #[must_use]
    pub fn is_focused(&self) -> bool {
        self.inner.environment.focused.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.inner.environment.online.load(Ordering::Acquire)
    }

    /// Number of subscribers, UI and prefetch, holding `endpoint(args)`.
    ///
    /// # Errors
    ///
    /// Same as [`select`](Self::select).
    pub fn get_active_subscriber_count<A: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        args: &A,
    ) -> Result<usize, ApiError> {
        let (_, _, key) = self.resolve_query(endpoint, args)?;
        Ok(self.inner.state.lock().subscriptions.active_count(&key))
    }

    /// Keys with a request in flight, sorted.
    #[must_use]
    pub fn running_queries(&self) -> Vec<CacheKey> {
        self.inner.state.lock().pending_keys()
    }

    /// Ids of mutations still in flight, sorted.
    #[must_use]
    pub fn running_mutations(&self) -> Vec<RequestId> {
        let mut ids: Vec<RequestId> = self
            .inner
            .mutations
            .iter()
            .filter(|record| record.status == MutationStatus::Pending)
            .map(|record| record.request_id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Resolves once no query or mutation is in flight and no invalidation is waiting to be
    /// flushed.
    pub async fn settled(&self) {
        loop {
            let notified = self.inner.settled.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let busy = {
                let state = self.inner.state.lock();
                state.has_pending() || self.inner.invalidations.has_pending()
            };
            if !busy && !self.inner.has_running_mutations() {
                return;
            }
            notified.await;
        }
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let mut stats = self.inner.state.lock().stats();
        stats.running_mutations = self.running_mutations().len();
        stats.retained_mutations = self.inner.mutations.len();
        stats
    }

    /// Drops every entry, subscription, timer, queued invalidation and mutation record.
    ///
    /// In-flight requests are cancelled and live subscriptions stop receiving updates.
    pub fn reset_api_state(&self) {
        let inner = &self.inner;
        {
            let mut state = inner.state.lock();
            state.clear();
        }
        inner.invalidations.take();
        inner.mutations.clear();
        metrics::record_entries(0);
        info!("api state reset");
        inner.settled.notify_waiters();
    }

    /// Resets the state and stops the maintenance worker. Later subscribe, prefetch and
    /// trigger calls fail with [`ApiError::Disposed`].
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.reset_api_state();
        let _ = self.inner.shutdown.send(());
        info!("api disposed");
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    fn ensure_active(&self) -> Result<(), ApiError> {
        if self.is_disposed() {
            return Err(ApiError::Disposed);
        }
        Ok(())
    }

    fn resolve_query<A: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        args: &A,
    ) -> Result<(Arc<QueryEndpoint>, Value, CacheKey), ApiError> {
        let definition = self.inner.endpoints.read().query(endpoint)?;
        let args = serialize_args(args).map_err(|e| ApiError::InvalidArgs {
            endpoint: endpoint.to_string(),
            message: e.to_string(),
        })?;
        let key = build_cache_key(endpoint, &args);
        Ok((definition, args, key))
    }
}
