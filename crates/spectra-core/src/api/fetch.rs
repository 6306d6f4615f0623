//! The query fetch path shared by subscribe, refetch, polling, focus and invalidation.
//!
//! Fetching is two-phase:
//! 1. [`ApiInner::prepare_fetch`] runs under the state lock, dedups against an in-flight
//!    request and moves the entry to `pending` with a fresh request id
//! 2. [`ApiInner::spawn_fetch`] runs after the lock is released and drives the executor
//!
//! The result is applied by [`ApiInner::settle_query`] only if the entry still waits on the
//! same request id ("last request wins").

use super::{
    background::MaintenanceCommand,
    endpoints::QueryEndpoint,
    state::CacheState,
    ApiInner,
};
use crate::{
    cache::QueryStatus,
    executor::{QueryContext, QueryError},
    metrics,
    types::{CacheKey, EndpointKind, RequestId, SubscriberToken},
};
use serde_json::Value;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Everything a spawned fetch needs once the lock is released.
pub(crate) struct FetchPlan {
    pub key: CacheKey,
    pub endpoint: Arc<str>,
    pub args: Value,
    pub definition: Arc<QueryEndpoint>,
    pub request_id: RequestId,
    pub cancel: CancellationToken,
}

impl ApiInner {
    /// Moves `key` to `pending` and returns the request to run.
    ///
    /// Returns `None` when the entry is missing, or already pending and `force` is unset.
    /// With `force`, the in-flight request is cancelled and superseded.
    pub(crate) fn prepare_fetch(&self, state: &mut CacheState, key: &CacheKey, force: bool) -> Option<FetchPlan> {
        let record = state.entries.get_mut(key)?;

        if record.entry.status == QueryStatus::Pending {
            if !force {
                trace!(key = %key, "request already in flight, deduplicated");
                metrics::record_dedup(&record.entry.endpoint);
                return None;
            }
            debug!(key = %key, superseded = ?record.entry.request_id, "superseding in-flight request");
            record.cancel_inflight();
        }

        let request_id = self.next_request_id();
        let cancel = CancellationToken::new();
        record.entry.begin(request_id, Instant::now());
        record.inflight = Some(cancel.clone());
        record.publish();

        Some(FetchPlan {
            key: key.clone(),
            endpoint: Arc::clone(&record.entry.endpoint),
            args: record.entry.args.clone(),
            definition: Arc::clone(&record.definition),
            request_id,
            cancel,
        })
    }

    pub(crate) fn spawn_fetch(self: &Arc<Self>, plan: FetchPlan) {
        let api = Arc::clone(self);
        self.runtime.spawn(async move { api.run_query(plan).await });
    }

    pub(crate) fn spawn_fetches(self: &Arc<Self>, plans: Vec<FetchPlan>) {
        for plan in plans {
            self.spawn_fetch(plan);
        }
    }

    /// Prepares and spawns a fetch for `key`. Returns `true` if a request was started.
    pub(crate) fn refetch_key(self: &Arc<Self>, key: &CacheKey, force: bool) -> bool {
        let plan = {
            let mut state = self.state.lock();
            self.prepare_fetch(&mut state, key, force)
        };
        match plan {
            Some(plan) => {
                self.spawn_fetch(plan);
                true
            }
            None => false,
        }
    }

    async fn run_query(self: Arc<Self>, plan: FetchPlan) {
        let request = plan.definition.request(&plan.args);
        let policy = plan.definition.policy(&self.config);
        let ctx = QueryContext {
            endpoint: Arc::clone(&plan.endpoint),
            kind: EndpointKind::Query,
            request_id: plan.request_id,
            attempt: 0,
            signal: plan.cancel.clone(),
        };

        debug!(key = %plan.key, request_id = %plan.request_id, "fetch started");
        metrics::record_fetch(&plan.endpoint, EndpointKind::Query);

        let raw = self.executor.execute(request, ctx, &policy, &plan.cancel).await;
        let result = plan.definition.transform(raw, &plan.args);
        self.settle_query(&plan, result);
    }

    /// Applies a finished request to its entry, unless it was superseded or the entry is gone.
    pub(crate) fn settle_query(&self, plan: &FetchPlan, result: Result<Value, QueryError>) {
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;

            let Some(record) = state.entries.get_mut(&plan.key) else {
                trace!(key = %plan.key, request_id = %plan.request_id, "entry removed before response arrived");
                self.settled.notify_waiters();
                return;
            };

            if !record.entry.accepts(plan.request_id) {
                debug!(
                    key = %plan.key,
                    request_id = %plan.request_id,
                    current = ?record.entry.request_id,
                    "discarding response from superseded request"
                );
                metrics::record_stale_discard(&plan.endpoint);
                return;
            }

            record.inflight = None;
            let now = Instant::now();
            let tags = match result {
                Ok(data) => {
                    let tags = plan.definition.tags(Some(&data), None, &plan.args);
                    record.entry.fulfill(plan.request_id, data, now);
                    record.patches.clear();
                    debug!(key = %plan.key, request_id = %plan.request_id, "query fulfilled");
                    tags
                }
                Err(error) => {
                    let tags = plan.definition.tags(None, Some(&error), &plan.args);
                    let keep_data = plan.definition.keeps_data_on_error(&self.config);
                    if error == QueryError::Cancelled {
                        debug!(key = %plan.key, request_id = %plan.request_id, "query cancelled");
                    } else {
                        warn!(key = %plan.key, request_id = %plan.request_id, error = %error, "query rejected");
                    }
                    record.entry.reject(plan.request_id, error, keep_data);
                    tags
                }
            };

            metrics::record_settled(&plan.endpoint, record.entry.status);
            record.entry.provided_tags.clone_from(&tags);
            record.publish();
            state.tags.register_provided_tags(&plan.key, &tags);

            if state.subscriptions.active_count(&plan.key) == 0 {
                self.ensure_gc(state, &plan.key);
            }
        }

        self.settled.notify_waiters();
    }

    /// Starts the retention timer for `key` unless one is already running.
    pub(crate) fn ensure_gc(&self, state: &mut CacheState, key: &CacheKey) {
        if state.gc_timers.contains_key(key) {
            return;
        }
        let Some(record) = state.entries.get(key) else {
            return;
        };

        let after = record.definition.retention(&self.config);
        let generation = self.next_gc_generation();
        state.gc_timers.insert(key.clone(), generation);

        trace!(key = %key, retention_ms = after.as_millis(), "retention timer started");
        let _ = self.maintenance.send(MaintenanceCommand::ScheduleGc { key: key.clone(), generation, after });
    }

    pub(crate) fn cancel_gc(state: &mut CacheState, key: &CacheKey) {
        if state.gc_timers.remove(key).is_some() {
            trace!(key = %key, "retention timer cancelled");
        }
    }

    /// Removes `key` if its retention timer `generation` is still current and nothing
    /// subscribed in the meantime. A pending entry is kept until its request settles.
    pub(crate) fn collect_garbage(&self, key: &CacheKey, generation: u64) {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if state.gc_timers.get(key) != Some(&generation) {
            return;
        }
        state.gc_timers.remove(key);

        if state.subscriptions.active_count(key) > 0 {
            return;
        }

        if state.entries.get(key).is_some_and(|record| record.entry.status == QueryStatus::Pending) {
            debug!(key = %key, "deferring collection until the in-flight request settles");
            return;
        }

        if let Some(record) = state.remove_entry(key) {
            debug!(key = %key, "unused entry collected");
            metrics::record_gc_removed(&record.entry.endpoint);
            metrics::record_entries(state.entries.len());
        }
    }

    /// Drops subscriber `token` from `key`, starting retention when it was the last one.
    pub(crate) fn release(&self, key: &CacheKey, token: SubscriberToken) {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if !state.subscriptions.remove(key, token) {
            return;
        }
        trace!(key = %key, token = %token, remaining = state.subscriptions.active_count(key), "unsubscribed");

        self.reconcile_polling(state, key);
        if state.subscriptions.active_count(key) == 0 {
            self.ensure_gc(state, key);
        }
    }
}
