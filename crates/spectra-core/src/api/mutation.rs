//! Mutation execution: optimistic edits, the request, invalidation and result delivery.
//!
//! # Lifecycle
//!
//! ```text
//! trigger ─► record(pending) ─► optimistic edits ─► [immediate tags] ─► spawn
//!                                                                         │
//!      result published ◄── record settled ◄── [delayed tags] ◄── settle edits
//! ```
//!
//! On failure optimistic edits roll back in reverse order. On success an edit with a merge
//! step is replaced by the merged response (when the response is not null); any other edit
//! stays in place.

use super::{background::MaintenanceCommand, endpoints::MutationEndpoint, ApiInner};
use crate::{
    cache::{build_cache_key, PatchId, Rollback},
    config::InvalidationTiming,
    executor::{QueryContext, QueryError},
    metrics,
    types::{CacheKey, EndpointKind, RequestId},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::{sync::watch, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationStatus {
    Pending,
    Fulfilled,
    Rejected,
}

/// Bookkeeping for one triggered mutation, kept for `keep_mutation_results_for_ms` after it
/// settles.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationExecution {
    pub request_id: RequestId,
    pub endpoint: String,
    pub args: Value,
    pub status: MutationStatus,
    pub data: Option<Value>,
    pub error: Option<QueryError>,
    pub started_at: Instant,
    pub settled_at: Option<Instant>,
    /// Optimistic edits applied on behalf of this mutation.
    pub optimistic_patches: Vec<PatchId>,
}

/// Outcome of a mutation, delivered inline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationResult {
    Data(Value),
    Error(QueryError),
}

impl MutationResult {
    /// # Errors
    ///
    /// Returns the mutation's error.
    pub fn into_result(self) -> Result<Value, QueryError> {
        match self {
            Self::Data(data) => Ok(data),
            Self::Error(error) => Err(error),
        }
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

impl From<Result<Value, QueryError>> for MutationResult {
    fn from(result: Result<Value, QueryError>) -> Self {
        match result {
            Ok(data) => Self::Data(data),
            Err(error) => Self::Error(error),
        }
    }
}

/// Returned by [`Api::trigger`](super::Api::trigger).
///
/// Dropping the handle does not abort the mutation.
#[derive(Debug, Clone)]
pub struct MutationHandle {
    pub request_id: RequestId,
    cancel: CancellationToken,
    outcome: watch::Receiver<Option<MutationResult>>,
}

impl MutationHandle {
    /// Cancels the request. The mutation settles with [`QueryError::Cancelled`] and its
    /// optimistic edits roll back.
    pub fn abort(&self) {
        self.cancel.cancel();
    }

    /// Waits for the outcome.
    pub async fn result(&self) -> MutationResult {
        let mut outcome = self.outcome.clone();
        let settled = match outcome.wait_for(Option::is_some).await {
            Ok(value) => value.clone(),
            Err(_) => None,
        };
        settled.unwrap_or(MutationResult::Error(QueryError::Cancelled))
    }

    /// Waits for the outcome, turning a failed mutation into `Err`.
    ///
    /// # Errors
    ///
    /// Returns the mutation's [`QueryError`].
    pub async fn unwrap(&self) -> Result<Value, QueryError> {
        self.result().await.into_result()
    }
}

/// An optimistic edit waiting for its mutation to settle.
struct PendingEdit {
    key: CacheKey,
    id: PatchId,
    merge_response: Option<Box<dyn FnOnce(&mut Value, &Value) + Send>>,
}

struct MutationPlan {
    request_id: RequestId,
    endpoint: Arc<str>,
    args: Value,
    definition: Arc<MutationEndpoint>,
    cancel: CancellationToken,
    edits: Vec<PendingEdit>,
    outcome: watch::Sender<Option<MutationResult>>,
}

impl ApiInner {
    pub(crate) fn start_mutation(
        self: &Arc<Self>,
        endpoint: &str,
        definition: Arc<MutationEndpoint>,
        args: Value,
    ) -> MutationHandle {
        let request_id = self.next_request_id();
        let cancel = CancellationToken::new();
        let (outcome_tx, outcome_rx) = watch::channel(None);

        let edits = self.apply_optimistic(&definition, &args);
        self.mutations.insert(
            request_id,
            MutationExecution {
                request_id,
                endpoint: endpoint.to_string(),
                args: args.clone(),
                status: MutationStatus::Pending,
                data: None,
                error: None,
                started_at: Instant::now(),
                settled_at: None,
                optimistic_patches: edits.iter().map(|edit| edit.id).collect(),
            },
        );
        debug!(endpoint, request_id = %request_id, optimistic = edits.len(), "mutation triggered");

        if definition.timing(&self.config) == InvalidationTiming::Immediate {
            self.invalidate_tags(definition.tags_before_request(&args));
        }

        let plan = MutationPlan {
            request_id,
            endpoint: Arc::from(endpoint),
            args,
            definition,
            cancel: cancel.clone(),
            edits,
            outcome: outcome_tx,
        };
        let api = Arc::clone(self);
        self.runtime.spawn(async move { api.run_mutation(plan).await });

        MutationHandle { request_id, cancel, outcome: outcome_rx }
    }

    fn apply_optimistic(&self, definition: &MutationEndpoint, args: &Value) -> Vec<PendingEdit> {
        let mut edits = Vec::new();
        for update in definition.optimistic_updates(args) {
            let key = build_cache_key(&update.endpoint, &update.args);
            let patch = self.update_entry_data(&key, update.recipe);
            match patch.id {
                Some(id) => edits.push(PendingEdit { key, id, merge_response: update.merge_response }),
                None => debug!(key = %key, "optimistic update skipped, nothing cached to edit"),
            }
        }
        edits
    }

    async fn run_mutation(self: Arc<Self>, plan: MutationPlan) {
        let request = plan.definition.request(&plan.args);
        let policy = plan.definition.policy(&self.config);
        let ctx = QueryContext {
            endpoint: Arc::clone(&plan.endpoint),
            kind: EndpointKind::Mutation,
            request_id: plan.request_id,
            attempt: 0,
            signal: plan.cancel.clone(),
        };

        metrics::record_fetch(&plan.endpoint, EndpointKind::Mutation);
        let raw = self.executor.execute(request, ctx, &policy, &plan.cancel).await;
        let result = plan.definition.transform(raw, &plan.args);

        match &result {
            Ok(response) => self.commit_edits(plan.edits, response),
            Err(error) => {
                warn!(
                    endpoint = %plan.endpoint,
                    request_id = %plan.request_id,
                    error = %error,
                    "mutation rejected"
                );
                self.roll_back_edits(plan.edits);
            }
        }

        // Refetches must be pending before the result is visible to `unwrap` or `settled`.
        if plan.definition.timing(&self.config) == InvalidationTiming::Delayed {
            self.invalidate_tags_now(plan.definition.tags(&result, &plan.args));
        }

        if let Some(mut record) = self.mutations.get_mut(&plan.request_id) {
            record.settled_at = Some(Instant::now());
            match &result {
                Ok(data) => {
                    record.status = MutationStatus::Fulfilled;
                    record.data = Some(data.clone());
                }
                Err(error) => {
                    record.status = MutationStatus::Rejected;
                    record.error = Some(error.clone());
                }
            }
        }
        debug!(endpoint = %plan.endpoint, request_id = %plan.request_id, ok = result.is_ok(), "mutation settled");

        let _ = self.maintenance.send(MaintenanceCommand::ExpireMutation {
            request_id: plan.request_id,
            after: self.config.keep_mutation_results_for(),
        });
        plan.outcome.send_replace(Some(result.into()));
        self.settled.notify_waiters();
    }

    fn commit_edits(&self, edits: Vec<PendingEdit>, response: &Value) {
        for edit in edits {
            let merge = edit.merge_response.filter(|_| !response.is_null());
            let mut state = self.state.lock();
            let Some(record) = state.entries.get_mut(&edit.key) else {
                continue;
            };

            let Some(merge) = merge else {
                record.patches.commit(edit.id);
                continue;
            };

            let Some(mut data) = record.entry.data.clone() else {
                continue;
            };
            match record.patches.rollback(&mut data, edit.id) {
                Ok(Rollback::Undone { .. }) => {}
                Ok(Rollback::NotFound) => {
                    debug!(key = %edit.key, patch = %edit.id, "fresher data replaced the optimistic edit, response not merged");
                    continue;
                }
                Err(error) => {
                    warn!(key = %edit.key, patch = %edit.id, error = %error, "optimistic edit could not be undone before merge");
                }
            }
            merge(&mut data, response);
            record.entry.replace_data(data);
            record.publish();
            debug!(key = %edit.key, patch = %edit.id, "optimistic edit replaced by response");
        }
    }

    fn roll_back_edits(&self, edits: Vec<PendingEdit>) {
        for edit in edits.into_iter().rev() {
            match self.rollback_patch(&edit.key, edit.id) {
                Ok(true) => {}
                Ok(false) => debug!(key = %edit.key, patch = %edit.id, "optimistic edit already gone"),
                Err(error) => {
                    warn!(key = %edit.key, patch = %edit.id, error = %error, "optimistic rollback failed");
                }
            }
        }
    }
}
