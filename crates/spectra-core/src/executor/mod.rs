//! Request executor: wraps the base query with timeout, retry and cancellation.
//!
//! # Flow
//!
//! ```text
//! execute(request, ctx, policy, cancel)
//!      │
//!      ├─> attempt 0 ──► race(base_query, timeout, cancel)
//!      │                      │
//!      │            Ok ◄──────┤
//!      │                      │ Err(transient) and retries left
//!      │                      ▼
//!      │              sleep(backoff) ── cancelled ──► Err(Cancelled)
//!      │                      │
//!      └─> attempt n ◄────────┘
//! ```
//!
//! Retries are invisible to consumers: the entry simply stays `pending` until the final
//! attempt settles. Cancellation wins over both the transport and a backoff sleep.

pub mod base_query;
pub mod errors;
#[cfg(feature = "http")]
pub mod http;
pub mod retry;

pub use base_query::{fn_base_query, BaseQuery, FnBaseQuery, QueryContext};
pub use errors::{ErrorKind, QueryError};
#[cfg(feature = "http")]
pub use http::{HttpBaseQuery, HttpBaseQueryConfig};
pub use retry::RetryPolicy;

use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Retry and timeout settings resolved for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionPolicy {
    pub retry: RetryPolicy,
    /// `None` disables the timeout race.
    pub timeout: Option<Duration>,
}

/// Executes request descriptors against the configured [`BaseQuery`].
#[derive(Clone)]
pub struct RequestExecutor {
    base_query: Arc<dyn BaseQuery>,
}

impl RequestExecutor {
    #[must_use]
    pub fn new(base_query: Arc<dyn BaseQuery>) -> Self {
        Self { base_query }
    }

    /// Runs `request` until it succeeds, fails permanently, exhausts retries or is cancelled.
    ///
    /// # Errors
    ///
    /// Returns the last [`QueryError`] observed, or [`QueryError::Cancelled`] when `cancel`
    /// fires first.
    pub async fn execute(
        &self,
        request: Value,
        mut ctx: QueryContext,
        policy: &ExecutionPolicy,
        cancel: &CancellationToken,
    ) -> Result<Value, QueryError> {
        let mut attempt = 0u32;

        loop {
            ctx.attempt = attempt;

            let outcome = tokio::select! {
                biased;

                () = cancel.cancelled() => Err(QueryError::Cancelled),
                result = self.attempt(request.clone(), &ctx, policy.timeout) => result,
            };

            match outcome {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(
                            endpoint = %ctx.endpoint,
                            request_id = %ctx.request_id,
                            attempt = attempt,
                            "request succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(error) if policy.retry.should_retry(&error, attempt) => {
                    attempt += 1;
                    let delay = policy.retry.delay_for(attempt);

                    debug!(
                        endpoint = %ctx.endpoint,
                        request_id = %ctx.request_id,
                        attempt = attempt,
                        max_retries = policy.retry.max_retries,
                        delay_ms = delay.as_millis(),
                        error = %error,
                        "retrying request after transient failure"
                    );
                    crate::metrics::record_retry(&ctx.endpoint, error.kind());

                    tokio::select! {
                        biased;

                        () = cancel.cancelled() => return Err(QueryError::Cancelled),
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                Err(error) => {
                    if attempt > 0 && error.is_transient(policy.retry.retry_http_5xx) {
                        warn!(
                            endpoint = %ctx.endpoint,
                            request_id = %ctx.request_id,
                            attempts = attempt + 1,
                            error = %error,
                            "request failed after exhausting retries"
                        );
                    }
                    return Err(error);
                }
            }
        }
    }

    async fn attempt(
        &self,
        request: Value,
        ctx: &QueryContext,
        timeout: Option<Duration>,
    ) -> Result<Value, QueryError> {
        trace!(endpoint = %ctx.endpoint, request_id = %ctx.request_id, attempt = ctx.attempt, "executing base query");

        match timeout {
            Some(limit) => tokio::time::timeout(limit, self.base_query.execute(request, ctx))
                .await
                .unwrap_or(Err(QueryError::Timeout)),
            None => self.base_query.execute(request, ctx).await,
        }
    }
}
