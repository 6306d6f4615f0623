//! The transport seam: everything the cache knows about performing a request.

use super::errors::QueryError;
use crate::types::{EndpointKind, RequestId};
use async_trait::async_trait;
use serde_json::Value;
use std::{future::Future, sync::Arc};
use tokio_util::sync::CancellationToken;

/// Per-call information handed to the base query alongside the request descriptor.
#[derive(Debug, Clone)]
pub struct QueryContext {
    /// Name of the endpoint that produced the descriptor.
    pub endpoint: Arc<str>,
    pub kind: EndpointKind,
    pub request_id: RequestId,
    /// Zero-based attempt number; non-zero while retrying.
    pub attempt: u32,
    /// Fires when the request is superseded or aborted. Transports may watch it to stop early.
    pub signal: CancellationToken,
}

/// Pluggable transport that performs the actual network call.
///
/// The request descriptor is opaque to the cache: it is whatever the endpoint's request
/// builder produced. Implementations return the decoded payload or a classified error.
#[async_trait]
pub trait BaseQuery: Send + Sync + 'static {
    async fn execute(&self, request: Value, ctx: &QueryContext) -> Result<Value, QueryError>;
}

/// Adapter turning an async closure into a [`BaseQuery`].
///
/// ```no_run
/// use spectra_core::executor::{fn_base_query, QueryError};
/// use serde_json::json;
///
/// let base_query = fn_base_query(|request, _ctx| async move {
///     Ok::<_, QueryError>(json!({ "echo": request }))
/// });
/// ```
pub struct FnBaseQuery<F> {
    handler: F,
}

/// Wraps `handler` in a [`FnBaseQuery`].
pub fn fn_base_query<F, Fut>(handler: F) -> FnBaseQuery<F>
where
    F: Fn(Value, QueryContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, QueryError>> + Send + 'static,
{
    FnBaseQuery { handler }
}

#[async_trait]
impl<F, Fut> BaseQuery for FnBaseQuery<F>
where
    F: Fn(Value, QueryContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, QueryError>> + Send + 'static,
{
    async fn execute(&self, request: Value, ctx: &QueryContext) -> Result<Value, QueryError> {
        (self.handler)(request, ctx.clone()).await
    }
}
