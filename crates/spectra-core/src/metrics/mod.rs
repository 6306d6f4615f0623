//! Metric recording through the `metrics` facade.
//!
//! The library only records; installing an exporter is up to the host. Endpoint names are
//! interned because they label every series and come from a small, fixed registry.

use crate::{cache::QueryStatus, executor::ErrorKind, types::EndpointKind};
use metrics::{counter, gauge};
use std::{borrow::Cow, sync::OnceLock};

static ENDPOINT_NAME_POOL: OnceLock<dashmap::DashMap<String, &'static str>> = OnceLock::new();

#[inline]
fn endpoint_to_static(endpoint: &str) -> Cow<'static, str> {
    let pool = ENDPOINT_NAME_POOL.get_or_init(dashmap::DashMap::new);

    if let Some(interned) = pool.get(endpoint) {
        return Cow::Borrowed(*interned);
    }

    let owned = endpoint.to_string();
    let leaked: &'static str = Box::leak(owned.clone().into_boxed_str());
    pool.insert(owned, leaked);
    Cow::Borrowed(leaked)
}

/// A request was handed to the executor.
pub fn record_fetch(endpoint: &str, kind: EndpointKind) {
    counter!("spectra_fetch_total", "endpoint" => endpoint_to_static(endpoint), "kind" => kind.as_str())
        .increment(1);
}

/// A request settled with the given status.
pub fn record_settled(endpoint: &str, status: QueryStatus) {
    counter!("spectra_settled_total", "endpoint" => endpoint_to_static(endpoint), "status" => status.as_str())
        .increment(1);
}

/// A subscribe or prefetch was served from cache without a request.
pub fn record_cache_hit(endpoint: &str) {
    counter!("spectra_cache_hits_total", "endpoint" => endpoint_to_static(endpoint)).increment(1);
}

/// A request was deduplicated against one already in flight.
pub fn record_dedup(endpoint: &str) {
    counter!("spectra_dedup_total", "endpoint" => endpoint_to_static(endpoint)).increment(1);
}

/// A response arrived for a superseded request and was dropped.
pub fn record_stale_discard(endpoint: &str) {
    counter!("spectra_stale_discards_total", "endpoint" => endpoint_to_static(endpoint)).increment(1);
}

pub fn record_retry(endpoint: &str, error: ErrorKind) {
    counter!("spectra_retries_total", "endpoint" => endpoint_to_static(endpoint), "error_type" => error.as_str())
        .increment(1);
}

/// One invalidation flush resolved `keys` entries, `refetched` of which were refetched.
pub fn record_invalidation(keys: usize, refetched: usize) {
    counter!("spectra_invalidations_total").increment(1);
    counter!("spectra_invalidated_keys_total").increment(keys as u64);
    counter!("spectra_invalidation_refetches_total").increment(refetched as u64);
}

pub fn record_gc_removed(endpoint: &str) {
    counter!("spectra_gc_removed_total", "endpoint" => endpoint_to_static(endpoint)).increment(1);
}

pub fn record_optimistic_rollback(endpoint: &str) {
    counter!("spectra_optimistic_rollbacks_total", "endpoint" => endpoint_to_static(endpoint)).increment(1);
}

#[allow(clippy::cast_precision_loss)]
pub fn record_entries(count: usize) {
    gauge!("spectra_entries").set(count as f64);
}
