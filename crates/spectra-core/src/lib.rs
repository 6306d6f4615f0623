//! Client-side query cache with request deduplication, tag-based invalidation, reference
//! counted garbage collection, optimistic updates and polling.
//!
//! An [`Api`] is an explicitly constructed cache instance. Endpoints are registered by name;
//! consumers [`subscribe`](Api::subscribe) to `endpoint(args)` pairs, trigger mutations, and
//! invalidate tags. The actual network call is delegated to a pluggable
//! [`BaseQuery`](executor::BaseQuery).

pub mod api;
pub mod cache;
pub mod config;
pub mod executor;
pub mod metrics;
pub mod types;

pub use api::{
    Api, ApiBuilder, ApiError, MutationEndpoint, MutationHandle, MutationResult, PatchCollection,
    PrefetchOptions, QueryEndpoint, QuerySubscription,
};
pub use cache::{CacheEntry, QueryStatus, SubscriptionOptions};
pub use config::ApiConfig;
pub use executor::{BaseQuery, QueryError};
pub use types::{CacheKey, CacheStats, RequestId, SubscriberToken, Tag, TagId};
