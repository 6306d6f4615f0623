//! Cache data structures: keys, entries, tag index, subscriptions and patches.
//!
//! These types hold no locks and spawn nothing; [`Api`](crate::api::Api) owns them behind a
//! single mutex and drives every transition.

pub mod entry;
pub mod key;
pub mod optimistic;
pub mod patch;
pub mod subscriptions;
pub mod tag_index;

pub use entry::{CacheEntry, QueryStatus};
pub use key::{build_cache_key, canonical_json, serialize_args};
pub use optimistic::{PatchId, PatchStack, Rollback};
pub use patch::{apply_patches, diff, PatchError, PatchOp, PathSegment};
pub use subscriptions::{PollingDemand, SubscriptionKind, SubscriptionOptions, SubscriptionRegistry};
pub use tag_index::TagIndex;
