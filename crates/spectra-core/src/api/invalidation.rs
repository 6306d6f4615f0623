//! Tag invalidation, batched per maintenance tick.
//!
//! `invalidate_tags` only queues. The first push after a flush asks the maintenance worker
//! for a flush, so every invalidation issued before the worker runs resolves in one pass and
//! each affected key is refetched at most once.

use super::{background::MaintenanceCommand, ApiInner};
use crate::{metrics, types::Tag};
use parking_lot::Mutex;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tracing::{debug, trace};

#[derive(Debug, Default)]
pub(crate) struct InvalidationQueue {
    pending: Mutex<Vec<Tag>>,
    scheduled: AtomicBool,
}

impl InvalidationQueue {
    /// Queues `tags`. Returns `true` if the caller must schedule a flush.
    pub fn push(&self, tags: impl IntoIterator<Item = Tag>) -> bool {
        let mut pending = self.pending.lock();
        pending.extend(tags);
        !pending.is_empty() && !self.scheduled.swap(true, Ordering::AcqRel)
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.lock().is_empty()
    }

    pub fn take(&self) -> Vec<Tag> {
        let mut pending = self.pending.lock();
        self.scheduled.store(false, Ordering::Release);
        std::mem::take(&mut *pending)
    }
}

impl ApiInner {
    pub(crate) fn invalidate_tags(&self, tags: impl IntoIterator<Item = Tag>) {
        if self.invalidations.push(tags) {
            trace!("invalidation flush scheduled");
            let _ = self.maintenance.send(MaintenanceCommand::FlushInvalidations);
        }
    }

    /// Queues `tags` and resolves the whole queue before returning.
    pub(crate) fn invalidate_tags_now(self: &Arc<Self>, tags: impl IntoIterator<Item = Tag>) -> usize {
        self.invalidations.push(tags);
        self.flush_invalidations()
    }

    /// Resolves every queued tag and applies the outcome per key: subscribed keys refetch
    /// (reusing an in-flight request), the rest are marked invalidated in place.
    ///
    /// The queue is drained under the state lock, so `settled` never observes the gap between
    /// taking the tags and starting their refetches.
    ///
    /// Returns the number of affected keys.
    pub(crate) fn flush_invalidations(self: &Arc<Self>) -> usize {
        let (tags, affected, plans) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let tags = self.invalidations.take();
            if tags.is_empty() {
                return 0;
            }
            let keys = state.tags.resolve(&tags);

            let mut plans = Vec::new();
            for key in &keys {
                if state.subscriptions.active_count(key) > 0 {
                    plans.extend(self.prepare_fetch(state, key, false));
                } else if let Some(record) = state.entries.get_mut(key) {
                    record.entry.mark_invalidated();
                    record.publish();
                }
            }
            (tags, keys.len(), plans)
        };

        debug!(tags = tags.len(), keys = affected, refetched = plans.len(), "invalidation flushed");
        metrics::record_invalidation(affected, plans.len());
        self.spawn_fetches(plans);
        self.settled.notify_waiters();
        affected
    }
}
