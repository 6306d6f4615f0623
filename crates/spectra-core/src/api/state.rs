//! Mutable cache state guarded by the `Api` mutex.

use super::endpoints::QueryEndpoint;
use crate::{
    cache::{CacheEntry, PatchStack, PollingDemand, QueryStatus, SubscriptionRegistry, TagIndex},
    types::{CacheKey, CacheStats},
};
use ahash::AHashMap;
use std::sync::Arc;
use tokio::{sync::watch, task::AbortHandle};
use tokio_util::sync::CancellationToken;

/// One cached query with its notification channel and in-flight request.
pub(crate) struct EntryRecord {
    pub entry: CacheEntry,
    pub definition: Arc<QueryEndpoint>,
    pub notifier: watch::Sender<Arc<CacheEntry>>,
    pub patches: PatchStack,
    /// Cancels the request the entry is currently waiting on.
    pub inflight: Option<CancellationToken>,
}

impl EntryRecord {
    pub fn new(entry: CacheEntry, definition: Arc<QueryEndpoint>) -> Self {
        let (notifier, _) = watch::channel(Arc::new(entry.clone()));
        Self { entry, definition, notifier, patches: PatchStack::new(), inflight: None }
    }

    /// Pushes the current entry to every watcher.
    pub fn publish(&self) {
        self.notifier.send_replace(Arc::new(self.entry.clone()));
    }

    pub fn snapshot(&self) -> Arc<CacheEntry> {
        self.notifier.borrow().clone()
    }

    pub fn cancel_inflight(&mut self) {
        if let Some(token) = self.inflight.take() {
            token.cancel();
        }
    }
}

pub(crate) struct PollingTask {
    pub demand: PollingDemand,
    pub handle: AbortHandle,
}

#[derive(Default)]
pub(crate) struct CacheState {
    pub entries: AHashMap<CacheKey, EntryRecord>,
    pub tags: TagIndex,
    pub subscriptions: SubscriptionRegistry,
    /// Pending GC timers by generation; a timer only collects if its generation is current.
    pub gc_timers: AHashMap<CacheKey, u64>,
    pub polling: AHashMap<CacheKey, PollingTask>,
}

impl CacheState {
    /// Removes an entry with its tags and polling task. Subscribers are left untouched.
    pub fn remove_entry(&mut self, key: &CacheKey) -> Option<EntryRecord> {
        let mut record = self.entries.remove(key)?;
        record.cancel_inflight();
        self.tags.remove_key(key);
        self.gc_timers.remove(key);
        if let Some(task) = self.polling.remove(key) {
            task.handle.abort();
        }
        Some(record)
    }

    /// Drops everything, cancelling in-flight requests and polling tasks.
    pub fn clear(&mut self) {
        for record in self.entries.values_mut() {
            record.cancel_inflight();
        }
        for task in self.polling.values() {
            task.handle.abort();
        }
        self.entries.clear();
        self.tags.clear();
        self.subscriptions.clear();
        self.gc_timers.clear();
        self.polling.clear();
    }

    pub fn pending_keys(&self) -> Vec<CacheKey> {
        let mut keys: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|(_, record)| record.entry.status == QueryStatus::Pending)
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort_unstable();
        keys
    }

    pub fn has_pending(&self) -> bool {
        self.entries.values().any(|record| record.entry.status == QueryStatus::Pending)
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats { entries: self.entries.len(), ..CacheStats::default() };

        for record in self.entries.values() {
            match record.entry.status {
                QueryStatus::Uninitialized => stats.uninitialized += 1,
                QueryStatus::Pending => stats.pending += 1,
                QueryStatus::Fulfilled => stats.fulfilled += 1,
                QueryStatus::Rejected => stats.rejected += 1,
            }
            if record.entry.invalidated {
                stats.invalidated += 1;
            }
        }

        let (ui, prefetch) = self.subscriptions.totals();
        stats.ui_subscriptions = ui;
        stats.prefetch_subscriptions = prefetch;
        stats.tagged_keys = self.tags.tagged_keys();
        stats.distinct_tags = self.tags.distinct_tags();
        stats.polling_keys = self.polling.len();
        stats.gc_timers = self.gc_timers.len();
        stats
    }
}
