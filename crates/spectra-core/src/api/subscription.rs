//! Consumer-side handle for one subscription.

use super::{background::MaintenanceCommand, ApiInner};
use crate::{
    cache::{CacheEntry, SubscriptionOptions},
    types::{CacheKey, SubscriberToken},
};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, watch};
use tracing::trace;

/// A live interest in one cache key, returned by [`Api::subscribe`](super::Api::subscribe).
///
/// Keeps the entry alive and receives every change to it. Dropping the subscription
/// unsubscribes; once the last subscriber is gone the entry's retention timer starts.
///
/// ```no_run
/// # async fn demo(api: spectra_core::Api) -> Result<(), spectra_core::ApiError> {
/// use spectra_core::cache::SubscriptionOptions;
///
/// let mut posts = api.subscribe("getPosts", &(), SubscriptionOptions::default())?;
/// while posts.changed().await {
///     let entry = posts.snapshot();
///     println!("{} -> {:?}", entry.status.as_str(), entry.data);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct QuerySubscription {
    api: Weak<ApiInner>,
    maintenance: mpsc::UnboundedSender<MaintenanceCommand>,
    key: CacheKey,
    token: SubscriberToken,
    receiver: watch::Receiver<Arc<CacheEntry>>,
    released: bool,
}

impl QuerySubscription {
    pub(crate) fn new(
        api: &Arc<ApiInner>,
        key: CacheKey,
        token: SubscriberToken,
        receiver: watch::Receiver<Arc<CacheEntry>>,
    ) -> Self {
        Self {
            api: Arc::downgrade(api),
            maintenance: api.maintenance.clone(),
            key,
            token,
            receiver,
            released: false,
        }
    }

    #[must_use]
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    #[must_use]
    pub fn token(&self) -> SubscriberToken {
        self.token
    }

    /// Latest published state of the entry.
    #[must_use]
    pub fn snapshot(&self) -> Arc<CacheEntry> {
        self.receiver.borrow().clone()
    }

    /// Waits for the next change. Returns `false` once the entry is gone for good (state
    /// reset or `Api` dropped).
    pub async fn changed(&mut self) -> bool {
        self.receiver.changed().await.is_ok()
    }

    /// Waits until the entry satisfies `predicate`, checking the current state first.
    ///
    /// Returns `None` if the entry goes away before that happens.
    pub async fn wait_for(&mut self, mut predicate: impl FnMut(&CacheEntry) -> bool) -> Option<Arc<CacheEntry>> {
        self.receiver.wait_for(|entry| predicate(entry)).await.ok().map(|entry| entry.clone())
    }

    /// Refetches now, superseding a request already in flight. Returns `false` if the entry
    /// no longer exists.
    pub fn refetch(&self) -> bool {
        match self.api.upgrade() {
            Some(api) => api.refetch_key(&self.key, true),
            None => false,
        }
    }

    /// Replaces this subscriber's options. Polling is rescheduled only if the effective
    /// interval for the key changes; cached data is untouched.
    pub fn set_options(&self, options: SubscriptionOptions) -> bool {
        let Some(api) = self.api.upgrade() else {
            return false;
        };
        let mut guard = api.state.lock();
        let state = &mut *guard;
        if !state.subscriptions.update_options(&self.key, self.token, options) {
            return false;
        }
        api.reconcile_polling(state, &self.key);
        true
    }

    /// Unsubscribes right away instead of on drop.
    pub fn unsubscribe(mut self) {
        self.released = true;
        if let Some(api) = self.api.upgrade() {
            api.release(&self.key, self.token);
        }
    }
}

impl Drop for QuerySubscription {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        trace!(key = %self.key, token = %self.token, "subscription dropped");
        let _ = self
            .maintenance
            .send(MaintenanceCommand::Release { key: self.key.clone(), token: self.token });
    }
}
