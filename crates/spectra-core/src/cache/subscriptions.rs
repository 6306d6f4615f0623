//! Subscriber bookkeeping per cache key.

use crate::types::{CacheKey, SubscriberToken};
use ahash::AHashMap;
use std::time::Duration;

/// Who holds a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionKind {
    /// A live consumer.
    Ui,
    /// Short-lived interest registered by `prefetch`. Keeps the entry alive but is not
    /// reported as UI usage.
    Prefetch,
}

/// Per-subscriber behaviour.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionOptions {
    /// Poll the entry at this interval. `None` or zero disables polling for this subscriber.
    pub polling_interval: Option<Duration>,
    /// Keep polling while the host reports it is not focused. Ticks are skipped while
    /// unfocused unless some polling subscriber of the key sets this.
    pub poll_while_unfocused: bool,
    /// Refetch when the host regains focus.
    pub refetch_on_focus: bool,
    /// Refetch when the host comes back online.
    pub refetch_on_reconnect: bool,
    /// Fetch on subscribe even if cached data is fresh.
    pub force_refetch: bool,
}

impl SubscriptionOptions {
    #[must_use]
    pub fn polling(mut self, interval: Duration) -> Self {
        self.polling_interval = Some(interval);
        self
    }

    #[must_use]
    pub fn poll_while_unfocused(mut self) -> Self {
        self.poll_while_unfocused = true;
        self
    }

    #[must_use]
    pub fn refetch_on_focus(mut self) -> Self {
        self.refetch_on_focus = true;
        self
    }

    #[must_use]
    pub fn refetch_on_reconnect(mut self) -> Self {
        self.refetch_on_reconnect = true;
        self
    }

    #[must_use]
    pub fn force_refetch(mut self) -> Self {
        self.force_refetch = true;
        self
    }

    fn effective_interval(&self) -> Option<Duration> {
        self.polling_interval.filter(|interval| !interval.is_zero())
    }
}

#[derive(Debug, Clone)]
struct Subscriber {
    kind: SubscriptionKind,
    options: SubscriptionOptions,
}

/// Polling requirement aggregated over every subscriber of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollingDemand {
    /// Smallest interval any subscriber asked for.
    pub interval: Duration,
    pub skip_if_unfocused: bool,
}

#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    by_key: AHashMap<CacheKey, AHashMap<SubscriberToken, Subscriber>>,
}

impl SubscriptionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        &mut self,
        key: &CacheKey,
        token: SubscriberToken,
        kind: SubscriptionKind,
        options: SubscriptionOptions,
    ) {
        self.by_key.entry(key.clone()).or_default().insert(token, Subscriber { kind, options });
    }

    /// Removes `token`. Returns `false` if it was not subscribed to `key`.
    pub fn remove(&mut self, key: &CacheKey, token: SubscriberToken) -> bool {
        let Some(subscribers) = self.by_key.get_mut(key) else {
            return false;
        };
        let removed = subscribers.remove(&token).is_some();
        if subscribers.is_empty() {
            self.by_key.remove(key);
        }
        removed
    }

    /// Replaces the options of an existing subscriber. Returns `false` if unknown.
    pub fn update_options(
        &mut self,
        key: &CacheKey,
        token: SubscriberToken,
        options: SubscriptionOptions,
    ) -> bool {
        match self.by_key.get_mut(key).and_then(|subscribers| subscribers.get_mut(&token)) {
            Some(subscriber) => {
                subscriber.options = options;
                true
            }
            None => false,
        }
    }

    /// Reference count used for retention: UI and prefetch subscribers alike.
    #[must_use]
    pub fn active_count(&self, key: &CacheKey) -> usize {
        self.by_key.get(key).map_or(0, |subscribers| subscribers.len())
    }

    #[must_use]
    pub fn ui_count(&self, key: &CacheKey) -> usize {
        self.count_kind(key, SubscriptionKind::Ui)
    }

    #[must_use]
    pub fn has_ui_subscriber(&self, key: &CacheKey) -> bool {
        self.ui_count(key) > 0
    }

    #[must_use]
    pub fn polling_demand(&self, key: &CacheKey) -> Option<PollingDemand> {
        let subscribers = self.by_key.get(key)?;
        let polling: Vec<&Subscriber> =
            subscribers.values().filter(|s| s.options.effective_interval().is_some()).collect();

        let interval = polling.iter().filter_map(|s| s.options.effective_interval()).min()?;
        let skip_if_unfocused = !polling.iter().any(|s| s.options.poll_while_unfocused);
        Some(PollingDemand { interval, skip_if_unfocused })
    }

    /// Keys where at least one subscriber's options satisfy `predicate`.
    pub fn keys_where(&self, predicate: impl Fn(&SubscriptionOptions) -> bool) -> Vec<CacheKey> {
        self.by_key
            .iter()
            .filter(|(_, subscribers)| subscribers.values().any(|s| predicate(&s.options)))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Totals across all keys as `(ui, prefetch)`.
    #[must_use]
    pub fn totals(&self) -> (usize, usize) {
        self.by_key.values().flat_map(|subscribers| subscribers.values()).fold((0, 0), |(ui, prefetch), s| match s.kind {
            SubscriptionKind::Ui => (ui + 1, prefetch),
            SubscriptionKind::Prefetch => (ui, prefetch + 1),
        })
    }

    pub fn clear(&mut self) {
        self.by_key.clear();
    }

    fn count_kind(&self, key: &CacheKey, kind: SubscriptionKind) -> usize {
        self.by_key.get(key).map_or(0, |subscribers| subscribers.values().filter(|s| s.kind == kind).count())
    }
}
