//! Polling coordinator: one ticker task per key, at the smallest interval any subscriber
//! requested.

use super::{
    state::{CacheState, PollingTask},
    ApiInner,
};
use crate::types::CacheKey;
use std::{
    sync::{atomic::Ordering, Arc, Weak},
    time::Duration,
};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace};

impl ApiInner {
    /// Brings the polling task for `key` in line with its subscribers.
    ///
    /// The task is restarted only when the effective interval changes, so adding a
    /// subscriber with a slower interval does not delay the next tick.
    pub(crate) fn reconcile_polling(&self, state: &mut CacheState, key: &CacheKey) {
        let demand = state.subscriptions.polling_demand(key);

        match (state.polling.get_mut(key), demand) {
            (Some(task), Some(demand)) if task.demand.interval == demand.interval => {
                task.demand = demand;
            }
            (existing, Some(demand)) => {
                if let Some(task) = existing {
                    task.handle.abort();
                }
                debug!(key = %key, interval_ms = demand.interval.as_millis(), "polling started");
                let task = run_polling(self.self_ref.clone(), key.clone(), demand.interval);
                let join = self.runtime.spawn(task);
                state.polling.insert(key.clone(), PollingTask { demand, handle: join.abort_handle() });
            }
            (Some(_), None) => {
                if let Some(task) = state.polling.remove(key) {
                    task.handle.abort();
                    debug!(key = %key, "polling stopped");
                }
            }
            (None, None) => {}
        }
    }

    /// One polling tick: refetch unless offline, unfocused (and no subscriber polls while
    /// unfocused) or already in flight.
    fn poll_tick(self: &Arc<Self>, key: &CacheKey) {
        if !self.environment.online.load(Ordering::Acquire) {
            trace!(key = %key, "skipping poll while offline");
            return;
        }

        let plan = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let Some(task) = state.polling.get(key) else {
                return;
            };
            if task.demand.skip_if_unfocused && !self.environment.focused.load(Ordering::Acquire) {
                trace!(key = %key, "skipping poll while unfocused");
                return;
            }
            self.prepare_fetch(state, key, false)
        };

        if let Some(plan) = plan {
            trace!(key = %key, request_id = %plan.request_id, "poll tick");
            self.spawn_fetch(plan);
        }
    }
}

async fn run_polling(api: Weak<ApiInner>, key: CacheKey, interval: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let Some(api) = api.upgrade() else {
            break;
        };
        api.poll_tick(&key);
    }
}
