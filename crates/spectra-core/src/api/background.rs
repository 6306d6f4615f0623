//! Maintenance worker: retention timers, drop-driven releases and invalidation flushes.
//!
//! # Architecture
//!
//! One worker per [`Api`](super::Api), spawned at build time:
//! 1. Receives [`MaintenanceCommand`]s over an unbounded channel
//! 2. Keeps every retention deadline in a single `DelayQueue`
//! 3. Runs until the shutdown broadcast fires, the channel closes, or the `Api` is dropped
//!
//! ## Channel-Based Release in Drop
//!
//! `QuerySubscription::drop` sends a `Release` command instead of taking the state lock, so
//! dropping a subscription never blocks and never spawns.
//!
//! ## Generation-Checked GC
//!
//! A GC deadline carries the generation it was scheduled with. Cancelling a timer only removes
//! the generation from the state; a stale deadline that fires later is ignored.

use super::ApiInner;
use crate::types::{CacheKey, RequestId, SubscriberToken};
use std::{
    future::poll_fn,
    sync::{Arc, Weak},
    time::Duration,
};
use tokio::sync::{broadcast, mpsc};
use tokio_util::time::DelayQueue;
use tracing::{debug, info, trace};

#[derive(Debug)]
pub(crate) enum MaintenanceCommand {
    ScheduleGc { key: CacheKey, generation: u64, after: Duration },
    ExpirePrefetch { key: CacheKey, token: SubscriberToken, after: Duration },
    ExpireMutation { request_id: RequestId, after: Duration },
    Release { key: CacheKey, token: SubscriberToken },
    FlushInvalidations,
}

#[derive(Debug)]
enum Expiry {
    Gc { key: CacheKey, generation: u64 },
    Prefetch { key: CacheKey, token: SubscriberToken },
    Mutation(RequestId),
}

enum Event {
    Shutdown,
    Command(Option<MaintenanceCommand>),
    Expired(Expiry),
}

/// The maintenance loop.
///
/// # Arguments
/// * `commands` - Channel receiver for maintenance commands
/// * `api` - Weak reference so the worker never keeps a dropped `Api` alive
/// * `shutdown_rx` - Broadcast receiver for the dispose signal
pub(crate) async fn run_maintenance_worker(
    mut commands: mpsc::UnboundedReceiver<MaintenanceCommand>,
    api: Weak<ApiInner>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut deadlines: DelayQueue<Expiry> = DelayQueue::new();

    loop {
        let event = tokio::select! {
            biased;

            _ = shutdown_rx.recv() => Event::Shutdown,
            command = commands.recv() => Event::Command(command),
            Some(expired) = poll_fn(|cx| deadlines.poll_expired(cx)) => Event::Expired(expired.into_inner()),
        };

        match event {
            Event::Shutdown => {
                debug!("maintenance worker received shutdown signal");
                break;
            }
            Event::Command(None) => {
                debug!("maintenance channel closed, worker exiting");
                break;
            }
            Event::Command(Some(command)) => {
                let Some(api) = api.upgrade() else { break };
                handle_command(&api, &mut deadlines, command);
            }
            Event::Expired(expiry) => {
                let Some(api) = api.upgrade() else { break };
                handle_expiry(&api, expiry);
            }
        }
    }

    info!(pending_deadlines = deadlines.len(), "maintenance worker shutdown complete");
}

fn handle_command(
    api: &Arc<ApiInner>,
    deadlines: &mut DelayQueue<Expiry>,
    command: MaintenanceCommand,
) {
    match command {
        MaintenanceCommand::ScheduleGc { key, generation, after } => {
            trace!(key = %key, generation, after_ms = after.as_millis(), "gc timer scheduled");
            deadlines.insert(Expiry::Gc { key, generation }, after);
        }
        MaintenanceCommand::ExpirePrefetch { key, token, after } => {
            deadlines.insert(Expiry::Prefetch { key, token }, after);
        }
        MaintenanceCommand::ExpireMutation { request_id, after } => {
            deadlines.insert(Expiry::Mutation(request_id), after);
        }
        MaintenanceCommand::Release { key, token } => {
            trace!(key = %key, token = %token, "releasing dropped subscription");
            api.release(&key, token);
        }
        MaintenanceCommand::FlushInvalidations => {
            api.flush_invalidations();
        }
    }
}

fn handle_expiry(api: &Arc<ApiInner>, expiry: Expiry) {
    match expiry {
        Expiry::Gc { key, generation } => api.collect_garbage(&key, generation),
        Expiry::Prefetch { key, token } => {
            trace!(key = %key, token = %token, "prefetch subscription expired");
            api.release(&key, token);
        }
        Expiry::Mutation(request_id) => {
            if api.mutations.remove(&request_id).is_some() {
                trace!(request_id = %request_id, "mutation record expired");
            }
        }
    }
}
