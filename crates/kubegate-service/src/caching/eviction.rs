//! The two-phase eviction of cached handlers.
//!
//! Every handler that makes it into the cache goes through `VISIBLE -> HIDDEN -> DESTROYED`:
//!
//! - After the grace period it is removed from the cache. New requests for the same key will
//!   construct a fresh handler from then on.
//! - After the drain delay its lifetime context is cancelled, which stops all background work
//!   started on its behalf. Requests that got hold of the handler right before it was hidden
//!   can finish in the meantime.
//!
//! A shutdown of the cache short-circuits both delays, still hiding before cancelling.

use std::fmt;
use std::hash::Hash;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::handlers::InMemoryHandlers;

pub(super) struct EvictionSchedule<K, H> {
    pub handlers: InMemoryHandlers<K, H>,
    pub key: K,
    pub context: CancellationToken,
    pub grace_period: Duration,
    pub drain_delay: Duration,
    pub shutdown: CancellationToken,
}

/// Waits for `delay`, returning `false` if the wait was cut short by a shutdown.
async fn wait_unless_shutdown(delay: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

pub(super) async fn run_eviction<K, H>(schedule: EvictionSchedule<K, H>)
where
    K: Clone + Eq + Hash + fmt::Display + Send + Sync + 'static,
    H: Send + Sync + 'static,
{
    let EvictionSchedule {
        handlers,
        key,
        context,
        grace_period,
        drain_delay,
        shutdown,
    } = schedule;

    // NOTE: Only this schedule removes `key`. A newer handler for the same key can only be
    // inserted after this removal, so it is never affected.
    let graceful = wait_unless_shutdown(grace_period, &shutdown).await;
    handlers.invalidate(&key).await;
    metric!(counter("handlers.hidden") += 1);
    tracing::debug!(cluster = %key, "Hid cluster handler");

    if graceful {
        wait_unless_shutdown(drain_delay, &shutdown).await;
    }

    context.cancel();
    metric!(counter("handlers.destroyed") += 1);
    tracing::debug!(cluster = %key, "Cancelled cluster handler context");
}
