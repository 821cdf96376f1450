//! Background sweeper shared by the cache and the rate limiters.
//!
//! The task holds only a weak reference to its target, so dropping the last
//! owner stops the sweep on the next tick.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Spawn a task that calls `sweep` on `target` every `interval` until
/// `cancel` fires or the target is dropped.
///
/// `sweep` returns the number of entries it removed; non-zero counts are
/// logged at debug level.
pub fn spawn_sweeper<T>(
    name: &'static str,
    target: &Arc<T>,
    interval: Duration,
    cancel: CancellationToken,
    sweep: fn(&T) -> usize,
) -> JoinHandle<()>
where
    T: ?Sized + Send + Sync + 'static,
{
    let weak: Weak<T> = Arc::downgrade(target);

    tokio::spawn(async move {
        tracing::debug!(sweeper = name, interval_secs = interval.as_secs(), "Sweeper started");

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let Some(target) = weak.upgrade() else {
                break;
            };
            let removed = sweep(target.as_ref());
            if removed > 0 {
                tracing::debug!(sweeper = name, removed, "Sweep removed stale entries");
            }
        }

        tracing::debug!(sweeper = name, "Sweeper stopped");
    })
}
