//! Admission control keyed by caller-supplied strings.
//!
//! Two interchangeable algorithms implement [`Limiter`]:
//!
//! - [`TokenBucketLimiter`] -- burst of `capacity`, refilled at a fixed rate.
//! - [`SlidingWindowLimiter`] -- at most `max_requests` per rolling window.
//!
//! Both keep one lock per key and take the map-level lock only to create or
//! remove per-key state. Idle state is reclaimed by [`Limiter::cleanup`],
//! normally driven by [`spawn_limiter_sweeper`].

pub mod sliding_window;
pub mod token_bucket;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tunebridge_common::Result;

use crate::config::{LimiterAlgorithm, RateLimitConfig};
use crate::context::RequestContext;
use crate::sweeper::spawn_sweeper;

pub use sliding_window::SlidingWindowLimiter;
pub use token_bucket::TokenBucketLimiter;

/// A per-key rate limiter.
#[async_trait]
pub trait Limiter: Send + Sync {
    /// Short identifier of the algorithm, used in logs.
    fn name(&self) -> &'static str;

    /// Admit one call for `key` if the budget allows it.
    fn allow(&self, key: &str) -> bool;

    /// Block until a call for `key` is admitted or `ctx` ends.
    async fn wait(&self, ctx: &RequestContext, key: &str) -> Result<()>;

    /// Forget all state for `key`, restoring its full budget.
    fn reset(&self, key: &str);

    /// Calls `key` could make right now.
    fn remaining(&self, key: &str) -> u32;

    /// When the budget for `key` is fully restored.
    fn reset_time(&self, key: &str) -> Instant;

    /// Drop idle per-key state. Returns how many keys were removed.
    fn cleanup(&self) -> usize;
}

/// Build the limiter described by `config`, or `None` when disabled.
pub fn build_limiter(config: &RateLimitConfig) -> Result<Option<Arc<dyn Limiter>>> {
    if !config.enabled {
        return Ok(None);
    }
    let limiter: Arc<dyn Limiter> = match config.algorithm {
        LimiterAlgorithm::TokenBucket => Arc::new(TokenBucketLimiter::new(
            config.capacity,
            config.refill_rate,
            Duration::from_secs(config.idle_secs),
        )?),
        LimiterAlgorithm::SlidingWindow => Arc::new(SlidingWindowLimiter::new(
            Duration::from_secs(config.window_secs),
            config.max_requests,
        )?),
    };
    tracing::info!(algorithm = limiter.name(), "Admission control enabled");
    Ok(Some(limiter))
}

fn sweep_limiter(limiter: &dyn Limiter) -> usize {
    limiter.cleanup()
}

/// Periodically run [`Limiter::cleanup`] until `cancel` fires.
pub fn spawn_limiter_sweeper(
    limiter: &Arc<dyn Limiter>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    spawn_sweeper("rate_limit", limiter, interval, cancel, sweep_limiter)
}
