//! Retry decorator with linear backoff.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::warn;
use tunebridge_common::Result;

use super::Transport;
use crate::context::RequestContext;

/// How many extra attempts to make and how long to wait between them.
///
/// The wait before retry `n` (1-based) is `retry_delay * n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            max_retries,
            retry_delay,
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Delay before the given retry attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.retry_delay * attempt
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// retry budget is spent. Cancellation of `ctx` ends the loop at once.
    pub async fn execute<T, F, Fut>(&self, ctx: &RequestContext, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            ctx.check()?;

            match ctx.run(op()).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.delay_for(attempt);
                    warn!(
                        attempt,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient upstream failure, retrying"
                    );
                    ctx.sleep(delay).await?;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(2, Duration::from_millis(500))
    }
}

/// Wraps any [`Transport`] and retries its transient failures.
pub struct RetryingTransport<T> {
    inner: T,
    policy: RetryPolicy,
}

impl<T: Transport> RetryingTransport<T> {
    pub fn new(inner: T, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }
}

#[async_trait]
impl<T: Transport> Transport for RetryingTransport<T> {
    async fn get(&self, ctx: &RequestContext, url: &str, query: &[(&str, String)]) -> Result<Bytes> {
        self.policy
            .execute(ctx, || self.inner.get(ctx, url, query))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tunebridge_common::Error;

    #[test]
    fn backoff_is_linear() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(10));
        let ctx = RequestContext::new();

        let value = policy
            .execute(&ctx, || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(Error::transient_status(503, "HTTP 503"))
                } else {
                    Ok(n)
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_budget() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(1, Duration::from_millis(10));
        let ctx = RequestContext::new();

        let res: Result<()> = policy
            .execute(&ctx, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::transient_status(503, "HTTP 503"))
            })
            .await;

        assert_matches!(res, Err(Error::TransientNetwork { status: Some(503), .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn does_not_retry_permanent_errors() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(5, Duration::from_millis(10));
        let ctx = RequestContext::new();

        let res: Result<()> = policy
            .execute(&ctx, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::provider("HTTP 404"))
            })
            .await;

        assert_matches!(res, Err(Error::Provider(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_backoff() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(10, Duration::from_secs(60));
        let ctx = RequestContext::new();
        let canceller = ctx.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            canceller.cancel();
        });

        let res: Result<()> = policy
            .execute(&ctx, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::transient("connection refused"))
            })
            .await;

        assert_matches!(res, Err(Error::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
