//! Per-request execution context.
//!
//! Every externally-facing operation takes a [`RequestContext`]. It carries a
//! cancellation token, an optional deadline, the caller's admission key and a
//! request id used to correlate log lines.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tunebridge_common::{Error, Result};
use uuid::Uuid;

/// Admission key used when the caller does not identify itself.
pub const GLOBAL_KEY: &str = "global";

/// Context passed to every source-manager, provider and transport call.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Identifier attached to tracing spans for this request.
    pub request_id: Uuid,
    /// Token observed by every blocking wait; cancelling it aborts the request.
    pub cancellation: CancellationToken,
    /// Point in time after which waits fail with [`Error::DeadlineExceeded`].
    pub deadline: Option<Instant>,
    /// Caller identity used as the rate-limiter key.
    pub client_key: Option<String>,
}

impl RequestContext {
    /// Create a context with no deadline and a fresh cancellation token.
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4(),
            cancellation: CancellationToken::new(),
            deadline: None,
            client_key: None,
        }
    }

    /// Builder: fail the request once `timeout` has elapsed from now.
    ///
    /// A timeout too large to represent as an instant leaves the request
    /// without a deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Instant::now().checked_add(timeout);
        self
    }

    /// Builder: set an absolute deadline.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Builder: attach an existing cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Builder: set the caller identity used for admission control.
    pub fn with_client_key(mut self, key: impl Into<String>) -> Self {
        self.client_key = Some(key.into());
        self
    }

    /// Derive a context whose cancellation is triggered by the parent but can
    /// also be cancelled on its own.
    pub fn child(&self) -> Self {
        Self {
            cancellation: self.cancellation.child_token(),
            ..self.clone()
        }
    }

    /// Cancel this context and every child derived from it.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Key under which the admission controller tracks this caller.
    pub fn admission_key(&self) -> &str {
        self.client_key.as_deref().unwrap_or(GLOBAL_KEY)
    }

    /// Time left before the deadline, `None` when there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Fail fast if the context is already cancelled or past its deadline.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if matches!(self.deadline, Some(d) if Instant::now() >= d) {
            return Err(Error::DeadlineExceeded);
        }
        Ok(())
    }

    /// Drive `fut` to completion unless the context is cancelled or the
    /// deadline passes first.
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => Err(Error::Cancelled),
            _ = sleep_until_deadline(self.deadline) => Err(Error::DeadlineExceeded),
            res = fut => res,
        }
    }

    /// Resolve once the context is cancelled or its deadline passes,
    /// yielding the matching error.
    pub async fn done(&self) -> Error {
        tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => Error::Cancelled,
            _ = sleep_until_deadline(self.deadline) => Error::DeadlineExceeded,
        }
    }

    /// Sleep for `duration`, waking early with an error on cancellation.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        self.run(async {
            tokio::time::sleep(duration).await;
            Ok(())
        })
        .await
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn admission_key_defaults_to_global() {
        let ctx = RequestContext::new();
        assert_eq!(ctx.admission_key(), GLOBAL_KEY);
        let ctx = ctx.with_client_key("10.0.0.1");
        assert_eq!(ctx.admission_key(), "10.0.0.1");
    }

    #[tokio::test]
    async fn run_returns_future_output() {
        let ctx = RequestContext::new();
        let value = ctx.run(async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn run_observes_cancellation() {
        let ctx = RequestContext::new();
        ctx.cancel();
        let res: Result<()> = ctx.run(std::future::pending()).await;
        assert_matches!(res, Err(Error::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn run_observes_deadline() {
        let ctx = RequestContext::new().with_timeout(Duration::from_secs(2));
        let res = ctx.sleep(Duration::from_secs(10)).await;
        assert_matches!(res, Err(Error::DeadlineExceeded));
    }

    #[tokio::test]
    async fn unrepresentable_timeout_means_no_deadline() {
        let ctx = RequestContext::new().with_timeout(Duration::from_secs(u64::MAX));
        assert!(ctx.deadline.is_none());
        assert!(ctx.remaining().is_none());
        assert!(ctx.check().is_ok());
        assert_eq!(ctx.run(async { Ok(7) }).await.unwrap(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn done_reports_which_limit_ended_the_request() {
        let ctx = RequestContext::new().with_timeout(Duration::from_secs(1));
        assert_matches!(ctx.done().await, Error::DeadlineExceeded);

        let ctx = RequestContext::new();
        ctx.cancel();
        assert_matches!(ctx.done().await, Error::Cancelled);
    }

    #[tokio::test]
    async fn child_is_cancelled_with_parent() {
        let parent = RequestContext::new();
        let child = parent.child();
        parent.cancel();
        assert!(child.is_cancelled());
        assert_matches!(child.check(), Err(Error::Cancelled));
    }

    #[tokio::test]
    async fn cancelling_child_leaves_parent_running() {
        let parent = RequestContext::new();
        let child = parent.child();
        child.cancel();
        assert!(!parent.is_cancelled());
        assert!(parent.check().is_ok());
    }
}
