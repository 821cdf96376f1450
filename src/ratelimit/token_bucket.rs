//! Token-bucket limiter with lazy refill.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;
use tunebridge_common::{Error, Result};

use super::Limiter;
use crate::context::RequestContext;

/// Shortest poll interval used by [`TokenBucketLimiter::wait`].
const MIN_POLL: Duration = Duration::from_millis(1);

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
    last_used: Instant,
}

impl Bucket {
    fn full(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_refill: now,
            last_used: now,
        }
    }

    fn refill(&mut self, now: Instant, capacity: f64, rate: f64) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).min(capacity);
        self.last_refill = now;
    }
}

/// Per-key token buckets.
///
/// Each key owns a bucket of `capacity` tokens refilled at `refill_rate`
/// tokens per second. An allowed call consumes one token. The map lock is
/// only taken to create or remove buckets; admission locks a single bucket.
#[derive(Debug)]
pub struct TokenBucketLimiter {
    capacity: f64,
    refill_rate: f64,
    idle_threshold: Duration,
    buckets: RwLock<HashMap<String, Arc<Mutex<Bucket>>>>,
}

impl TokenBucketLimiter {
    /// Create a limiter. `capacity` and `refill_rate` must be positive.
    pub fn new(capacity: u32, refill_rate: f64, idle_threshold: Duration) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::configuration("token bucket capacity cannot be 0"));
        }
        if !(refill_rate.is_finite() && refill_rate > 0.0) {
            return Err(Error::configuration(format!(
                "token bucket refill_rate must be positive and finite, got {refill_rate}"
            )));
        }
        Ok(Self {
            capacity: f64::from(capacity),
            refill_rate,
            idle_threshold,
            buckets: RwLock::new(HashMap::new()),
        })
    }

    /// Interval at which `wait` re-checks the bucket: one token's worth.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.refill_rate).max(MIN_POLL)
    }

    pub fn len(&self) -> usize {
        self.buckets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.read().is_empty()
    }

    fn bucket(&self, key: &str) -> Arc<Mutex<Bucket>> {
        if let Some(bucket) = self.buckets.read().get(key) {
            return Arc::clone(bucket);
        }

        let mut buckets = self.buckets.write();
        // Another caller may have created it between the two locks.
        let bucket = buckets
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Bucket::full(self.capacity, Instant::now()))));
        Arc::clone(bucket)
    }

    fn existing(&self, key: &str) -> Option<Arc<Mutex<Bucket>>> {
        self.buckets.read().get(key).cloned()
    }
}

#[async_trait]
impl Limiter for TokenBucketLimiter {
    fn name(&self) -> &'static str {
        "token_bucket"
    }

    fn allow(&self, key: &str) -> bool {
        let bucket = self.bucket(key);
        let mut bucket = bucket.lock();
        let now = Instant::now();
        bucket.refill(now, self.capacity, self.refill_rate);
        bucket.last_used = now;
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    async fn wait(&self, ctx: &RequestContext, key: &str) -> Result<()> {
        let interval = self.poll_interval();
        loop {
            ctx.check()?;
            if self.allow(key) {
                return Ok(());
            }
            ctx.sleep(interval).await?;
        }
    }

    fn reset(&self, key: &str) {
        self.buckets.write().remove(key);
    }

    fn remaining(&self, key: &str) -> u32 {
        let Some(bucket) = self.existing(key) else {
            return self.capacity as u32;
        };
        let mut bucket = bucket.lock();
        bucket.refill(Instant::now(), self.capacity, self.refill_rate);
        bucket.tokens.floor() as u32
    }

    fn reset_time(&self, key: &str) -> Instant {
        let now = Instant::now();
        let Some(bucket) = self.existing(key) else {
            return now;
        };
        let mut bucket = bucket.lock();
        bucket.refill(now, self.capacity, self.refill_rate);
        let missing = self.capacity - bucket.tokens;
        if missing <= 0.0 {
            return now;
        }
        now + Duration::from_secs_f64(missing / self.refill_rate)
    }

    fn cleanup(&self) -> usize {
        let now = Instant::now();
        let mut buckets = self.buckets.write();
        let before = buckets.len();
        buckets.retain(|_, bucket| {
            let mut bucket = bucket.lock();
            bucket.refill(now, self.capacity, self.refill_rate);
            let idle = now.saturating_duration_since(bucket.last_used);
            !(bucket.tokens >= self.capacity && idle >= self.idle_threshold)
        });
        before - buckets.len()
    }
}
