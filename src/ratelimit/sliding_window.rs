//! Sliding-window-log limiter.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;
use tunebridge_common::{Error, Result};

use super::Limiter;
use crate::context::RequestContext;

const MIN_POLL: Duration = Duration::from_millis(1);

/// Admission timestamps for one key, oldest first.
#[derive(Debug)]
struct Window {
    hits: VecDeque<Instant>,
}

impl Window {
    fn prune(&mut self, now: Instant, size: Duration) {
        while let Some(&oldest) = self.hits.front() {
            if now.saturating_duration_since(oldest) >= size {
                self.hits.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Per-key sliding windows: at most `max_requests` admissions within any
/// `window` long interval.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    window: Duration,
    max_requests: u32,
    windows: RwLock<HashMap<String, Arc<Mutex<Window>>>>,
}

impl SlidingWindowLimiter {
    pub fn new(window: Duration, max_requests: u32) -> Result<Self> {
        if window.is_zero() {
            return Err(Error::configuration("sliding window length cannot be 0"));
        }
        if max_requests == 0 {
            return Err(Error::configuration("sliding window max_requests cannot be 0"));
        }
        Ok(Self {
            window,
            max_requests,
            windows: RwLock::new(HashMap::new()),
        })
    }

    pub fn len(&self) -> usize {
        self.windows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.read().is_empty()
    }

    fn window_for(&self, key: &str) -> Arc<Mutex<Window>> {
        if let Some(window) = self.windows.read().get(key) {
            return Arc::clone(window);
        }

        let mut windows = self.windows.write();
        let window = windows.entry(key.to_string()).or_insert_with(|| {
            Arc::new(Mutex::new(Window {
                hits: VecDeque::with_capacity(self.max_requests as usize),
            }))
        });
        Arc::clone(window)
    }

    fn existing(&self, key: &str) -> Option<Arc<Mutex<Window>>> {
        self.windows.read().get(key).cloned()
    }
}

#[async_trait]
impl Limiter for SlidingWindowLimiter {
    fn name(&self) -> &'static str {
        "sliding_window"
    }

    fn allow(&self, key: &str) -> bool {
        let window = self.window_for(key);
        let mut window = window.lock();
        let now = Instant::now();
        window.prune(now, self.window);
        if window.hits.len() < self.max_requests as usize {
            window.hits.push_back(now);
            true
        } else {
            false
        }
    }

    async fn wait(&self, ctx: &RequestContext, key: &str) -> Result<()> {
        loop {
            ctx.check()?;
            if self.allow(key) {
                return Ok(());
            }
            let pause = self
                .reset_time(key)
                .saturating_duration_since(Instant::now())
                .max(MIN_POLL);
            ctx.sleep(pause).await?;
        }
    }

    fn reset(&self, key: &str) {
        self.windows.write().remove(key);
    }

    fn remaining(&self, key: &str) -> u32 {
        let Some(window) = self.existing(key) else {
            return self.max_requests;
        };
        let mut window = window.lock();
        window.prune(Instant::now(), self.window);
        self.max_requests
            .saturating_sub(window.hits.len() as u32)
    }

    /// When the oldest admission leaves the window.
    fn reset_time(&self, key: &str) -> Instant {
        let now = Instant::now();
        let Some(window) = self.existing(key) else {
            return now;
        };
        let mut window = window.lock();
        window.prune(now, self.window);
        window
            .hits
            .front()
            .map(|&oldest| oldest + self.window)
            .unwrap_or(now)
    }

    fn cleanup(&self) -> usize {
        let now = Instant::now();
        let mut windows = self.windows.write();
        let before = windows.len();
        windows.retain(|_, window| {
            let mut window = window.lock();
            window.prune(now, self.window);
            !window.hits.is_empty()
        });
        before - windows.len()
    }
}
