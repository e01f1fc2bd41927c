//! Outbound RPC rate limiting
//!
//! Rolling one-second window per method name. Bursts are admitted up to the
//! limit; further calls are delayed (never rejected) until the window has
//! room for them.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

/// Length of the rolling window
pub const WINDOW: Duration = Duration::from_millis(1000);

/// In-memory rate limiter (per-process, shared by every outbound call)
pub struct RateLimiter {
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
    requests_per_second: i64,
    method_limits: HashMap<String, i64>,
}

impl RateLimiter {
    /// A limit of zero or below disables throttling
    pub fn new(requests_per_second: i64) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            requests_per_second,
            method_limits: HashMap::new(),
        }
    }

    pub fn disabled() -> Self {
        Self::new(0)
    }

    /// Override the limit for a single method
    pub fn with_method_limit(mut self, method: impl Into<String>, requests_per_second: i64) -> Self {
        self.method_limits.insert(method.into(), requests_per_second);
        self
    }

    /// Effective limit for a method, `None` when unthrottled
    pub fn limit_for(&self, method: &str) -> Option<usize> {
        let limit = self
            .method_limits
            .get(method)
            .copied()
            .unwrap_or(self.requests_per_second);
        if limit <= 0 {
            None
        } else {
            Some(limit as usize)
        }
    }

    /// Check whether a call to `method` would go through right now
    pub async fn can_make_request(&self, method: &str) -> bool {
        let Some(limit) = self.limit_for(method) else {
            return true;
        };

        let mut windows = self.windows.lock().await;
        match windows.get_mut(method) {
            Some(window) => {
                prune(window, Instant::now());
                window.len() < limit
            }
            None => true,
        }
    }

    /// Record a call to `method`, first waiting for room in the window if needed
    pub async fn wait_for_rate_limit(&self, method: &str) {
        let Some(limit) = self.limit_for(method) else {
            return;
        };

        let slot = {
            let mut windows = self.windows.lock().await;
            let now = Instant::now();
            let window = windows.entry(method.to_string()).or_default();
            prune(window, now);

            let slot = if window.len() < limit {
                now
            } else {
                // The call `limit` places back leaves the window one WINDOW after it ran.
                // Slots are handed out in order, so the deque stays sorted.
                let anchor = window[window.len() - limit];
                (anchor + WINDOW).max(now)
            };
            window.push_back(slot);
            slot
        };

        let now = Instant::now();
        if slot > now {
            debug!(
                method,
                wait_ms = (slot - now).as_millis() as u64,
                "Rate limit reached, delaying call"
            );
            sleep_until(slot).await;
        }
    }

    /// Number of calls currently counted in the window for `method`
    pub async fn window_len(&self, method: &str) -> usize {
        let mut windows = self.windows.lock().await;
        match windows.get_mut(method) {
            Some(window) => {
                prune(window, Instant::now());
                window.len()
            }
            None => 0,
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(10)
    }
}

fn prune(window: &mut VecDeque<Instant>, now: Instant) {
    while let Some(oldest) = window.front() {
        if now.saturating_duration_since(*oldest) >= WINDOW {
            window.pop_front();
        } else {
            break;
        }
    }
}
