//! Sliding-window per-client rate limiting (§4.6).

use std::collections::HashMap;
use std::collections::VecDeque;
use std::net::IpAddr;
use std::time::{Duration, Instant};

/// A sliding-window counter keyed by client address. For each request,
/// timestamps older than `window` are dropped; if the remaining count is
/// already at `limit`, the request is denied.
#[derive(Debug)]
pub struct RateLimiter {
    limit: usize,
    window: Duration,
    buckets: HashMap<IpAddr, VecDeque<Instant>>,
}

impl RateLimiter {
    /// Creates a limiter allowing `limit` requests per `window` per
    /// client address.
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            buckets: HashMap::new(),
        }
    }

    /// Records a request from `addr` and reports whether it is allowed.
    /// Complexity is O(window-size) per call with amortized O(1) cleanup,
    /// since each timestamp is popped at most once.
    pub fn check(&mut self, addr: IpAddr) -> bool {
        let now = Instant::now();
        let window = self.window;
        let bucket = self.buckets.entry(addr).or_default();
        while let Some(&oldest) = bucket.front() {
            if now.duration_since(oldest) > window {
                bucket.pop_front();
            } else {
                break;
            }
        }
        if bucket.len() >= self.limit {
            return false;
        }
        bucket.push_back(now);
        true
    }

    /// Seconds until the oldest in-window timestamp for `addr` expires,
    /// i.e. until capacity frees up. Returns 0 if `addr` has no tracked
    /// requests or is already under the limit.
    pub fn get_reset_time(&self, addr: IpAddr) -> u64 {
        let Some(bucket) = self.buckets.get(&addr) else {
            return 0;
        };
        let Some(&oldest) = bucket.front() else {
            return 0;
        };
        let elapsed = oldest.elapsed();
        self.window.saturating_sub(elapsed).as_secs().max(0)
    }

    /// The configured request limit per window.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// The configured window duration.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Requests remaining in the current window for `addr`.
    pub fn remaining(&self, addr: IpAddr) -> usize {
        self.buckets
            .get(&addr)
            .map(|b| self.limit.saturating_sub(b.len()))
            .unwrap_or(self.limit)
    }
}
