//! Metrics emitted via [`crate::server::Server::get_metrics`] (§6).

use std::time::{Duration, Instant};

/// A snapshot of server metrics at the moment `get_metrics()` was called.
#[derive(Debug, Clone, Copy)]
pub struct MetricsSnapshot {
    /// Seconds since the server started.
    pub uptime_seconds: f64,
    /// Total requests handled.
    pub total_requests: u64,
    /// Requests whose response status was < 400.
    pub successful_requests: u64,
    /// Requests whose response status was >= 400.
    pub failed_requests: u64,
    /// Connections currently live in the pool.
    pub active_connections: usize,
    /// Connections accepted since startup.
    pub total_connections: u64,
    /// Connections closed normally since startup.
    pub closed_connections: u64,
    /// Connections evicted for exceeding the idle timeout.
    pub timed_out_connections: u64,
    /// Static cache hits.
    pub cache_hits: u64,
    /// Static cache misses.
    pub cache_misses: u64,
    /// Cache hit rate, as a percentage.
    pub cache_hit_rate: f64,
    /// Average request duration, in milliseconds.
    pub avg_request_duration_ms: f64,
    /// Minimum observed request duration, in milliseconds.
    pub min_request_duration_ms: f64,
    /// Maximum observed request duration, in milliseconds.
    pub max_request_duration_ms: f64,
    /// Requests served per second since startup.
    pub requests_per_second: f64,
}

/// Mutable accumulator behind [`MetricsSnapshot`]; owned by the server
/// core and updated as requests flow through the pipeline.
#[derive(Debug)]
pub struct Metrics {
    started_at: Instant,
    total_requests: u64,
    successful_requests: u64,
    failed_requests: u64,
    total_connections: u64,
    closed_connections: u64,
    timed_out_connections: u64,
    cache_hits: u64,
    cache_misses: u64,
    total_duration: Duration,
    min_duration: Option<Duration>,
    max_duration: Option<Duration>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Creates a zeroed metrics accumulator, starting the uptime clock now.
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            total_connections: 0,
            closed_connections: 0,
            timed_out_connections: 0,
            cache_hits: 0,
            cache_misses: 0,
            total_duration: Duration::ZERO,
            min_duration: None,
            max_duration: None,
        }
    }

    /// Records a connection accepted.
    pub fn record_connection_opened(&mut self) {
        self.total_connections += 1;
    }

    /// Records a connection closed normally.
    pub fn record_connection_closed(&mut self) {
        self.closed_connections += 1;
    }

    /// Records connections evicted by the idle-timeout sweep.
    pub fn record_timed_out(&mut self, count: usize) {
        self.timed_out_connections += count as u64;
    }

    /// Records one completed request/response cycle.
    pub fn record_request(&mut self, status_code: u16, duration: Duration) {
        self.total_requests += 1;
        if status_code < 400 {
            self.successful_requests += 1;
        } else {
            self.failed_requests += 1;
        }
        self.total_duration += duration;
        self.min_duration = Some(self.min_duration.map_or(duration, |m| m.min(duration)));
        self.max_duration = Some(self.max_duration.map_or(duration, |m| m.max(duration)));
    }

    /// Records a static cache hit.
    pub fn record_cache_hit(&mut self) {
        self.cache_hits += 1;
    }

    /// Records a static cache miss.
    pub fn record_cache_miss(&mut self) {
        self.cache_misses += 1;
    }

    /// Produces a point-in-time snapshot for the host.
    pub fn snapshot(&self, active_connections: usize) -> MetricsSnapshot {
        let uptime = self.started_at.elapsed();
        let uptime_seconds = uptime.as_secs_f64();
        let cache_total = self.cache_hits + self.cache_misses;
        let avg_ms = if self.total_requests > 0 {
            self.total_duration.as_secs_f64() * 1000.0 / self.total_requests as f64
        } else {
            0.0
        };

        MetricsSnapshot {
            uptime_seconds,
            total_requests: self.total_requests,
            successful_requests: self.successful_requests,
            failed_requests: self.failed_requests,
            active_connections,
            total_connections: self.total_connections,
            closed_connections: self.closed_connections,
            timed_out_connections: self.timed_out_connections,
            cache_hits: self.cache_hits,
            cache_misses: self.cache_misses,
            cache_hit_rate: if cache_total > 0 {
                self.cache_hits as f64 / cache_total as f64 * 100.0
            } else {
                0.0
            },
            avg_request_duration_ms: avg_ms,
            min_request_duration_ms: self.min_duration.map(|d| d.as_secs_f64() * 1000.0).unwrap_or(0.0),
            max_request_duration_ms: self.max_duration.map(|d| d.as_secs_f64() * 1000.0).unwrap_or(0.0),
            requests_per_second: if uptime_seconds > 0.0 {
                self.total_requests as f64 / uptime_seconds
            } else {
                0.0
            },
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn classifies_success_and_failure_by_400() {
        let mut m = Metrics::new();
        m.record_request(200, Duration::from_millis(1));
        m.record_request(404, Duration::from_millis(1));
        let snap = m.snapshot(0);
        assert_eq!(snap.successful_requests, 1);
        assert_eq!(snap.failed_requests, 1);
    }

    #[test]
    fn computes_cache_hit_rate() {
        let mut m = Metrics::new();
        m.record_cache_hit();
        m.record_cache_hit();
        m.record_cache_miss();
        let snap = m.snapshot(0);
        assert!((snap.cache_hit_rate - 66.666).abs() < 0.01);
    }
}
