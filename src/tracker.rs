//! Statistics tracking for dispatch runs.
//!
//! Counts attempts rather than requests: a request that succeeds on its third
//! try contributes three attempts, two failed attempts and two retries.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Statistics tracker shared by every dispatch of one dispatcher.
#[derive(Debug)]
pub struct StatsTracker {
    /// Start time of tracking.
    start_time: Instant,
    /// Attempts started.
    attempts: AtomicU64,
    /// Requests that ended in success.
    success_count: AtomicU64,
    /// Attempts that ended in failure.
    failed_attempts: AtomicU64,
    /// Attempts that were scheduled again.
    retries: AtomicU64,
    /// Requests aborted without a final attempt.
    aborted: AtomicU64,
    /// Total latency of successful attempts in microseconds.
    total_latency_us: AtomicU64,
    /// Attempts started in the last second (for RPS calculation).
    recent_attempts: Mutex<VecDeque<Instant>>,
    /// Requests handed to the dispatch loop.
    total_requests: AtomicUsize,
}

impl StatsTracker {
    /// Create a new statistics tracker.
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            attempts: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            failed_attempts: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            aborted: AtomicU64::new(0),
            total_latency_us: AtomicU64::new(0),
            recent_attempts: Mutex::new(VecDeque::new()),
            total_requests: AtomicUsize::new(0),
        }
    }

    /// Add requests drained from the pending pool.
    pub fn add_requests(&self, count: usize) {
        self.total_requests.fetch_add(count, Ordering::Relaxed);
    }

    /// Record that an attempt was started.
    pub fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);

        let now = Instant::now();
        let mut recent = self.recent_attempts.lock();
        recent.push_back(now);
        prune(&mut recent, now);
    }

    /// Record a successful attempt.
    pub fn record_success(&self, latency: Duration) {
        self.success_count.fetch_add(1, Ordering::Relaxed);
        self.total_latency_us.fetch_add(
            u64::try_from(latency.as_micros()).unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );
    }

    /// Record a failed attempt.
    pub fn record_failure(&self) {
        self.failed_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record that a failed request was scheduled again.
    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Record requests that were aborted.
    pub fn record_aborted(&self, count: usize) {
        self.aborted.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Attempts started during the last second.
    pub fn requests_per_second(&self) -> f64 {
        let mut recent = self.recent_attempts.lock();
        prune(&mut recent, Instant::now());
        recent.len() as f64
    }

    /// Get the current statistics snapshot.
    pub fn snapshot(&self) -> StatsSnapshot {
        let elapsed = self.start_time.elapsed();
        let attempts = self.attempts.load(Ordering::Relaxed);
        let success = self.success_count.load(Ordering::Relaxed);
        let total_latency = self.total_latency_us.load(Ordering::Relaxed);

        let avg_latency_ms = if success > 0 {
            (total_latency as f64 / success as f64) / 1000.0
        } else {
            0.0
        };

        let overall_rps = if elapsed.as_secs_f64() > 0.0 {
            attempts as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        StatsSnapshot {
            elapsed,
            total_requests: self.total_requests.load(Ordering::Relaxed),
            attempts,
            success_count: success,
            failed_attempts: self.failed_attempts.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            aborted: self.aborted.load(Ordering::Relaxed),
            avg_latency_ms,
            current_rps: self.requests_per_second(),
            overall_rps,
        }
    }
}

impl Default for StatsTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn prune(recent: &mut VecDeque<Instant>, now: Instant) {
    let Some(cutoff) = now.checked_sub(Duration::from_secs(1)) else {
        return;
    };
    while recent.front().is_some_and(|front| *front < cutoff) {
        recent.pop_front();
    }
}

/// A snapshot of current statistics.
#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    /// Elapsed time since the tracker was created.
    pub elapsed: Duration,
    /// Requests handed to the dispatch loop.
    pub total_requests: usize,
    /// Attempts started.
    pub attempts: u64,
    /// Requests that succeeded.
    pub success_count: u64,
    /// Attempts that failed.
    pub failed_attempts: u64,
    /// Failed attempts that were scheduled again.
    pub retries: u64,
    /// Requests aborted.
    pub aborted: u64,
    /// Average latency of successful attempts in milliseconds.
    pub avg_latency_ms: f64,
    /// Attempts started in the last second.
    pub current_rps: f64,
    /// Attempts per second since start.
    pub overall_rps: f64,
}

impl StatsSnapshot {
    /// Share of requests that succeeded, as a percentage.
    pub fn success_rate(&self) -> f64 {
        if self.total_requests > 0 {
            (self.success_count as f64 / self.total_requests as f64) * 100.0
        } else {
            100.0
        }
    }

    /// Format as a human-readable summary.
    pub fn summary(&self) -> String {
        format!(
            "Requests: {} | Success: {} | Attempts: {} | Retries: {} | Aborted: {} | Avg Latency: {:.1}ms | RPS: {:.1}",
            self.total_requests,
            self.success_count,
            self.attempts,
            self.retries,
            self.aborted,
            self.avg_latency_ms,
            self.overall_rps
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_tracking() {
        let tracker = StatsTracker::new();
        tracker.add_requests(2);

        tracker.record_attempt();
        tracker.record_failure();
        tracker.record_retry();
        tracker.record_attempt();
        tracker.record_success(Duration::from_millis(50));
        tracker.record_attempt();
        tracker.record_success(Duration::from_millis(100));

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.total_requests, 2);
        assert_eq!(snapshot.attempts, 3);
        assert_eq!(snapshot.success_count, 2);
        assert_eq!(snapshot.failed_attempts, 1);
        assert_eq!(snapshot.retries, 1);
        assert_eq!(snapshot.avg_latency_ms, 75.0);
        assert_eq!(snapshot.current_rps, 3.0);
    }

    #[test]
    fn test_success_rate() {
        let tracker = StatsTracker::new();
        tracker.add_requests(10);

        for _ in 0..8 {
            tracker.record_success(Duration::from_millis(10));
        }
        tracker.record_aborted(2);

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.success_rate(), 80.0);
        assert_eq!(snapshot.aborted, 2);
        assert!(snapshot.summary().contains("Aborted: 2"));
    }
}
