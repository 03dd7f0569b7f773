//! Per-credential request quotas.
//!
//! Two fixed windows are tracked side by side. The second window opens with
//! the first request recorded after the previous one expired and lasts exactly
//! one second. The hour window is aligned to the wall clock and always ends at
//! the top of the next hour.
//!
//! Availability is checked before a request is counted, so a caller that sees
//! [`RateLimiter::is_available`] return `true` may record exactly one request
//! without overshooting either limit.

use chrono::{DateTime, DurationRound, TimeDelta, Utc};

/// Effective window counts at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateUsage {
    /// Requests counted in the current second window.
    pub second: u32,
    /// Requests counted in the current hour window.
    pub hour: u32,
}

/// Sliding second/hour window counter for one credential.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    limit_per_second: u32,
    limit_per_hour: u32,
    second_count: u32,
    second_reset_at: DateTime<Utc>,
    hour_count: u32,
    hour_reset_at: DateTime<Utc>,
}

impl RateLimiter {
    /// Create a limiter with both windows already expired.
    pub fn new(limit_per_second: u32, limit_per_hour: u32) -> Self {
        Self {
            limit_per_second,
            limit_per_hour,
            second_count: 0,
            second_reset_at: DateTime::<Utc>::MIN_UTC,
            hour_count: 0,
            hour_reset_at: DateTime::<Utc>::MIN_UTC,
        }
    }

    /// Per-second limit.
    pub fn limit_per_second(&self) -> u32 {
        self.limit_per_second
    }

    /// Per-hour limit.
    pub fn limit_per_hour(&self) -> u32 {
        self.limit_per_hour
    }

    /// Check whether another request may be sent right now.
    pub fn is_available(&self) -> bool {
        self.is_available_at(Utc::now())
    }

    /// Check whether another request may be sent at `now`.
    pub fn is_available_at(&self, now: DateTime<Utc>) -> bool {
        let hour_full = self.hour_count >= self.limit_per_hour && now < self.hour_reset_at;
        let second_full = self.second_count >= self.limit_per_second && now < self.second_reset_at;

        !(hour_full || second_full)
    }

    /// Count one request sent right now.
    pub fn record_request(&mut self) {
        self.record_request_at(Utc::now());
    }

    /// Count one request sent at `now`, rolling over expired windows first.
    pub fn record_request_at(&mut self, now: DateTime<Utc>) {
        if now >= self.hour_reset_at {
            self.hour_reset_at = next_hour_boundary(now);
            self.hour_count = 0;
        }

        if now >= self.second_reset_at {
            self.second_reset_at = now + TimeDelta::seconds(1);
            self.second_count = 0;
        }

        self.second_count += 1;
        self.hour_count += 1;
    }

    /// Window counts as they would be seen at `now`; expired windows read as zero.
    pub fn usage_at(&self, now: DateTime<Utc>) -> RateUsage {
        RateUsage {
            second: if now >= self.second_reset_at {
                0
            } else {
                self.second_count
            },
            hour: if now >= self.hour_reset_at {
                0
            } else {
                self.hour_count
            },
        }
    }

    /// Earliest instant at which a saturated limiter frees up, if it is saturated at `now`.
    pub fn next_available_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.is_available_at(now) {
            return None;
        }

        let hour_full = self.hour_count >= self.limit_per_hour && now < self.hour_reset_at;
        if hour_full {
            Some(self.hour_reset_at.max(self.second_reset_at))
        } else {
            Some(self.second_reset_at)
        }
    }
}

/// Top of the clock hour following `now`.
fn next_hour_boundary(now: DateTime<Utc>) -> DateTime<Utc> {
    let hour = TimeDelta::hours(1);
    match now.duration_trunc(hour) {
        Ok(start) => start + hour,
        // Truncation only fails near the representable range.
        Err(_) => now + hour,
    }
}
