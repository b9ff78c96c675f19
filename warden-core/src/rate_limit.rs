//! Sliding-window request counter.
//!
//! Feeds the network-cadence detector and caps outgoing alert volume.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};

#[derive(Debug)]
struct LimiterInner {
    cap: u32,
    hits: VecDeque<DateTime<Utc>>,
}

impl LimiterInner {
    fn prune(&mut self, now: DateTime<Utc>, window: Duration) {
        while let Some(&ts) = self.hits.front() {
            if now - ts >= window {
                self.hits.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Counts hits inside a sliding window and reports whether a cap is reached.
#[derive(Debug)]
pub struct RateLimiter {
    window: Duration,
    inner: Mutex<LimiterInner>,
}

impl RateLimiter {
    pub fn new(cap: u32, window: Duration) -> Self {
        Self {
            window,
            inner: Mutex::new(LimiterInner {
                cap,
                hits: VecDeque::new(),
            }),
        }
    }

    /// A limiter over a one-minute window.
    pub fn per_minute(cap: u32) -> Self {
        Self::new(cap, Duration::minutes(1))
    }

    /// Record a hit unconditionally.
    pub fn record_at(&self, at: DateTime<Utc>) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.prune(at, self.window);
        inner.hits.push_back(at);
    }

    /// `false` once the cap has been reached within the window.
    pub fn check_at(&self, now: DateTime<Utc>) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.prune(now, self.window);
        inner.hits.len() < inner.cap as usize
    }

    /// Record a hit only if the cap has not been reached; returns whether it was.
    pub fn try_acquire_at(&self, now: DateTime<Utc>) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.prune(now, self.window);
        if inner.hits.len() < inner.cap as usize {
            inner.hits.push_back(now);
            true
        } else {
            false
        }
    }

    /// Hits inside the window ending at `now`.
    pub fn count_at(&self, now: DateTime<Utc>) -> usize {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.prune(now, self.window);
        inner.hits.len()
    }

    pub fn cap(&self) -> u32 {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).cap
    }

    pub fn set_cap(&self, cap: u32) {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).cap = cap;
    }

    pub fn clear(&self) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .hits
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_check_false_at_cap() {
        let limiter = RateLimiter::per_minute(3);
        for i in 0..3 {
            assert!(limiter.check_at(t0() + Duration::seconds(i)));
            limiter.record_at(t0() + Duration::seconds(i));
        }
        assert!(!limiter.check_at(t0() + Duration::seconds(10)));
    }

    #[test]
    fn test_window_slides() {
        let limiter = RateLimiter::per_minute(2);
        limiter.record_at(t0());
        limiter.record_at(t0() + Duration::seconds(30));
        assert!(!limiter.check_at(t0() + Duration::seconds(59)));
        // first hit ages out at exactly one minute
        assert!(limiter.check_at(t0() + Duration::seconds(60)));
        assert_eq!(limiter.count_at(t0() + Duration::seconds(60)), 1);
    }

    #[test]
    fn test_try_acquire() {
        let limiter = RateLimiter::per_minute(2);
        assert!(limiter.try_acquire_at(t0()));
        assert!(limiter.try_acquire_at(t0()));
        assert!(!limiter.try_acquire_at(t0()));
        assert_eq!(limiter.count_at(t0()), 2);
    }

    #[test]
    fn test_record_beyond_cap_is_counted() {
        let limiter = RateLimiter::per_minute(2);
        for _ in 0..5 {
            limiter.record_at(t0());
        }
        assert_eq!(limiter.count_at(t0()), 5);
    }

    #[test]
    fn test_set_cap_and_clear() {
        let limiter = RateLimiter::per_minute(1);
        limiter.record_at(t0());
        assert!(!limiter.check_at(t0()));
        limiter.set_cap(5);
        assert!(limiter.check_at(t0()));
        limiter.clear();
        assert_eq!(limiter.count_at(t0()), 0);
    }
}
