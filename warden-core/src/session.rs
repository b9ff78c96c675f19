//! Session clock and break scheduling.
//!
//! `SessionManager` exclusively owns the session timing state. Detectors and
//! the enforcement controller only ever see a [`SessionState`] snapshot.

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};

use crate::config::SessionCapsPolicy;

/// Point-in-time view of the session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub start_time: DateTime<Utc>,
    pub elapsed: Duration,
    pub cap_hours: f64,
    /// When the next break is due; `None` when breaks are disabled.
    pub break_due_at: Option<DateTime<Utc>>,
    /// Time the snapshot was taken.
    pub observed_at: DateTime<Utc>,
}

impl SessionState {
    pub fn elapsed_hours(&self) -> f64 {
        self.elapsed.num_milliseconds() as f64 / 3_600_000.0
    }

    pub fn cap_exceeded(&self) -> bool {
        self.elapsed_hours() >= self.cap_hours
    }

    pub fn break_overdue(&self) -> bool {
        self.break_due_at.is_some_and(|due| self.observed_at >= due)
    }
}

#[derive(Debug)]
struct SessionInner {
    start_time: DateTime<Utc>,
    cap_hours: f64,
    break_interval: Option<Duration>,
    break_due_at: Option<DateTime<Utc>>,
}

/// Tracks elapsed session time and break windows.
#[derive(Debug)]
pub struct SessionManager {
    inner: Mutex<SessionInner>,
}

impl SessionManager {
    /// Start a session at `start_time`.
    pub fn new(policy: &SessionCapsPolicy, start_time: DateTime<Utc>) -> Self {
        let break_interval = (policy.break_interval_minutes > 0)
            .then(|| Duration::minutes(i64::from(policy.break_interval_minutes)));
        Self {
            inner: Mutex::new(SessionInner {
                start_time,
                cap_hours: policy.max_session_hours,
                break_interval,
                break_due_at: break_interval.map(|i| start_time + i),
            }),
        }
    }

    /// Snapshot the session as of `now`.
    pub fn snapshot_at(&self, now: DateTime<Utc>) -> SessionState {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        SessionState {
            start_time: inner.start_time,
            elapsed: (now - inner.start_time).max(Duration::zero()),
            cap_hours: inner.cap_hours,
            break_due_at: inner.break_due_at,
            observed_at: now,
        }
    }

    pub fn snapshot(&self) -> SessionState {
        self.snapshot_at(Utc::now())
    }

    /// Acknowledge a break taken at `now`; the next one is due one interval later.
    pub fn take_break_at(&self, now: DateTime<Utc>) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.break_due_at = inner.break_interval.map(|i| now + i);
    }

    /// Begin a fresh session at `now`.
    pub fn restart_at(&self, now: DateTime<Utc>) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.start_time = now;
        inner.break_due_at = inner.break_interval.map(|i| now + i);
    }

    /// Apply new caps from a reloaded policy without restarting the clock.
    pub fn apply_policy(&self, policy: &SessionCapsPolicy) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.cap_hours = policy.max_session_hours;
        let interval = (policy.break_interval_minutes > 0)
            .then(|| Duration::minutes(i64::from(policy.break_interval_minutes)));
        if interval != inner.break_interval {
            let anchor = inner.break_due_at.zip(inner.break_interval).map(|(due, old)| due - old);
            inner.break_due_at = interval.map(|i| anchor.unwrap_or(inner.start_time) + i);
            inner.break_interval = interval;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap()
    }

    #[test]
    fn test_snapshot_elapsed() {
        let manager = SessionManager::new(&SessionCapsPolicy::default(), start());
        let snap = manager.snapshot_at(start() + Duration::minutes(90));
        assert_eq!(snap.elapsed, Duration::minutes(90));
        assert!((snap.elapsed_hours() - 1.5).abs() < 1e-9);
        assert!(!snap.cap_exceeded());
    }

    #[test]
    fn test_cap_exceeded() {
        let manager = SessionManager::new(&SessionCapsPolicy::default(), start());
        let snap = manager.snapshot_at(start() + Duration::hours(4));
        assert!(snap.cap_exceeded());
    }

    #[test]
    fn test_break_schedule() {
        let manager = SessionManager::new(&SessionCapsPolicy::default(), start());
        assert!(!manager.snapshot_at(start() + Duration::minutes(89)).break_overdue());
        assert!(manager.snapshot_at(start() + Duration::minutes(90)).break_overdue());

        manager.take_break_at(start() + Duration::minutes(100));
        let snap = manager.snapshot_at(start() + Duration::minutes(120));
        assert!(!snap.break_overdue());
        assert_eq!(snap.break_due_at, Some(start() + Duration::minutes(190)));
    }

    #[test]
    fn test_breaks_disabled() {
        let policy = SessionCapsPolicy {
            break_interval_minutes: 0,
            ..Default::default()
        };
        let manager = SessionManager::new(&policy, start());
        let snap = manager.snapshot_at(start() + Duration::hours(3));
        assert_eq!(snap.break_due_at, None);
        assert!(!snap.break_overdue());
    }

    #[test]
    fn test_clock_skew_clamps_to_zero() {
        let manager = SessionManager::new(&SessionCapsPolicy::default(), start());
        let snap = manager.snapshot_at(start() - Duration::minutes(5));
        assert_eq!(snap.elapsed, Duration::zero());
    }

    #[test]
    fn test_apply_policy_keeps_clock() {
        let manager = SessionManager::new(&SessionCapsPolicy::default(), start());
        manager.apply_policy(&SessionCapsPolicy {
            max_session_hours: 1.0,
            break_interval_minutes: 30,
            break_duration_minutes: 5,
        });
        let snap = manager.snapshot_at(start() + Duration::minutes(61));
        assert_eq!(snap.start_time, start());
        assert!(snap.cap_exceeded());
        assert_eq!(snap.break_due_at, Some(start() + Duration::minutes(30)));
    }
}
