//! Bounded, shared ring buffer of recent action events.
//!
//! The host agent is the single writer; detectors read through
//! [`HistorySnapshot`], an immutable copy taken under the read lock, so an
//! evaluation never observes a history that changed part-way through.

use std::collections::VecDeque;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};

use crate::types::ActionEvent;

#[derive(Debug)]
struct HistoryInner {
    events: VecDeque<ActionEvent>,
    /// Bumped on every record; identifies the state a snapshot was taken from.
    seq: u64,
}

/// Bounded ring buffer of action events.
#[derive(Debug)]
pub struct ActionHistory {
    capacity: usize,
    inner: RwLock<HistoryInner>,
}

impl ActionHistory {
    /// Create a history holding at most `capacity` events (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            inner: RwLock::new(HistoryInner {
                events: VecDeque::with_capacity(capacity),
                seq: 0,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append an event, evicting the oldest one at capacity.
    ///
    /// Returns the new sequence number.
    pub fn record(&self, event: ActionEvent) -> u64 {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if inner.events.len() >= self.capacity {
            inner.events.pop_front();
        }
        inner.events.push_back(event);
        inner.seq += 1;
        inner.seq
    }

    /// Take an immutable copy of the whole history.
    pub fn snapshot(&self) -> HistorySnapshot {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        HistorySnapshot {
            events: inner.events.iter().cloned().collect(),
            seq: inner.seq,
        }
    }

    /// Copy of the most recent `n` events, oldest first.
    pub fn tail(&self, n: usize) -> HistorySnapshot {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let skip = inner.events.len().saturating_sub(n);
        HistorySnapshot {
            events: inner.events.iter().skip(skip).cloned().collect(),
            seq: inner.seq,
        }
    }

    /// Drop every retained event. The sequence keeps counting.
    pub fn clear(&self) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.events.clear();
        inner.seq += 1;
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .events
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current sequence number.
    pub fn seq(&self) -> u64 {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).seq
    }

    /// Timestamp of the newest retained event, in the host's clock.
    pub fn latest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .events
            .back()
            .map(|e| e.timestamp)
    }
}

/// Immutable view of the history at one sequence number.
#[derive(Debug, Clone, Default)]
pub struct HistorySnapshot {
    events: Arc<[ActionEvent]>,
    seq: u64,
}

impl HistorySnapshot {
    /// Build a snapshot directly from events (used by tests and replays).
    pub fn from_events(events: Vec<ActionEvent>, seq: u64) -> Self {
        Self {
            events: events.into(),
            seq,
        }
    }

    /// Events, oldest first.
    pub fn events(&self) -> &[ActionEvent] {
        &self.events
    }

    /// The trailing `n` events.
    pub fn last(&self, n: usize) -> &[ActionEvent] {
        let skip = self.events.len().saturating_sub(n);
        &self.events[skip..]
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn latest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.events.last().map(|e| e.timestamp)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
