//! Timing and repetition statistics shared by the inline monitor and the
//! scheduled cadence detectors.

use std::collections::{HashMap, HashSet};

use crate::types::ActionEvent;

/// Milliseconds between consecutive events, oldest first.
pub fn inter_event_deltas_ms(events: &[ActionEvent]) -> Vec<f64> {
    events
        .windows(2)
        .map(|pair| (pair[1].timestamp - pair[0].timestamp).num_milliseconds() as f64)
        .collect()
}

/// Milliseconds between successive occurrences of the same kind, in the
/// order the later occurrence appeared.
pub fn recurrence_intervals_ms(events: &[ActionEvent]) -> Vec<f64> {
    let mut last_seen: HashMap<&str, chrono::DateTime<chrono::Utc>> = HashMap::new();
    let mut intervals = Vec::new();
    for event in events {
        if let Some(prev) = last_seen.insert(event.kind.as_str(), event.timestamp) {
            intervals.push((event.timestamp - prev).num_milliseconds() as f64);
        }
    }
    intervals
}

/// Coefficient of variation (population standard deviation over mean).
///
/// `None` for fewer than two samples or a non-positive mean.
pub fn coefficient_of_variation(samples: &[f64]) -> Option<f64> {
    if samples.len() < 2 {
        return None;
    }
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    if mean <= 0.0 {
        return None;
    }
    let variance = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    Some(variance.sqrt() / mean)
}

/// Number of distinct values after rounding to `resolution_ms`.
pub fn rounded_cardinality(deltas: &[f64], resolution_ms: u64) -> usize {
    let resolution = resolution_ms.max(1) as f64;
    deltas
        .iter()
        .map(|d| (d / resolution).round() as i64)
        .collect::<HashSet<_>>()
        .len()
}

/// Length of the run of identical kinds ending at the newest event.
pub fn trailing_identical_run(events: &[ActionEvent]) -> usize {
    let Some(last) = events.last() else {
        return 0;
    };
    events
        .iter()
        .rev()
        .take_while(|e| e.kind == last.kind)
        .count()
}

/// Longest run of identical kinds anywhere in the slice, with its kind.
pub fn longest_identical_run(events: &[ActionEvent]) -> Option<(&str, usize)> {
    let mut best: Option<(&str, usize)> = None;
    let mut current: Option<(&str, usize)> = None;
    for event in events {
        current = match current {
            Some((kind, len)) if kind == event.kind => Some((kind, len + 1)),
            _ => Some((event.kind.as_str(), 1)),
        };
        if let Some(run) = current
            && best.is_none_or(|b| run.1 > b.1)
        {
            best = Some(run);
        }
    }
    best
}
