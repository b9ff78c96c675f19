//! Inline anti-pattern monitor.
//!
//! Runs synchronously inside `record()` on the trailing events of the
//! history. Two checks:
//!
//! - **Repetition**: the last `max_consecutive_identical + 1` events all share
//!   one kind.
//! - **Timing**: the last `max_identical_timing + 1` deltas round to a single
//!   value ("perfect timing"), or the coefficient of variation over the last
//!   `variance_window` deltas is below `min_variance`.
//!
//! The monitor holds no state of its own; every verdict is a pure function of
//! the events it is handed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::AntiPatternPolicy;
use crate::stats;
use crate::types::{ActionEvent, DetectionResult, DetectorId, RiskLevel};

/// One anti-pattern finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PatternFlag {
    Repetition { kind: String, count: usize },
    PerfectTiming { delta_ms: f64, count: usize },
    LowVariance { cv: f64, threshold: f64, samples: usize },
}

impl PatternFlag {
    pub fn risk(&self) -> RiskLevel {
        match self {
            Self::Repetition { .. } | Self::LowVariance { .. } => RiskLevel::Medium,
            Self::PerfectTiming { .. } => RiskLevel::High,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Repetition { kind, count } => {
                format!("{} consecutive `{}` actions", count, kind)
            }
            Self::PerfectTiming { delta_ms, count } => {
                format!("{} identical inter-action delays of {:.0}ms", count, delta_ms)
            }
            Self::LowVariance {
                cv,
                threshold,
                samples,
            } => format!(
                "timing variation {:.3} below {:.3} over {} delays",
                cv, threshold, samples
            ),
        }
    }
}

/// Outcome of one inline check.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorVerdict {
    pub flags: Vec<PatternFlag>,
    pub result: DetectionResult,
}

impl MonitorVerdict {
    pub fn is_flagged(&self) -> bool {
        !self.flags.is_empty()
    }

    pub fn risk(&self) -> RiskLevel {
        self.result.risk_score
    }
}

/// Stateless per-event checker.
#[derive(Debug, Clone, Copy, Default)]
pub struct AntiPatternMonitor;

impl AntiPatternMonitor {
    pub fn new() -> Self {
        Self
    }

    /// Number of trailing events the checks need to see.
    pub fn window(policy: &AntiPatternPolicy) -> usize {
        (policy.max_consecutive_identical + 1)
            .max(policy.max_identical_timing + 2)
            .max(policy.variance_window + 1)
    }

    /// Run both checks over `events` (oldest first).
    pub fn check(
        &self,
        events: &[ActionEvent],
        policy: &AntiPatternPolicy,
        now: DateTime<Utc>,
    ) -> MonitorVerdict {
        let mut flags = Vec::new();
        if policy.enabled {
            if let Some(flag) = Self::repetition(events, policy) {
                flags.push(flag);
            }
            flags.extend(Self::timing(events, policy));
        }

        let risk = flags
            .iter()
            .map(PatternFlag::risk)
            .max()
            .unwrap_or(RiskLevel::None);
        let evidence = flags.iter().map(PatternFlag::describe).collect();

        MonitorVerdict {
            flags,
            result: DetectionResult::new(DetectorId::AntiPattern, risk, evidence, now),
        }
    }

    fn repetition(events: &[ActionEvent], policy: &AntiPatternPolicy) -> Option<PatternFlag> {
        let needed = policy.max_consecutive_identical + 1;
        let run = stats::trailing_identical_run(events);
        if run >= needed {
            let kind = events.last().map(|e| e.kind.clone()).unwrap_or_default();
            Some(PatternFlag::Repetition { kind, count: run })
        } else {
            None
        }
    }

    fn timing(events: &[ActionEvent], policy: &AntiPatternPolicy) -> Vec<PatternFlag> {
        let mut flags = Vec::new();
        let deltas = stats::inter_event_deltas_ms(events);

        let needed = policy.max_identical_timing + 1;
        if deltas.len() >= needed {
            let recent = &deltas[deltas.len() - needed..];
            if stats::rounded_cardinality(recent, policy.timing_resolution_ms) == 1 {
                flags.push(PatternFlag::PerfectTiming {
                    delta_ms: recent[recent.len() - 1],
                    count: needed,
                });
            }
        }

        let window = policy.variance_window.min(deltas.len());
        if window >= needed {
            let recent = &deltas[deltas.len() - window..];
            if let Some(cv) = stats::coefficient_of_variation(recent)
                && cv < policy.min_variance
            {
                flags.push(PatternFlag::LowVariance {
                    cv,
                    threshold: policy.min_variance,
                    samples: window,
                });
            }
        }

        flags
    }
}
