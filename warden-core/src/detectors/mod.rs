//! Scheduled detectors, one per detection surface.
//!
//! Every detector is evaluated against the same [`AuditContext`], built once
//! per audit from a single history snapshot. A detector that returns an error
//! or panics yields an errored result that contributes no signal.

mod cadence;
mod identity;
mod network;
mod resource;
mod session;

use std::panic::{AssertUnwindSafe, catch_unwind};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

pub use cadence::{InputTimingDetector, MacroCadenceDetector, grade_variation};
pub use identity::{Environment, IdentityDetector};
pub use network::NetworkCadenceDetector;
pub use resource::ResourceAccessDetector;
pub use session::SessionLengthDetector;

use crate::config::PolicyConfig;
use crate::error::DetectorError;
use crate::history::HistorySnapshot;
use crate::session::SessionState;
use crate::types::{DetectionResult, DetectorId};

/// Everything a detector may read during one audit.
#[derive(Debug, Clone, Copy)]
pub struct AuditContext<'a> {
    pub history: &'a HistorySnapshot,
    pub session: &'a SessionState,
    pub environment: &'a Environment,
    /// Outbound requests counted by the rate limiter in the last minute.
    pub network_requests: usize,
    pub policy: &'a PolicyConfig,
    pub now: DateTime<Utc>,
}

impl AuditContext<'_> {
    /// The newest event's timestamp, or `now` for an empty history.
    ///
    /// Windows over event timestamps are measured against this, so a
    /// replayed stream is judged in its own clock.
    pub fn event_now(&self) -> DateTime<Utc> {
        self.history.latest_timestamp().unwrap_or(self.now)
    }
}

/// A scheduled check over one detection surface.
pub trait Detector: Send + Sync {
    fn id(&self) -> DetectorId;

    fn enabled(&self, policy: &PolicyConfig) -> bool;

    fn evaluate(&self, ctx: &AuditContext<'_>) -> Result<DetectionResult, DetectorError>;
}

/// The six built-in detectors.
pub fn default_detectors() -> Vec<Box<dyn Detector>> {
    vec![
        Box::new(IdentityDetector),
        Box::new(MacroCadenceDetector),
        Box::new(InputTimingDetector),
        Box::new(SessionLengthDetector),
        Box::new(NetworkCadenceDetector),
        Box::new(ResourceAccessDetector),
    ]
}

/// Evaluate every enabled detector, isolating failures.
pub fn run_detectors(detectors: &[Box<dyn Detector>], ctx: &AuditContext<'_>) -> Vec<DetectionResult> {
    detectors
        .iter()
        .filter(|d| d.enabled(ctx.policy))
        .map(|detector| {
            let id = detector.id();
            let outcome = catch_unwind(AssertUnwindSafe(|| detector.evaluate(ctx)))
                .unwrap_or_else(|payload| Err(DetectorError::Panicked(panic_message(payload))));
            match outcome {
                Ok(result) => {
                    debug!(detector = %id, risk = %result.risk_score, "detector evaluated");
                    result
                }
                Err(e) => {
                    warn!(detector = %id, error = %e, "detector failed; contributing no signal");
                    DetectionResult::errored(id, e.to_string(), ctx.now)
                }
            }
        })
        .collect()
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
