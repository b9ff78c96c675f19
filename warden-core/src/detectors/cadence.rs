//! Macro-cadence and input-timing detectors.
//!
//! Both reuse the inline monitor's variation statistic over a much longer
//! window and grade it instead of flagging it.

use super::{AuditContext, Detector};
use crate::config::{CadenceSurface, PolicyConfig};
use crate::error::DetectorError;
use crate::stats;
use crate::types::{DetectionResult, DetectorId, RiskLevel};

/// Grade a coefficient of variation against `threshold`.
///
/// `low` at or above 1.5x the threshold, `medium` between the threshold and
/// 1.5x, `high` below it.
pub fn grade_variation(cv: f64, threshold: f64) -> RiskLevel {
    if cv >= threshold * 1.5 {
        RiskLevel::Low
    } else if cv >= threshold {
        RiskLevel::Medium
    } else {
        RiskLevel::High
    }
}

/// Regularity of the gaps between consecutive actions.
pub struct InputTimingDetector;

impl Detector for InputTimingDetector {
    fn id(&self) -> DetectorId {
        DetectorId::InputTiming
    }

    fn enabled(&self, policy: &PolicyConfig) -> bool {
        policy.detection_surfaces.input_timing.enabled
    }

    fn evaluate(&self, ctx: &AuditContext<'_>) -> Result<DetectionResult, DetectorError> {
        let surface = &ctx.policy.detection_surfaces.input_timing;
        let events = ctx.history.last(surface.window);
        let deltas = stats::inter_event_deltas_ms(events);
        if deltas.len() < surface.min_samples.max(2) {
            return Ok(DetectionResult::clear(self.id(), ctx.now));
        }

        let resolution = ctx.policy.anti_patterns.timing_resolution_ms;
        if stats::rounded_cardinality(&deltas, resolution) == 1 {
            return Ok(DetectionResult::new(
                self.id(),
                RiskLevel::Critical,
                vec![format!(
                    "all {} inter-action delays identical at {:.0}ms",
                    deltas.len(),
                    deltas[0]
                )],
                ctx.now,
            ));
        }

        Ok(graded(self.id(), &deltas, surface, "inter-action delay", ctx))
    }
}

/// Regularity of how often each action kind recurs.
pub struct MacroCadenceDetector;

impl Detector for MacroCadenceDetector {
    fn id(&self) -> DetectorId {
        DetectorId::MacroCadence
    }

    fn enabled(&self, policy: &PolicyConfig) -> bool {
        policy.detection_surfaces.macro_cadence.enabled
    }

    fn evaluate(&self, ctx: &AuditContext<'_>) -> Result<DetectionResult, DetectorError> {
        let surface = &ctx.policy.detection_surfaces.macro_cadence;
        let events = ctx.history.last(surface.window);
        let intervals = stats::recurrence_intervals_ms(events);

        let mut result = if intervals.len() < surface.min_samples.max(2) {
            DetectionResult::clear(self.id(), ctx.now)
        } else {
            graded(self.id(), &intervals, surface, "recurrence interval", ctx)
        };

        let max_run = ctx.policy.anti_patterns.max_consecutive_identical;
        if let Some((kind, run)) = stats::longest_identical_run(events)
            && run > max_run
        {
            result.risk_score = result.risk_score.max(RiskLevel::High);
            result
                .evidence
                .push(format!("`{}` repeated {} times in a row", kind, run));
        }

        Ok(result)
    }
}

fn graded(
    id: DetectorId,
    samples: &[f64],
    surface: &CadenceSurface,
    what: &str,
    ctx: &AuditContext<'_>,
) -> DetectionResult {
    match stats::coefficient_of_variation(samples) {
        Some(cv) => DetectionResult::new(
            id,
            grade_variation(cv, surface.min_variance),
            vec![format!(
                "{} variation {:.3} over {} samples (threshold {:.3})",
                what,
                cv,
                samples.len(),
                surface.min_variance
            )],
            ctx.now,
        ),
        None => DetectionResult::clear(id, ctx.now),
    }
}
