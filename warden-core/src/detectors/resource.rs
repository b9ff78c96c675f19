//! Resource-access detector.
//!
//! File and memory access events carry a descriptor (`path`, `target` or
//! `descriptor` param). Descriptors are matched against the configured
//! suspicious patterns: any match in the snapshot is `medium`, and
//! `repeat_threshold` matches inside `window_secs` is `high`.

use chrono::Duration;
use regex::RegexSet;

use super::{AuditContext, Detector};
use crate::config::PolicyConfig;
use crate::error::DetectorError;
use crate::types::{ActionEvent, DetectionResult, DetectorId, RiskLevel};

const DESCRIPTOR_KEYS: &[&str] = &["path", "target", "descriptor"];

pub struct ResourceAccessDetector;

impl ResourceAccessDetector {
    fn descriptor(event: &ActionEvent) -> Option<&str> {
        DESCRIPTOR_KEYS.iter().find_map(|k| event.param_str(k))
    }
}

impl Detector for ResourceAccessDetector {
    fn id(&self) -> DetectorId {
        DetectorId::ResourceAccess
    }

    fn enabled(&self, policy: &PolicyConfig) -> bool {
        policy.detection_surfaces.resource_access.enabled
    }

    fn evaluate(&self, ctx: &AuditContext<'_>) -> Result<DetectionResult, DetectorError> {
        let surface = &ctx.policy.detection_surfaces.resource_access;
        if surface.suspicious_patterns.is_empty() {
            return Ok(DetectionResult::clear(self.id(), ctx.now));
        }
        let patterns =
            RegexSet::new(&surface.suspicious_patterns).map_err(|e| DetectorError::InvalidPattern {
                pattern: surface.suspicious_patterns.join(" | "),
                reason: e.to_string(),
            })?;

        let window = Duration::seconds(surface.window_secs as i64);
        let reference = ctx.event_now();
        let mut matched = 0usize;
        let mut recent = 0usize;
        let mut evidence = Vec::new();

        for event in ctx.history.events() {
            if !surface.access_kinds.iter().any(|k| *k == event.kind) {
                continue;
            }
            let Some(descriptor) = Self::descriptor(event) else {
                continue;
            };
            let hits: Vec<usize> = patterns.matches(descriptor).into_iter().collect();
            if hits.is_empty() {
                continue;
            }
            matched += 1;
            if reference - event.timestamp <= window {
                recent += 1;
            }
            evidence.push(format!(
                "{} `{}` matches `{}`",
                event.kind, descriptor, surface.suspicious_patterns[hits[0]]
            ));
        }

        let risk = if matched == 0 {
            RiskLevel::None
        } else if recent >= surface.repeat_threshold.max(1) {
            RiskLevel::High
        } else {
            RiskLevel::Medium
        };

        Ok(DetectionResult::new(self.id(), risk, evidence, ctx.now))
    }
}
