use super::{AuditContext, Detector};
use crate::config::PolicyConfig;
use crate::error::DetectorError;
use crate::types::{DetectionResult, DetectorId, RiskLevel};

/// Outbound request rate over the last minute.
///
/// The count comes from the engine's rate limiter and is captured together
/// with the history snapshot.
pub struct NetworkCadenceDetector;

impl Detector for NetworkCadenceDetector {
    fn id(&self) -> DetectorId {
        DetectorId::NetworkCadence
    }

    fn enabled(&self, policy: &PolicyConfig) -> bool {
        policy.detection_surfaces.network.enabled
    }

    fn evaluate(&self, ctx: &AuditContext<'_>) -> Result<DetectionResult, DetectorError> {
        let surface = &ctx.policy.detection_surfaces.network;
        let count = ctx.network_requests;

        let risk = if count > surface.hard_rate_per_minute as usize {
            RiskLevel::High
        } else if count > surface.soft_rate_per_minute as usize {
            RiskLevel::Medium
        } else {
            RiskLevel::None
        };
        let evidence = if risk > RiskLevel::None {
            vec![format!(
                "{} requests in the last minute (soft {}, hard {})",
                count, surface.soft_rate_per_minute, surface.hard_rate_per_minute
            )]
        } else {
            Vec::new()
        };

        Ok(DetectionResult::new(self.id(), risk, evidence, ctx.now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::Environment;
    use crate::detectors::test_support::{session_at, t0};
    use crate::history::HistorySnapshot;
    use chrono::Duration;

    fn risk_for(count: usize) -> RiskLevel {
        let policy = PolicyConfig::default();
        let snapshot = HistorySnapshot::from_events(vec![], 0);
        let session = session_at(Duration::minutes(1));
        let environment = Environment::default();
        let ctx = AuditContext {
            history: &snapshot,
            session: &session,
            environment: &environment,
            network_requests: count,
            policy: &policy,
            now: t0(),
        };
        NetworkCadenceDetector.evaluate(&ctx).unwrap().risk_score
    }

    #[test]
    fn test_soft_and_hard_rates() {
        assert_eq!(risk_for(0), RiskLevel::None);
        assert_eq!(risk_for(40), RiskLevel::None);
        assert_eq!(risk_for(41), RiskLevel::Medium);
        assert_eq!(risk_for(80), RiskLevel::Medium);
        assert_eq!(risk_for(81), RiskLevel::High);
    }
}
