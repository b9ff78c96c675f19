use super::{AuditContext, Detector};
use crate::config::PolicyConfig;
use crate::error::DetectorError;
use crate::types::{DetectionResult, DetectorId, RiskLevel};

/// Session length against the configured cap.
pub struct SessionLengthDetector;

impl Detector for SessionLengthDetector {
    fn id(&self) -> DetectorId {
        DetectorId::SessionLength
    }

    fn enabled(&self, policy: &PolicyConfig) -> bool {
        policy.detection_surfaces.session_length.enabled
    }

    fn evaluate(&self, ctx: &AuditContext<'_>) -> Result<DetectionResult, DetectorError> {
        let session = ctx.session;
        let fraction = ctx.policy.detection_surfaces.session_length.warning_fraction;
        let hours = session.elapsed_hours();

        let (risk, evidence) = if session.cap_exceeded() {
            (
                RiskLevel::Critical,
                vec![format!(
                    "session at {:.2}h exceeds the {:.2}h cap",
                    hours, session.cap_hours
                )],
            )
        } else if hours >= session.cap_hours * fraction {
            (
                RiskLevel::High,
                vec![format!(
                    "session at {:.2}h is within {:.0}% of the {:.2}h cap",
                    hours,
                    (1.0 - fraction) * 100.0,
                    session.cap_hours
                )],
            )
        } else {
            (RiskLevel::None, Vec::new())
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

    fn risk_at(elapsed: Duration) -> RiskLevel {
        let policy = PolicyConfig::default();
        let snapshot = HistorySnapshot::from_events(vec![], 0);
        let session = session_at(elapsed);
        let environment = Environment::default();
        let ctx = AuditContext {
            history: &snapshot,
            session: &session,
            environment: &environment,
            network_requests: 0,
            policy: &policy,
            now: t0(),
        };
        SessionLengthDetector.evaluate(&ctx).unwrap().risk_score
    }

    #[test]
    fn test_grades_against_four_hour_cap() {
        assert_eq!(risk_at(Duration::hours(2)), RiskLevel::None);
        assert_eq!(risk_at(Duration::minutes(215)), RiskLevel::None);
        assert_eq!(risk_at(Duration::minutes(217)), RiskLevel::High);
        assert_eq!(risk_at(Duration::minutes(239)), RiskLevel::High);
        assert_eq!(risk_at(Duration::hours(4)), RiskLevel::Critical);
    }
}
