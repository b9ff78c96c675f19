//! Identity detector: process and window labels against deny/allow lists.

use serde::{Deserialize, Serialize};

use super::{AuditContext, Detector};
use crate::config::PolicyConfig;
use crate::error::DetectorError;
use crate::types::{DetectionResult, DetectorId, RiskLevel};

/// Process and window labels the host last reported.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub processes: Vec<String>,
    pub windows: Vec<String>,
}

impl Environment {
    pub fn new(processes: Vec<String>, windows: Vec<String>) -> Self {
        Self { processes, windows }
    }
}

pub struct IdentityDetector;

impl IdentityDetector {
    fn labels<'a>(ctx: &'a AuditContext<'_>) -> Vec<&'a str> {
        let mut labels: Vec<&str> = ctx
            .environment
            .processes
            .iter()
            .chain(ctx.environment.windows.iter())
            .map(String::as_str)
            .collect();
        for event in ctx.history.events() {
            labels.extend(["process", "window"].iter().filter_map(|k| event.param_str(k)));
        }
        labels.sort_unstable();
        labels.dedup();
        labels
    }
}

fn matches_any(label: &str, needles: &[String]) -> Option<String> {
    let haystack = label.to_lowercase();
    needles
        .iter()
        .find(|n| !n.is_empty() && haystack.contains(&n.to_lowercase()))
        .cloned()
}

impl Detector for IdentityDetector {
    fn id(&self) -> DetectorId {
        DetectorId::Identity
    }

    fn enabled(&self, policy: &PolicyConfig) -> bool {
        policy.detection_surfaces.identity.enabled
    }

    fn evaluate(&self, ctx: &AuditContext<'_>) -> Result<DetectionResult, DetectorError> {
        let surface = &ctx.policy.detection_surfaces.identity;
        let mut risk = RiskLevel::None;
        let mut evidence = Vec::new();

        for label in Self::labels(ctx) {
            if let Some(hit) = matches_any(label, &surface.deny_list) {
                risk = RiskLevel::Critical;
                evidence.push(format!("`{}` matches deny-list entry `{}`", label, hit));
            } else if !surface.allow_list.is_empty()
                && matches_any(label, &surface.allow_list).is_none()
            {
                risk = risk.max(RiskLevel::Medium);
                evidence.push(format!("`{}` is not on the allow-list", label));
            }
        }

        Ok(DetectionResult::new(self.id(), risk, evidence, ctx.now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::test_support::{events, session_at, t0};
    use crate::history::HistorySnapshot;
    use chrono::Duration;

    fn run(policy: &PolicyConfig, environment: &Environment, snapshot: &HistorySnapshot) -> DetectionResult {
        let session = session_at(Duration::minutes(1));
        let ctx = AuditContext {
            history: snapshot,
            session: &session,
            environment,
            network_requests: 0,
            policy,
            now: t0(),
        };
        IdentityDetector.evaluate(&ctx).unwrap()
    }

    fn policy(deny: &[&str], allow: &[&str]) -> PolicyConfig {
        let mut policy = PolicyConfig::default();
        policy.detection_surfaces.identity.deny_list = deny.iter().map(|s| s.to_string()).collect();
        policy.detection_surfaces.identity.allow_list = allow.iter().map(|s| s.to_string()).collect();
        policy
    }

    #[test]
    fn test_deny_hit_is_critical_case_insensitive() {
        let env = Environment::new(vec!["CheatEngine-x86_64.exe".into()], vec![]);
        let result = run(
            &policy(&["cheatengine"], &[]),
            &env,
            &HistorySnapshot::from_events(vec![], 0),
        );
        assert_eq!(result.risk_score, RiskLevel::Critical);
        assert!(result.evidence[0].contains("deny-list"));
    }

    #[test]
    fn test_missing_from_allow_list_is_medium() {
        let env = Environment::new(vec!["client.exe".into(), "obs64.exe".into()], vec![]);
        let result = run(
            &policy(&[], &["client.exe"]),
            &env,
            &HistorySnapshot::from_events(vec![], 0),
        );
        assert_eq!(result.risk_score, RiskLevel::Medium);
        assert_eq!(result.evidence.len(), 1);
        assert!(result.evidence[0].contains("obs64.exe"));
    }

    #[test]
    fn test_labels_from_event_params() {
        let evs: Vec<_> = events(&["click"], &[100])
            .into_iter()
            .map(|e| e.with_param("window", "x64dbg - attached"))
            .collect();
        let result = run(
            &policy(&["x64dbg"], &[]),
            &Environment::default(),
            &HistorySnapshot::from_events(evs, 1),
        );
        assert_eq!(result.risk_score, RiskLevel::Critical);
    }

    #[test]
    fn test_empty_lists_are_clear() {
        let env = Environment::new(vec!["anything.exe".into()], vec!["Some Window".into()]);
        let result = run(
            &PolicyConfig::default(),
            &env,
            &HistorySnapshot::from_events(vec![], 0),
        );
        assert_eq!(result.risk_score, RiskLevel::None);
        assert!(result.evidence.is_empty());
    }
}
