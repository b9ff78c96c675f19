//! End-to-end scenarios across the monitor, detectors, alerts and the
//! incident state machine.

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Map;

use warden_core::{
    Alert, AlertError, AlertLevel, AlertSink, AuditEngine, DetectorId, EmergencyState,
    MemoryAuditLog, PolicyConfig, RiskLevel, load_policy_or_conservative,
};

/// Fails every delivery and counts attempts.
#[derive(Default)]
struct FailingSink {
    calls: AtomicU32,
}

#[async_trait]
impl AlertSink for FailingSink {
    async fn deliver(&self, _alert: &Alert) -> Result<(), AlertError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(AlertError::Delivery("connection refused".into()))
    }

    fn name(&self) -> &str {
        "failing"
    }
}

fn engine_with(policy: PolicyConfig) -> (AuditEngine, Arc<MemoryAuditLog>) {
    let log = Arc::new(MemoryAuditLog::new());
    let engine = AuditEngine::builder(policy)
        .audit_log(log.clone())
        .humanization_seed(7)
        .build()
        .unwrap();
    (engine, log)
}

fn record_identical(engine: &AuditEngine, start: DateTime<Utc>, count: i64) {
    for i in 0..count {
        let _ = engine
            .record("click", start + Duration::milliseconds(500 * i), Map::new())
            .unwrap();
    }
}

#[tokio::test]
async fn identical_actions_at_identical_intervals_are_critical() {
    let (engine, log) = engine_with(PolicyConfig::default());
    engine.start().await;

    record_identical(&engine, Utc::now(), 5);
    assert!(engine.current_state() >= EmergencyState::Suspicious);

    let report = engine.force_audit().await.unwrap();
    assert_eq!(report.overall_risk_level, RiskLevel::Critical);
    assert_eq!(
        report.result_for(DetectorId::InputTiming).unwrap().risk_score,
        RiskLevel::Critical
    );
    assert_eq!(report.history_seq, 5);

    // inline escalation and the audit describe one episode: one critical alert
    let critical = engine
        .alerts()
        .history()
        .iter()
        .filter(|a| a.level == AlertLevel::Critical)
        .count();
    assert_eq!(critical, 1);
    assert_eq!(engine.current_state(), EmergencyState::Critical);

    engine.flush().await;
    let logged: Vec<_> = log
        .entries()
        .into_iter()
        .filter_map(|e| e.as_report().map(|r| r.id))
        .collect();
    assert_eq!(logged, vec![report.id]);

    engine.stop().await.unwrap();
}

#[tokio::test]
async fn varied_human_like_stream_stays_normal() {
    let (engine, _log) = engine_with(PolicyConfig::default());
    let kinds = ["walk", "mine", "bank", "talk", "craft", "look"];
    let mut rng = StdRng::seed_from_u64(42);

    let mut at = Utc::now();
    let mut previous = usize::MAX;
    for _ in 0..50 {
        let mut next = rng.gen_range(0..kinds.len());
        while next == previous {
            next = rng.gen_range(0..kinds.len());
        }
        previous = next;
        at += Duration::milliseconds(rng.gen_range(200..=800));

        let verdict = engine.record(kinds[next], at, Map::new()).unwrap();
        assert!(!verdict.is_flagged(), "flagged: {:?}", verdict.result.evidence);
    }

    let report = engine.force_audit().await.unwrap();
    assert!(report.overall_risk_level <= RiskLevel::Low, "{:?}", report.results);
    assert_eq!(engine.current_state(), EmergencyState::Normal);
    assert!(engine.allow("trade"));
}

#[test]
fn missing_policy_section_becomes_warning_alert() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "[session_caps]\nmax_session_hours = 6.0\n\n[enforcement]\nstrict_mode = true"
    )
    .unwrap();

    let loaded = load_policy_or_conservative(file.path());
    let engine = AuditEngine::from_loaded(loaded).unwrap();

    assert!(engine.policy().enforcement.strict_mode);
    assert_eq!(engine.policy().session_caps.max_session_hours, 6.0);
    assert!(engine.alerts().history().iter().any(|a| {
        a.level == AlertLevel::Warning && a.message.contains("detection_surfaces")
    }));
}

#[test]
fn unreadable_policy_falls_back_to_conservative() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[enforcement]\nstrict_mode = false\nbogus = 1").unwrap();

    let engine = AuditEngine::from_policy_file(file.path()).unwrap();
    let policy = engine.policy();
    assert!(policy.enforcement.strict_mode);
    assert!(policy.humanization.enabled);
    assert!(engine.alerts().history().iter().any(|a| {
        a.level == AlertLevel::Warning && a.message.contains("conservative defaults in effect")
    }));
}

#[tokio::test]
async fn failing_sink_is_retried_without_blocking_escalation() {
    let mut policy = PolicyConfig::default();
    policy.alerts.initial_backoff_ms = 1;
    policy.alerts.max_backoff_ms = 2;
    let sink = Arc::new(FailingSink::default());
    let engine = AuditEngine::builder(policy)
        .audit_log(Arc::new(MemoryAuditLog::new()))
        .alert_sink(sink.clone())
        .build()
        .unwrap();
    engine.start().await;

    record_identical(&engine, Utc::now(), 5);
    let report = engine.force_audit().await.unwrap();
    assert_eq!(report.overall_risk_level, RiskLevel::Critical);
    assert!(engine.current_state() >= EmergencyState::Critical);

    engine.flush().await;
    let sent = engine.alerts().history().len() as u32;
    assert!(sent >= 1);
    assert_eq!(sink.calls.load(Ordering::SeqCst), sent * 4);

    let failures = engine.alerts().failures();
    assert_eq!(failures.len() as u32, sent);
    assert!(failures.iter().all(|f| f.attempts == 4));
    assert!(failures.iter().any(|f| f.alert.level == AlertLevel::Critical));
    assert!(engine.current_state() >= EmergencyState::Critical);

    engine.stop().await.unwrap();
}

#[tokio::test]
async fn replayed_request_burst_is_counted_in_stream_time() {
    let mut policy = PolicyConfig::default();
    policy.detection_surfaces.network.request_kinds = vec!["fetch".into(), "post".into()];
    policy.detection_surfaces.network.soft_rate_per_minute = 5;
    policy.detection_surfaces.network.hard_rate_per_minute = 10;
    let (engine, _log) = engine_with(policy);

    // fifteen requests inside twelve seconds of a recorded session
    let start: DateTime<Utc> = "2026-01-01T12:00:00Z".parse().unwrap();
    let mut rng = StdRng::seed_from_u64(11);
    let mut at = start;
    for i in 0..15 {
        let kind = if i % 2 == 0 { "fetch" } else { "post" };
        engine.record(kind, at, Map::new()).unwrap();
        at += Duration::milliseconds(rng.gen_range(600..=850));
    }

    let report = engine.force_audit().await.unwrap();
    let network = report.result_for(DetectorId::NetworkCadence).unwrap();
    assert_eq!(network.risk_score, RiskLevel::High, "{:?}", network.evidence);
    assert!(!engine.network_permit());
}

#[tokio::test]
async fn identity_deny_hit_locks_engine() {
    let mut policy = PolicyConfig::default();
    policy.detection_surfaces.identity.deny_list = vec!["cheatengine".to_string()];
    let (engine, log) = engine_with(policy);

    engine.observe_environment(vec!["CheatEngine-x86_64.exe".to_string()], vec![]);
    let report = engine.force_audit().await.unwrap();

    assert_eq!(
        report.result_for(DetectorId::Identity).unwrap().risk_score,
        RiskLevel::Critical
    );
    assert_eq!(engine.current_state(), EmergencyState::Locked);
    assert!(!engine.allow("walk"));

    let incidents: Vec<_> = log
        .entries()
        .into_iter()
        .filter_map(|e| e.as_incident().cloned())
        .collect();
    let lock = incidents.iter().find(|i| i.to == EmergencyState::Locked).unwrap();
    assert_eq!(lock.trigger_report_id, Some(report.id));
    assert!(lock.response_taken.iter().any(|r| r == "halt_actions"));
}
