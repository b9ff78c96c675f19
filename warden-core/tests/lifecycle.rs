//! Engine lifecycle: start/stop, coalesced audits, lock-down and reset.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Map;

use warden_core::audit::AuditLog;
use warden_core::detectors::{AuditContext, Detector};
use warden_core::{
    AuditEngine, AuditEntry, AuditLogError, DetectionResult, DetectorError, DetectorId,
    EmergencyState, JsonlAuditLog, MemoryAuditLog, PolicyConfig, RunnerState, WardenError,
};

/// Blocks its evaluation long enough for a second trigger to arrive.
struct SlowDetector;

impl Detector for SlowDetector {
    fn id(&self) -> DetectorId {
        DetectorId::SessionLength
    }

    fn enabled(&self, _policy: &PolicyConfig) -> bool {
        true
    }

    fn evaluate(&self, ctx: &AuditContext<'_>) -> Result<DetectionResult, DetectorError> {
        std::thread::sleep(StdDuration::from_millis(300));
        Ok(DetectionResult::clear(self.id(), ctx.now))
    }
}

/// An audit log whose appends never finish in test time.
struct StalledLog;

#[async_trait]
impl AuditLog for StalledLog {
    async fn append(&self, _entry: &AuditEntry) -> Result<(), AuditLogError> {
        tokio::time::sleep(StdDuration::from_secs(30)).await;
        Ok(())
    }

    async fn read_all(&self) -> Result<Vec<AuditEntry>, AuditLogError> {
        Ok(Vec::new())
    }
}

fn memory_engine(policy: PolicyConfig) -> (AuditEngine, Arc<MemoryAuditLog>) {
    let log = Arc::new(MemoryAuditLog::new());
    let engine = AuditEngine::builder(policy)
        .audit_log(log.clone())
        .build()
        .unwrap();
    (engine, log)
}

#[tokio::test]
async fn manual_reset_returns_to_normal_and_keeps_incidents() {
    let (engine, log) = memory_engine(PolicyConfig::default());
    engine.start().await;

    engine.signal_compromise("unexpected debugger").await;
    assert_eq!(engine.current_state(), EmergencyState::Locked);
    let err = engine.record("walk", Utc::now(), Map::new()).unwrap_err();
    assert!(matches!(err, WardenError::Locked(_)));

    engine.manual_reset().await;
    assert_eq!(engine.current_state(), EmergencyState::Normal);
    assert!(engine.record("walk", Utc::now(), Map::new()).is_ok());

    engine.flush().await;
    let incidents: Vec<_> = log
        .entries()
        .into_iter()
        .filter_map(|e| e.as_incident().cloned())
        .collect();
    let path: Vec<_> = incidents.iter().map(|i| (i.from, i.to)).collect();
    assert_eq!(
        path,
        vec![
            (EmergencyState::Normal, EmergencyState::Suspicious),
            (EmergencyState::Suspicious, EmergencyState::Critical),
            (EmergencyState::Critical, EmergencyState::Locked),
            (EmergencyState::Locked, EmergencyState::Normal),
        ]
    );

    engine.stop().await.unwrap();
}

#[tokio::test]
async fn lock_down_that_cannot_be_recorded_invokes_fail_safe() {
    let log = Arc::new(MemoryAuditLog::new());
    log.set_unavailable(true);
    let fired = Arc::new(AtomicBool::new(false));
    let flag = fired.clone();
    let engine = AuditEngine::builder(PolicyConfig::default())
        .audit_log(log)
        .fail_safe(Arc::new(move |_reason: &str| flag.store(true, Ordering::SeqCst)))
        .build()
        .unwrap();
    engine.start().await;

    engine.signal_compromise("tampered binary").await;
    assert!(fired.load(Ordering::SeqCst));
    assert_eq!(engine.current_state(), EmergencyState::Locked);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_triggers_coalesce() {
    let engine = Arc::new(
        AuditEngine::builder(PolicyConfig::default())
            .audit_log(Arc::new(MemoryAuditLog::new()))
            .detectors(vec![Box::new(SlowDetector)])
            .build()
            .unwrap(),
    );

    let first = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.force_audit().await })
    };
    tokio::time::sleep(StdDuration::from_millis(50)).await;
    let second = engine.force_audit().await;

    assert!(second.is_none());
    assert!(first.await.unwrap().is_some());
    assert_eq!(engine.audits_completed(), 1);
}

#[tokio::test]
async fn abandoned_audit_leaves_runner_idle() {
    let mut policy = PolicyConfig::default();
    policy.detection_surfaces.identity.deny_list = vec!["cheatengine".to_string()];
    let engine = AuditEngine::builder(policy)
        .audit_log(Arc::new(StalledLog))
        .fail_safe(Arc::new(|_reason: &str| {}))
        .build()
        .unwrap();
    engine.observe_environment(vec!["cheatengine.exe".to_string()], vec![]);

    // the lock-down record never lands, so the audit is dropped mid-await
    let abandoned = tokio::time::timeout(StdDuration::from_millis(50), engine.force_audit()).await;
    assert!(abandoned.is_err());
    assert_eq!(engine.runner_state(), RunnerState::Idle);

    assert!(engine.force_audit().await.is_some());
    assert_eq!(engine.audits_completed(), 1);
}

#[tokio::test]
async fn stop_drains_audit_log_to_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit").join("audit.jsonl");
    let mut policy = PolicyConfig::default();
    policy.audit.log_path = Some(path.clone());

    let engine = AuditEngine::new(policy).unwrap();
    engine.start().await;
    engine.record("walk", Utc::now(), Map::new()).unwrap();
    let report = engine.force_audit().await.unwrap();
    engine.stop().await.unwrap();

    let entries = JsonlAuditLog::new(&path).read_all().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].as_report().map(|r| r.id), Some(report.id));
}

#[tokio::test]
async fn break_overdue_blocks_sensitive_operations() {
    let mut policy = PolicyConfig::default();
    policy.session_caps.break_interval_minutes = 30;
    let engine = AuditEngine::builder(policy)
        .audit_log(Arc::new(MemoryAuditLog::new()))
        .session_start(Utc::now() - chrono::Duration::minutes(45))
        .build()
        .unwrap();

    assert!(!engine.allow("trade"));
    assert!(engine.allow("walk"));

    engine.take_break();
    assert!(engine.allow("trade"));
}
