//! Scheduled and on-demand audits.
//!
//! `Idle -> Running -> Idle`. An audit takes one snapshot of history,
//! session, environment and network count, evaluates every enabled detector
//! against it, aggregates, then hands the report on in a fixed order:
//! audit log, enforcement, alerts, emergency controller. A trigger that
//! arrives while an audit is running is coalesced into it.
//!
//! The schedule ticks from its start time (`MissedTickBehavior::Skip`), so a
//! slow audit never pushes later ticks back. It suspends while the engine is
//! locked and resumes on manual reset.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, Notify};
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::aggregate::build_report;
use crate::audit::AuditEntry;
use crate::detectors::{AuditContext, run_detectors};
use crate::emergency::EmergencyState;
use crate::engine::EngineCore;
use crate::types::RiskReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Idle,
    Running,
}

#[derive(Debug, Default)]
pub struct AuditRunner {
    gate: Mutex<()>,
    running: AtomicBool,
    completed: AtomicU64,
    resume: Notify,
}

impl AuditRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> RunnerState {
        if self.running.load(Ordering::Acquire) {
            RunnerState::Running
        } else {
            RunnerState::Idle
        }
    }

    /// Audits completed since the engine was built.
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }

    /// Wake a schedule suspended by a lock.
    pub(crate) fn resume(&self) {
        self.resume.notify_one();
    }

    /// Run one audit, or return `None` if one is already running.
    pub(crate) async fn run_once(&self, core: &EngineCore) -> Option<Arc<RiskReport>> {
        let Ok(_gate) = self.gate.try_lock() else {
            debug!("audit already running; trigger coalesced");
            return None;
        };
        let _running = RunningGuard::enter(&self.running);

        let now = Utc::now();
        let policy = core.policy();
        let history = core.history.snapshot();
        let session = core.session.snapshot_at(now);
        let environment = core.environment();
        // requests are recorded at their event timestamps, so count in that clock
        let requests_at = history.latest_timestamp().unwrap_or(now);
        let ctx = AuditContext {
            history: &history,
            session: &session,
            environment: &environment,
            network_requests: core.network.count_at(requests_at),
            policy: &policy,
            now,
        };

        let results = run_detectors(&core.detectors, &ctx);
        let report = Arc::new(build_report(
            results,
            core.aggregator.as_ref(),
            history.seq(),
            now,
        ));
        info!(
            report_id = %report.id,
            risk = %report.overall_risk_level,
            history_seq = report.history_seq,
            events = history.len(),
            "audit complete"
        );

        core.audit.enqueue(AuditEntry::Report(report.as_ref().clone()));
        core.enforcement.apply_report(Arc::clone(&report));
        let report_alerted = core.alert_for_report(&report);
        let transitions = core.emergency.on_report_at(&report, now);
        core.commit_transitions(transitions, report_alerted).await;

        self.completed.fetch_add(1, Ordering::AcqRel);
        Some(report)
    }
}

/// Holds the runner in `Running`; dropping it (even mid-await) returns to `Idle`.
struct RunningGuard<'a>(&'a AtomicBool);

impl<'a> RunningGuard<'a> {
    fn enter(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        Self(flag)
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn ticker(secs: u64) -> Interval {
    let period = Duration::from_secs(secs.max(1));
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

/// The periodic audit loop; runs until `shutdown` is cancelled.
pub(crate) async fn run_schedule(core: Arc<EngineCore>, shutdown: CancellationToken) {
    let mut period = core.policy().audit.interval_secs;
    let mut interval = ticker(period);
    info!(interval_secs = period, "audit schedule started");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }

        if core.emergency.state() == EmergencyState::Locked {
            info!("engine locked; audit schedule suspended until manual reset");
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = core.runner.resume.notified() => {}
            }
            info!("audit schedule resumed");
            interval.reset();
            continue;
        }

        core.runner.run_once(&core).await;
        let transitions = core.emergency.tick_at(Utc::now());
        core.commit_transitions(transitions, false).await;

        let configured = core.policy().audit.interval_secs;
        if configured != period {
            info!(from = period, to = configured, "audit interval changed");
            period = configured;
            interval = ticker(period);
        }
    }

    info!("audit schedule stopped");
}
