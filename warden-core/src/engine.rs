//! The engine facade.
//!
//! [`AuditEngine`] is built once from a policy and owns every component;
//! nothing is global. The host calls [`AuditEngine::record`] before each
//! action and [`AuditEngine::allow`] before each sensitive operation.
//! [`AuditEngine::start`] spawns the audit schedule and the alert and
//! audit-log workers; [`AuditEngine::stop`] drains and joins them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::aggregate::{MaxRiskAggregator, RiskAggregator};
use crate::alerts::{AlertSink, AlertSystem};
use crate::audit::{AuditEntry, AuditLog, AuditWriter, FailSafe, JsonlAuditLog, MemoryAuditLog, halt_process};
use crate::config::{LoadedPolicy, PolicyConfig, load_policy_or_conservative, validate_policy};
use crate::detectors::{Detector, Environment, default_detectors};
use crate::emergency::{EmergencyResponseController, EmergencyState, ResponseAction, Transition};
use crate::enforcement::{Decision, EnforcementController};
use crate::error::{Result, WardenError};
use crate::history::ActionHistory;
use crate::humanize::{HumanizationEngine, HumanizedAction, Pacing};
use crate::monitor::{AntiPatternMonitor, MonitorVerdict};
use crate::rate_limit::RateLimiter;
use crate::runner::{AuditRunner, RunnerState, run_schedule};
use crate::session::{SessionManager, SessionState};
use crate::types::{ActionEvent, Alert, AlertLevel, RiskReport};

/// Components shared between the host-facing facade and the audit schedule.
pub(crate) struct EngineCore {
    policy: RwLock<Arc<PolicyConfig>>,
    pub(crate) history: ActionHistory,
    monitor: AntiPatternMonitor,
    pub(crate) session: SessionManager,
    environment: RwLock<Environment>,
    pub(crate) network: RateLimiter,
    humanizer: Mutex<HumanizationEngine>,
    pub(crate) enforcement: EnforcementController,
    pub(crate) emergency: EmergencyResponseController,
    pub(crate) alerts: Arc<AlertSystem>,
    pub(crate) audit: AuditWriter,
    pub(crate) runner: AuditRunner,
    pub(crate) detectors: Vec<Box<dyn Detector>>,
    pub(crate) aggregator: Box<dyn RiskAggregator>,
    fail_safe: FailSafe,
    /// Set once a critical alert has gone out for the current critical episode.
    critical_alerted: AtomicBool,
}

impl EngineCore {
    pub(crate) fn policy(&self) -> Arc<PolicyConfig> {
        Arc::clone(&self.policy.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub(crate) fn environment(&self) -> Environment {
        self.environment
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Dispatch the alert a report's overall level warrants, if any.
    ///
    /// Returns whether a critical alert went out for this report.
    pub(crate) fn alert_for_report(&self, report: &RiskReport) -> bool {
        let Some(level) = AlertLevel::for_risk(report.overall_risk_level) else {
            return false;
        };
        let mut contributors: Vec<&str> = report
            .contributing()
            .filter(|r| r.risk_score == report.overall_risk_level)
            .map(|r| r.detector_id.as_str())
            .collect();
        contributors.sort_unstable();
        let message = format!(
            "audit: overall risk {} ({})",
            report.overall_risk_level,
            contributors.join(", ")
        );
        let alert = Alert::new(level, message).for_report(report.id);
        if level == AlertLevel::Critical {
            self.dispatch_critical(alert)
        } else {
            self.alerts.dispatch(alert);
            false
        }
    }

    /// At most one critical alert per critical episode; returns whether this one went out.
    fn dispatch_critical(&self, alert: Alert) -> bool {
        if self.critical_alerted.swap(true, Ordering::AcqRel) {
            debug!(message = %alert.message, "critical alert already sent for this episode");
            return false;
        }
        self.alerts.dispatch(alert);
        true
    }

    /// Carry out a transition's side effects and build its incident record.
    ///
    /// `batch_locks` is set when the batch this transition belongs to ends in
    /// `Locked`; `report_alerted` when the triggering report already sent a
    /// critical alert.
    fn enact(&self, transition: &Transition, batch_locks: bool, report_alerted: bool) -> AuditEntry {
        if !transition.is_escalation() && transition.to < EmergencyState::Critical {
            self.critical_alerted.store(false, Ordering::Release);
        }

        let escalated_to_lock = transition.to == EmergencyState::Locked && transition.is_escalation();
        if escalated_to_lock || transition.has_action(ResponseAction::DispatchCriticalAlert) {
            let mut alert = Alert::new(
                AlertLevel::Critical,
                format!("emergency {} -> {}: {}", transition.from, transition.to, transition.trigger),
            );
            alert.related_report_id = transition.report_id;
            if escalated_to_lock {
                self.critical_alerted.store(true, Ordering::Release);
                if !report_alerted {
                    self.alerts.dispatch(alert);
                }
            } else if batch_locks {
                // the lock-down alert later in this batch covers this step
                self.critical_alerted.store(true, Ordering::Release);
            } else {
                self.dispatch_critical(alert);
            }
        }
        if transition.has_action(ResponseAction::HaltActions) {
            error!(trigger = %transition.trigger, "engine locked; action recording halted");
        }
        if transition.has_action(ResponseAction::ResumeActions) {
            info!("engine reset; action recording resumed");
        }

        AuditEntry::Incident(transition.to_incident())
    }

    /// Record transitions raised on the host's synchronous path.
    fn commit_inline(&self, transitions: Vec<Transition>) {
        let batch_locks = ends_locked(&transitions);
        for transition in transitions {
            let entry = self.enact(&transition, batch_locks, false);
            self.audit.enqueue(entry);
        }
    }

    /// Record transitions; a lock-down must reach the audit log or the fail-safe fires.
    pub(crate) async fn commit_transitions(&self, transitions: Vec<Transition>, report_alerted: bool) {
        let batch_locks = ends_locked(&transitions);
        for transition in transitions {
            let entry = self.enact(&transition, batch_locks, report_alerted);
            if transition.to == EmergencyState::Locked {
                if let Err(e) = self.audit.persist(entry).await {
                    error!(error = %e, "lock-down incident record could not be persisted");
                    (self.fail_safe)(&format!("lock-down incident record not persisted: {}", e));
                }
            } else {
                self.audit.enqueue(entry);
            }
        }
    }
}

fn ends_locked(transitions: &[Transition]) -> bool {
    transitions
        .last()
        .is_some_and(|t| t.to == EmergencyState::Locked && t.is_escalation())
}

/// Builder for [`AuditEngine`].
pub struct AuditEngineBuilder {
    policy: PolicyConfig,
    warnings: Vec<String>,
    audit_log: Option<Arc<dyn AuditLog>>,
    alert_sink: Option<Arc<dyn AlertSink>>,
    fail_safe: Option<FailSafe>,
    humanization_seed: Option<u64>,
    aggregator: Option<Box<dyn RiskAggregator>>,
    detectors: Option<Vec<Box<dyn Detector>>>,
    session_start: Option<DateTime<Utc>>,
}

impl AuditEngineBuilder {
    pub fn new(policy: PolicyConfig) -> Self {
        Self {
            policy,
            warnings: Vec::new(),
            audit_log: None,
            alert_sink: None,
            fail_safe: None,
            humanization_seed: None,
            aggregator: None,
            detectors: None,
            session_start: None,
        }
    }

    /// Load warnings to surface as `warning` alerts once the engine exists.
    #[must_use]
    pub fn warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }

    #[must_use]
    pub fn audit_log(mut self, log: Arc<dyn AuditLog>) -> Self {
        self.audit_log = Some(log);
        self
    }

    #[must_use]
    pub fn alert_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.alert_sink = Some(sink);
        self
    }

    #[must_use]
    pub fn fail_safe(mut self, fail_safe: FailSafe) -> Self {
        self.fail_safe = Some(fail_safe);
        self
    }

    #[must_use]
    pub fn humanization_seed(mut self, seed: u64) -> Self {
        self.humanization_seed = Some(seed);
        self
    }

    #[must_use]
    pub fn aggregator(mut self, aggregator: Box<dyn RiskAggregator>) -> Self {
        self.aggregator = Some(aggregator);
        self
    }

    #[must_use]
    pub fn detectors(mut self, detectors: Vec<Box<dyn Detector>>) -> Self {
        self.detectors = Some(detectors);
        self
    }

    #[must_use]
    pub fn session_start(mut self, start: DateTime<Utc>) -> Self {
        self.session_start = Some(start);
        self
    }

    pub fn build(self) -> Result<AuditEngine> {
        let policy = self.policy;
        validate_policy(&policy)?;

        let humanizer = match self.humanization_seed {
            Some(seed) => HumanizationEngine::with_seed(policy.humanization.clone(), seed)?,
            None => HumanizationEngine::new(policy.humanization.clone())?,
        };
        let sink = match self.alert_sink {
            Some(sink) => sink,
            None => AlertSystem::sink_for(&policy.alerts)?,
        };
        let alerts = Arc::new(AlertSystem::new(policy.alerts.clone(), sink));
        let log: Arc<dyn AuditLog> = match (self.audit_log, &policy.audit.log_path) {
            (Some(log), _) => log,
            (None, Some(path)) => Arc::new(JsonlAuditLog::new(path)),
            (None, None) => {
                warn!("no audit log path configured; audit entries kept in memory only");
                Arc::new(MemoryAuditLog::new())
            }
        };
        let audit = AuditWriter::new(log, &policy.audit, Arc::clone(&alerts));

        let core = EngineCore {
            history: ActionHistory::new(policy.audit.history_capacity),
            monitor: AntiPatternMonitor::new(),
            session: SessionManager::new(&policy.session_caps, self.session_start.unwrap_or_else(Utc::now)),
            environment: RwLock::new(Environment::default()),
            network: RateLimiter::per_minute(policy.detection_surfaces.network.soft_rate_per_minute),
            humanizer: Mutex::new(humanizer),
            enforcement: EnforcementController::new(policy.enforcement.clone()),
            emergency: EmergencyResponseController::new(policy.emergency.clone()),
            alerts,
            audit,
            runner: AuditRunner::new(),
            detectors: self.detectors.unwrap_or_else(default_detectors),
            aggregator: self.aggregator.unwrap_or_else(|| Box::new(MaxRiskAggregator)),
            fail_safe: self.fail_safe.unwrap_or_else(halt_process),
            critical_alerted: AtomicBool::new(false),
            policy: RwLock::new(Arc::new(policy)),
        };

        for warning in self.warnings {
            warn!(%warning, "policy load warning");
            core.alerts
                .dispatch(Alert::new(AlertLevel::Warning, format!("policy: {}", warning)));
        }

        Ok(AuditEngine {
            core: Arc::new(core),
            shutdown: CancellationToken::new(),
            schedule: Mutex::new(None),
            started: AtomicBool::new(false),
        })
    }
}

/// The behavioral-compliance engine.
pub struct AuditEngine {
    core: Arc<EngineCore>,
    shutdown: CancellationToken,
    schedule: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
}

impl AuditEngine {
    pub fn builder(policy: PolicyConfig) -> AuditEngineBuilder {
        AuditEngineBuilder::new(policy)
    }

    pub fn new(policy: PolicyConfig) -> Result<Self> {
        Self::builder(policy).build()
    }

    /// Build from a loaded policy, turning its warnings into alerts.
    pub fn from_loaded(loaded: LoadedPolicy) -> Result<Self> {
        Self::builder(loaded.policy).warnings(loaded.warnings).build()
    }

    /// Build from a policy file, falling back to the conservative policy.
    pub fn from_policy_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        Self::from_loaded(load_policy_or_conservative(path))
    }

    /// Spawn the audit schedule and the delivery workers. Idempotent.
    pub async fn start(&self) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        self.core.alerts.start();
        self.core.audit.start();
        let handle = tokio::spawn(run_schedule(Arc::clone(&self.core), self.shutdown.clone()));
        *self.schedule.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        info!("engine started");
    }

    /// Stop the schedule, then drain the audit log and alert queues.
    pub async fn stop(&self) -> Result<()> {
        if !self.started.load(Ordering::Acquire) {
            return Err(WardenError::NotStarted);
        }
        self.shutdown.cancel();
        let handle = self.schedule.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            warn!(error = %e, "audit schedule task panicked");
        }
        self.core.audit.shutdown().await;
        self.core.alerts.shutdown().await;
        info!("engine stopped");
        Ok(())
    }

    /// Record one action. The inline monitor runs before this returns.
    ///
    /// Fails with [`WardenError::Locked`] while the engine is locked.
    pub fn record(
        &self,
        kind: impl Into<String>,
        timestamp: DateTime<Utc>,
        params: Map<String, Value>,
    ) -> Result<MonitorVerdict> {
        let core = &self.core;
        if core.emergency.state() == EmergencyState::Locked {
            let reason = core
                .emergency
                .lock_reason()
                .unwrap_or_else(|| "manual reset required".to_string());
            return Err(WardenError::Locked(reason));
        }

        let policy = core.policy();
        let event = ActionEvent {
            kind: kind.into(),
            timestamp,
            params,
        };
        if policy
            .detection_surfaces
            .network
            .request_kinds
            .iter()
            .any(|k| *k == event.kind)
        {
            core.network.record_at(timestamp);
        }

        let seq = core.history.record(event);
        let window = AntiPatternMonitor::window(&policy.anti_patterns);
        let recent = core.history.tail(window);
        let verdict = core
            .monitor
            .check(recent.events(), &policy.anti_patterns, timestamp);

        if verdict.is_flagged() {
            warn!(seq, risk = %verdict.risk(), evidence = ?verdict.result.evidence, "anti-pattern flagged");
            let transitions = core.emergency.on_inline_verdict_at(&verdict, Utc::now());
            core.commit_inline(transitions);
        }
        Ok(verdict)
    }

    /// Record an already-built event.
    pub fn record_event(&self, event: ActionEvent) -> Result<MonitorVerdict> {
        self.record(event.kind, event.timestamp, event.params)
    }

    /// Whether `op` may run now.
    pub fn allow(&self, op: &str) -> bool {
        self.decide(op).is_allowed()
    }

    pub fn decide(&self, op: &str) -> Decision {
        let core = &self.core;
        core.enforcement
            .decide(op, core.emergency.state(), &core.session.snapshot())
    }

    pub fn last_report(&self) -> Option<Arc<RiskReport>> {
        self.core.enforcement.latest_report()
    }

    pub fn current_state(&self) -> EmergencyState {
        self.core.emergency.state()
    }

    /// Run an audit now. `None` if one was already running.
    pub async fn force_audit(&self) -> Option<Arc<RiskReport>> {
        self.core.runner.run_once(&self.core).await
    }

    /// Operator reset to `Normal`; clears the signals that led here.
    ///
    /// Incident records already written stay in the audit log.
    pub async fn manual_reset(&self) {
        let core = &self.core;
        let transitions = core.emergency.manual_reset_at(Utc::now());
        if transitions.is_empty() {
            return;
        }
        core.history.clear();
        core.network.clear();
        *core.environment.write().unwrap_or_else(PoisonError::into_inner) = Environment::default();
        core.commit_transitions(transitions, false).await;
        core.runner.resume();
    }

    /// Host-side "system compromise" signal; locks the engine.
    pub async fn signal_compromise(&self, reason: &str) {
        let transitions = self.core.emergency.signal_compromise_at(reason, Utc::now());
        self.core.commit_transitions(transitions, false).await;
    }

    /// Report the process and window labels currently visible to the host.
    pub fn observe_environment(&self, processes: Vec<String>, windows: Vec<String>) {
        debug!(processes = processes.len(), windows = windows.len(), "environment observed");
        *self
            .core
            .environment
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Environment::new(processes, windows);
    }

    /// Whether the host may issue another outbound request under the soft rate.
    ///
    /// Measured at the newest recorded event's timestamp, the clock requests
    /// are counted in; with an empty history, at the wall clock.
    pub fn network_permit(&self) -> bool {
        let at = self.core.history.latest_timestamp().unwrap_or_else(Utc::now);
        self.network_permit_at(at)
    }

    /// [`AuditEngine::network_permit`] at an explicit point in the host's clock.
    pub fn network_permit_at(&self, at: DateTime<Utc>) -> bool {
        self.core.network.check_at(at)
    }

    /// Current state of the audit runner.
    pub fn runner_state(&self) -> RunnerState {
        self.core.runner.state()
    }

    pub fn pacing(&self) -> Pacing {
        let humanizer = self.core.humanizer.lock().unwrap_or_else(PoisonError::into_inner);
        humanizer.pacing(self.current_state())
    }

    /// A humanization action to perform before the next real action, if any.
    pub fn next_humanization(&self) -> Option<HumanizedAction> {
        let state = self.current_state();
        self.core
            .humanizer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .plan(state)
    }

    /// Acknowledge a break taken now.
    pub fn take_break(&self) {
        self.core.session.take_break_at(Utc::now());
    }

    pub fn session(&self) -> SessionState {
        self.core.session.snapshot()
    }

    /// Validate and swap in a new policy.
    pub fn reload_config(&self, policy: PolicyConfig) -> Result<()> {
        validate_policy(&policy)?;
        let core = &self.core;
        let humanizer = HumanizationEngine::new(policy.humanization.clone())?;

        let current = core.policy();
        if policy.audit.history_capacity != current.audit.history_capacity
            || policy.audit.log_path != current.audit.log_path
            || policy.alerts.webhook_url != current.alerts.webhook_url
        {
            warn!("history capacity, audit log path and webhook changes apply on restart");
        }

        *core.humanizer.lock().unwrap_or_else(PoisonError::into_inner) = humanizer;
        core.session.apply_policy(&policy.session_caps);
        core.network
            .set_cap(policy.detection_surfaces.network.soft_rate_per_minute);
        core.enforcement.apply_policy(policy.enforcement.clone());
        core.emergency.apply_policy(policy.emergency.clone());
        core.alerts.apply_policy(policy.alerts.clone());
        *core.policy.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(policy);
        info!("policy reloaded");
        Ok(())
    }

    pub fn policy(&self) -> Arc<PolicyConfig> {
        self.core.policy()
    }

    pub fn alerts(&self) -> &AlertSystem {
        &self.core.alerts
    }

    pub fn audit_log(&self) -> Arc<dyn AuditLog> {
        self.core.audit.log()
    }

    /// Audits completed so far.
    pub fn audits_completed(&self) -> u64 {
        self.core.runner.completed()
    }

    /// Wait for queued audit entries and alerts to be processed.
    pub async fn flush(&self) {
        self.core.audit.flush().await;
        self.core.alerts.flush().await;
    }
}

impl Drop for AuditEngine {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for AuditEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditEngine")
            .field("state", &self.current_state())
            .field("history_seq", &self.core.history.seq())
            .finish()
    }
}
