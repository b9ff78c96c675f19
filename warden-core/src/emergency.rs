//! Incident state machine.
//!
//! ```text
//!   ┌────────┐  medium   ┌────────────┐  high / repeat  ┌──────────┐  identity / compromise  ┌────────┐
//!   │ Normal │ ────────► │ Suspicious │ ──────────────► │ Critical │ ──────────────────────► │ Locked │
//!   └────────┘           └────────────┘                 └──────────┘                         └────────┘
//!        ▲  ◄── cooldown ──┘    ▲   ◄──── cooldown ────────┘                                     │
//!        └──────────────────────┴──────────────────── manual reset ─────────────────────────────┘
//! ```
//!
//! Escalation walks every intermediate edge, so a single `critical` signal in
//! `Normal` produces three transitions, each with its own response actions and
//! its own incident record. `Locked` never regresses on its own.
//!
//! The current state lives in an atomic so the host loop and enforcement can
//! read it without locking. Transitions are serialized behind a mutex and the
//! atomic is only written while it is held, so the inline monitor and the
//! scheduled audit can never apply conflicting transitions.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EmergencyPolicy;
use crate::monitor::MonitorVerdict;
use crate::types::{DetectorId, IncidentRecord, ReportId, RiskLevel, RiskReport};

/// Escalation level of the engine.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum EmergencyState {
    #[default]
    Normal = 0,
    Suspicious = 1,
    Critical = 2,
    Locked = 3,
}

impl EmergencyState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Suspicious => "suspicious",
            Self::Critical => "critical",
            Self::Locked => "locked",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Normal,
            1 => Self::Suspicious,
            2 => Self::Critical,
            _ => Self::Locked,
        }
    }

    fn next(self) -> Self {
        match self {
            Self::Normal => Self::Suspicious,
            Self::Suspicious => Self::Critical,
            Self::Critical | Self::Locked => Self::Locked,
        }
    }

    fn previous(self) -> Self {
        match self {
            Self::Normal | Self::Suspicious => Self::Normal,
            Self::Critical => Self::Suspicious,
            Self::Locked => Self::Locked,
        }
    }
}

impl std::fmt::Display for EmergencyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A side effect attached to a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseAction {
    IncreaseHumanization,
    ReduceActionRate,
    DispatchCriticalAlert,
    MaximalRestriction,
    ClearPatternCaches,
    HaltActions,
    WriteIncidentRecord,
    RelaxRestrictions,
    ResumeActions,
}

impl ResponseAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IncreaseHumanization => "increase_humanization",
            Self::ReduceActionRate => "reduce_action_rate",
            Self::DispatchCriticalAlert => "dispatch_critical_alert",
            Self::MaximalRestriction => "maximal_restriction",
            Self::ClearPatternCaches => "clear_pattern_caches",
            Self::HaltActions => "halt_actions",
            Self::WriteIncidentRecord => "write_incident_record",
            Self::RelaxRestrictions => "relax_restrictions",
            Self::ResumeActions => "resume_actions",
        }
    }

    /// Actions taken when entering `to` by escalation.
    fn on_escalate(to: EmergencyState) -> Vec<Self> {
        match to {
            EmergencyState::Normal => Vec::new(),
            EmergencyState::Suspicious => vec![Self::IncreaseHumanization, Self::ReduceActionRate],
            EmergencyState::Critical => vec![
                Self::DispatchCriticalAlert,
                Self::MaximalRestriction,
                Self::ClearPatternCaches,
            ],
            EmergencyState::Locked => vec![Self::HaltActions, Self::WriteIncidentRecord],
        }
    }
}

/// One applied state change.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub from: EmergencyState,
    pub to: EmergencyState,
    pub trigger: String,
    pub actions: Vec<ResponseAction>,
    pub report_id: Option<ReportId>,
    pub at: DateTime<Utc>,
}

impl Transition {
    pub fn is_escalation(&self) -> bool {
        self.to > self.from
    }

    pub fn has_action(&self, action: ResponseAction) -> bool {
        self.actions.contains(&action)
    }

    /// The append-only audit record for this transition.
    pub fn to_incident(&self) -> IncidentRecord {
        IncidentRecord {
            id: Uuid::now_v7(),
            trigger_report_id: self.report_id,
            from: self.from,
            to: self.to,
            trigger: self.trigger.clone(),
            response_taken: self.actions.iter().map(|a| a.as_str().to_string()).collect(),
            timestamp: self.at,
        }
    }
}

#[derive(Debug)]
struct ControllerInner {
    policy: EmergencyPolicy,
    /// Last time a signal at or above the current state's trigger level arrived.
    last_signal_at: Option<DateTime<Utc>>,
    /// Recent inline flag times, the "action-pattern cache".
    flag_times: VecDeque<DateTime<Utc>>,
    lock_reason: Option<String>,
}

/// Drives [`EmergencyState`] from inline verdicts, audit reports and host signals.
#[derive(Debug)]
pub struct EmergencyResponseController {
    state: AtomicU8,
    inner: Mutex<ControllerInner>,
}

impl EmergencyResponseController {
    pub fn new(policy: EmergencyPolicy) -> Self {
        Self {
            state: AtomicU8::new(EmergencyState::Normal as u8),
            inner: Mutex::new(ControllerInner {
                policy,
                last_signal_at: None,
                flag_times: VecDeque::new(),
                lock_reason: None,
            }),
        }
    }

    /// Current state; lock-free.
    pub fn state(&self) -> EmergencyState {
        EmergencyState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Why the engine locked, while it is locked.
    pub fn lock_reason(&self) -> Option<String> {
        self.lock().lock_reason.clone()
    }

    pub fn apply_policy(&self, policy: EmergencyPolicy) {
        self.lock().policy = policy;
    }

    /// Fast-path signal from the per-event monitor.
    ///
    /// The repeat window is measured on the verdict's own timestamp (the time
    /// of the flagged event); `now` stamps the resulting transitions.
    pub fn on_inline_verdict_at(
        &self,
        verdict: &MonitorVerdict,
        now: DateTime<Utc>,
    ) -> Vec<Transition> {
        if !verdict.is_flagged() || verdict.risk() < RiskLevel::Medium {
            return Vec::new();
        }

        let flagged_at = verdict.result.timestamp;
        let mut inner = self.lock();
        let window = Duration::seconds(inner.policy.repeat_flag_window_secs as i64);
        inner
            .flag_times
            .retain(|t| (flagged_at - *t).abs() <= window);
        inner.flag_times.push_back(flagged_at);

        let target = if inner.flag_times.len() >= inner.policy.repeat_flag_count.max(1) {
            EmergencyState::Critical
        } else {
            EmergencyState::Suspicious
        };
        let trigger = format!(
            "inline anti-pattern flag ({} in {}s): {}",
            inner.flag_times.len(),
            inner.policy.repeat_flag_window_secs,
            verdict.result.evidence.join("; ")
        );
        self.escalate(&mut inner, target, &trigger, None, now)
    }

    /// Signal from a completed audit.
    pub fn on_report_at(&self, report: &RiskReport, now: DateTime<Utc>) -> Vec<Transition> {
        let identity_critical = report
            .result_for(DetectorId::Identity)
            .is_some_and(|r| !r.is_errored() && r.risk_score == RiskLevel::Critical);

        let (target, trigger) = if identity_critical {
            (
                EmergencyState::Locked,
                "identity detector deny-list hit".to_string(),
            )
        } else {
            match report.overall_risk_level {
                RiskLevel::None | RiskLevel::Low => return Vec::new(),
                RiskLevel::Medium => (
                    EmergencyState::Suspicious,
                    "audit reported medium risk".to_string(),
                ),
                level => (
                    EmergencyState::Critical,
                    format!("audit reported {} risk", level),
                ),
            }
        };

        let mut inner = self.lock();
        let transitions = self.escalate(&mut inner, target, &trigger, Some(report.id), now);
        if target == EmergencyState::Locked {
            inner.lock_reason = Some(trigger);
        }
        transitions
    }

    /// Explicit "system compromise" signal from the host.
    pub fn signal_compromise_at(&self, reason: &str, now: DateTime<Utc>) -> Vec<Transition> {
        let mut inner = self.lock();
        let trigger = format!("host signalled compromise: {}", reason);
        let transitions = self.escalate(&mut inner, EmergencyState::Locked, &trigger, None, now);
        inner.lock_reason = Some(trigger);
        transitions
    }

    /// Regress one level if the cooldown has elapsed with no further signals.
    pub fn tick_at(&self, now: DateTime<Utc>) -> Vec<Transition> {
        let mut inner = self.lock();
        let current = self.state();
        if matches!(current, EmergencyState::Normal | EmergencyState::Locked) {
            return Vec::new();
        }

        let cooldown = Duration::seconds(inner.policy.cooldown_secs as i64);
        let quiet_since = inner.last_signal_at.unwrap_or(now);
        if now - quiet_since < cooldown {
            return Vec::new();
        }

        let to = current.previous();
        inner.last_signal_at = Some(now);
        let transition = Transition {
            from: current,
            to,
            trigger: format!("no matching signal for {}s", inner.policy.cooldown_secs),
            actions: vec![ResponseAction::RelaxRestrictions],
            report_id: None,
            at: now,
        };
        self.store(to);
        info!(from = %current, to = %to, "emergency state regressed after cooldown");
        vec![transition]
    }

    /// Operator reset; the only way out of `Locked`.
    pub fn manual_reset_at(&self, now: DateTime<Utc>) -> Vec<Transition> {
        let mut inner = self.lock();
        let current = self.state();
        inner.flag_times.clear();
        inner.last_signal_at = None;
        inner.lock_reason = None;
        if current == EmergencyState::Normal {
            debug!("manual reset requested in normal state");
            return Vec::new();
        }

        self.store(EmergencyState::Normal);
        info!(from = %current, "emergency state manually reset");
        vec![Transition {
            from: current,
            to: EmergencyState::Normal,
            trigger: "manual reset".to_string(),
            actions: vec![ResponseAction::ResumeActions],
            report_id: None,
            at: now,
        }]
    }

    /// Walk up one edge at a time until `target` is reached.
    fn escalate(
        &self,
        inner: &mut ControllerInner,
        target: EmergencyState,
        trigger: &str,
        report_id: Option<ReportId>,
        now: DateTime<Utc>,
    ) -> Vec<Transition> {
        let mut current = self.state();
        if target >= current {
            // a matching signal holds off cooldown even without a transition
            inner.last_signal_at = Some(now);
        }

        let mut transitions = Vec::new();
        while current < target {
            let to = current.next();
            let actions = ResponseAction::on_escalate(to);
            if actions.contains(&ResponseAction::ClearPatternCaches) {
                inner.flag_times.clear();
            }
            warn!(from = %current, to = %to, trigger, "emergency state escalated");
            transitions.push(Transition {
                from: current,
                to,
                trigger: trigger.to_string(),
                actions,
                report_id,
                at: now,
            });
            self.store(to);
            current = to;
        }
        transitions
    }

    fn store(&self, state: EmergencyState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ControllerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
