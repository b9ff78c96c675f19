//! Allow/deny decisions for sensitive operations.
//!
//! Advisory to the host: it is expected to call `allow(op)` before anything
//! listed in `enforcement.sensitive_operations` and defer the operation when
//! the answer is no.

use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use crate::config::EnforcementPolicy;
use crate::emergency::EmergencyState;
use crate::session::SessionState;
use crate::types::{RiskLevel, RiskReport};

/// Why an operation was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    Locked,
    EmergencyRestriction(EmergencyState),
    SessionCapExceeded,
    BreakOverdue,
    Risk { level: RiskLevel, strict: bool },
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Locked => write!(f, "engine is locked"),
            Self::EmergencyRestriction(state) => write!(f, "restricted in {} state", state),
            Self::SessionCapExceeded => write!(f, "session cap exceeded"),
            Self::BreakOverdue => write!(f, "break overdue"),
            Self::Risk { level, strict } => {
                let mode = if *strict { "strict" } else { "lenient" };
                write!(f, "{} risk blocks sensitive operations in {} mode", level, mode)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Holds the latest report and maps it to decisions.
#[derive(Debug)]
pub struct EnforcementController {
    policy: RwLock<EnforcementPolicy>,
    latest: RwLock<Option<Arc<RiskReport>>>,
}

impl EnforcementController {
    pub fn new(policy: EnforcementPolicy) -> Self {
        Self {
            policy: RwLock::new(policy),
            latest: RwLock::new(None),
        }
    }

    pub fn apply_policy(&self, policy: EnforcementPolicy) {
        *self.policy.write().unwrap_or_else(PoisonError::into_inner) = policy;
    }

    pub fn strict_mode(&self) -> bool {
        self.policy
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .strict_mode
    }

    /// Replace the report decisions are based on.
    pub fn apply_report(&self, report: Arc<RiskReport>) {
        *self.latest.write().unwrap_or_else(PoisonError::into_inner) = Some(report);
    }

    pub fn latest_report(&self) -> Option<Arc<RiskReport>> {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_sensitive(&self, op: &str) -> bool {
        self.policy
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .sensitive_operations
            .iter()
            .any(|s| s == op)
    }

    /// Decide whether `op` may run now.
    pub fn decide(&self, op: &str, state: EmergencyState, session: &SessionState) -> Decision {
        let decision = self.evaluate(op, state, session);
        if let Decision::Deny(reason) = decision {
            debug!(op, %reason, "operation denied");
        }
        decision
    }

    pub fn allow(&self, op: &str, state: EmergencyState, session: &SessionState) -> bool {
        self.decide(op, state, session).is_allowed()
    }

    fn evaluate(&self, op: &str, state: EmergencyState, session: &SessionState) -> Decision {
        if state == EmergencyState::Locked {
            return Decision::Deny(DenyReason::Locked);
        }
        if !self.is_sensitive(op) {
            return Decision::Allow;
        }
        if state >= EmergencyState::Critical {
            return Decision::Deny(DenyReason::EmergencyRestriction(state));
        }
        if session.cap_exceeded() {
            return Decision::Deny(DenyReason::SessionCapExceeded);
        }
        if session.break_overdue() {
            return Decision::Deny(DenyReason::BreakOverdue);
        }

        let strict = self.strict_mode();
        let level = self
            .latest_report()
            .map(|r| r.overall_risk_level)
            .unwrap_or(RiskLevel::None);
        let blocking = if strict {
            RiskLevel::High
        } else {
            RiskLevel::Critical
        };
        if level >= blocking {
            Decision::Deny(DenyReason::Risk { level, strict })
        } else {
            Decision::Allow
        }
    }
}
