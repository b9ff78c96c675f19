//! Core data model shared by every component.
//!
//! Everything here is an immutable value once constructed: action events are
//! recorded and evicted but never edited, detection results and reports are
//! produced fresh on each evaluation, and alerts and incident records are
//! append-only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::emergency::EmergencyState;

/// Ordinal risk classification assigned to a detector result or a report.
///
/// Ordering is meaningful: `None < Low < Medium < High < Critical`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    #[default]
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single discrete action emitted by the host agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionEvent {
    pub kind: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl ActionEvent {
    /// Create an event with no parameters.
    pub fn new(kind: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind: kind.into(),
            timestamp,
            params: Map::new(),
        }
    }

    /// Attach a parameter.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Look up a string parameter.
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }
}

/// Identifies which detector produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorId {
    Identity,
    MacroCadence,
    InputTiming,
    SessionLength,
    NetworkCadence,
    ResourceAccess,
    /// The inline per-event monitor.
    AntiPattern,
}

impl DetectorId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::MacroCadence => "macro_cadence",
            Self::InputTiming => "input_timing",
            Self::SessionLength => "session_length",
            Self::NetworkCadence => "network_cadence",
            Self::ResourceAccess => "resource_access",
            Self::AntiPattern => "anti_pattern",
        }
    }
}

impl std::fmt::Display for DetectorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of one detector evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub detector_id: DetectorId,
    pub risk_score: RiskLevel,
    pub evidence: Vec<String>,
    pub timestamp: DateTime<Utc>,
    /// Set when the detector failed; such results carry no signal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DetectionResult {
    pub fn new(
        detector_id: DetectorId,
        risk_score: RiskLevel,
        evidence: Vec<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            detector_id,
            risk_score,
            evidence,
            timestamp,
            error: None,
        }
    }

    /// A result with no findings.
    pub fn clear(detector_id: DetectorId, timestamp: DateTime<Utc>) -> Self {
        Self::new(detector_id, RiskLevel::None, Vec::new(), timestamp)
    }

    /// A result standing in for a detector that failed.
    pub fn errored(detector_id: DetectorId, error: String, timestamp: DateTime<Utc>) -> Self {
        Self {
            detector_id,
            risk_score: RiskLevel::None,
            evidence: Vec::new(),
            timestamp,
            error: Some(error),
        }
    }

    pub fn is_errored(&self) -> bool {
        self.error.is_some()
    }
}

/// UUIDv7 identifier for risk reports, time-ordered by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReportId(Uuid);

impl ReportId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ReportId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ReportId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Aggregated outcome of one audit pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskReport {
    pub id: ReportId,
    pub results: Vec<DetectionResult>,
    pub overall_risk_level: RiskLevel,
    pub generated_at: DateTime<Utc>,
    /// Sequence number of the history snapshot every result was computed from.
    pub history_seq: u64,
}

impl RiskReport {
    /// The result a given detector contributed, if it ran.
    pub fn result_for(&self, id: DetectorId) -> Option<&DetectionResult> {
        self.results.iter().find(|r| r.detector_id == id)
    }

    /// Results that contribute signal (i.e. did not error).
    pub fn contributing(&self) -> impl Iterator<Item = &DetectionResult> {
        self.results.iter().filter(|r| !r.is_errored())
    }
}

/// Severity of an outgoing alert.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    #[default]
    Info,
    Warning,
    Critical,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }

    /// Alert level for a report whose overall risk is `risk`, if it warrants one.
    pub fn for_risk(risk: RiskLevel) -> Option<Self> {
        match risk {
            RiskLevel::None | RiskLevel::Low => None,
            RiskLevel::Medium => Some(Self::Info),
            RiskLevel::High => Some(Self::Warning),
            RiskLevel::Critical => Some(Self::Critical),
        }
    }
}

impl std::fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A notification bound for the external sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub level: AlertLevel,
    pub message: String,
    pub related_report_id: Option<ReportId>,
    #[serde(rename = "timestamp")]
    pub created_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(level: AlertLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            related_report_id: None,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn for_report(mut self, report_id: ReportId) -> Self {
        self.related_report_id = Some(report_id);
        self
    }
}

/// Append-only record of an incident state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentRecord {
    pub id: Uuid,
    pub trigger_report_id: Option<ReportId>,
    pub from: EmergencyState,
    pub to: EmergencyState,
    pub trigger: String,
    pub response_taken: Vec<String>,
    pub timestamp: DateTime<Utc>,
}
