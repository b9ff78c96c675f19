//! Policy schema types
//!
//! Every table rejects unknown keys and falls back to the documented
//! default for any key it does not name.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::types::AlertLevel;

/// Top-level keys a policy document may contain.
pub const TOP_LEVEL_KEYS: &[&str] = &[
    "session_caps",
    "humanization",
    "anti_patterns",
    "detection_surfaces",
    "enforcement",
    "emergency",
    "audit",
    "alerts",
];

/// Complete policy configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyConfig {
    pub session_caps: SessionCapsPolicy,
    pub humanization: HumanizationPolicy,
    pub anti_patterns: AntiPatternPolicy,
    pub detection_surfaces: DetectionSurfaces,
    pub enforcement: EnforcementPolicy,
    pub emergency: EmergencyPolicy,
    pub audit: AuditPolicy,
    pub alerts: AlertPolicy,
}

impl PolicyConfig {
    /// Built-in policy used when the configured one cannot be loaded.
    ///
    /// Strict enforcement and full humanization regardless of what the
    /// defaults of individual tables say.
    pub fn conservative() -> Self {
        let mut policy = Self::default();
        policy.enforcement.strict_mode = true;
        policy.humanization.enabled = true;
        policy.anti_patterns.enabled = true;
        policy
    }
}

/// Session length and break scheduling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionCapsPolicy {
    pub max_session_hours: f64,
    /// Minutes of activity between mandatory breaks; 0 disables breaks.
    pub break_interval_minutes: u32,
    pub break_duration_minutes: u32,
}

impl Default for SessionCapsPolicy {
    fn default() -> Self {
        Self {
            max_session_hours: 4.0,
            break_interval_minutes: 90,
            break_duration_minutes: 10,
        }
    }
}

/// Randomized idle/emote/variance injection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HumanizationPolicy {
    pub enabled: bool,
    /// Chance of injecting a humanization action between two real actions
    /// while in the `Normal` state.
    pub base_probability: f64,
    pub actions: Vec<HumanizationAction>,
}

impl Default for HumanizationPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            base_probability: 0.15,
            actions: vec![
                HumanizationAction::new("idle", 0.5, 800, 4_000),
                HumanizationAction::new("emote", 0.2, 300, 1_500),
                HumanizationAction::new("variance", 0.3, 100, 900),
            ],
        }
    }
}

/// One weighted humanization action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HumanizationAction {
    pub name: String,
    pub weight: f64,
    #[serde(default)]
    pub min_delay_ms: u64,
    #[serde(default)]
    pub max_delay_ms: u64,
}

impl HumanizationAction {
    pub fn new(name: &str, weight: f64, min_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            name: name.to_string(),
            weight,
            min_delay_ms,
            max_delay_ms,
        }
    }
}

/// Inline per-event checks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AntiPatternPolicy {
    pub enabled: bool,
    /// More than this many identical kinds in a row is flagged.
    pub max_consecutive_identical: usize,
    /// More than this many identical (rounded) deltas in a row is flagged.
    pub max_identical_timing: usize,
    /// Rounding granularity applied before comparing deltas.
    pub timing_resolution_ms: u64,
    /// Coefficient of variation below which timing is flagged.
    pub min_variance: f64,
    /// Number of trailing deltas the variance check looks at.
    pub variance_window: usize,
}

impl Default for AntiPatternPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_consecutive_identical: 3,
            max_identical_timing: 3,
            timing_resolution_ms: 10,
            min_variance: 0.10,
            variance_window: 10,
        }
    }
}

/// Per-surface detector configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DetectionSurfaces {
    pub identity: IdentitySurface,
    pub macro_cadence: CadenceSurface,
    pub input_timing: CadenceSurface,
    pub session_length: SessionLengthSurface,
    pub network: NetworkSurface,
    pub resource_access: ResourceAccessSurface,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IdentitySurface {
    pub enabled: bool,
    /// Case-insensitive substrings; any hit is critical.
    pub deny_list: Vec<String>,
    /// Case-insensitive substrings; when non-empty, labels matching none are flagged.
    pub allow_list: Vec<String>,
}

impl Default for IdentitySurface {
    fn default() -> Self {
        Self {
            enabled: true,
            deny_list: Vec::new(),
            allow_list: Vec::new(),
        }
    }
}

/// Shared shape of the macro-cadence and input-timing detectors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CadenceSurface {
    pub enabled: bool,
    /// Trailing events considered per audit.
    pub window: usize,
    /// Coefficient-of-variation threshold for grading.
    pub min_variance: f64,
    /// Fewer intervals than this yields no signal.
    pub min_samples: usize,
}

impl Default for CadenceSurface {
    fn default() -> Self {
        Self {
            enabled: true,
            window: 50,
            min_variance: 0.15,
            min_samples: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionLengthSurface {
    pub enabled: bool,
    /// Fraction of the cap after which the session is graded high.
    pub warning_fraction: f64,
}

impl Default for SessionLengthSurface {
    fn default() -> Self {
        Self {
            enabled: true,
            warning_fraction: 0.9,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkSurface {
    pub enabled: bool,
    /// Action kinds counted as outbound requests.
    pub request_kinds: Vec<String>,
    pub soft_rate_per_minute: u32,
    pub hard_rate_per_minute: u32,
}

impl Default for NetworkSurface {
    fn default() -> Self {
        Self {
            enabled: true,
            request_kinds: vec!["request".to_string()],
            soft_rate_per_minute: 40,
            hard_rate_per_minute: 80,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResourceAccessSurface {
    pub enabled: bool,
    /// Action kinds that describe a file or memory access.
    pub access_kinds: Vec<String>,
    /// Regex patterns matched against the access descriptor.
    pub suspicious_patterns: Vec<String>,
    /// Matches within `window_secs` at or above this count grade high.
    pub repeat_threshold: usize,
    pub window_secs: u64,
}

impl Default for ResourceAccessSurface {
    fn default() -> Self {
        Self {
            enabled: true,
            access_kinds: vec!["file_access".to_string(), "memory_access".to_string()],
            suspicious_patterns: vec![
                r"(?i)/proc/\d+/mem$".to_string(),
                r"(?i)\breadprocessmemory\b".to_string(),
                r"(?i)\.(dmp|mdmp)$".to_string(),
            ],
            repeat_threshold: 3,
            window_secs: 300,
        }
    }
}

/// Enforcement posture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EnforcementPolicy {
    pub strict_mode: bool,
    /// Operations subject to risk gating. Everything else is allowed unless locked.
    pub sensitive_operations: Vec<String>,
}

impl Default for EnforcementPolicy {
    fn default() -> Self {
        Self {
            strict_mode: true,
            sensitive_operations: vec![
                "trade".to_string(),
                "transfer".to_string(),
                "purchase".to_string(),
            ],
        }
    }
}

/// Incident state machine timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EmergencyPolicy {
    /// Quiet period after which a state regresses one level.
    pub cooldown_secs: u64,
    /// Window in which repeated inline flags escalate to `Critical`.
    pub repeat_flag_window_secs: u64,
    pub repeat_flag_count: usize,
}

impl Default for EmergencyPolicy {
    fn default() -> Self {
        Self {
            cooldown_secs: 600,
            repeat_flag_window_secs: 120,
            repeat_flag_count: 2,
        }
    }
}

/// Scheduled audit and audit-log settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuditPolicy {
    pub interval_secs: u64,
    /// Action events retained for detectors.
    pub history_capacity: usize,
    /// Audit-log location; defaults to the warden data directory.
    pub log_path: Option<PathBuf>,
    /// Consecutive failed writes before a warning alert is raised.
    pub max_write_failures: u32,
    /// Entries kept in memory while the audit log is unwritable.
    pub fallback_capacity: usize,
}

impl Default for AuditPolicy {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            history_capacity: 128,
            log_path: None,
            max_write_failures: 3,
            fallback_capacity: 1_024,
        }
    }
}

/// Alert egress settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AlertPolicy {
    pub enabled: bool,
    pub webhook_url: Option<String>,
    /// Alerts below this level are dropped.
    pub min_level: AlertLevel,
    pub dedup_window_secs: u64,
    pub max_per_minute: u32,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub timeout_secs: u64,
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            webhook_url: None,
            min_level: AlertLevel::Info,
            dedup_window_secs: 60,
            max_per_minute: 30,
            max_retries: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
            timeout_secs: 10,
        }
    }
}
