//! warden-core: behavioral-compliance engine for automated agents
//!
//! The host agent reports every discrete action to an [`AuditEngine`]. The
//! engine keeps a bounded action history, checks each new action inline
//! against anti-patterns, runs a set of detectors on a schedule, and turns
//! their results into a [`RiskReport`]. Reports and inline flags drive an
//! incident state machine (`Normal -> Suspicious -> Critical -> Locked`)
//! whose state gates sensitive operations through [`AuditEngine::allow`].
//!
//! - **History** - [`ActionHistory`], a bounded ring buffer with snapshots
//! - **Inline monitor** - [`AntiPatternMonitor`], repetition and timing checks
//! - **Detectors** - [`detectors::Detector`] implementations per surface
//! - **Aggregation** - [`RiskAggregator`], max-risk by default
//! - **Enforcement** - [`EnforcementController`], strict or lenient gating
//! - **Emergency** - [`EmergencyResponseController`], the incident state machine
//! - **Humanization** - [`HumanizationEngine`], weighted idle/emote injection
//! - **Egress** - [`AlertSystem`] and the append-only [`audit::AuditLog`]
//!
//! # Quick Start
//!
//! ```no_run
//! use chrono::Utc;
//! use warden_core::{AuditEngine, PolicyConfig};
//!
//! # async fn example() -> warden_core::Result<()> {
//! let engine = AuditEngine::new(PolicyConfig::default())?;
//! engine.start().await;
//!
//! let verdict = engine.record("mine", Utc::now(), Default::default())?;
//! if verdict.is_flagged() {
//!     println!("anti-pattern: {:?}", verdict.result.evidence);
//! }
//! if engine.allow("trade") {
//!     // perform the sensitive operation
//! }
//!
//! engine.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod aggregate;
pub mod alerts;
pub mod audit;
pub mod config;
pub mod detectors;
pub mod emergency;
pub mod enforcement;
pub mod engine;
pub mod error;
pub mod history;
pub mod humanize;
pub mod monitor;
pub mod rate_limit;
pub mod runner;
pub mod session;
pub mod stats;
pub mod types;

// Re-export key types for convenience
pub use aggregate::{MaxRiskAggregator, RiskAggregator, build_report};
pub use alerts::{AlertSink, AlertSystem, DispatchOutcome, FailedAlert, LogSink, WebhookSink};
pub use audit::{AuditEntry, AuditLog, JsonlAuditLog, MemoryAuditLog};
pub use config::{
    ConfigError, LoadedPolicy, PolicyConfig, load_policy_from_file, load_policy_or_conservative,
    parse_policy, validate_policy,
};
pub use emergency::{EmergencyResponseController, EmergencyState, ResponseAction, Transition};
pub use enforcement::{Decision, DenyReason, EnforcementController};
pub use engine::{AuditEngine, AuditEngineBuilder};
pub use error::{AlertError, AuditLogError, DetectorError, Result, WardenError};
pub use history::{ActionHistory, HistorySnapshot};
pub use humanize::{HumanizationEngine, HumanizedAction, Pacing};
pub use monitor::{AntiPatternMonitor, MonitorVerdict, PatternFlag};
pub use rate_limit::RateLimiter;
pub use runner::RunnerState;
pub use session::{SessionManager, SessionState};
pub use types::{
    ActionEvent, Alert, AlertLevel, DetectionResult, DetectorId, IncidentRecord, ReportId,
    RiskLevel, RiskReport,
};
