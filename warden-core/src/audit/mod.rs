//! Append-only audit log
//!
//! One JSON object per line: a `report` entry per completed audit and an
//! `incident` entry per emergency state transition. Entries are never
//! rewritten or deleted by the engine.

mod jsonl;
mod memory;
mod writer;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use jsonl::JsonlAuditLog;
pub use memory::MemoryAuditLog;
pub use writer::{AuditWriter, FailSafe, halt_process};

use crate::error::AuditLogError;
use crate::types::{IncidentRecord, RiskReport};

/// One line of the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEntry {
    Report(RiskReport),
    Incident(IncidentRecord),
}

impl AuditEntry {
    pub fn as_report(&self) -> Option<&RiskReport> {
        match self {
            Self::Report(report) => Some(report),
            Self::Incident(_) => None,
        }
    }

    pub fn as_incident(&self) -> Option<&IncidentRecord> {
        match self {
            Self::Incident(record) => Some(record),
            Self::Report(_) => None,
        }
    }
}

/// Durable, append-only destination for audit entries.
#[async_trait]
pub trait AuditLog: Send + Sync {
    /// Append one entry; returns only once it is durable.
    async fn append(&self, entry: &AuditEntry) -> Result<(), AuditLogError>;

    /// Every entry, oldest first.
    async fn read_all(&self) -> Result<Vec<AuditEntry>, AuditLogError>;

    /// The newest `n` entries, oldest first.
    async fn tail(&self, n: usize) -> Result<Vec<AuditEntry>, AuditLogError> {
        let mut entries = self.read_all().await?;
        let skip = entries.len().saturating_sub(n);
        Ok(entries.split_off(skip))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emergency::EmergencyState;
    use crate::types::{ReportId, RiskLevel};
    use chrono::Utc;

    #[test]
    fn test_entry_tagged_by_type() {
        let report = AuditEntry::Report(RiskReport {
            id: ReportId::new(),
            results: vec![],
            overall_risk_level: RiskLevel::Low,
            generated_at: Utc::now(),
            history_seq: 12,
        });
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["type"], "report");
        assert_eq!(json["overall_risk_level"], "low");
        assert_eq!(json["history_seq"], 12);

        let incident = AuditEntry::Incident(IncidentRecord {
            id: uuid::Uuid::now_v7(),
            trigger_report_id: None,
            from: EmergencyState::Critical,
            to: EmergencyState::Locked,
            trigger: "host signalled compromise".into(),
            response_taken: vec!["halt_actions".into()],
            timestamp: Utc::now(),
        });
        let line = serde_json::to_string(&incident).unwrap();
        assert!(line.contains(r#""type":"incident""#));
        let parsed: AuditEntry = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed, incident);
    }
}
