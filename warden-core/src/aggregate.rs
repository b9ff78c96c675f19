//! Risk aggregation strategies.

use chrono::{DateTime, Utc};

use crate::types::{DetectionResult, ReportId, RiskLevel, RiskReport};

/// Folds detector results into one overall risk level.
///
/// Errored results must never contribute.
pub trait RiskAggregator: Send + Sync {
    fn aggregate(&self, results: &[DetectionResult]) -> RiskLevel;
}

/// Overall risk is the maximum of the contributing results.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaxRiskAggregator;

impl RiskAggregator for MaxRiskAggregator {
    fn aggregate(&self, results: &[DetectionResult]) -> RiskLevel {
        results
            .iter()
            .filter(|r| !r.is_errored())
            .map(|r| r.risk_score)
            .max()
            .unwrap_or(RiskLevel::None)
    }
}

/// Assemble a report from results computed against history sequence `history_seq`.
pub fn build_report(
    results: Vec<DetectionResult>,
    aggregator: &dyn RiskAggregator,
    history_seq: u64,
    generated_at: DateTime<Utc>,
) -> RiskReport {
    let overall_risk_level = aggregator.aggregate(&results);
    RiskReport {
        id: ReportId::new(),
        results,
        overall_risk_level,
        generated_at,
        history_seq,
    }
}
