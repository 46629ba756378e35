//! Scoring and execution records.
//!
//! [`ConsensusScore`] is an immutable record of one scoring event; the
//! consensus engine appends them and never rewrites. [`ExecutionRecord`] is
//! the provenance-side view of one invocation; [`ExecutionSample`] is the
//! compact form kept in a manifest's bounded window.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The five scoring dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Correctness,
    Latency,
    Cost,
    Safety,
    Resilience,
}

impl Dimension {
    /// All dimensions in table order.
    pub const ALL: [Dimension; 5] = [
        Dimension::Correctness,
        Dimension::Latency,
        Dimension::Cost,
        Dimension::Safety,
        Dimension::Resilience,
    ];

    /// Stable snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Correctness => "correctness",
            Dimension::Latency => "latency",
            Dimension::Cost => "cost",
            Dimension::Safety => "safety",
            Dimension::Resilience => "resilience",
        }
    }
}

impl std::fmt::Display for Dimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One evaluator's contribution to an aggregated weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluatorContribution {
    /// Evaluator identifier, `source_dimension` (e.g. "execution_latency").
    pub id: String,
    /// Raw dimension value in [0, 1].
    pub value: f64,
    /// Weighted contribution to the aggregate.
    pub contribution: f64,
}

/// An immutable record of one scoring event for a tool version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusScore {
    /// Tool identifier.
    pub tool_id: String,
    /// Tool version string.
    pub version: String,
    /// Per-dimension scores in [0, 1].
    pub scores: BTreeMap<Dimension, f64>,
    /// Aggregated weight in [0, 1].
    pub weight: f64,
    /// Contributing evaluators.
    pub evaluators: Vec<EvaluatorContribution>,
    /// When the scoring event happened.
    pub timestamp: DateTime<Utc>,
}

impl ConsensusScore {
    /// Age of this record in whole days relative to `now`.
    pub fn age_days(&self, now: DateTime<Utc>) -> f64 {
        let age = now.signed_duration_since(self.timestamp);
        age.num_milliseconds().max(0) as f64 / (1000.0 * 60.0 * 60.0 * 24.0)
    }
}

/// Compact execution sample kept in a manifest's bounded window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSample {
    /// When the call finished.
    pub timestamp: DateTime<Utc>,
    /// Wall-clock latency in milliseconds.
    pub latency_ms: f64,
    /// Whether the call succeeded.
    pub success: bool,
    /// Cost of the call, when the cost tracker reported one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

impl ExecutionSample {
    /// Create a sample stamped now.
    pub fn new(latency_ms: f64, success: bool) -> Self {
        Self {
            timestamp: Utc::now(),
            latency_ms,
            success,
            cost: None,
        }
    }
}

/// Metrics returned by the runtime for one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallMetrics {
    /// Wall-clock latency in milliseconds.
    pub latency_ms: f64,
    /// Whether the call succeeded.
    pub success: bool,
    /// When the call finished.
    pub timestamp: DateTime<Utc>,
}

impl CallMetrics {
    /// Convert to the compact manifest-window form.
    pub fn as_sample(&self) -> ExecutionSample {
        ExecutionSample {
            timestamp: self.timestamp,
            latency_ms: self.latency_ms,
            success: self.success,
            cost: None,
        }
    }
}

/// One tool invocation as recorded by the runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// 16-hex call identifier.
    pub call_id: String,
    /// Tool identifier.
    pub tool_id: String,
    /// Tool version string.
    pub version: String,
    /// SHA-256 of the stable-JSON input.
    pub input_hash: String,
    /// SHA-256 of the stable-JSON result (or its string form).
    pub result_hash: Option<String>,
    /// When dispatch started.
    pub started_at: DateTime<Utc>,
    /// When the call finished.
    pub finished_at: DateTime<Utc>,
    /// Wall-clock latency in milliseconds.
    pub latency_ms: f64,
    /// Whether the call succeeded.
    pub success: bool,
    /// Error kind when the call failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_age_days() {
        let score = ConsensusScore {
            tool_id: "t".into(),
            version: "1.0.0".into(),
            scores: BTreeMap::new(),
            weight: 0.5,
            evaluators: Vec::new(),
            timestamp: Utc::now() - chrono::Duration::days(30),
        };
        let age = score.age_days(Utc::now());
        assert!((age - 30.0).abs() < 0.01);
    }

    #[test]
    fn test_age_never_negative() {
        let score = ConsensusScore {
            tool_id: "t".into(),
            version: "1.0.0".into(),
            scores: BTreeMap::new(),
            weight: 0.5,
            evaluators: Vec::new(),
            timestamp: Utc::now() + chrono::Duration::days(1),
        };
        assert_eq!(score.age_days(Utc::now()), 0.0);
    }

    #[test]
    fn test_dimension_serde_names() {
        let json = serde_json::to_string(&Dimension::Correctness).unwrap();
        assert_eq!(json, "\"correctness\"");
    }
}
