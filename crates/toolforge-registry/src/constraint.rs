//! Constraint filtering for discovery queries.

use serde::{Deserialize, Serialize};

use toolforge::ToolManifest;

/// Performance and quality constraints attached to a query or intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct QueryConstraints {
    /// Reject manifests whose latest p95 latency exceeds this (missing
    /// metrics count as infinite).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms_p95: Option<f64>,
    /// Reject manifests whose risk score exceeds this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_score: Option<f64>,
    /// Reject manifests whose latest correctness is below this (missing
    /// metrics count as zero).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correctness: Option<f64>,
    /// Cost ceiling; influences scoring weights, not filtering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cost_per_call: Option<f64>,
}

impl QueryConstraints {
    /// Whether no constraint is set.
    pub fn is_empty(&self) -> bool {
        self.latency_ms_p95.is_none()
            && self.risk_score.is_none()
            && self.correctness.is_none()
            && self.max_cost_per_call.is_none()
    }

    /// Whether a manifest satisfies every filtering constraint.
    pub fn accepts(&self, manifest: &ToolManifest) -> bool {
        if let Some(threshold) = self.latency_ms_p95 {
            let p95 = manifest.metrics.latest.latency_ms_p95.unwrap_or(f64::INFINITY);
            if p95 > threshold {
                return false;
            }
        }
        if let Some(threshold) = self.risk_score {
            if manifest.trust.risk_score > threshold {
                return false;
            }
        }
        if let Some(threshold) = self.correctness {
            let correctness = manifest.metrics.latest.correctness.unwrap_or(0.0);
            if correctness < threshold {
                return false;
            }
        }
        true
    }

    /// Whether the risk target is strict enough to reweight safety.
    pub fn strict_risk(&self) -> bool {
        self.risk_score.is_some_and(|r| r < 0.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolforge::{ExecutionSample, Origin, ToolManifest};

    fn manifest_with_p95(p95: Option<f64>) -> ToolManifest {
        let mut manifest = ToolManifest::builder()
            .tool_id("summarize_pdf")
            .version("1.0.0")
            .name("Summarize PDF")
            .description("summarizes documents")
            .origin(Origin::external("alice"))
            .build()
            .unwrap();
        if let Some(p95) = p95 {
            // Single successful sample puts mean == p95 == latency.
            manifest.metrics.record(ExecutionSample::new(p95, true));
        }
        manifest
    }

    #[test]
    fn test_latency_boundary_inclusive() {
        let constraints = QueryConstraints {
            latency_ms_p95: Some(500.0),
            ..Default::default()
        };
        assert!(constraints.accepts(&manifest_with_p95(Some(500.0))));
        assert!(!constraints.accepts(&manifest_with_p95(Some(500.1))));
    }

    #[test]
    fn test_missing_latency_is_infinite() {
        let constraints = QueryConstraints {
            latency_ms_p95: Some(500.0),
            ..Default::default()
        };
        assert!(!constraints.accepts(&manifest_with_p95(None)));
    }

    #[test]
    fn test_missing_correctness_is_zero() {
        let constraints = QueryConstraints {
            correctness: Some(0.5),
            ..Default::default()
        };
        assert!(!constraints.accepts(&manifest_with_p95(Some(100.0))));
    }

    #[test]
    fn test_risk_filter() {
        let constraints = QueryConstraints {
            risk_score: Some(0.5),
            ..Default::default()
        };
        // Fresh manifests carry risk 1.0.
        assert!(!constraints.accepts(&manifest_with_p95(None)));
    }

    #[test]
    fn test_strict_risk() {
        assert!(QueryConstraints {
            risk_score: Some(0.05),
            ..Default::default()
        }
        .strict_risk());
        assert!(!QueryConstraints {
            risk_score: Some(0.5),
            ..Default::default()
        }
        .strict_risk());
    }
}
