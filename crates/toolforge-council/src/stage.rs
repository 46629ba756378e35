//! Validation stage specifications.

use serde::{Deserialize, Serialize};

/// Configuration of one validation stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSpec {
    /// Stage name, unique within a run.
    pub name: String,
    /// Runner key this stage dispatches to.
    pub runner: String,
    /// Artifact reference relative to the artifact root, when the stage
    /// consumes one.
    #[serde(default)]
    pub artifact: Option<String>,
    /// Score the stage must reach to pass.
    pub success_threshold: f64,
}

/// The default ordered stages:
///
/// 1. BDD acceptance (pass/fail, threshold 1.0)
/// 2. Unit tests (pass rate >= 0.95)
/// 3. Load test (p95 <= 500ms, failure rate <= 0.02)
/// 4. Static security scan (zero critical findings)
/// 5. Multi-LLM review (mean dimension score >= 0.7)
pub fn default_stages() -> Vec<StageSpec> {
    vec![
        StageSpec {
            name: "bdd_acceptance".into(),
            runner: "bdd".into(),
            artifact: Some("tests/acceptance".into()),
            success_threshold: 1.0,
        },
        StageSpec {
            name: "unit_tests".into(),
            runner: "unit".into(),
            artifact: Some("tests/unit".into()),
            success_threshold: 0.95,
        },
        StageSpec {
            name: "load_tests".into(),
            runner: "load".into(),
            artifact: Some("load/metrics.json".into()),
            success_threshold: 1.0,
        },
        StageSpec {
            name: "security_static".into(),
            runner: "security".into(),
            artifact: Some("security/scan.json".into()),
            success_threshold: 1.0,
        },
        StageSpec {
            name: "llm_consensus_review".into(),
            runner: "review".into(),
            artifact: None,
            success_threshold: 0.7,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_stage_order() {
        let stages = default_stages();
        let names: Vec<&str> = stages.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "bdd_acceptance",
                "unit_tests",
                "load_tests",
                "security_static",
                "llm_consensus_review"
            ]
        );
    }

    #[test]
    fn test_thresholds() {
        let stages = default_stages();
        assert_eq!(stages[0].success_threshold, 1.0);
        assert_eq!(stages[1].success_threshold, 0.95);
        assert_eq!(stages[4].success_threshold, 0.7);
    }
}
