//! Validation outcome types.
//!
//! Produced by the validation council and consumed by the consensus engine
//! (correctness and safety dimensions) and the Director (terminal
//! validation failures).

use serde::{Deserialize, Serialize};

/// Outcome of one validation stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutcome {
    /// Stage name (e.g. "unit_tests", "security_static").
    pub stage: String,
    /// Whether the stage passed its threshold.
    pub success: bool,
    /// Stage score in [0, 1].
    pub score: f64,
    /// Whether the stage actually ran. A stage whose test artifacts were
    /// missing passes vacuously with score 1.0 and `evaluated = false`, so
    /// operators can tell "passed" from "not evaluated".
    pub evaluated: bool,
    /// Runner-specific metrics.
    #[serde(default)]
    pub metrics: serde_json::Value,
    /// Errors reported by the runner.
    #[serde(default)]
    pub errors: Vec<String>,
}

impl StageOutcome {
    /// A stage that passed vacuously because its artifacts were missing.
    pub fn vacuous(stage: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            success: true,
            score: 1.0,
            evaluated: false,
            metrics: serde_json::Value::Null,
            errors: Vec::new(),
        }
    }

    /// A stage that errored before producing a score.
    pub fn errored(stage: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            success: false,
            score: 0.0,
            evaluated: true,
            metrics: serde_json::Value::Null,
            errors: vec![error.into()],
        }
    }
}

/// Result of a full validation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Tool identifier.
    pub tool_id: String,
    /// Tool version string.
    pub version: String,
    /// Whether every stage passed.
    pub ok: bool,
    /// Mean stage score in [0, 1].
    pub validation_score: f64,
    /// Per-stage outcomes, in stage order.
    pub stages: Vec<StageOutcome>,
}

impl ValidationReport {
    /// Names of failed stages.
    pub fn failed_stages(&self) -> Vec<String> {
        self.stages
            .iter()
            .filter(|s| !s.success)
            .map(|s| s.stage.clone())
            .collect()
    }

    /// Names of stages that passed without being evaluated.
    pub fn unevaluated_stages(&self) -> Vec<String> {
        self.stages
            .iter()
            .filter(|s| s.success && !s.evaluated)
            .map(|s| s.stage.clone())
            .collect()
    }

    /// Mean score of stages whose name mentions security or safety, when any
    /// such stage exists.
    pub fn safety_score(&self) -> Option<f64> {
        let scores: Vec<f64> = self
            .stages
            .iter()
            .filter(|s| s.stage.contains("security") || s.stage.contains("safety"))
            .map(|s| s.score)
            .collect();
        if scores.is_empty() {
            None
        } else {
            Some(scores.iter().sum::<f64>() / scores.len() as f64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(stages: Vec<StageOutcome>) -> ValidationReport {
        let score = if stages.is_empty() {
            0.0
        } else {
            stages.iter().map(|s| s.score).sum::<f64>() / stages.len() as f64
        };
        ValidationReport {
            tool_id: "t".into(),
            version: "1.0.0".into(),
            ok: stages.iter().all(|s| s.success),
            validation_score: score,
            stages,
        }
    }

    #[test]
    fn test_vacuous_flagged() {
        let r = report(vec![StageOutcome::vacuous("unit_tests")]);
        assert!(r.ok);
        assert_eq!(r.unevaluated_stages(), vec!["unit_tests"]);
    }

    #[test]
    fn test_safety_score_matches_by_name() {
        let r = report(vec![
            StageOutcome {
                stage: "security_static".into(),
                success: true,
                score: 0.9,
                evaluated: true,
                metrics: serde_json::Value::Null,
                errors: Vec::new(),
            },
            StageOutcome {
                stage: "safety_review".into(),
                success: true,
                score: 0.7,
                evaluated: true,
                metrics: serde_json::Value::Null,
                errors: Vec::new(),
            },
            StageOutcome::vacuous("unit_tests"),
        ]);
        assert!((r.safety_score().unwrap() - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_safety_score_absent() {
        let r = report(vec![StageOutcome::vacuous("unit_tests")]);
        assert!(r.safety_score().is_none());
    }

    #[test]
    fn test_failed_stages() {
        let r = report(vec![
            StageOutcome::vacuous("bdd_acceptance"),
            StageOutcome::errored("unit_tests", "3 of 10 tests failed"),
        ]);
        assert!(!r.ok);
        assert_eq!(r.failed_stages(), vec!["unit_tests"]);
    }
}
