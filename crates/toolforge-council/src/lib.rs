//! Validation council.
//!
//! Runs a tool version through ordered validation stages and turns the
//! outcome into a trust assignment:
//!
//! - stages run in order; an erroring stage fails with score 0; a stage
//!   whose artifacts are missing passes vacuously with score 1.0 and the
//!   `evaluated` flag cleared so operators can detect empty passes
//! - the overall validation score is the mean of stage scores
//! - after a fully successful run, trust becomes core at score >= 0.95,
//!   third_party at >= 0.80, experimental below; a failed run downgrades to
//!   experimental
//! - the manifest is rewritten and re-registered on every transition

pub mod runner;
pub mod stage;

use std::collections::HashMap;
use std::sync::Arc;

use toolforge::{
    ForgeError, Result, StageOutcome, ToolManifest, TrustLevel, ValidationReport,
};
use toolforge_registry::Registry;

pub use runner::{
    artifact_path, LlmReviewRunner, LoadTestRunner, SecurityScanRunner, StageRunner,
    SubprocessRunner,
};
pub use stage::{default_stages, StageSpec};

/// Trust level implied by a successful validation score.
pub fn trust_for_score(validation_score: f64) -> TrustLevel {
    if validation_score >= 0.95 {
        TrustLevel::Core
    } else if validation_score >= 0.80 {
        TrustLevel::ThirdParty
    } else {
        TrustLevel::Experimental
    }
}

/// The validation council.
pub struct ValidationCouncil {
    registry: Arc<Registry>,
    runners: HashMap<String, Arc<dyn StageRunner>>,
    stages: Vec<StageSpec>,
}

impl ValidationCouncil {
    /// Create a council with the default stage list and no runners; stages
    /// without a registered runner error (and therefore fail).
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            runners: HashMap::new(),
            stages: default_stages(),
        }
    }

    /// Register a runner under its key.
    pub fn with_runner(mut self, key: impl Into<String>, runner: Arc<dyn StageRunner>) -> Self {
        self.runners.insert(key.into(), runner);
        self
    }

    /// Replace the default stage list.
    pub fn with_stages(mut self, stages: Vec<StageSpec>) -> Self {
        self.stages = stages;
        self
    }

    /// Validate a tool version through the configured (or given) stages,
    /// update its trust, and re-register the manifest.
    pub async fn validate(
        &self,
        tool_id: &str,
        version: &semver::Version,
        stages: Option<&[StageSpec]>,
    ) -> Result<ValidationReport> {
        let manifest = self
            .registry
            .get(tool_id, Some(version))
            .await?
            .ok_or_else(|| ForgeError::VersionNotFound {
                tool_id: tool_id.to_string(),
                version: version.to_string(),
            })?;

        let stages = stages.unwrap_or(&self.stages);
        tracing::info!(tool_id, %version, stages = stages.len(), "validating tool");

        let mut outcomes = Vec::with_capacity(stages.len());
        for stage in stages {
            let outcome = match self.runners.get(&stage.runner) {
                Some(runner) => runner.run(stage, &manifest).await,
                None => StageOutcome::errored(
                    &stage.name,
                    format!("no runner registered for '{}'", stage.runner),
                ),
            };
            if !outcome.success {
                tracing::warn!(tool_id, stage = %outcome.stage, "validation stage failed");
            }
            outcomes.push(outcome);
        }

        let ok = outcomes.iter().all(|o| o.success);
        let validation_score = if outcomes.is_empty() {
            0.0
        } else {
            outcomes.iter().map(|o| o.score).sum::<f64>() / outcomes.len() as f64
        };

        let report = ValidationReport {
            tool_id: tool_id.to_string(),
            version: version.to_string(),
            ok,
            validation_score,
            stages: outcomes,
        };

        self.apply_trust(manifest, &report).await?;
        Ok(report)
    }

    /// Rewrite the manifest's trust state per the report and re-register.
    /// A successful run assigns trust by score band and lowers the risk
    /// score; a failed run downgrades to experimental.
    async fn apply_trust(&self, mut manifest: ToolManifest, report: &ValidationReport) -> Result<()> {
        let old_level = manifest.trust.level;
        let new_level = if report.ok {
            trust_for_score(report.validation_score)
        } else {
            TrustLevel::Experimental
        };

        manifest.trust.level = new_level;
        manifest.trust.validation_score = report.validation_score;
        if report.ok {
            manifest.trust.risk_score = (1.0 - report.validation_score).clamp(0.0, 1.0);
        }

        if old_level != new_level {
            tracing::info!(
                tool_id = %manifest.tool_id,
                from = %old_level,
                to = %new_level,
                "trust level transition"
            );
        }

        self.registry
            .update_correctness(
                &manifest.tool_id,
                &manifest.version.to_string(),
                report.validation_score,
            )
            .await?;
        // update_correctness rewrote the stored manifest; carry its metrics
        // forward so the trust rewrite does not clobber them.
        if let Some(current) = self
            .registry
            .get(&manifest.tool_id, Some(&manifest.version))
            .await?
        {
            manifest.metrics = current.metrics;
        }
        self.registry.reregister_after_validation(manifest).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use toolforge::{CapabilitySpec, ConsensusConfig, Origin};
    use toolforge_registry::{HashEmbedder, InMemoryManifestStore, InMemoryVectorStore};

    /// Runner that returns a fixed outcome.
    struct FixedRunner {
        score: f64,
        success: bool,
    }

    #[async_trait]
    impl StageRunner for FixedRunner {
        async fn run(&self, stage: &StageSpec, _manifest: &ToolManifest) -> StageOutcome {
            StageOutcome {
                stage: stage.name.clone(),
                success: self.success,
                score: self.score,
                evaluated: true,
                metrics: serde_json::Value::Null,
                errors: Vec::new(),
            }
        }
    }

    fn registry() -> Arc<Registry> {
        Arc::new(Registry::new(
            Arc::new(HashEmbedder::default()),
            Arc::new(InMemoryVectorStore::new()),
            Arc::new(InMemoryManifestStore::new()),
            ConsensusConfig::default(),
        ))
    }

    async fn registered(registry: &Registry) -> semver::Version {
        let manifest = ToolManifest::builder()
            .tool_id("parse_cron")
            .version("1.0.0")
            .name("Parse cron")
            .description("parses cron expressions")
            .origin(Origin::external("alice"))
            .capability(CapabilitySpec::new("parse_cron"))
            .build()
            .unwrap();
        registry.register(manifest).await.unwrap();
        semver::Version::new(1, 0, 0)
    }

    fn two_stages() -> Vec<StageSpec> {
        vec![
            StageSpec {
                name: "unit_tests".into(),
                runner: "unit".into(),
                artifact: None,
                success_threshold: 0.95,
            },
            StageSpec {
                name: "security_static".into(),
                runner: "security".into(),
                artifact: None,
                success_threshold: 1.0,
            },
        ]
    }

    #[tokio::test]
    async fn test_successful_run_assigns_trust() {
        let registry = registry();
        let version = registered(&registry).await;
        let council = ValidationCouncil::new(registry.clone())
            .with_stages(two_stages())
            .with_runner("unit", Arc::new(FixedRunner { score: 1.0, success: true }))
            .with_runner("security", Arc::new(FixedRunner { score: 0.96, success: true }));

        let report = council.validate("parse_cron", &version, None).await.unwrap();
        assert!(report.ok);
        assert!((report.validation_score - 0.98).abs() < 1e-9);

        let manifest = registry.get("parse_cron", None).await.unwrap().unwrap();
        assert_eq!(manifest.trust.level, TrustLevel::Core);
        assert!((manifest.trust.risk_score - 0.02).abs() < 1e-9);
        let correctness = manifest.metrics.latest.correctness.unwrap();
        assert!((correctness - 0.98).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_third_party_band() {
        let registry = registry();
        let version = registered(&registry).await;
        let council = ValidationCouncil::new(registry.clone())
            .with_stages(two_stages())
            .with_runner("unit", Arc::new(FixedRunner { score: 0.95, success: true }))
            .with_runner("security", Arc::new(FixedRunner { score: 0.70, success: true }));

        let report = council.validate("parse_cron", &version, None).await.unwrap();
        assert!(report.ok);
        // Mean 0.825 -> third_party.
        let manifest = registry.get("parse_cron", None).await.unwrap().unwrap();
        assert_eq!(manifest.trust.level, TrustLevel::ThirdParty);
    }

    #[tokio::test]
    async fn test_failed_stage_fails_run_and_downgrades() {
        let registry = registry();
        let version = registered(&registry).await;

        // Promote first so the downgrade is observable.
        let council = ValidationCouncil::new(registry.clone())
            .with_stages(two_stages())
            .with_runner("unit", Arc::new(FixedRunner { score: 1.0, success: true }))
            .with_runner("security", Arc::new(FixedRunner { score: 1.0, success: true }));
        council.validate("parse_cron", &version, None).await.unwrap();
        assert_eq!(
            registry.get("parse_cron", None).await.unwrap().unwrap().trust.level,
            TrustLevel::Core
        );

        let failing = ValidationCouncil::new(registry.clone())
            .with_stages(two_stages())
            .with_runner("unit", Arc::new(FixedRunner { score: 0.0, success: false }))
            .with_runner("security", Arc::new(FixedRunner { score: 1.0, success: true }));
        let report = failing.validate("parse_cron", &version, None).await.unwrap();
        assert!(!report.ok);
        assert_eq!(report.failed_stages(), vec!["unit_tests"]);

        let manifest = registry.get("parse_cron", None).await.unwrap().unwrap();
        assert_eq!(manifest.trust.level, TrustLevel::Experimental);
    }

    #[tokio::test]
    async fn test_missing_runner_is_stage_failure() {
        let registry = registry();
        let version = registered(&registry).await;
        let council = ValidationCouncil::new(registry.clone()).with_stages(two_stages());

        let report = council.validate("parse_cron", &version, None).await.unwrap();
        assert!(!report.ok);
        assert_eq!(report.stages.len(), 2);
        assert!(report.stages.iter().all(|s| s.score == 0.0));
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let registry = registry();
        let council = ValidationCouncil::new(registry);
        let result = council
            .validate("missing_tool", &semver::Version::new(1, 0, 0), None)
            .await;
        assert!(matches!(result, Err(ForgeError::VersionNotFound { .. })));
    }

    #[tokio::test]
    async fn test_trust_for_score_bands() {
        assert_eq!(trust_for_score(0.95), TrustLevel::Core);
        assert_eq!(trust_for_score(0.94), TrustLevel::ThirdParty);
        assert_eq!(trust_for_score(0.80), TrustLevel::ThirdParty);
        assert_eq!(trust_for_score(0.79), TrustLevel::Experimental);
    }
}
