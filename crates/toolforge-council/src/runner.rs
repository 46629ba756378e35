//! Stage runners.
//!
//! Each validation stage is executed by a [`StageRunner`]: test stages spawn
//! their configured runner as a subprocess with a deadline, metric stages
//! evaluate recorded artifacts against thresholds, and the review stage fans
//! out across reviewer models. A stage whose artifact is missing passes
//! vacuously with the `evaluated` flag cleared.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;

use toolforge::{GenerateRequest, LlmClient, StageOutcome, ToolManifest};

use crate::stage::StageSpec;

/// Executes one validation stage against a manifest.
#[async_trait]
pub trait StageRunner: Send + Sync {
    /// Run the stage; never fails - runner errors become failed outcomes.
    async fn run(&self, stage: &StageSpec, manifest: &ToolManifest) -> StageOutcome;
}

/// Resolve a stage's artifact under the council's artifact root:
/// `{root}/{tool_id}/{artifact}`.
pub fn artifact_path(root: &Path, manifest: &ToolManifest, artifact: &str) -> PathBuf {
    root.join(&manifest.tool_id).join(artifact)
}

/// Runs a test command as a subprocess with a deadline.
///
/// The command is invoked as `{command} {args...} {artifact_path}`. When the
/// last stdout line is a JSON object `{"total": n, "passed": m}`, the pass
/// rate scores the stage; otherwise the exit code decides pass/fail.
pub struct SubprocessRunner {
    command: String,
    args: Vec<String>,
    artifact_root: PathBuf,
    deadline: Duration,
}

impl SubprocessRunner {
    /// Create a runner for a test command.
    pub fn new(command: impl Into<String>, artifact_root: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            artifact_root: artifact_root.into(),
            deadline: Duration::from_secs(120),
        }
    }

    /// Add fixed arguments before the artifact path.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Override the subprocess deadline.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    fn parse_summary(stdout: &str) -> Option<(u64, u64)> {
        let line = stdout.lines().rev().find(|l| !l.trim().is_empty())?;
        let value: serde_json::Value = serde_json::from_str(line.trim()).ok()?;
        Some((value.get("total")?.as_u64()?, value.get("passed")?.as_u64()?))
    }
}

#[async_trait]
impl StageRunner for SubprocessRunner {
    async fn run(&self, stage: &StageSpec, manifest: &ToolManifest) -> StageOutcome {
        let Some(artifact) = &stage.artifact else {
            return StageOutcome::vacuous(&stage.name);
        };
        let path = artifact_path(&self.artifact_root, manifest, artifact);
        if !path.exists() {
            tracing::debug!(stage = %stage.name, path = %path.display(), "no test artifact, vacuous pass");
            return StageOutcome::vacuous(&stage.name);
        }

        let mut command = Command::new(&self.command);
        command
            .args(&self.args)
            .arg(&path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.deadline, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return StageOutcome::errored(&stage.name, format!("failed to spawn {}: {e}", self.command))
            }
            Err(_) => {
                return StageOutcome::errored(
                    &stage.name,
                    format!("{} timed out after {:?}", self.command, self.deadline),
                )
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        let (score, metrics) = match Self::parse_summary(&stdout) {
            Some((total, passed)) if total > 0 => {
                let rate = passed as f64 / total as f64;
                (rate, serde_json::json!({"total": total, "passed": passed, "pass_rate": rate}))
            }
            _ => {
                let score = if output.status.success() { 1.0 } else { 0.0 };
                (score, serde_json::json!({"exit_code": output.status.code()}))
            }
        };

        let success = score >= stage.success_threshold;
        StageOutcome {
            stage: stage.name.clone(),
            success,
            score,
            evaluated: true,
            metrics,
            errors: if success || stderr.is_empty() {
                Vec::new()
            } else {
                vec![stderr.trim().to_string()]
            },
        }
    }
}

/// Evaluates a recorded load-test metrics artifact against thresholds.
pub struct LoadTestRunner {
    artifact_root: PathBuf,
    max_latency_ms_p95: f64,
    max_failure_rate: f64,
}

impl LoadTestRunner {
    /// Runner with the default thresholds (p95 <= 500ms, failures <= 2%).
    pub fn new(artifact_root: impl Into<PathBuf>) -> Self {
        Self {
            artifact_root: artifact_root.into(),
            max_latency_ms_p95: 500.0,
            max_failure_rate: 0.02,
        }
    }
}

#[async_trait]
impl StageRunner for LoadTestRunner {
    async fn run(&self, stage: &StageSpec, manifest: &ToolManifest) -> StageOutcome {
        let Some(artifact) = &stage.artifact else {
            return StageOutcome::vacuous(&stage.name);
        };
        let path = artifact_path(&self.artifact_root, manifest, artifact);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return StageOutcome::vacuous(&stage.name)
            }
            Err(e) => return StageOutcome::errored(&stage.name, e.to_string()),
        };
        let metrics: serde_json::Value = match serde_json::from_slice(&bytes) {
            Ok(v) => v,
            Err(e) => return StageOutcome::errored(&stage.name, format!("bad metrics artifact: {e}")),
        };

        let p95 = metrics
            .get("latency_ms_p95")
            .and_then(|v| v.as_f64())
            .unwrap_or(f64::INFINITY);
        let failure_rate = metrics
            .get("failure_rate")
            .and_then(|v| v.as_f64())
            .unwrap_or(1.0);

        let success = p95 <= self.max_latency_ms_p95 && failure_rate <= self.max_failure_rate;
        StageOutcome {
            stage: stage.name.clone(),
            success,
            score: if success { 1.0 } else { 0.0 },
            evaluated: true,
            metrics,
            errors: Vec::new(),
        }
    }
}

/// Evaluates a static security scan artifact: zero critical findings.
pub struct SecurityScanRunner {
    artifact_root: PathBuf,
}

impl SecurityScanRunner {
    /// Runner over scan result artifacts.
    pub fn new(artifact_root: impl Into<PathBuf>) -> Self {
        Self {
            artifact_root: artifact_root.into(),
        }
    }
}

#[async_trait]
impl StageRunner for SecurityScanRunner {
    async fn run(&self, stage: &StageSpec, manifest: &ToolManifest) -> StageOutcome {
        let Some(artifact) = &stage.artifact else {
            return StageOutcome::vacuous(&stage.name);
        };
        let path = artifact_path(&self.artifact_root, manifest, artifact);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return StageOutcome::vacuous(&stage.name)
            }
            Err(e) => return StageOutcome::errored(&stage.name, e.to_string()),
        };
        let findings: serde_json::Value = match serde_json::from_slice(&bytes) {
            Ok(v) => v,
            Err(e) => return StageOutcome::errored(&stage.name, format!("bad scan artifact: {e}")),
        };

        let critical = findings
            .get("critical_findings")
            .and_then(|v| v.as_u64())
            .unwrap_or(u64::MAX);
        let success = critical == 0;
        StageOutcome {
            stage: stage.name.clone(),
            success,
            score: if success { 1.0 } else { 0.0 },
            evaluated: true,
            metrics: findings,
            errors: Vec::new(),
        }
    }
}

/// Multi-model review: every reviewer model rates each dimension in [0, 1];
/// the stage passes at a mean of 0.7.
pub struct LlmReviewRunner {
    llm: Arc<dyn LlmClient>,
    models: Vec<String>,
    dimensions: Vec<String>,
}

impl LlmReviewRunner {
    /// Reviewer over the given models and the default dimensions.
    pub fn new(llm: Arc<dyn LlmClient>, models: Vec<String>) -> Self {
        Self {
            llm,
            models,
            dimensions: vec![
                "correctness".to_string(),
                "safety".to_string(),
                "resilience".to_string(),
            ],
        }
    }

    fn review_prompt(manifest: &ToolManifest, dimension: &str) -> String {
        let capabilities: Vec<&str> = manifest.capabilities.iter().map(|c| c.name.as_str()).collect();
        format!(
            "Review this tool for {dimension}:\n\nTool: {}\nDescription: {}\nCapabilities: {}\n\n\
             Rate the {dimension} on a scale of 0.0 to 1.0. Respond with just the number.",
            manifest.name,
            manifest.description,
            capabilities.join(", ")
        )
    }
}

#[async_trait]
impl StageRunner for LlmReviewRunner {
    async fn run(&self, stage: &StageSpec, manifest: &ToolManifest) -> StageOutcome {
        if self.models.is_empty() {
            return StageOutcome::vacuous(&stage.name);
        }

        let mut scores = serde_json::Map::new();
        let mut values = Vec::new();
        for dimension in &self.dimensions {
            let mut dimension_scores = Vec::new();
            for model in &self.models {
                let request = GenerateRequest::new(model, Self::review_prompt(manifest, dimension))
                    .with_temperature(0.1);
                let score = match self.llm.generate(request).await {
                    Ok(text) => text.trim().parse::<f64>().map(|s| s.clamp(0.0, 1.0)).unwrap_or(0.5),
                    Err(e) => {
                        tracing::warn!(%model, %dimension, error = %e, "reviewer call failed");
                        0.5
                    }
                };
                dimension_scores.push(score);
            }
            let mean = dimension_scores.iter().sum::<f64>() / dimension_scores.len() as f64;
            scores.insert(dimension.clone(), serde_json::json!(mean));
            values.push(mean);
        }

        let overall = values.iter().sum::<f64>() / values.len() as f64;
        let success = overall >= stage.success_threshold;
        StageOutcome {
            stage: stage.name.clone(),
            success,
            score: overall,
            evaluated: true,
            metrics: serde_json::Value::Object(scores),
            errors: Vec::new(),
        }
    }
}
