//! Workflow characterization and specialization.
//!
//! Runs each candidate variant of a workflow's tasks several times through a
//! [`VariantRunner`], aggregates the measurements, picks the best variant
//! per task by a weighted score, and evaluates specialization triggers.
//! Also plans replacements before a trim archives a variant that recorded
//! workflows still reference.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use toolforge::Result;

use crate::cluster::OptimizationCluster;
use crate::trimming::{TrimReport, TrimmingPolicy};
use crate::variant::{ArtifactVariant, FitnessWeights};

/// One measured run of a variant.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantRunOutcome {
    /// Wall-clock latency in milliseconds.
    pub latency_ms: f64,
    /// Whether the run succeeded.
    pub success: bool,
    /// Correctness of the output, when measurable.
    pub correctness: Option<f64>,
    /// Cost of the run, when tracked.
    pub cost: Option<f64>,
}

/// Executes a tool variant for characterization. The sandboxed runtime
/// stands behind this seam in production wiring.
#[async_trait]
pub trait VariantRunner: Send + Sync {
    /// Run a variant once with the given input.
    async fn run_variant(
        &self,
        tool_id: &str,
        version: &str,
        input: serde_json::Value,
    ) -> Result<VariantRunOutcome>;
}

/// A candidate variant for a workflow task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCandidate {
    /// Tool identifier.
    pub tool_id: String,
    /// Version expression (usually exact).
    pub version: String,
    /// Variant tag for reporting.
    #[serde(default = "default_variant_tag")]
    pub variant_tag: String,
}

fn default_variant_tag() -> String {
    "default".to_string()
}

/// One task of a workflow with its candidate variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTask {
    /// Task identifier.
    pub id: String,
    /// Role of the task in the workflow.
    pub role: String,
    /// Candidate variants to characterize.
    pub candidates: Vec<ToolCandidate>,
}

/// Aggregated characterization metrics for one variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CharacterizationMetrics {
    pub correctness: f64,
    pub latency_ms_p50: f64,
    pub latency_ms_p95: f64,
    pub cost_per_call: f64,
    pub failure_rate: f64,
}

/// Characterization of one variant over several runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantCharacterization {
    pub tool_id: String,
    pub version: String,
    pub variant_tag: String,
    pub metrics: CharacterizationMetrics,
    pub run_count: usize,
    pub success_rate: f64,
}

impl VariantCharacterization {
    /// Weighted score: correctness 0.35, p95 latency 0.30, cost 0.15,
    /// reliability 0.20.
    pub fn score(&self) -> f64 {
        let m = &self.metrics;
        let score = m.correctness * 0.35
            + (1.0 - (m.latency_ms_p95 / 1000.0).min(1.0)) * 0.30
            + (1.0 - (m.cost_per_call / 0.01).min(1.0)) * 0.15
            + (1.0 - m.failure_rate) * 0.20;
        score.clamp(0.0, 1.0)
    }
}

/// Comparison operator in a trigger predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerOp {
    Gte,
    Lte,
    Gt,
    Lt,
}

/// One predicate over a characterization metric.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricPredicate {
    /// Metric name: correctness, latency_ms_p50, latency_ms_p95,
    /// cost_per_call, failure_rate.
    pub metric: String,
    /// Comparison.
    pub op: TriggerOp,
    /// Threshold.
    pub value: f64,
}

impl MetricPredicate {
    fn holds(&self, metrics: &CharacterizationMetrics) -> bool {
        let actual = match self.metric.as_str() {
            "correctness" => metrics.correctness,
            "latency_ms_p50" => metrics.latency_ms_p50,
            "latency_ms_p95" => metrics.latency_ms_p95,
            "cost_per_call" => metrics.cost_per_call,
            "failure_rate" => metrics.failure_rate,
            _ => return false,
        };
        match self.op {
            TriggerOp::Gte => actual >= self.value,
            TriggerOp::Lte => actual <= self.value,
            TriggerOp::Gt => actual > self.value,
            TriggerOp::Lt => actual < self.value,
        }
    }
}

/// Condition for creating a specialized variant: every predicate must hold
/// for one characterized candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecializationTrigger {
    /// All predicates that must hold.
    pub conditions: Vec<MetricPredicate>,
    /// Action label (e.g. "fork_with_tags").
    pub action: String,
    /// Tags for the specialized variant.
    pub variant_tags: Vec<String>,
}

/// A specialization created by a satisfied trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Specialization {
    pub action: String,
    pub variant_tags: Vec<String>,
    pub source_tasks: Vec<String>,
    pub created_at: chrono::DateTime<Utc>,
}

/// The best variant selected for one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BestVariant {
    pub tool_id: String,
    pub version: String,
    pub variant_tag: String,
    pub score: f64,
}

/// Result of one workflow optimization pass.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowOptimization {
    pub workflow_id: String,
    pub best_variants: BTreeMap<String, BestVariant>,
    pub specializations: Vec<Specialization>,
    pub characterizations: Vec<(String, VariantCharacterization)>,
}

/// Characterizes workflow task candidates through a [`VariantRunner`].
pub struct WorkflowOptimizer {
    runner: Arc<dyn VariantRunner>,
}

impl WorkflowOptimizer {
    /// Create an optimizer over a runner.
    pub fn new(runner: Arc<dyn VariantRunner>) -> Self {
        Self { runner }
    }

    /// Characterize all candidates, select the best per task, and evaluate
    /// specialization triggers.
    pub async fn optimize_workflow(
        &self,
        workflow_id: &str,
        tasks: &[WorkflowTask],
        run_count: usize,
        triggers: &[SpecializationTrigger],
    ) -> Result<WorkflowOptimization> {
        tracing::info!(workflow_id, tasks = tasks.len(), run_count, "optimizing workflow");

        let mut characterizations: Vec<(String, VariantCharacterization)> = Vec::new();
        for task in tasks {
            for candidate in &task.candidates {
                let characterization = self.characterize(candidate, run_count).await;
                characterizations.push((task.id.clone(), characterization));
            }
        }

        let mut best_variants = BTreeMap::new();
        for task in tasks {
            let best = characterizations
                .iter()
                .filter(|(task_id, _)| task_id == &task.id)
                .max_by(|(_, a), (_, b)| {
                    a.score().partial_cmp(&b.score()).unwrap_or(std::cmp::Ordering::Equal)
                });
            if let Some((_, characterization)) = best {
                best_variants.insert(
                    task.id.clone(),
                    BestVariant {
                        tool_id: characterization.tool_id.clone(),
                        version: characterization.version.clone(),
                        variant_tag: characterization.variant_tag.clone(),
                        score: characterization.score(),
                    },
                );
            }
        }

        let mut specializations = Vec::new();
        for trigger in triggers {
            let satisfied = characterizations.iter().any(|(_, characterization)| {
                trigger
                    .conditions
                    .iter()
                    .all(|predicate| predicate.holds(&characterization.metrics))
            });
            if satisfied {
                tracing::info!(action = %trigger.action, "specialization trigger met");
                specializations.push(Specialization {
                    action: trigger.action.clone(),
                    variant_tags: trigger.variant_tags.clone(),
                    source_tasks: best_variants.keys().cloned().collect(),
                    created_at: Utc::now(),
                });
            }
        }

        Ok(WorkflowOptimization {
            workflow_id: workflow_id.to_string(),
            best_variants,
            specializations,
            characterizations,
        })
    }

    async fn characterize(
        &self,
        candidate: &ToolCandidate,
        run_count: usize,
    ) -> VariantCharacterization {
        let mut latencies = Vec::new();
        let mut correctness_values = Vec::new();
        let mut costs = Vec::new();
        let mut successes = 0usize;

        for i in 0..run_count {
            let input = serde_json::json!({"test_input": format!("characterization_run_{i}")});
            match self
                .runner
                .run_variant(&candidate.tool_id, &candidate.version, input)
                .await
            {
                Ok(outcome) if outcome.success => {
                    successes += 1;
                    latencies.push(outcome.latency_ms);
                    correctness_values.push(outcome.correctness.unwrap_or(0.5));
                    if let Some(cost) = outcome.cost {
                        costs.push(cost);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(
                        tool_id = %candidate.tool_id,
                        run = i,
                        error = %e,
                        "characterization run failed"
                    );
                }
            }
        }

        let metrics = if latencies.is_empty() {
            CharacterizationMetrics {
                failure_rate: 1.0,
                ..Default::default()
            }
        } else {
            latencies.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            CharacterizationMetrics {
                correctness: mean(&correctness_values),
                latency_ms_p50: percentile(&latencies, 0.50),
                latency_ms_p95: percentile(&latencies, 0.95),
                cost_per_call: if costs.is_empty() { 0.0 } else { mean(&costs) },
                failure_rate: 1.0 - successes as f64 / run_count.max(1) as f64,
            }
        };

        VariantCharacterization {
            tool_id: candidate.tool_id.clone(),
            version: candidate.version.clone(),
            variant_tag: candidate.variant_tag.clone(),
            metrics,
            run_count,
            success_rate: successes as f64 / run_count.max(1) as f64,
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Percentile over sorted values.
fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() as f64 * q).ceil() as usize).clamp(1, sorted.len()) - 1;
    sorted[idx]
}

// ---------------------------------------------------------------------------
// Safe trimming with replacement planning
// ---------------------------------------------------------------------------

/// Replacement plan for one trimmed variant that still has dependents.
#[derive(Debug, Clone, Serialize)]
pub struct ReplacementPlan {
    /// The variant being archived.
    pub trimmed_variant_id: String,
    /// The surviving variant its dependents should move to.
    pub replacement_variant_id: String,
    /// Workflows referencing the trimmed variant.
    pub dependents: Vec<String>,
}

/// Find the closest surviving replacement for a variant: nearest higher
/// semver in the same line first, then nearest lower, then fittest.
pub fn find_closest_replacement<'a>(
    survivors: &'a [ArtifactVariant],
    target: &ArtifactVariant,
    weights: &FitnessWeights,
) -> Option<&'a ArtifactVariant> {
    let same_line: Vec<&ArtifactVariant> = survivors
        .iter()
        .filter(|v| v.artifact_id == target.artifact_id && v.variant_id != target.variant_id)
        .collect();
    if same_line.is_empty() {
        return None;
    }

    if let Some(target_version) = target.semver() {
        let mut higher: Vec<&ArtifactVariant> = same_line
            .iter()
            .copied()
            .filter(|v| v.semver().is_some_and(|ver| ver > target_version))
            .collect();
        higher.sort_by_key(|v| v.semver());
        if let Some(closest) = higher.first().copied() {
            return Some(closest);
        }

        let mut lower: Vec<&ArtifactVariant> = same_line
            .iter()
            .copied()
            .filter(|v| v.semver().is_some_and(|ver| ver < target_version))
            .collect();
        lower.sort_by_key(|v| std::cmp::Reverse(v.semver()));
        if let Some(closest) = lower.first().copied() {
            return Some(closest);
        }
    }

    same_line.into_iter().max_by(|a, b| {
        a.performance
            .fitness_score(weights)
            .partial_cmp(&b.performance.fitness_score(weights))
            .unwrap_or(std::cmp::Ordering::Equal)
    })
}

/// Trim a cluster without stranding dependents: pruned variants that
/// recorded workflows still reference get a replacement plan pointing at
/// the closest survivor, and are reinstated when no replacement exists.
pub fn safe_trim(
    cluster: &mut OptimizationCluster,
    policy: &TrimmingPolicy,
    weights: &FitnessWeights,
    dependents: &BTreeMap<String, Vec<String>>,
) -> (TrimReport, Vec<ReplacementPlan>) {
    let before: BTreeMap<String, ArtifactVariant> = cluster
        .alternates
        .iter()
        .map(|v| (v.variant_id.clone(), v.clone()))
        .collect();

    let mut report = policy.trim_cluster(cluster, weights);
    let mut plans = Vec::new();
    let mut reinstated = Vec::new();

    for decision in &report.pruned {
        let Some(dependent_workflows) = dependents.get(&decision.variant_id) else {
            continue;
        };
        if dependent_workflows.is_empty() {
            continue;
        }
        let Some(trimmed) = before.get(&decision.variant_id) else {
            continue;
        };

        let survivors: Vec<ArtifactVariant> = cluster.all_variants().into_iter().cloned().collect();
        match find_closest_replacement(&survivors, trimmed, weights) {
            Some(replacement) => plans.push(ReplacementPlan {
                trimmed_variant_id: decision.variant_id.clone(),
                replacement_variant_id: replacement.variant_id.clone(),
                dependents: dependent_workflows.clone(),
            }),
            None => {
                // No replacement: keep the variant alive.
                tracing::info!(
                    variant_id = %decision.variant_id,
                    "reinstating pruned variant with dependents and no replacement"
                );
                let mut variant = trimmed.clone();
                variant.status = crate::variant::VariantStatus::Active;
                cluster.alternates.push(variant);
                reinstated.push(decision.variant_id.clone());
            }
        }
    }

    report.pruned.retain(|d| !reinstated.contains(&d.variant_id));
    (report, plans)
}
