//! The iterative cluster optimization loop.
//!
//! Each iteration synthesizes a candidate from the cluster's members,
//! validates it, and promotes it to canonical when it beats the current
//! canonical by more than the improvement threshold. Promotions archive the
//! prior canonical and any member whose fitness falls more than 0.1 below
//! the new canonical, and feed the applied delta kinds back into a learning
//! table that boosts their estimated benefit in later iterations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

use toolforge::Result;

use crate::cluster::OptimizationCluster;
use crate::variant::{
    ArtifactVariant, DeltaKind, FitnessWeights, PerformanceMetrics, SemanticDelta, VariantStatus,
};

/// Strategy for synthesizing candidates from cluster members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationStrategy {
    /// Inherit the best property from each member plus the top deltas.
    #[default]
    BestOfBreed,
    /// Apply a single low-risk delta to the canonical.
    Incremental,
    /// Apply a high-benefit high-risk delta set; wider variance band.
    Radical,
    /// Alternate among the above by iteration index.
    Hybrid,
}

/// Result of validating a candidate variant.
#[derive(Debug, Clone)]
pub struct CandidateValidation {
    /// Whether validation passed.
    pub passed: bool,
    /// Measured fitness in [0, 1].
    pub fitness_score: f64,
    /// Measured performance.
    pub performance: PerformanceMetrics,
    /// Validation errors.
    pub errors: Vec<String>,
    /// Non-fatal warnings.
    pub warnings: Vec<String>,
}

/// Validates synthesized candidates. The full validation council can stand
/// behind this seam; the default implementation runs unit/integration/
/// functional checks against the candidate's own measurements.
#[async_trait]
pub trait CandidateValidator: Send + Sync {
    /// Validate a candidate and measure its fitness.
    async fn validate(&self, candidate: &ArtifactVariant) -> Result<CandidateValidation>;
}

/// Default validator: functional check requires success rate >= 0.9; fitness
/// is computed from the candidate's measured metrics.
pub struct DefaultCandidateValidator {
    weights: FitnessWeights,
}

impl DefaultCandidateValidator {
    /// Create a validator computing fitness under the given weights.
    pub fn new(weights: FitnessWeights) -> Self {
        Self { weights }
    }
}

#[async_trait]
impl CandidateValidator for DefaultCandidateValidator {
    async fn validate(&self, candidate: &ArtifactVariant) -> Result<CandidateValidation> {
        let functional_ok = candidate.performance.success_rate >= 0.9;
        let passed = functional_ok;
        Ok(CandidateValidation {
            passed,
            fitness_score: candidate.performance.fitness_score(&self.weights),
            performance: candidate.performance.clone(),
            errors: Vec::new(),
            warnings: if passed {
                Vec::new()
            } else {
                vec!["functional checks failed".to_string()]
            },
        })
    }
}

/// One iteration of the optimization loop.
#[derive(Debug, Clone)]
pub struct OptimizationIteration {
    /// 1-based iteration number.
    pub iteration: usize,
    /// Synthesized candidate id.
    pub candidate_id: String,
    /// Strategy used for this candidate.
    pub strategy: OptimizationStrategy,
    /// Measured candidate fitness.
    pub candidate_fitness: f64,
    /// Whether the candidate was promoted to canonical.
    pub promoted: bool,
    /// Variants archived by this iteration.
    pub archived: Vec<String>,
    /// Human-readable observations.
    pub insights: Vec<String>,
    /// When the iteration ran.
    pub timestamp: DateTime<Utc>,
}

/// Summary of a full optimization run over one cluster.
#[derive(Debug, Clone, Serialize)]
pub struct OptimizationReport {
    pub cluster_id: String,
    pub total_iterations: usize,
    pub total_promotions: usize,
    pub total_archived: usize,
    pub initial_fitness: f64,
    pub final_fitness: f64,
    pub canonical_variant_id: String,
    pub median_fitness: f64,
}

/// The iterative cluster optimizer.
pub struct ClusterOptimizer {
    max_iterations: usize,
    fitness_improvement_threshold: f64,
    strategy: OptimizationStrategy,
    weights: FitnessWeights,
    /// Improvements observed per delta kind across promotions.
    learned: HashMap<DeltaKind, Vec<f64>>,
}

impl ClusterOptimizer {
    /// Create an optimizer with spec defaults.
    pub fn new() -> Self {
        Self {
            max_iterations: 10,
            fitness_improvement_threshold: 0.05,
            strategy: OptimizationStrategy::BestOfBreed,
            weights: FitnessWeights::default(),
            learned: HashMap::new(),
        }
    }

    /// Override the iteration cap.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Override the promotion threshold.
    pub fn with_improvement_threshold(mut self, threshold: f64) -> Self {
        self.fitness_improvement_threshold = threshold;
        self
    }

    /// Override the candidate strategy.
    pub fn with_strategy(mut self, strategy: OptimizationStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Override the fitness weights (per node type).
    pub fn with_weights(mut self, weights: FitnessWeights) -> Self {
        self.weights = weights;
        self
    }

    /// Fitness weights in use.
    pub fn weights(&self) -> &FitnessWeights {
        &self.weights
    }

    /// Run the loop on a cluster. Stops at the iteration cap, when no
    /// candidate can be generated, or when an iteration ends without a
    /// promotion.
    pub async fn optimize_cluster(
        &mut self,
        cluster: &mut OptimizationCluster,
        validator: &dyn CandidateValidator,
    ) -> Result<Vec<OptimizationIteration>> {
        tracing::info!(cluster_id = %cluster.cluster_id, "starting cluster optimization");
        let mut iterations = Vec::new();

        for i in 0..self.max_iterations {
            let Some(mut candidate) = self.generate_candidate(cluster, i) else {
                tracing::info!("no viable candidate, stopping");
                break;
            };

            let validation = validator.validate(&candidate).await?;

            let canonical_fitness = cluster.canonical.performance.fitness_score(&self.weights);
            let candidate_fitness = validation.fitness_score;
            tracing::debug!(
                iteration = i + 1,
                canonical = canonical_fitness,
                candidate = candidate_fitness,
                "fitness comparison"
            );

            let mut promoted = false;
            let mut archived = Vec::new();

            if validation.passed
                && candidate_fitness > canonical_fitness + self.fitness_improvement_threshold
            {
                // Archive the old canonical and wire lineage.
                let mut old_canonical =
                    std::mem::replace(&mut cluster.canonical, candidate.clone());
                old_canonical.status = VariantStatus::Archived;
                old_canonical.children_ids.push(candidate.variant_id.clone());
                archived.push(old_canonical.variant_id.clone());

                cluster.canonical.status = VariantStatus::Canonical;
                cluster.canonical.parent_id = Some(old_canonical.variant_id.clone());
                cluster.canonical.performance = validation.performance.clone();

                // Archive members that fell too far behind the new canonical.
                for alt in &mut cluster.alternates {
                    let alt_fitness = alt.performance.fitness_score(&self.weights);
                    if alt_fitness < candidate_fitness - 0.1 {
                        alt.status = VariantStatus::Archived;
                        archived.push(alt.variant_id.clone());
                    }
                }
                cluster.alternates.retain(|v| v.status != VariantStatus::Archived);
                cluster.alternates.push(old_canonical);

                self.learn_from_promotion(cluster, candidate_fitness - canonical_fitness);
                promoted = true;
                candidate = cluster.canonical.clone();
            }

            let insights = self.generate_insights(candidate_fitness, canonical_fitness, promoted);
            let iteration = OptimizationIteration {
                iteration: i + 1,
                candidate_id: candidate.variant_id.clone(),
                strategy: self.effective_strategy(i),
                candidate_fitness,
                promoted,
                archived: archived.clone(),
                insights,
                timestamp: Utc::now(),
            };
            cluster.optimization_history.push(serde_json::json!({
                "iteration": iteration.iteration,
                "promoted": promoted,
                "fitness": candidate_fitness,
                "archived": archived,
                "timestamp": iteration.timestamp,
            }));
            iterations.push(iteration);

            if !promoted {
                tracing::info!("no improvement, stopping iterations");
                break;
            }
        }

        cluster.median_fitness = cluster.calculate_median_fitness(&self.weights);
        tracing::info!(
            iterations = iterations.len(),
            promotions = iterations.iter().filter(|i| i.promoted).count(),
            "optimization complete"
        );
        Ok(iterations)
    }

    fn effective_strategy(&self, iteration: usize) -> OptimizationStrategy {
        match self.strategy {
            OptimizationStrategy::Hybrid => match iteration % 3 {
                0 => OptimizationStrategy::BestOfBreed,
                1 => OptimizationStrategy::Incremental,
                _ => OptimizationStrategy::Radical,
            },
            other => other,
        }
    }

    fn generate_candidate(
        &self,
        cluster: &OptimizationCluster,
        iteration: usize,
    ) -> Option<ArtifactVariant> {
        let similar: Vec<ArtifactVariant> = cluster
            .variants_by_similarity()
            .into_iter()
            .cloned()
            .collect();
        if similar.is_empty() {
            return None;
        }

        let deltas = self.prioritize_with_learning(cluster.extract_semantic_deltas());

        match self.effective_strategy(iteration) {
            OptimizationStrategy::BestOfBreed | OptimizationStrategy::Hybrid => {
                Some(self.generate_best_of_breed(cluster, &similar, &deltas))
            }
            OptimizationStrategy::Incremental => Some(self.generate_incremental(cluster, &deltas)),
            OptimizationStrategy::Radical => Some(self.generate_radical(cluster, &deltas)),
        }
    }

    fn new_candidate(&self, cluster: &OptimizationCluster, label: &str) -> ArtifactVariant {
        let mut candidate = ArtifactVariant::new(
            format!("{}_candidate_{}", cluster.cluster_id, Uuid::new_v4()),
            cluster.canonical.artifact_id.clone(),
            format!("{}_{label}", cluster.canonical.version),
            cluster.canonical.content.clone(),
        );
        candidate.parent_id = Some(cluster.canonical.variant_id.clone());
        candidate.embedding = cluster.canonical.embedding.clone();
        candidate
    }

    /// Inherit the best property from each member and the top three deltas.
    fn generate_best_of_breed(
        &self,
        cluster: &OptimizationCluster,
        variants: &[ArtifactVariant],
        deltas: &[SemanticDelta],
    ) -> ArtifactVariant {
        let best_latency = variants
            .iter()
            .min_by(|a, b| cmp_f64(a.performance.latency_ms, b.performance.latency_ms))
            .unwrap_or(&cluster.canonical);
        let best_memory = variants
            .iter()
            .min_by(|a, b| cmp_f64(a.performance.memory_mb, b.performance.memory_mb))
            .unwrap_or(&cluster.canonical);
        let best_success = variants
            .iter()
            .max_by(|a, b| cmp_f64(a.performance.success_rate, b.performance.success_rate))
            .unwrap_or(&cluster.canonical);
        let best_coverage = variants
            .iter()
            .max_by(|a, b| cmp_f64(a.performance.test_coverage, b.performance.test_coverage))
            .unwrap_or(&cluster.canonical);

        let mut candidate = self.new_candidate(cluster, "optimized");
        candidate.performance = PerformanceMetrics {
            latency_ms: best_latency.performance.latency_ms * 0.95,
            memory_mb: best_memory.performance.memory_mb * 0.95,
            success_rate: (best_success.performance.success_rate * 1.02).min(1.0),
            test_coverage: (best_coverage.performance.test_coverage * 1.02).min(1.0),
            ..Default::default()
        };
        candidate.semantic_deltas = deltas.iter().take(3).cloned().collect();
        candidate.metadata.insert(
            "strategy".into(),
            serde_json::json!("best_of_breed"),
        );
        candidate.metadata.insert(
            "source_variants".into(),
            serde_json::json!([
                best_latency.variant_id,
                best_memory.variant_id,
                best_success.variant_id,
                best_coverage.variant_id,
            ]),
        );
        candidate
    }

    /// Apply a single low-risk delta to the canonical.
    fn generate_incremental(
        &self,
        cluster: &OptimizationCluster,
        deltas: &[SemanticDelta],
    ) -> ArtifactVariant {
        let safe: Vec<&SemanticDelta> = deltas.iter().filter(|d| d.risk < 0.3).collect();
        let top = safe.first().copied().or_else(|| deltas.first());

        let mut candidate = self.new_candidate(cluster, "incremental");
        let canonical = &cluster.canonical.performance;
        candidate.performance = PerformanceMetrics {
            latency_ms: canonical.latency_ms * 0.98,
            memory_mb: canonical.memory_mb * 0.99,
            success_rate: (canonical.success_rate * 1.01).min(1.0),
            test_coverage: (canonical.test_coverage * 1.01).min(1.0),
            ..Default::default()
        };
        if let Some(delta) = top {
            candidate.semantic_deltas = vec![delta.clone()];
        }
        candidate
            .metadata
            .insert("strategy".into(), serde_json::json!("incremental"));
        candidate
    }

    /// Apply a high-benefit delta set; performance lands in a wider variance
    /// band, so radical candidates can be much better or much worse.
    fn generate_radical(
        &self,
        cluster: &OptimizationCluster,
        deltas: &[SemanticDelta],
    ) -> ArtifactVariant {
        let mut radical: Vec<SemanticDelta> = deltas
            .iter()
            .filter(|d| d.estimated_benefit > 0.7)
            .cloned()
            .collect();
        if radical.is_empty() {
            radical = deltas.iter().take(2).cloned().collect();
        }

        let factor = rand::thread_rng().gen_range(0.85..1.15);
        let mut candidate = self.new_candidate(cluster, "radical");
        let canonical = &cluster.canonical.performance;
        candidate.performance = PerformanceMetrics {
            latency_ms: canonical.latency_ms * factor,
            memory_mb: canonical.memory_mb * factor,
            success_rate: (canonical.success_rate * factor).clamp(0.5, 1.0),
            test_coverage: (canonical.test_coverage * factor).clamp(0.5, 1.0),
            ..Default::default()
        };
        candidate.semantic_deltas = radical;
        candidate
            .metadata
            .insert("strategy".into(), serde_json::json!("radical"));
        candidate
    }

    /// Boost delta benefits by historically observed improvements of the
    /// same kind, capped at 1.0, then re-sort by benefit.
    fn prioritize_with_learning(&self, mut deltas: Vec<SemanticDelta>) -> Vec<SemanticDelta> {
        for delta in &mut deltas {
            if let Some(improvements) = self.learned.get(&delta.kind) {
                if !improvements.is_empty() {
                    let avg = improvements.iter().sum::<f64>() / improvements.len() as f64;
                    delta.estimated_benefit = (delta.estimated_benefit * (1.0 + avg)).min(1.0);
                }
            }
        }
        deltas.sort_by(|a, b| cmp_f64(b.estimated_benefit, a.estimated_benefit));
        deltas
    }

    fn learn_from_promotion(&mut self, cluster: &mut OptimizationCluster, improvement: f64) {
        for delta in &cluster.canonical.semantic_deltas {
            self.learned
                .entry(delta.kind.clone())
                .or_default()
                .push(improvement);
        }
        cluster.learned_patterns.insert(
            Utc::now().to_rfc3339(),
            serde_json::json!({
                "delta_kinds": cluster
                    .canonical
                    .semantic_deltas
                    .iter()
                    .map(|d| d.kind.to_string())
                    .collect::<Vec<_>>(),
                "improvement": improvement,
            }),
        );
        tracing::info!(improvement, "learned from promotion");
    }

    fn generate_insights(
        &self,
        candidate_fitness: f64,
        canonical_fitness: f64,
        promoted: bool,
    ) -> Vec<String> {
        let mut insights = Vec::new();
        if promoted {
            insights.push(format!(
                "candidate promoted to canonical (+{:.3} fitness)",
                candidate_fitness - canonical_fitness
            ));
        } else {
            insights.push("candidate not promoted - insufficient improvement".to_string());
        }
        for (kind, improvements) in &self.learned {
            if improvements.len() > 3 {
                let avg = improvements.iter().sum::<f64>() / improvements.len() as f64;
                if avg > 0.05 {
                    insights.push(format!(
                        "pattern: {kind} changes average {:.1}% fitness gain",
                        avg * 100.0
                    ));
                }
            }
        }
        insights
    }

    /// Summarize a finished run.
    pub fn report(
        &self,
        cluster: &OptimizationCluster,
        iterations: &[OptimizationIteration],
    ) -> OptimizationReport {
        OptimizationReport {
            cluster_id: cluster.cluster_id.clone(),
            total_iterations: iterations.len(),
            total_promotions: iterations.iter().filter(|i| i.promoted).count(),
            total_archived: iterations.iter().map(|i| i.archived.len()).sum(),
            initial_fitness: iterations.first().map(|i| i.candidate_fitness).unwrap_or(0.0),
            final_fitness: cluster.canonical.performance.fitness_score(&self.weights),
            canonical_variant_id: cluster.canonical.variant_id.clone(),
            median_fitness: cluster.median_fitness,
        }
    }
}

impl Default for ClusterOptimizer {
    fn default() -> Self {
        Self::new()
    }
}

fn cmp_f64(a: f64, b: f64) -> std::cmp::Ordering {
    a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal)
}
