//! Trimming policy: which variants to prune from a cluster.
//!
//! Canonical and leaf-node variants are never pruned. For the rest, the
//! rules run in order: poor fitness far from the fittest, low similarity to
//! the fittest (unless preserved by high fitness), never used past the grace
//! period (same exception), then the high-coverage keep.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::cluster::OptimizationCluster;
use crate::variant::{ArtifactVariant, FitnessWeights, VariantStatus};

/// Decision for one variant.
#[derive(Debug, Clone, PartialEq)]
pub struct TrimDecision {
    /// Variant id.
    pub variant_id: String,
    /// Whether the variant should be pruned.
    pub prune: bool,
    /// Why.
    pub reason: String,
    /// Fitness at decision time.
    pub fitness: f64,
}

/// Report of a cluster trim.
#[derive(Debug, Clone)]
pub struct TrimReport {
    /// Cluster id.
    pub cluster_id: String,
    /// Fittest variant id.
    pub fittest_variant_id: String,
    /// Pruned variants.
    pub pruned: Vec<TrimDecision>,
    /// Kept variants.
    pub kept: Vec<TrimDecision>,
}

/// Policy knobs for trimming.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrimmingPolicy {
    /// Prune below this similarity to the fittest variant.
    pub min_similarity_to_fittest: f64,
    /// Keep high-fitness variants even when unused or dissimilar.
    pub preserve_high_perf_threshold: f64,
    /// Days an unused variant survives before pruning.
    pub never_used_grace_period_days: i64,
    /// Absolute fitness floor.
    pub min_fitness_absolute: f64,
    /// Max allowed fitness gap from the fittest.
    pub max_distance_from_fittest: f64,
    /// Keep variants with test coverage at or above 0.90.
    pub keep_high_coverage_variants: bool,
}

impl Default for TrimmingPolicy {
    fn default() -> Self {
        Self {
            min_similarity_to_fittest: 0.70,
            preserve_high_perf_threshold: 0.85,
            never_used_grace_period_days: 30,
            min_fitness_absolute: 0.50,
            max_distance_from_fittest: 0.30,
            keep_high_coverage_variants: true,
        }
    }
}

impl TrimmingPolicy {
    /// Decide whether a variant should be pruned relative to the fittest
    /// member of its cluster.
    pub fn should_prune(
        &self,
        variant: &ArtifactVariant,
        fittest: &ArtifactVariant,
        weights: &FitnessWeights,
    ) -> (bool, String) {
        // Absolute keeps first: canonical and lineage leaves survive always.
        if variant.status == VariantStatus::Canonical {
            return (false, "canonical variant".to_string());
        }
        if variant.is_leaf() {
            return (false, "lineage endpoint (leaf node)".to_string());
        }

        let fitness = variant.performance.fitness_score(weights);
        let fittest_fitness = fittest.performance.fitness_score(weights);
        let distance = (fittest_fitness - fitness).abs();
        let similarity = variant.similarity_to(fittest);
        let age_days = Utc::now()
            .signed_duration_since(variant.created_at)
            .num_days();
        let never_used = variant.performance.usage_count == 0;

        // Poor fitness and far from the fittest.
        if fitness < self.min_fitness_absolute && distance > self.max_distance_from_fittest {
            return (
                true,
                format!("poor fitness ({fitness:.2}) and far from fittest ({distance:.2})"),
            );
        }

        // Drifted away from the fittest, unless performance earns a pass.
        if similarity < self.min_similarity_to_fittest {
            if fitness >= self.preserve_high_perf_threshold {
                return (false, format!("low similarity but high fitness ({fitness:.2})"));
            }
            return (true, format!("low similarity to fittest ({similarity:.2})"));
        }

        // Unused past the grace period, same high-fitness exception.
        if never_used && age_days > self.never_used_grace_period_days {
            if fitness >= self.preserve_high_perf_threshold {
                return (false, format!("never used but high fitness ({fitness:.2})"));
            }
            return (true, format!("never used after {age_days} days"));
        }

        if self.keep_high_coverage_variants && variant.performance.test_coverage >= 0.90 {
            return (
                false,
                format!("high test coverage ({:.2})", variant.performance.test_coverage),
            );
        }

        (false, "no pruning criteria met".to_string())
    }

    /// Apply the policy to a cluster, marking pruned variants deprecated and
    /// removing them from the alternates list.
    pub fn trim_cluster(
        &self,
        cluster: &mut OptimizationCluster,
        weights: &FitnessWeights,
    ) -> TrimReport {
        let fittest = cluster.fittest(weights).clone();

        let mut pruned = Vec::new();
        let mut kept = Vec::new();

        let alternates = std::mem::take(&mut cluster.alternates);
        for mut variant in alternates {
            let (prune, reason) = self.should_prune(&variant, &fittest, weights);
            let decision = TrimDecision {
                variant_id: variant.variant_id.clone(),
                prune,
                reason,
                fitness: variant.performance.fitness_score(weights),
            };
            if prune {
                tracing::info!(
                    variant_id = %variant.variant_id,
                    reason = %decision.reason,
                    "pruned variant"
                );
                variant.status = VariantStatus::Deprecated;
                pruned.push(decision);
            } else {
                kept.push(decision);
                cluster.alternates.push(variant);
            }
        }

        TrimReport {
            cluster_id: cluster.cluster_id.clone(),
            fittest_variant_id: fittest.variant_id,
            pruned,
            kept,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variant::PerformanceMetrics;

    fn weights() -> FitnessWeights {
        FitnessWeights::default()
    }

    /// Non-leaf variant with controllable fitness (via success rate and
    /// coverage), similarity (via embedding), usage, and age.
    fn variant(id: &str, success_rate: f64, coverage: f64, embedding: Vec<f32>) -> ArtifactVariant {
        let mut v = ArtifactVariant::new(id, "parse_cron", "1.0.0", "...");
        v.embedding = Some(embedding);
        v.children_ids.push("child".into());
        v.performance = PerformanceMetrics {
            latency_ms: 1000.0,
            memory_mb: 100.0,
            cpu_percent: 100.0,
            success_rate,
            test_coverage: coverage,
            usage_count: 5,
            ..Default::default()
        };
        v
    }

    fn fittest() -> ArtifactVariant {
        variant("fittest", 1.0, 1.0, vec![1.0, 0.0])
    }

    #[test]
    fn test_canonical_never_pruned() {
        let mut v = variant("v", 0.0, 0.0, vec![0.0, 1.0]);
        v.status = VariantStatus::Canonical;
        let (prune, reason) = TrimmingPolicy::default().should_prune(&v, &fittest(), &weights());
        assert!(!prune);
        assert!(reason.contains("canonical"));
    }

    #[test]
    fn test_leaf_never_pruned() {
        let mut v = variant("v", 0.0, 0.0, vec![0.0, 1.0]);
        v.children_ids.clear();
        let (prune, reason) = TrimmingPolicy::default().should_prune(&v, &fittest(), &weights());
        assert!(!prune);
        assert!(reason.contains("leaf"));
    }

    #[test]
    fn test_poor_and_distant_pruned() {
        // fitness = 0.3*0.3 = 0.09; fittest = 0.5; distance 0.41 > 0.30.
        let v = variant("v", 0.3, 0.0, vec![1.0, 0.0]);
        let (prune, reason) = TrimmingPolicy::default().should_prune(&v, &fittest(), &weights());
        assert!(prune, "{reason}");
        assert!(reason.contains("poor fitness"));
    }

    #[test]
    fn test_low_similarity_pruned_unless_high_fitness() {
        let policy = TrimmingPolicy::default();

        // Orthogonal embedding, moderate fitness: pruned.
        let v = variant("v", 1.0, 0.9, vec![0.0, 1.0]);
        // fitness = 0.3 + 0.18 = 0.48 < floor but distance 0.02 < 0.30,
        // so rule 1 passes; rule 2 prunes on similarity 0.0.
        let (prune, reason) = policy.should_prune(&v, &fittest(), &weights());
        assert!(prune, "{reason}");
        assert!(reason.contains("similarity"));

        // Same similarity but preservation-level fitness: kept.
        let mut strong = variant("strong", 1.0, 1.0, vec![0.0, 1.0]);
        strong.performance.latency_ms = 0.0;
        strong.performance.memory_mb = 0.0;
        strong.performance.cpu_percent = 0.0;
        // fitness = 1.0 >= 0.85.
        let (prune, reason) = policy.should_prune(&strong, &fittest(), &weights());
        assert!(!prune, "{reason}");
    }

    #[test]
    fn test_never_used_past_grace_pruned() {
        let mut v = variant("v", 1.0, 0.5, vec![1.0, 0.0]);
        v.performance.usage_count = 0;
        v.created_at = Utc::now() - chrono::Duration::days(45);
        let (prune, reason) = TrimmingPolicy::default().should_prune(&v, &fittest(), &weights());
        assert!(prune, "{reason}");
        assert!(reason.contains("never used"));
    }

    #[test]
    fn test_never_used_within_grace_kept() {
        let mut v = variant("v", 1.0, 0.5, vec![1.0, 0.0]);
        v.performance.usage_count = 0;
        v.created_at = Utc::now() - chrono::Duration::days(5);
        let (prune, _) = TrimmingPolicy::default().should_prune(&v, &fittest(), &weights());
        assert!(!prune);
    }

    #[test]
    fn test_high_coverage_kept() {
        let v = variant("v", 1.0, 0.95, vec![1.0, 0.0]);
        let (prune, reason) = TrimmingPolicy::default().should_prune(&v, &fittest(), &weights());
        assert!(!prune);
        assert!(reason.contains("coverage"));
    }

    #[test]
    fn test_trim_cluster_removes_pruned() {
        let mut cluster = OptimizationCluster::new("c", fittest());
        cluster.alternates.push(variant("weak", 0.3, 0.0, vec![1.0, 0.0]));
        cluster.alternates.push(variant("ok", 1.0, 0.95, vec![1.0, 0.0]));

        let report = TrimmingPolicy::default().trim_cluster(&mut cluster, &weights());
        assert_eq!(report.pruned.len(), 1);
        assert_eq!(report.pruned[0].variant_id, "weak");
        assert_eq!(report.kept.len(), 1);
        assert_eq!(cluster.alternates.len(), 1);
        assert_eq!(cluster.alternates[0].variant_id, "ok");
    }
}
