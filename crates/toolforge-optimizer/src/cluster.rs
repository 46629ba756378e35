//! Similarity clusters of artifact variants.
//!
//! Two variants share a cluster when their cosine similarity to the cluster's
//! canonical variant meets the threshold. Every non-empty cluster has exactly
//! one canonical variant.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::variant::{ArtifactVariant, DeltaKind, FitnessWeights, SemanticDelta, VariantStatus};

/// A cluster of similar variants around one canonical.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationCluster {
    /// Cluster identifier.
    pub cluster_id: String,
    /// The current best variant.
    pub canonical: ArtifactVariant,
    /// Other cluster members.
    pub alternates: Vec<ArtifactVariant>,
    /// Similarity threshold for membership.
    pub similarity_threshold: f64,
    /// Median fitness across all members.
    pub median_fitness: f64,
    /// History entries appended by the optimizer loop.
    #[serde(default)]
    pub optimization_history: Vec<serde_json::Value>,
    /// Patterns learned from promotions, keyed by delta kind.
    #[serde(default)]
    pub learned_patterns: BTreeMap<String, serde_json::Value>,
}

impl OptimizationCluster {
    /// Create a cluster around a canonical variant.
    pub fn new(cluster_id: impl Into<String>, mut canonical: ArtifactVariant) -> Self {
        canonical.status = VariantStatus::Canonical;
        Self {
            cluster_id: cluster_id.into(),
            canonical,
            alternates: Vec::new(),
            similarity_threshold: 0.96,
            median_fitness: 0.0,
            optimization_history: Vec::new(),
            learned_patterns: BTreeMap::new(),
        }
    }

    /// Alternates within the similarity threshold, most similar first.
    pub fn variants_by_similarity(&self) -> Vec<&ArtifactVariant> {
        let mut with_similarity: Vec<(&ArtifactVariant, f64)> = self
            .alternates
            .iter()
            .map(|alt| (alt, self.canonical.similarity_to(alt)))
            .filter(|(_, similarity)| *similarity >= self.similarity_threshold)
            .collect();
        with_similarity
            .sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        with_similarity.into_iter().map(|(v, _)| v).collect()
    }

    /// Median fitness across canonical and alternates.
    pub fn calculate_median_fitness(&self, weights: &FitnessWeights) -> f64 {
        let mut scores: Vec<f64> = std::iter::once(&self.canonical)
            .chain(self.alternates.iter())
            .map(|v| v.performance.fitness_score(weights))
            .collect();
        if scores.is_empty() {
            return 0.0;
        }
        scores.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let mid = scores.len() / 2;
        if scores.len() % 2 == 0 {
            (scores[mid - 1] + scores[mid]) / 2.0
        } else {
            scores[mid]
        }
    }

    /// Deduplicated semantic deltas across alternates, best benefit first.
    /// Duplicate (kind, description) pairs keep the higher benefit estimate.
    pub fn extract_semantic_deltas(&self) -> Vec<SemanticDelta> {
        let mut unique: BTreeMap<(DeltaKind, String), SemanticDelta> = BTreeMap::new();
        for alt in &self.alternates {
            for delta in &alt.semantic_deltas {
                let key = (delta.kind.clone(), delta.description.clone());
                match unique.get(&key) {
                    Some(existing) if existing.estimated_benefit >= delta.estimated_benefit => {}
                    _ => {
                        unique.insert(key, delta.clone());
                    }
                }
            }
        }
        let mut deltas: Vec<SemanticDelta> = unique.into_values().collect();
        deltas.sort_by(|a, b| {
            b.estimated_benefit
                .partial_cmp(&a.estimated_benefit)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        deltas
    }

    /// All members including the canonical.
    pub fn all_variants(&self) -> Vec<&ArtifactVariant> {
        std::iter::once(&self.canonical).chain(self.alternates.iter()).collect()
    }

    /// The fittest member under the given weights.
    pub fn fittest(&self, weights: &FitnessWeights) -> &ArtifactVariant {
        self.all_variants()
            .into_iter()
            .max_by(|a, b| {
                a.performance
                    .fitness_score(weights)
                    .partial_cmp(&b.performance.fitness_score(weights))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap_or(&self.canonical)
    }
}

/// Group variants into clusters by pairwise similarity to each cluster's
/// canonical. Canonical selection per cluster: an explicitly canonical
/// variant if present, else highest semver, ties broken by highest fitness.
pub fn cluster_variants(
    variants: Vec<ArtifactVariant>,
    similarity_threshold: f64,
    weights: &FitnessWeights,
) -> Vec<OptimizationCluster> {
    let mut clusters: Vec<OptimizationCluster> = Vec::new();

    for variant in variants {
        let target = clusters.iter_mut().find(|cluster| {
            cluster.canonical.artifact_id == variant.artifact_id
                && cluster.canonical.similarity_to(&variant) >= similarity_threshold
        });

        match target {
            Some(cluster) => cluster.alternates.push(variant),
            None => {
                let cluster_id = format!("cluster_{}_{}", variant.artifact_id, clusters.len());
                let mut cluster = OptimizationCluster::new(cluster_id, variant);
                cluster.similarity_threshold = similarity_threshold;
                clusters.push(cluster);
            }
        }
    }

    for cluster in &mut clusters {
        elect_canonical(cluster, weights);
        cluster.median_fitness = cluster.calculate_median_fitness(weights);
    }
    clusters
}

/// Re-elect the canonical within a cluster.
fn elect_canonical(cluster: &mut OptimizationCluster, weights: &FitnessWeights) {
    // An explicitly marked canonical among the alternates wins.
    let explicit = cluster
        .alternates
        .iter()
        .position(|v| v.status == VariantStatus::Canonical);

    let winner = explicit.or_else(|| {
        let mut best_idx: Option<usize> = None;
        for (idx, candidate) in cluster.alternates.iter().enumerate() {
            let current_best = best_idx
                .map(|i| &cluster.alternates[i])
                .unwrap_or(&cluster.canonical);
            if is_preferred(candidate, current_best, weights) {
                best_idx = Some(idx);
            }
        }
        best_idx
    });

    if let Some(idx) = winner {
        let mut new_canonical = cluster.alternates.remove(idx);
        new_canonical.status = VariantStatus::Canonical;
        let mut old = std::mem::replace(&mut cluster.canonical, new_canonical);
        old.status = VariantStatus::Active;
        cluster.alternates.push(old);
    } else {
        cluster.canonical.status = VariantStatus::Canonical;
    }
}

/// Whether `a` should be preferred over `b` as canonical: higher semver,
/// ties broken by higher fitness.
fn is_preferred(a: &ArtifactVariant, b: &ArtifactVariant, weights: &FitnessWeights) -> bool {
    match (a.semver(), b.semver()) {
        (Some(va), Some(vb)) if va != vb => va > vb,
        _ => {
            a.performance.fitness_score(weights) > b.performance.fitness_score(weights)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variant::PerformanceMetrics;

    fn variant(id: &str, version: &str, embedding: Vec<f32>, fitness_latency: f64) -> ArtifactVariant {
        let mut v = ArtifactVariant::new(id, "parse_cron", version, "def parse(expr): ...");
        v.embedding = Some(embedding);
        v.performance = PerformanceMetrics {
            latency_ms: fitness_latency,
            success_rate: 0.9,
            test_coverage: 0.5,
            ..Default::default()
        };
        v
    }

    #[test]
    fn test_one_canonical_per_cluster() {
        let variants = vec![
            variant("v1", "1.0.0", vec![1.0, 0.0], 100.0),
            variant("v2", "1.1.0", vec![0.99, 0.05], 200.0),
            variant("v3", "2.0.0", vec![0.98, 0.06], 300.0),
        ];
        let clusters = cluster_variants(variants, 0.96, &FitnessWeights::default());
        assert_eq!(clusters.len(), 1);

        let cluster = &clusters[0];
        let canonicals = cluster
            .all_variants()
            .into_iter()
            .filter(|v| v.status == VariantStatus::Canonical)
            .count();
        assert_eq!(canonicals, 1);
        // Highest semver elected.
        assert_eq!(cluster.canonical.variant_id, "v3");
    }

    #[test]
    fn test_dissimilar_variants_split_clusters() {
        let variants = vec![
            variant("v1", "1.0.0", vec![1.0, 0.0], 100.0),
            variant("v2", "1.1.0", vec![0.0, 1.0], 200.0),
        ];
        let clusters = cluster_variants(variants, 0.96, &FitnessWeights::default());
        assert_eq!(clusters.len(), 2);
    }

    #[test]
    fn test_version_tie_broken_by_fitness() {
        let fast = variant("fast", "1.0.0", vec![1.0, 0.0], 50.0);
        let slow = variant("slow", "1.0.0", vec![1.0, 0.0], 800.0);
        let clusters = cluster_variants(vec![slow, fast], 0.96, &FitnessWeights::default());
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].canonical.variant_id, "fast");
    }

    #[test]
    fn test_explicit_canonical_wins() {
        let mut marked = variant("marked", "1.0.0", vec![1.0, 0.0], 900.0);
        marked.status = VariantStatus::Canonical;
        let newer = variant("newer", "2.0.0", vec![1.0, 0.0], 50.0);
        let clusters = cluster_variants(vec![newer, marked], 0.96, &FitnessWeights::default());
        assert_eq!(clusters[0].canonical.variant_id, "marked");
    }

    #[test]
    fn test_median_fitness() {
        let mut cluster = OptimizationCluster::new(
            "c",
            variant("v1", "1.0.0", vec![1.0, 0.0], 0.0),
        );
        cluster.alternates.push(variant("v2", "1.1.0", vec![1.0, 0.0], 500.0));
        cluster.alternates.push(variant("v3", "1.2.0", vec![1.0, 0.0], 1000.0));

        let weights = FitnessWeights::default();
        let median = cluster.calculate_median_fitness(&weights);
        let middle = cluster.alternates[0].performance.fitness_score(&weights);
        assert!((median - middle).abs() < 1e-9);
    }

    #[test]
    fn test_delta_dedup_keeps_best_benefit() {
        let mut cluster =
            OptimizationCluster::new("c", variant("v1", "1.0.0", vec![1.0, 0.0], 100.0));

        let mut a = variant("v2", "1.1.0", vec![1.0, 0.0], 100.0);
        a.semantic_deltas.push(SemanticDelta {
            kind: DeltaKind::Caching,
            description: "memoize schedule parse".into(),
            impact_areas: vec![],
            estimated_benefit: 0.4,
            risk: 0.1,
        });
        let mut b = variant("v3", "1.2.0", vec![1.0, 0.0], 100.0);
        b.semantic_deltas.push(SemanticDelta {
            kind: DeltaKind::Caching,
            description: "memoize schedule parse".into(),
            impact_areas: vec![],
            estimated_benefit: 0.7,
            risk: 0.1,
        });
        cluster.alternates.push(a);
        cluster.alternates.push(b);

        let deltas = cluster.extract_semantic_deltas();
        assert_eq!(deltas.len(), 1);
        assert!((deltas[0].estimated_benefit - 0.7).abs() < 1e-9);
    }
}
