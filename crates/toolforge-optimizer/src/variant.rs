//! Artifact variants and their performance metrics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use toolforge_registry::cosine_similarity;

/// Node types a variant can belong to; fitness weights vary per type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Plan,
    #[default]
    Function,
    SubWorkflow,
    Workflow,
    Prompt,
    Pattern,
}

/// Lifecycle status of a variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VariantStatus {
    /// Current best in its cluster.
    Canonical,
    /// In a cluster, viable.
    #[default]
    Active,
    /// Preserved for lineage but no longer active.
    Archived,
    /// Marked for removal.
    Deprecated,
}

/// Weights for the composite fitness score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitnessWeights {
    pub latency: f64,
    pub memory: f64,
    pub cpu: f64,
    pub success_rate: f64,
    pub coverage: f64,
}

impl Default for FitnessWeights {
    fn default() -> Self {
        Self {
            latency: 0.25,
            memory: 0.15,
            cpu: 0.10,
            success_rate: 0.30,
            coverage: 0.20,
        }
    }
}

impl FitnessWeights {
    /// Default weights for a node type; different types prioritize different
    /// metrics.
    pub fn for_node_type(node_type: NodeType) -> Self {
        match node_type {
            NodeType::Function => Self {
                latency: 0.30,
                memory: 0.20,
                cpu: 0.15,
                success_rate: 0.25,
                coverage: 0.10,
            },
            NodeType::Workflow => Self {
                latency: 0.20,
                memory: 0.10,
                cpu: 0.10,
                success_rate: 0.40,
                coverage: 0.20,
            },
            NodeType::Prompt => Self {
                latency: 0.15,
                memory: 0.05,
                cpu: 0.05,
                success_rate: 0.50,
                coverage: 0.25,
            },
            _ => Self::default(),
        }
    }
}

/// Performance data for a variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub latency_ms: f64,
    pub memory_mb: f64,
    pub cpu_percent: f64,
    pub success_rate: f64,
    pub error_count: u64,
    pub usage_count: u64,
    pub test_coverage: f64,
}

impl Default for PerformanceMetrics {
    fn default() -> Self {
        Self {
            latency_ms: 0.0,
            memory_mb: 0.0,
            cpu_percent: 0.0,
            success_rate: 1.0,
            error_count: 0,
            usage_count: 0,
            test_coverage: 0.0,
        }
    }
}

impl PerformanceMetrics {
    /// Composite fitness in [0, 1]. Latency normalizes against a 1s
    /// baseline, memory against 100MB, cpu against 100%.
    pub fn fitness_score(&self, weights: &FitnessWeights) -> f64 {
        let latency_score = (1.0 - self.latency_ms / 1000.0).max(0.0);
        let memory_score = (1.0 - self.memory_mb / 100.0).max(0.0);
        let cpu_score = (1.0 - self.cpu_percent / 100.0).max(0.0);

        let fitness = weights.latency * latency_score
            + weights.memory * memory_score
            + weights.cpu * cpu_score
            + weights.success_rate * self.success_rate
            + weights.coverage * self.test_coverage;

        fitness.clamp(0.0, 1.0)
    }

    /// Fitness under the default weights.
    pub fn default_fitness(&self) -> f64 {
        self.fitness_score(&FitnessWeights::default())
    }
}

/// Kind of semantic change a delta represents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaKind {
    Algorithm,
    ErrorHandling,
    Refactor,
    Caching,
    Concurrency,
    Validation,
    Other(String),
}

impl std::fmt::Display for DeltaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeltaKind::Algorithm => write!(f, "algorithm"),
            DeltaKind::ErrorHandling => write!(f, "error_handling"),
            DeltaKind::Refactor => write!(f, "refactor"),
            DeltaKind::Caching => write!(f, "caching"),
            DeltaKind::Concurrency => write!(f, "concurrency"),
            DeltaKind::Validation => write!(f, "validation"),
            DeltaKind::Other(name) => write!(f, "{name}"),
        }
    }
}

/// A semantic difference between variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticDelta {
    /// Kind of change.
    pub kind: DeltaKind,
    /// Human-readable description.
    pub description: String,
    /// Areas of the artifact this touches.
    #[serde(default)]
    pub impact_areas: Vec<String>,
    /// Estimated benefit in [0, 1].
    pub estimated_benefit: f64,
    /// Risk in [0, 1].
    pub risk: f64,
}

/// A specific version/variant of an artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactVariant {
    /// Unique variant id.
    pub variant_id: String,
    /// The artifact (tool) line this belongs to.
    pub artifact_id: String,
    /// Version label.
    pub version: String,
    /// Variant content.
    pub content: String,
    /// Dense embedding for similarity clustering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Lifecycle status.
    #[serde(default)]
    pub status: VariantStatus,
    /// Measured performance.
    #[serde(default)]
    pub performance: PerformanceMetrics,
    /// When this variant was created.
    pub created_at: DateTime<Utc>,
    /// Parent variant in lineage.
    #[serde(default)]
    pub parent_id: Option<String>,
    /// Children variants in lineage.
    #[serde(default)]
    pub children_ids: Vec<String>,
    /// Ordered semantic deltas relative to the parent.
    #[serde(default)]
    pub semantic_deltas: Vec<SemanticDelta>,
    /// Free-form metadata (strategy, applied deltas, source variants).
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl ArtifactVariant {
    /// Create an active variant with default metrics.
    pub fn new(
        variant_id: impl Into<String>,
        artifact_id: impl Into<String>,
        version: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            variant_id: variant_id.into(),
            artifact_id: artifact_id.into(),
            version: version.into(),
            content: content.into(),
            embedding: None,
            status: VariantStatus::Active,
            performance: PerformanceMetrics::default(),
            created_at: Utc::now(),
            parent_id: None,
            children_ids: Vec::new(),
            semantic_deltas: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// Cosine similarity to another variant; 0.0 when either embedding is
    /// missing.
    pub fn similarity_to(&self, other: &ArtifactVariant) -> f64 {
        match (&self.embedding, &other.embedding) {
            (Some(a), Some(b)) => cosine_similarity(a, b),
            _ => 0.0,
        }
    }

    /// Whether this variant is a leaf in the lineage tree.
    pub fn is_leaf(&self) -> bool {
        self.children_ids.is_empty()
    }

    /// Semver parse of the version label, when it is one.
    pub fn semver(&self) -> Option<semver::Version> {
        semver::Version::parse(&self.version).ok()
    }
}
