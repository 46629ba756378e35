//! Cluster optimizer.
//!
//! Groups tool variants into similarity clusters and evolves them:
//!
//! - an iterative promotion/archival loop with best-of-breed, incremental,
//!   radical, and hybrid candidate strategies, plus a learning table that
//!   boosts delta kinds that paid off before
//! - trimming policies with absolute keeps for canonical and leaf variants
//! - evolutionary pressure presets that tighten or relax clustering and
//!   pruning
//! - tool split detection with deprecation pointers and migration guides
//! - workflow characterization and specialization triggers
//!
//! The optimizer runs as a single background worker; it reaches execution
//! through the [`VariantRunner`] seam and validation through
//! [`CandidateValidator`].

pub mod cluster;
pub mod optimize;
pub mod pressure;
pub mod split;
pub mod sweep;
pub mod trimming;
pub mod variant;
pub mod workflow;

pub use cluster::{cluster_variants, OptimizationCluster};
pub use optimize::{
    CandidateValidation, CandidateValidator, ClusterOptimizer, DefaultCandidateValidator,
    OptimizationIteration, OptimizationReport, OptimizationStrategy,
};
pub use pressure::{EvolutionaryPressure, PressureAdjustments};
pub use split::{
    DeprecationPointer, MigrationStrategy, SplitDetector, SplitEvidence, TestSuite,
    ToolSpecification, ToolSplit, SPEC_DIVERGENCE_THRESHOLD, SPLIT_CONFIDENCE_THRESHOLD,
    TEST_DIVERGENCE_THRESHOLD,
};
pub use sweep::{BackgroundOptimizer, SweepReport};
pub use trimming::{TrimDecision, TrimReport, TrimmingPolicy};
pub use variant::{
    ArtifactVariant, DeltaKind, FitnessWeights, NodeType, PerformanceMetrics, SemanticDelta,
    VariantStatus,
};
pub use workflow::{
    find_closest_replacement, safe_trim, BestVariant, CharacterizationMetrics, MetricPredicate,
    ReplacementPlan, Specialization, SpecializationTrigger, ToolCandidate, TriggerOp,
    VariantCharacterization, VariantRunOutcome, VariantRunner, WorkflowOptimization,
    WorkflowOptimizer, WorkflowTask,
};
