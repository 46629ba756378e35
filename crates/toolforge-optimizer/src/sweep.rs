//! The background optimization pass.
//!
//! Periodically reads manifests and scores out of the registry, projects
//! each tool line's versions into variants, clusters them, runs the
//! promotion loop and the trimming policy, and writes archivals back as
//! manifest status changes. A single worker runs passes; within a pass only
//! one cluster is optimized at a time, under a cluster-scoped lock.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use toolforge::{Result, ToolManifest};
use toolforge_registry::Registry;

use crate::cluster::{cluster_variants, OptimizationCluster};
use crate::optimize::{CandidateValidator, ClusterOptimizer, DefaultCandidateValidator};
use crate::pressure::EvolutionaryPressure;
use crate::trimming::{TrimReport, TrimmingPolicy};
use crate::variant::{ArtifactVariant, FitnessWeights, VariantStatus};

/// Summary of one background pass.
#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    /// Clusters visited.
    pub clusters: usize,
    /// Promotions across all clusters.
    pub promotions: usize,
    /// Versions archived in the registry.
    pub archived: Vec<(String, String)>,
    /// Trim reports per cluster.
    pub trims: Vec<TrimReport>,
}

/// Projects registry manifests into optimizer variants and runs the
/// optimization loop over them.
pub struct BackgroundOptimizer {
    registry: Arc<Registry>,
    validator: Arc<dyn CandidateValidator>,
    pressure: EvolutionaryPressure,
    weights: FitnessWeights,
    /// Cluster-scoped locks for promotion/archival.
    cluster_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    /// Only optimize lines with at least this many active versions.
    min_cluster_size: usize,
}

impl BackgroundOptimizer {
    /// Create a background optimizer with the default validator and
    /// balanced pressure.
    pub fn new(registry: Arc<Registry>) -> Self {
        let weights = FitnessWeights::default();
        Self {
            registry,
            validator: Arc::new(DefaultCandidateValidator::new(weights)),
            pressure: EvolutionaryPressure::Balanced,
            weights,
            cluster_locks: Mutex::new(HashMap::new()),
            min_cluster_size: EvolutionaryPressure::Balanced.adjustments().min_cluster_size,
        }
    }

    /// Substitute the candidate validator (e.g. the validation council).
    pub fn with_validator(mut self, validator: Arc<dyn CandidateValidator>) -> Self {
        self.validator = validator;
        self
    }

    /// Apply an evolutionary pressure setting.
    pub fn with_pressure(mut self, pressure: EvolutionaryPressure) -> Self {
        self.pressure = pressure;
        self.min_cluster_size = pressure.adjustments().min_cluster_size;
        self
    }

    /// Project a manifest into an optimizer variant. Coverage is stood in
    /// for by the validation score; usage by the execution window length.
    pub fn variant_from_manifest(manifest: &ToolManifest) -> ArtifactVariant {
        let mut variant = ArtifactVariant::new(
            manifest.key(),
            manifest.tool_id.clone(),
            manifest.version.to_string(),
            manifest.searchable_text(),
        );
        variant.embedding = manifest.embedding.clone();
        variant.created_at = manifest.origin.created_at;
        variant.status = if manifest.active {
            VariantStatus::Active
        } else {
            VariantStatus::Archived
        };
        // A window with no successful calls has no measured latency; score
        // it at the baseline worst rather than letting it look instant.
        let has_history = !manifest.metrics.execution_history.is_empty();
        variant.performance.latency_ms = manifest
            .metrics
            .latest
            .latency_ms_mean
            .unwrap_or(if has_history { 1000.0 } else { 0.0 });
        variant.performance.success_rate = manifest.metrics.latest.success_rate.unwrap_or(1.0);
        variant.performance.usage_count = manifest.metrics.execution_history.len() as u64;
        variant.performance.test_coverage = manifest.trust.validation_score;
        variant
    }

    async fn cluster_lock(&self, cluster_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.cluster_locks.lock().await;
        locks.entry(cluster_id.to_string()).or_default().clone()
    }

    /// Run one pass over every tool line in the registry.
    pub async fn run_once(&self) -> Result<SweepReport> {
        let adjustments = self.pressure.adjustments();
        let mut policy = TrimmingPolicy::default();
        self.pressure.apply_to_policy(&mut policy);

        let manifests = self.registry.list(None, None, &[]).await?;
        let mut lines: BTreeMap<String, Vec<ToolManifest>> = BTreeMap::new();
        for manifest in manifests {
            lines.entry(manifest.tool_id.clone()).or_default().push(manifest);
        }

        let mut report = SweepReport::default();
        for (tool_id, versions) in lines {
            if versions.len() < self.min_cluster_size {
                continue;
            }

            let mut variants: Vec<ArtifactVariant> =
                versions.iter().map(Self::variant_from_manifest).collect();
            // Version ordering is the lineage chain: the newest version is
            // the line's leaf.
            for i in 0..variants.len().saturating_sub(1) {
                let child_id = variants[i + 1].variant_id.clone();
                variants[i].children_ids.push(child_id);
                variants[i + 1].parent_id = Some(variants[i].variant_id.clone());
            }
            let clusters =
                cluster_variants(variants, adjustments.similarity_threshold, &self.weights);

            for mut cluster in clusters {
                let lock = self.cluster_lock(&cluster.cluster_id).await;
                let _guard = lock.lock().await;

                report.clusters += 1;
                let trim = self
                    .optimize_and_trim(&tool_id, &mut cluster, &policy, &mut report)
                    .await?;
                report.trims.push(trim);
            }
        }

        tracing::info!(
            clusters = report.clusters,
            promotions = report.promotions,
            archived = report.archived.len(),
            "background optimization pass complete"
        );
        Ok(report)
    }

    async fn optimize_and_trim(
        &self,
        tool_id: &str,
        cluster: &mut OptimizationCluster,
        policy: &TrimmingPolicy,
        report: &mut SweepReport,
    ) -> Result<TrimReport> {
        let mut optimizer = ClusterOptimizer::new().with_weights(self.weights);
        let iterations = optimizer.optimize_cluster(cluster, self.validator.as_ref()).await?;
        report.promotions += iterations.iter().filter(|i| i.promoted).count();

        // Write archivals back to the registry as status changes; candidate
        // variants synthesized by the loop have no manifest behind them.
        for iteration in &iterations {
            for archived_id in &iteration.archived {
                if let Some((archived_tool, version)) = archived_id.split_once(':') {
                    if archived_tool == tool_id {
                        self.registry.set_active(archived_tool, version, false).await?;
                        report.archived.push((archived_tool.to_string(), version.to_string()));
                    }
                }
            }
        }

        let trim = policy.trim_cluster(cluster, &self.weights);
        for decision in &trim.pruned {
            if let Some((pruned_tool, version)) = decision.variant_id.split_once(':') {
                if pruned_tool == tool_id {
                    self.registry.set_active(pruned_tool, version, false).await?;
                    report.archived.push((pruned_tool.to_string(), version.to_string()));
                }
            }
        }
        Ok(trim)
    }

    /// Spawn the periodic background worker. One pass at a time; errors are
    /// logged and the worker keeps going.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = self.run_once().await {
                    tracing::error!(error = %e, "background optimization pass failed");
                }
            }
        })
    }
}
