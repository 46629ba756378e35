//! Consensus scoring engine.
//!
//! Aggregates execution, validation, and security signals into a single
//! weighted score per tool version:
//!
//! - five dimensions (correctness, latency, cost, safety, resilience) with
//!   default weights 0.30 / 0.25 / 0.15 / 0.20 / 0.10
//! - task constraints shift the weights before aggregation; the final
//!   weight vector always renormalizes to sum to 1
//! - dimensions whose source is missing are omitted (weights renormalize
//!   over the rest); with no evidence at all, scoring fails with
//!   `insufficient_evidence`
//! - stored records are immutable; temporal decay is applied at read time

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

use toolforge::{
    CallMetrics, ConsensusConfig, ConsensusScore, CostTracker, Dimension, EvaluatorContribution,
    ExecutionSample, ForgeError, Result, ValidationReport,
};
use toolforge_registry::{QueryConstraints, Registry};

/// Cost above which a call scores zero on the cost dimension.
const COST_CEILING: f64 = 0.01;

/// One collected dimension with its source label.
#[derive(Debug, Clone)]
struct MetricDimension {
    dimension: Dimension,
    value: f64,
    source: &'static str,
}

/// The consensus engine. Exclusively appends [`ConsensusScore`] records,
/// through the registry.
pub struct ConsensusEngine {
    registry: Arc<Registry>,
    cost_tracker: Option<Arc<dyn CostTracker>>,
    config: ConsensusConfig,
}

impl ConsensusEngine {
    /// Create an engine without cost tracking.
    pub fn new(registry: Arc<Registry>, config: ConsensusConfig) -> Self {
        Self {
            registry,
            cost_tracker: None,
            config,
        }
    }

    /// Attach a cost tracker.
    pub fn with_cost_tracker(mut self, tracker: Arc<dyn CostTracker>) -> Self {
        self.cost_tracker = Some(tracker);
        self
    }

    /// Default dimension weights.
    pub fn default_weights() -> BTreeMap<Dimension, f64> {
        BTreeMap::from([
            (Dimension::Correctness, 0.30),
            (Dimension::Latency, 0.25),
            (Dimension::Cost, 0.15),
            (Dimension::Safety, 0.20),
            (Dimension::Resilience, 0.10),
        ])
    }

    /// Constraint-driven weight adjustment, applied before aggregation.
    fn adjust_weights(constraints: Option<&QueryConstraints>) -> BTreeMap<Dimension, f64> {
        let mut weights = Self::default_weights();
        let Some(constraints) = constraints else {
            return weights;
        };

        if constraints.latency_ms_p95.is_some() {
            weights.insert(Dimension::Latency, 0.40);
            weights.insert(Dimension::Correctness, 0.25);
            weights.insert(Dimension::Cost, 0.10);
        }
        if constraints.strict_risk() {
            weights.insert(Dimension::Safety, 0.35);
            weights.insert(Dimension::Correctness, 0.25);
            weights.insert(Dimension::Latency, 0.15);
        }
        if constraints.max_cost_per_call.is_some() {
            weights.insert(Dimension::Cost, 0.30);
            weights.insert(Dimension::Correctness, 0.25);
            weights.insert(Dimension::Latency, 0.20);
        }
        weights
    }

    /// Synthesize dimensions from the available sources, score, persist, and
    /// return the record.
    pub async fn score(
        &self,
        tool_id: &str,
        version: &str,
        execution_history: Option<&[ExecutionSample]>,
        validation: Option<&ValidationReport>,
        constraints: Option<&QueryConstraints>,
    ) -> Result<ConsensusScore> {
        let dimensions = self
            .collect_dimensions(tool_id, version, execution_history, validation)
            .await;
        if dimensions.is_empty() {
            return Err(ForgeError::InsufficientEvidence {
                tool_id: tool_id.to_string(),
                version: version.to_string(),
            });
        }

        let weights = Self::adjust_weights(constraints);

        // Renormalize over the dimensions actually present so the effective
        // weights sum to 1.
        let present_total: f64 = dimensions
            .iter()
            .map(|d| weights.get(&d.dimension).copied().unwrap_or(0.0))
            .sum();
        if present_total <= 0.0 {
            return Err(ForgeError::Internal(
                "dimension weights sum to zero".to_string(),
            ));
        }

        let mut total = 0.0;
        let mut scores = BTreeMap::new();
        let mut evaluators = Vec::with_capacity(dimensions.len());
        for dim in &dimensions {
            let weight = weights.get(&dim.dimension).copied().unwrap_or(0.0) / present_total;
            let contribution = weight * dim.value;
            total += contribution;
            scores.insert(dim.dimension, dim.value);
            evaluators.push(EvaluatorContribution {
                id: format!("{}_{}", dim.source, dim.dimension),
                value: dim.value,
                contribution,
            });
        }

        let record = ConsensusScore {
            tool_id: tool_id.to_string(),
            version: version.to_string(),
            scores,
            weight: total.clamp(0.0, 1.0),
            evaluators,
            timestamp: Utc::now(),
        };

        self.registry.store_consensus(&record).await?;
        tracing::info!(tool_id, version, weight = record.weight, "consensus score computed");
        Ok(record)
    }

    /// Like [`ConsensusEngine::score`], but falls back to the last stored
    /// record when there is no evidence to rescore from.
    pub async fn score_or_last(
        &self,
        tool_id: &str,
        version: &str,
        execution_history: Option<&[ExecutionSample]>,
        validation: Option<&ValidationReport>,
        constraints: Option<&QueryConstraints>,
    ) -> Result<ConsensusScore> {
        match self
            .score(tool_id, version, execution_history, validation, constraints)
            .await
        {
            Err(ForgeError::InsufficientEvidence { .. }) => self
                .registry
                .latest_consensus(tool_id, version)
                .await
                .ok_or_else(|| ForgeError::InsufficientEvidence {
                    tool_id: tool_id.to_string(),
                    version: version.to_string(),
                }),
            other => other,
        }
    }

    async fn collect_dimensions(
        &self,
        tool_id: &str,
        version: &str,
        execution_history: Option<&[ExecutionSample]>,
        validation: Option<&ValidationReport>,
    ) -> Vec<MetricDimension> {
        let mut dimensions = Vec::new();

        // Correctness: latest validation score.
        if let Some(validation) = validation {
            dimensions.push(MetricDimension {
                dimension: Dimension::Correctness,
                value: validation.validation_score.clamp(0.0, 1.0),
                source: "validation",
            });
        }

        // Latency: mean over successful calls, 1s baseline.
        if let Some(history) = execution_history {
            let latencies: Vec<f64> = history
                .iter()
                .filter(|s| s.success)
                .map(|s| s.latency_ms)
                .collect();
            if !latencies.is_empty() {
                let mean = latencies.iter().sum::<f64>() / latencies.len() as f64;
                dimensions.push(MetricDimension {
                    dimension: Dimension::Latency,
                    value: (1.0 - mean / 1000.0).max(0.0),
                    source: "execution",
                });
            }
        }

        // Safety: mean of validation stages matching security/safety.
        if let Some(safety) = validation.and_then(|v| v.safety_score()) {
            dimensions.push(MetricDimension {
                dimension: Dimension::Safety,
                value: safety.clamp(0.0, 1.0),
                source: "security_scanner",
            });
        }

        // Resilience: success rate over the window.
        if let Some(history) = execution_history {
            if !history.is_empty() {
                let successes = history.iter().filter(|s| s.success).count();
                dimensions.push(MetricDimension {
                    dimension: Dimension::Resilience,
                    value: successes as f64 / history.len() as f64,
                    source: "execution",
                });
            }
        }

        // Cost: tracked cost normalized against the ceiling; the 0.8 default
        // fills in only alongside real evidence, so an unscoreable tool still
        // fails with insufficient evidence.
        let tracked = match &self.cost_tracker {
            Some(tracker) => tracker.cost_per_call(tool_id, version).await,
            None => None,
        };
        match tracked {
            Some(cost) => dimensions.push(MetricDimension {
                dimension: Dimension::Cost,
                value: (1.0 - (cost / COST_CEILING).min(1.0)).max(0.0),
                source: "cost_tracker",
            }),
            None if !dimensions.is_empty() => dimensions.push(MetricDimension {
                dimension: Dimension::Cost,
                value: self.config.default_cost_score,
                source: "cost_tracker",
            }),
            None => {}
        }

        dimensions
    }

    /// Record one execution: append to the manifest's bounded window and
    /// rescore from the updated window.
    pub async fn record_execution(
        &self,
        tool_id: &str,
        version: &str,
        metrics: &CallMetrics,
    ) -> Result<ConsensusScore> {
        let manifest = self
            .registry
            .record_execution_sample(tool_id, version, metrics.as_sample())
            .await?;

        self.score(
            tool_id,
            version,
            Some(&manifest.metrics.execution_history),
            None,
            None,
        )
        .await
    }

    /// Weight of a stored record decayed to `now`.
    pub fn decayed_weight(&self, score: &ConsensusScore, now: DateTime<Utc>) -> f64 {
        let days = score.age_days(now);
        score.weight * (-self.config.decay_factor * days / self.config.decay_window_days).exp()
    }

    /// Pick the highest-weighted candidate, scoring on demand for candidates
    /// with no stored record.
    pub async fn best_by_weight(
        &self,
        candidates: &[(String, String)],
        constraints: Option<&QueryConstraints>,
    ) -> Option<(String, String)> {
        let now = Utc::now();
        let mut best: Option<(f64, (String, String))> = None;

        for (tool_id, version) in candidates {
            let weight = match self.registry.latest_consensus(tool_id, version).await {
                Some(score) => self.decayed_weight(&score, now),
                None => {
                    let manifest = self
                        .registry
                        .get(tool_id, semver::Version::parse(version).ok().as_ref())
                        .await
                        .ok()
                        .flatten();
                    let history = manifest.map(|m| m.metrics.execution_history);
                    match self
                        .score(tool_id, version, history.as_deref(), None, constraints)
                        .await
                    {
                        Ok(score) => score.weight,
                        Err(_) => continue,
                    }
                }
            };

            match &best {
                Some((best_weight, _)) if *best_weight >= weight => {}
                _ => best = Some((weight, (tool_id.clone(), version.clone()))),
            }
        }

        best.map(|(_, candidate)| candidate)
    }
}
