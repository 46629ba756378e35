//! Evolutionary pressure presets.
//!
//! A single scalar setting that shifts how aggressively the optimizer
//! specializes: `granular` keeps clusters tight and variants plentiful,
//! `generic` merges aggressively and prunes harder, `balanced` is the
//! default. The adjustments feed the optimizer config and trimming policy.

use serde::{Deserialize, Serialize};

use crate::trimming::TrimmingPolicy;

/// Evolutionary pressure setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EvolutionaryPressure {
    /// Tight clusters, many specialized variants.
    Granular,
    /// Default trade-off.
    #[default]
    Balanced,
    /// Broad clusters, aggressive consolidation.
    Generic,
}

impl std::str::FromStr for EvolutionaryPressure {
    type Err = toolforge::ForgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "granular" => Ok(Self::Granular),
            "balanced" => Ok(Self::Balanced),
            "generic" => Ok(Self::Generic),
            other => Err(toolforge::ForgeError::InvalidInput(format!(
                "unknown evolutionary pressure: {other}"
            ))),
        }
    }
}

/// Concrete knob adjustments for a pressure setting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PressureAdjustments {
    /// Cluster membership similarity threshold.
    pub similarity_threshold: f64,
    /// Max fitness gap from the fittest before pruning.
    pub max_distance_from_fittest: f64,
    /// Minimum variants per cluster before optimization runs.
    pub min_cluster_size: usize,
    /// 0.0 = generic, 1.0 = specialized.
    pub specialization_bias: f64,
}

impl EvolutionaryPressure {
    /// The knob values for this setting.
    pub fn adjustments(&self) -> PressureAdjustments {
        match self {
            EvolutionaryPressure::Granular => PressureAdjustments {
                similarity_threshold: 0.98,
                max_distance_from_fittest: 0.20,
                min_cluster_size: 2,
                specialization_bias: 0.8,
            },
            EvolutionaryPressure::Balanced => PressureAdjustments {
                similarity_threshold: 0.96,
                max_distance_from_fittest: 0.30,
                min_cluster_size: 2,
                specialization_bias: 0.5,
            },
            EvolutionaryPressure::Generic => PressureAdjustments {
                similarity_threshold: 0.90,
                max_distance_from_fittest: 0.40,
                min_cluster_size: 3,
                specialization_bias: 0.2,
            },
        }
    }

    /// Apply this setting to a trimming policy.
    pub fn apply_to_policy(&self, policy: &mut TrimmingPolicy) {
        let adjustments = self.adjustments();
        policy.max_distance_from_fittest = adjustments.max_distance_from_fittest;
        tracing::debug!(
            pressure = ?self,
            max_distance = adjustments.max_distance_from_fittest,
            "applied evolutionary adjustments to trimming policy"
        );
    }
}
