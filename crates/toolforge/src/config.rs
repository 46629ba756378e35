//! Forge configuration.
//!
//! Every knob has a default so the Forge runs with no config file at all;
//! a TOML file overrides individual sections.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ForgeError, Result};

/// Top-level configuration, loadable from TOML.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ForgeConfig {
    /// Filesystem locations.
    pub paths: PathsConfig,
    /// Consensus engine knobs.
    pub consensus: ConsensusConfig,
    /// Cluster optimizer knobs.
    pub optimizer: OptimizerConfig,
    /// Runtime knobs.
    pub runtime: RuntimeConfig,
    /// Director knobs.
    pub director: DirectorConfig,
}

/// Filesystem locations for persisted state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory holding manifest files and the tags index.
    pub manifest_dir: PathBuf,
    /// Directory holding provenance records.
    pub provenance_dir: PathBuf,
    /// Directory holding per-tool validation artifacts.
    pub artifact_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            manifest_dir: PathBuf::from("forge-data/manifests"),
            provenance_dir: PathBuf::from("forge-data/provenance"),
            artifact_dir: PathBuf::from("forge-data/artifacts"),
        }
    }
}

/// Consensus engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Exponential decay factor.
    pub decay_factor: f64,
    /// Decay window in days.
    pub decay_window_days: f64,
    /// Cost dimension value when no tracker is wired.
    pub default_cost_score: f64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            decay_factor: 0.1,
            decay_window_days: 30.0,
            default_cost_score: 0.8,
        }
    }
}

/// Cluster optimizer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Cosine similarity threshold for cluster membership.
    pub similarity_threshold: f64,
    /// Iteration cap for the promotion loop.
    pub max_iterations: usize,
    /// Minimum fitness improvement required to promote.
    pub fitness_improvement_threshold: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.96,
            max_iterations: 10,
            fitness_improvement_threshold: 0.05,
        }
    }
}

/// Runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Capability-server startup deadline in milliseconds.
    pub server_startup_ms: u64,
    /// Cool-down before a faulted server may be retried, in milliseconds.
    pub server_cooldown_ms: u64,
    /// Default per-call deadline in milliseconds for untagged tools.
    pub default_call_deadline_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            server_startup_ms: 10_000,
            server_cooldown_ms: 30_000,
            default_call_deadline_ms: 10_000,
        }
    }
}

/// Director configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectorConfig {
    /// Max concurrently executing intent tasks.
    pub max_concurrent_intents: usize,
    /// Max intents waiting for a slot before submission returns busy.
    pub max_queued_intents: usize,
    /// Model alias for capability extraction.
    pub capability_extraction_model: String,
    /// Model alias for tool generation.
    pub generation_model: String,
    /// Model alias for parameter extraction.
    pub parameter_extraction_model: String,
}

impl Default for DirectorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_intents: 8,
            max_queued_intents: 32,
            capability_extraction_model: "base".to_string(),
            generation_model: "powerful".to_string(),
            parameter_extraction_model: "base".to_string(),
        }
    }
}

impl ForgeConfig {
    /// Load configuration from a TOML file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        toml::from_str(&text)
            .map_err(|e| ForgeError::InvalidInput(format!("config parse error: {e}")))
    }

    /// Load from a path when it exists, defaults otherwise.
    pub fn from_path_or_default(path: impl AsRef<Path>) -> Result<Self> {
        if path.as_ref().exists() {
            Self::from_path(path)
        } else {
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ForgeConfig::default();
        assert_eq!(config.consensus.decay_factor, 0.1);
        assert_eq!(config.optimizer.similarity_threshold, 0.96);
        assert_eq!(config.director.max_concurrent_intents, 8);
    }

    #[test]
    fn test_partial_toml_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[optimizer]\nmax_iterations = 3\n\n[director]\nmax_concurrent_intents = 2\n"
        )
        .unwrap();

        let config = ForgeConfig::from_path(file.path()).unwrap();
        assert_eq!(config.optimizer.max_iterations, 3);
        assert_eq!(config.director.max_concurrent_intents, 2);
        // Untouched sections keep defaults.
        assert_eq!(config.consensus.decay_window_days, 30.0);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = ForgeConfig::from_path_or_default("/nonexistent/forge.toml").unwrap();
        assert_eq!(config.runtime.default_call_deadline_ms, 10_000);
    }
}
