//! Tool Forge core.
//!
//! Shared foundation for the Forge workspace:
//!
//! - the data model: [`ToolManifest`] with lineage, trust, capabilities, and
//!   a bounded execution window; [`ConsensusScore`] records; execution and
//!   provenance types
//! - the error taxonomy every component returns ([`ForgeError`] /
//!   [`ErrorKind`])
//! - bit-exact hashing for provenance ([`hash::stable_json`],
//!   [`hash::call_id`])
//! - sandbox profiles and their tightest-of merge
//! - collaborator seams for LLM backends and cost tracking
//! - configuration with full defaults

pub mod cancel;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod hash;
pub mod manifest;
pub mod sandbox;
pub mod score;
pub mod validation;

pub use cancel::{CancelHandle, CancelToken};
pub use collaborators::{
    CostTracker, GenerateRequest, LlmClient, MockLlmClient, StaticCostTracker,
};
pub use config::{
    ConsensusConfig, DirectorConfig, ForgeConfig, OptimizerConfig, PathsConfig, RuntimeConfig,
};
pub use error::{ErrorKind, ForgeError, Result};
pub use manifest::{
    CapabilitySpec, CommitRecord, InterfaceBinding, Lineage, ManifestMetrics, MetricsSnapshot,
    Origin, ToolManifest, ToolManifestBuilder, ToolType, Trust, TrustLevel, EXECUTION_WINDOW,
};
pub use sandbox::{FilesystemPolicy, NetworkPolicy, SandboxProfile};
pub use score::{
    CallMetrics, ConsensusScore, Dimension, EvaluatorContribution, ExecutionRecord,
    ExecutionSample,
};
pub use validation::{StageOutcome, ValidationReport};
