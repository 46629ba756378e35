//! Tool manifest and metadata types.
//!
//! A manifest is the identity and contract of one tool version:
//! - name, semantic version, and tool type
//! - origin and lineage (derivation chain for trust and audit)
//! - capabilities with explicit input/output schemas
//! - invocation bindings (capability-server command, args, environment)
//! - trust level, validation score, and risk score
//! - a bounded window of recent execution samples

use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};

use crate::error::{ForgeError, Result};
use crate::sandbox::SandboxProfile;
use crate::score::ExecutionSample;

/// Number of execution samples a manifest retains.
pub const EXECUTION_WINDOW: usize = 100;

/// Type of tool in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ToolType {
    /// Backed by an external capability-server process.
    #[default]
    CapabilityServer,
    /// Executed inline through an LLM call.
    InlineLlm,
    /// Implemented natively in-process.
    Native,
    /// A composition of other tools.
    Workflow,
}

impl std::fmt::Display for ToolType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolType::CapabilityServer => write!(f, "capability-server"),
            ToolType::InlineLlm => write!(f, "inline-llm"),
            ToolType::Native => write!(f, "native"),
            ToolType::Workflow => write!(f, "workflow"),
        }
    }
}

impl std::str::FromStr for ToolType {
    type Err = ForgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "capability-server" | "capability_server" => Ok(ToolType::CapabilityServer),
            "inline-llm" | "inline_llm" => Ok(ToolType::InlineLlm),
            "native" => Ok(ToolType::Native),
            "workflow" => Ok(ToolType::Workflow),
            other => Err(ForgeError::InvalidInput(format!("unknown tool type: {other}"))),
        }
    }
}

/// Trust level for a tool version.
///
/// Upgrades only happen through a successful validation run; downgrades only
/// through a failed re-validation or a recorded policy action.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum TrustLevel {
    /// Freshly generated or externally registered, unvalidated.
    #[default]
    Experimental = 0,
    /// Passed validation with score >= 0.80.
    ThirdParty = 1,
    /// Passed validation with score >= 0.95.
    Core = 2,
}

impl std::fmt::Display for TrustLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrustLevel::Experimental => write!(f, "experimental"),
            TrustLevel::ThirdParty => write!(f, "third_party"),
            TrustLevel::Core => write!(f, "core"),
        }
    }
}

impl std::str::FromStr for TrustLevel {
    type Err = ForgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "experimental" => Ok(TrustLevel::Experimental),
            "third_party" => Ok(TrustLevel::ThirdParty),
            "core" => Ok(TrustLevel::Core),
            other => Err(ForgeError::InvalidInput(format!("unknown trust level: {other}"))),
        }
    }
}

/// Where a tool version came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Origin {
    /// Author identifier ("system" for generated tools).
    pub author: String,
    /// Model that produced the tool, if generated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_model: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Origin {
    /// Origin for a system-generated tool.
    pub fn generated(source_model: impl Into<String>) -> Self {
        Self {
            author: "system".to_string(),
            source_model: Some(source_model.into()),
            created_at: Utc::now(),
        }
    }

    /// Origin for an externally registered tool.
    pub fn external(author: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            source_model: None,
            created_at: Utc::now(),
        }
    }
}

/// One recorded change to a tool line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitRecord {
    /// Commit identifier.
    pub id: String,
    /// When the change was recorded.
    pub timestamp: DateTime<Utc>,
    /// Short change summary.
    pub summary: String,
}

/// Derivation chain for a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Lineage {
    /// The tool this one was derived from, if any.
    #[serde(default)]
    pub ancestor_tool_id: Option<String>,
    /// Why the mutation happened (e.g. "initial_generation", "promotion").
    #[serde(default)]
    pub mutation_reason: Option<String>,
    /// Ordered change history.
    #[serde(default)]
    pub commits: Vec<CommitRecord>,
}

/// A capability a tool exposes, with its explicit contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilitySpec {
    /// Capability name (e.g. "summarize_pdf").
    pub name: String,
    /// JSON schema for the input.
    #[serde(default)]
    pub input_schema: serde_json::Value,
    /// JSON schema for the output.
    #[serde(default)]
    pub output_schema: serde_json::Value,
    /// Named error cases this capability can raise.
    #[serde(default)]
    pub errors: Vec<String>,
    /// Preconditions callers must establish.
    #[serde(default)]
    pub preconditions: Vec<String>,
    /// Postconditions the capability guarantees.
    #[serde(default)]
    pub postconditions: Vec<String>,
}

impl CapabilitySpec {
    /// Create a capability with just a name and empty schemas.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            input_schema: serde_json::Value::Null,
            output_schema: serde_json::Value::Null,
            errors: Vec::new(),
            preconditions: Vec::new(),
            postconditions: Vec::new(),
        }
    }

    /// Short text used when embedding the manifest, truncated to `limit` chars.
    pub fn summary(&self, limit: usize) -> String {
        let mut text = self.name.clone();
        let schema_keys: Vec<&str> = self
            .input_schema
            .as_object()
            .map(|o| o.keys().map(String::as_str).collect())
            .unwrap_or_default();
        if !schema_keys.is_empty() {
            text.push_str(": ");
            text.push_str(&schema_keys.join(", "));
        }
        if text.len() > limit {
            text.truncate(limit);
        }
        text
    }
}

/// Binding of a tool to its invocation channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "channel", rename_all = "snake_case")]
pub enum InterfaceBinding {
    /// Call through a managed capability-server subprocess.
    CapabilityServer {
        /// Server name; servers are shared across tools with the same name.
        server_name: String,
        /// Command to spawn.
        command: String,
        /// Command arguments.
        #[serde(default)]
        args: Vec<String>,
        /// Environment variables for the subprocess.
        #[serde(default)]
        env: std::collections::BTreeMap<String, String>,
    },
    /// Call through the LLM collaborator with a prompt template.
    InlineLlm {
        /// Model alias to route to.
        model: String,
        /// Prompt template; `{input}` is substituted.
        prompt_template: String,
    },
}

/// Trust state of a tool version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trust {
    /// Current trust level.
    pub level: TrustLevel,
    /// Latest overall validation score in [0, 1].
    pub validation_score: f64,
    /// Risk score in [0, 1]; 1.0 until validated.
    pub risk_score: f64,
}

impl Default for Trust {
    fn default() -> Self {
        Self {
            level: TrustLevel::Experimental,
            validation_score: 0.0,
            risk_score: 1.0,
        }
    }
}

/// Latest aggregate metrics for a tool version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MetricsSnapshot {
    /// Mean latency over successful calls in the window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms_mean: Option<f64>,
    /// 95th percentile latency over the window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms_p95: Option<f64>,
    /// Success rate over the window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_rate: Option<f64>,
    /// Correctness estimate, when a validation has run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correctness: Option<f64>,
}

/// Execution metrics attached to a manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ManifestMetrics {
    /// Recent execution samples, newest last, capped at [`EXECUTION_WINDOW`].
    #[serde(default)]
    pub execution_history: Vec<ExecutionSample>,
    /// Latest aggregates derived from the window.
    #[serde(default)]
    pub latest: MetricsSnapshot,
}

impl ManifestMetrics {
    /// Append a sample, keeping only the most recent window, and refresh the
    /// latest aggregates.
    pub fn record(&mut self, sample: ExecutionSample) {
        self.execution_history.push(sample);
        if self.execution_history.len() > EXECUTION_WINDOW {
            let excess = self.execution_history.len() - EXECUTION_WINDOW;
            self.execution_history.drain(..excess);
        }
        self.refresh_latest();
    }

    /// Recompute the latest aggregates from the window.
    pub fn refresh_latest(&mut self) {
        let total = self.execution_history.len();
        if total == 0 {
            self.latest.latency_ms_mean = None;
            self.latest.latency_ms_p95 = None;
            self.latest.success_rate = None;
            return;
        }

        let successes: Vec<&ExecutionSample> =
            self.execution_history.iter().filter(|s| s.success).collect();
        self.latest.success_rate = Some(successes.len() as f64 / total as f64);

        if successes.is_empty() {
            self.latest.latency_ms_mean = None;
            self.latest.latency_ms_p95 = None;
            return;
        }

        let mut latencies: Vec<f64> = successes.iter().map(|s| s.latency_ms).collect();
        latencies.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let mean = latencies.iter().sum::<f64>() / latencies.len() as f64;
        let p95_idx =
            ((latencies.len() as f64 * 0.95).ceil() as usize).clamp(1, latencies.len()) - 1;
        self.latest.latency_ms_mean = Some(mean);
        self.latest.latency_ms_p95 = Some(latencies[p95_idx]);
    }
}

/// Tool manifest - the identity and contract of a tool version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolManifest {
    /// Stable tool identifier.
    pub tool_id: String,

    /// Semantic version.
    pub version: Version,

    /// Human-facing name.
    pub name: String,

    /// Tool type.
    #[serde(rename = "type", default)]
    pub tool_type: ToolType,

    /// Short description; feeds the embedding.
    pub description: String,

    /// Where this version came from.
    pub origin: Origin,

    /// Derivation chain.
    #[serde(default)]
    pub lineage: Lineage,

    /// Capabilities this tool exposes, in declaration order.
    #[serde(default)]
    pub capabilities: Vec<CapabilitySpec>,

    /// Invocation channel bindings.
    #[serde(default)]
    pub interfaces: Vec<InterfaceBinding>,

    /// Trust state.
    #[serde(default)]
    pub trust: Trust,

    /// Execution window and latest aggregates.
    #[serde(default)]
    pub metrics: ManifestMetrics,

    /// Tool-level sandbox requirements; merged (tightest wins) with the
    /// request-level profile at execution time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<SandboxProfile>,

    /// Search tags.
    #[serde(default)]
    pub tags: Vec<String>,

    /// Dense embedding over name + description + capability summaries.
    /// Recomputed by the registry when those fields change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,

    /// Whether this version is still active (archived versions stay on disk).
    #[serde(default = "default_true")]
    pub active: bool,

    /// Unknown fields from external registrations, preserved on round-trip.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_true() -> bool {
    true
}

impl ToolManifest {
    /// Create a manifest builder.
    pub fn builder() -> ToolManifestBuilder {
        ToolManifestBuilder::default()
    }

    /// Key identifying this `(tool_id, version)` pair.
    pub fn key(&self) -> String {
        format!("{}:{}", self.tool_id, self.version)
    }

    /// Whether the tool carries a given tag.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Text the registry embeds for semantic search: name, description, and
    /// truncated capability summaries.
    pub fn searchable_text(&self) -> String {
        let mut parts = vec![self.name.clone(), self.description.clone()];
        for cap in &self.capabilities {
            parts.push(cap.summary(256));
        }
        if !self.tags.is_empty() {
            parts.push(format!("tags: {}", self.tags.join(", ")));
        }
        parts.join("\n")
    }

    /// Basic structural validation performed before registration.
    pub fn validate(&self) -> Result<()> {
        if self.tool_id.is_empty() {
            return Err(ForgeError::InvalidManifest("tool_id is empty".into()));
        }
        if self.name.is_empty() {
            return Err(ForgeError::InvalidManifest("name is empty".into()));
        }
        if !(0.0..=1.0).contains(&self.trust.validation_score) {
            return Err(ForgeError::InvalidManifest(format!(
                "validation_score {} out of [0,1]",
                self.trust.validation_score
            )));
        }
        if !(0.0..=1.0).contains(&self.trust.risk_score) {
            return Err(ForgeError::InvalidManifest(format!(
                "risk_score {} out of [0,1]",
                self.trust.risk_score
            )));
        }
        if let Some(ancestor) = &self.lineage.ancestor_tool_id {
            if ancestor == &self.tool_id {
                return Err(ForgeError::InvariantViolation(format!(
                    "tool {} lists itself as ancestor",
                    self.tool_id
                )));
            }
        }
        Ok(())
    }
}

/// Builder for [`ToolManifest`].
#[derive(Debug, Default)]
pub struct ToolManifestBuilder {
    tool_id: Option<String>,
    version: Option<Version>,
    name: Option<String>,
    tool_type: ToolType,
    description: Option<String>,
    origin: Option<Origin>,
    lineage: Lineage,
    capabilities: Vec<CapabilitySpec>,
    interfaces: Vec<InterfaceBinding>,
    trust: Trust,
    sandbox: Option<SandboxProfile>,
    tags: Vec<String>,
}

impl ToolManifestBuilder {
    /// Set the tool id (required).
    pub fn tool_id(mut self, tool_id: impl Into<String>) -> Self {
        self.tool_id = Some(tool_id.into());
        self
    }

    /// Set the version (required); invalid semver leaves it unset.
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Version::parse(&version.into()).ok();
        self
    }

    /// Set the display name (required).
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the tool type.
    pub fn tool_type(mut self, tool_type: ToolType) -> Self {
        self.tool_type = tool_type;
        self
    }

    /// Set the description (required).
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the origin (required).
    pub fn origin(mut self, origin: Origin) -> Self {
        self.origin = Some(origin);
        self
    }

    /// Set the lineage.
    pub fn lineage(mut self, lineage: Lineage) -> Self {
        self.lineage = lineage;
        self
    }

    /// Set the ancestor tool id.
    pub fn ancestor(mut self, ancestor_tool_id: impl Into<String>) -> Self {
        self.lineage.ancestor_tool_id = Some(ancestor_tool_id.into());
        self
    }

    /// Add a capability.
    pub fn capability(mut self, capability: CapabilitySpec) -> Self {
        self.capabilities.push(capability);
        self
    }

    /// Add an interface binding.
    pub fn interface(mut self, interface: InterfaceBinding) -> Self {
        self.interfaces.push(interface);
        self
    }

    /// Set the trust state.
    pub fn trust(mut self, trust: Trust) -> Self {
        self.trust = trust;
        self
    }

    /// Set the tool-level sandbox requirements.
    pub fn sandbox(mut self, sandbox: SandboxProfile) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    /// Add a tag.
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Add multiple tags.
    pub fn tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Build the manifest.
    pub fn build(self) -> Result<ToolManifest> {
        let manifest = ToolManifest {
            tool_id: self
                .tool_id
                .ok_or_else(|| ForgeError::InvalidManifest("tool_id is required".into()))?,
            version: self
                .version
                .ok_or_else(|| ForgeError::InvalidManifest("version is required".into()))?,
            name: self
                .name
                .ok_or_else(|| ForgeError::InvalidManifest("name is required".into()))?,
            tool_type: self.tool_type,
            description: self
                .description
                .ok_or_else(|| ForgeError::InvalidManifest("description is required".into()))?,
            origin: self
                .origin
                .ok_or_else(|| ForgeError::InvalidManifest("origin is required".into()))?,
            lineage: self.lineage,
            capabilities: self.capabilities,
            interfaces: self.interfaces,
            trust: self.trust,
            metrics: ManifestMetrics::default(),
            sandbox: self.sandbox,
            tags: self.tags,
            embedding: None,
            active: true,
            extra: serde_json::Map::new(),
        };
        manifest.validate()?;
        Ok(manifest)
    }
}
