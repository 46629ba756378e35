//! The Director.
//!
//! Turns an intent into a concrete tool invocation:
//!
//! ```text
//! RECEIVED -> DISCOVERING -(hit)-> EXECUTING -> RECORDING -> DONE
//!                        \-(miss)-> GENERATING -> VALIDATING -(ok)-> EXECUTING
//!                                                            \-(fail)-> FAILED
//! ```
//!
//! Capability extraction, manifest drafting, and parameter extraction are
//! delegated to the LLM collaborator; parameter extraction falls back to
//! `{"intent": ...}`. Requests beyond the global concurrency bound queue up
//! to a limit and then fail fast with `busy`. Tasks are cancellable at every
//! suspension point.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use toolforge::{
    CancelToken, DirectorConfig, ErrorKind, ForgeError, GenerateRequest, LlmClient, Origin,
    Result, SandboxProfile, ToolManifest, ToolType, Trust, TrustLevel, CallMetrics,
    CapabilitySpec, InterfaceBinding, Lineage,
};
use toolforge_consensus::ConsensusEngine;
use toolforge_council::ValidationCouncil;
use toolforge_registry::{QueryConstraints, QueryHit, Registry};
use toolforge_runtime::ForgeRuntime;

/// Intent keywords that become context tags during discovery.
const TAG_KEYWORDS: [&str; 6] = [
    "finance",
    "security",
    "data",
    "api",
    "translation",
    "summarization",
];

/// States an intent task moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentState {
    Received,
    Discovering,
    Generating,
    Validating,
    Executing,
    Recording,
    Done,
    Failed,
}

/// A request for tool orchestration.
#[derive(Debug, Clone)]
pub struct IntentRequest {
    /// The natural-language intent.
    pub intent: String,
    /// Explicit capability label; skips LLM extraction when set.
    pub capability: Option<String>,
    /// Constraints applied to discovery and scoring.
    pub constraints: Option<QueryConstraints>,
    /// Extra context tags alongside the extracted ones.
    pub context_tags: Vec<String>,
    /// Request-level sandbox profile; merged with the default
    /// `{network: restricted, fs: readonly}`.
    pub sandbox: Option<SandboxProfile>,
}

impl IntentRequest {
    /// A request with just an intent.
    pub fn new(intent: impl Into<String>) -> Self {
        Self {
            intent: intent.into(),
            capability: None,
            constraints: None,
            context_tags: Vec::new(),
            sandbox: None,
        }
    }

    /// Set an explicit capability label.
    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capability = Some(capability.into());
        self
    }

    /// Attach constraints.
    pub fn with_constraints(mut self, constraints: QueryConstraints) -> Self {
        self.constraints = Some(constraints);
        self
    }
}

/// Outcome of a completed intent.
#[derive(Debug, Clone)]
pub struct IntentOutcome {
    /// The tool that ran.
    pub tool_id: String,
    /// The version that ran.
    pub version: String,
    /// The tool's result.
    pub result: serde_json::Value,
    /// Call id of the execution.
    pub call_id: String,
    /// Execution metrics.
    pub metrics: CallMetrics,
    /// Whether the tool was generated for this intent.
    pub generated: bool,
    /// State trajectory of the task.
    pub states: Vec<IntentState>,
}

/// The Director: end-to-end intent handling.
pub struct Director {
    registry: Arc<Registry>,
    runtime: Arc<ForgeRuntime>,
    council: Arc<ValidationCouncil>,
    consensus: Arc<ConsensusEngine>,
    llm: Arc<dyn LlmClient>,
    config: DirectorConfig,
    permits: Arc<Semaphore>,
    queued: AtomicUsize,
}

impl Director {
    /// Compose a Director from its components.
    pub fn new(
        registry: Arc<Registry>,
        runtime: Arc<ForgeRuntime>,
        council: Arc<ValidationCouncil>,
        consensus: Arc<ConsensusEngine>,
        llm: Arc<dyn LlmClient>,
        config: DirectorConfig,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_intents));
        Self {
            registry,
            runtime,
            council,
            consensus,
            llm,
            config,
            permits,
            queued: AtomicUsize::new(0),
        }
    }

    /// Intents currently waiting for an execution slot.
    pub fn queue_depth(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    /// Process an intent.
    pub async fn submit(&self, request: IntentRequest) -> Result<IntentOutcome> {
        self.submit_cancellable(request, &CancelToken::never()).await
    }

    /// Process an intent under a cancellation token. Submission past the
    /// queue bound fails fast with `busy`.
    pub async fn submit_cancellable(
        &self,
        request: IntentRequest,
        cancel: &CancelToken,
    ) -> Result<IntentOutcome> {
        // Backpressure: bounded queue in front of the concurrency bound.
        let permit = match self.permits.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                let waiting = self.queued.fetch_add(1, Ordering::SeqCst);
                if waiting >= self.config.max_queued_intents {
                    self.queued.fetch_sub(1, Ordering::SeqCst);
                    return Err(ForgeError::Busy(waiting));
                }
                let acquired = tokio::select! {
                    permit = self.permits.clone().acquire_owned() => permit,
                    _ = cancel.cancelled() => {
                        self.queued.fetch_sub(1, Ordering::SeqCst);
                        return Err(ForgeError::Cancelled);
                    }
                };
                self.queued.fetch_sub(1, Ordering::SeqCst);
                acquired.map_err(|_| ForgeError::Internal("director shut down".into()))?
            }
        };
        let _permit = permit;

        self.handle(request, cancel).await
    }

    async fn handle(&self, request: IntentRequest, cancel: &CancelToken) -> Result<IntentOutcome> {
        let mut states = vec![IntentState::Received];
        tracing::info!(intent = %request.intent, "processing intent");

        // Discover.
        states.push(IntentState::Discovering);
        if cancel.is_cancelled() {
            return Err(ForgeError::Cancelled);
        }
        let capability = match &request.capability {
            Some(capability) => capability.clone(),
            None => self.extract_capability(&request.intent).await,
        };
        let mut tags = self.extract_tags(&request.intent);
        tags.extend(request.context_tags.iter().cloned());

        let discovery = self
            .registry
            .query(&capability, request.constraints.as_ref(), &tags, 5)
            .await;

        let (hit, generated) = match discovery.best {
            Some(hit) => {
                tracing::info!(tool_id = %hit.tool_id, version = %hit.version, "using existing tool");
                (hit, false)
            }
            None => {
                // Generate.
                states.push(IntentState::Generating);
                if cancel.is_cancelled() {
                    return Err(ForgeError::Cancelled);
                }
                tracing::info!("no suitable tool found, generating");
                let manifest = self.generate_tool(&request, &capability, &tags).await?;
                let version = manifest.version.clone();
                let tool_id = manifest.tool_id.clone();
                self.registry.register(manifest).await?;

                // Validate. Failure on a freshly generated tool is terminal.
                states.push(IntentState::Validating);
                if cancel.is_cancelled() {
                    return Err(ForgeError::Cancelled);
                }
                let report = self.council.validate(&tool_id, &version, None).await?;
                if !report.ok {
                    tracing::warn!(%tool_id, "generated tool failed validation");
                    return Err(ForgeError::ValidationFailed {
                        tool_id,
                        version: version.to_string(),
                        failed_stages: report.failed_stages(),
                    });
                }

                let hit = QueryHit {
                    tool_id,
                    version: version.to_string(),
                    name: capability.clone(),
                    weight: 0.0,
                    trust_level: TrustLevel::Experimental,
                    metrics: Default::default(),
                };
                (hit, true)
            }
        };

        // Prepare input.
        let manifest = self
            .registry
            .get(&hit.tool_id, semver::Version::parse(&hit.version).ok().as_ref())
            .await?
            .ok_or_else(|| ForgeError::ToolNotFound(hit.tool_id.clone()))?;
        let input = self.prepare_input(&request.intent, &manifest).await;

        // Execute under the default restricted profile tightened by the
        // request's own profile.
        states.push(IntentState::Executing);
        let mut profile = SandboxProfile::default();
        if let Some(request_profile) = &request.sandbox {
            profile = profile.tightest(request_profile);
        }

        let version = manifest.version.clone();
        let mut outcome = self
            .runtime
            .execute_cancellable(
                &hit.tool_id,
                Some(&version),
                input.clone(),
                Some(profile.clone()),
                cancel,
            )
            .await;

        // Bounded local recovery: one retry for an unavailable server.
        if let Err(e) = &outcome {
            if e.kind() == ErrorKind::ServerUnavailable && !cancel.is_cancelled() {
                tracing::warn!(tool_id = %hit.tool_id, "server unavailable, retrying once");
                tokio::time::sleep(Duration::from_millis(250)).await;
                outcome = self
                    .runtime
                    .execute_cancellable(
                        &hit.tool_id,
                        Some(&version),
                        input,
                        Some(profile),
                        cancel,
                    )
                    .await;
            }
        }
        let outcome = outcome?;

        // Record.
        states.push(IntentState::Recording);
        if let Err(e) = self
            .consensus
            .record_execution(&hit.tool_id, &hit.version, &outcome.metrics)
            .await
        {
            tracing::warn!(tool_id = %hit.tool_id, error = %e, "failed to record execution");
        }

        states.push(IntentState::Done);
        Ok(IntentOutcome {
            tool_id: hit.tool_id,
            version: hit.version,
            result: outcome.result,
            call_id: outcome.call_id,
            metrics: outcome.metrics,
            generated,
            states,
        })
    }

    /// Extract the capability label from the intent.
    async fn extract_capability(&self, intent: &str) -> String {
        let prompt = format!(
            "Extract the primary capability from this intent:\nIntent: {intent}\n\n\
             Respond with just the capability name (e.g., \"summarize_pdf\", \
             \"translate_text\", \"generate_code\")."
        );
        let request = GenerateRequest::new(&self.config.capability_extraction_model, prompt);
        match self.llm.generate(request).await {
            Ok(text) => text.trim().to_lowercase().replace(' ', "_"),
            Err(e) => {
                tracing::warn!(error = %e, "capability extraction failed");
                "unknown_capability".to_string()
            }
        }
    }

    /// Keyword-derived tags from the intent.
    fn extract_tags(&self, intent: &str) -> Vec<String> {
        let intent = intent.to_lowercase();
        TAG_KEYWORDS
            .iter()
            .filter(|k| intent.contains(**k))
            .map(|k| k.to_string())
            .collect()
    }

    /// Ask the generator collaborator for a manifest draft and fill in the
    /// forge-controlled fields.
    async fn generate_tool(
        &self,
        request: &IntentRequest,
        capability: &str,
        tags: &[String],
    ) -> Result<ToolManifest> {
        let constraints = serde_json::to_string(&request.constraints).unwrap_or_default();
        let prompt = format!(
            "Generate a tool manifest for the following intent:\n\n\
             Intent: {}\nConstraints: {constraints}\n\n\
             Respond with a JSON object containing: tool_id, version, name, \
             type (one of capability-server, inline-llm, native, workflow), \
             description, capabilities (array of {{name, input_schema, \
             output_schema}}), and interfaces.",
            request.intent
        );
        let generate = GenerateRequest::new(&self.config.generation_model, prompt)
            .with_temperature(0.7);
        let text = self.llm.generate(generate).await.map_err(|e| {
            ForgeError::Internal(format!("tool generation failed: {e}"))
        })?;

        let draft = extract_json(&text).ok_or_else(|| {
            ForgeError::InvalidInput("generator returned no JSON manifest".to_string())
        })?;

        let tool_id = draft
            .get("tool_id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| capability.to_string());
        let version = draft
            .get("version")
            .and_then(|v| v.as_str())
            .unwrap_or("1.0.0")
            .to_string();
        let name = draft
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or(capability)
            .to_string();
        let description = draft
            .get("description")
            .and_then(|v| v.as_str())
            .unwrap_or(&request.intent)
            .to_string();
        let tool_type = draft
            .get("type")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<ToolType>().ok())
            .unwrap_or(ToolType::InlineLlm);

        let mut builder = ToolManifest::builder()
            .tool_id(&tool_id)
            .version(&version)
            .name(name)
            .tool_type(tool_type)
            .description(description)
            .origin(Origin::generated(&self.config.generation_model))
            .lineage(Lineage {
                ancestor_tool_id: None,
                mutation_reason: Some("initial_generation".to_string()),
                commits: Vec::new(),
            })
            .trust(Trust {
                level: TrustLevel::Experimental,
                validation_score: 0.0,
                risk_score: 1.0,
            })
            .tags(tags.iter().cloned());

        let capabilities = draft
            .get("capabilities")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        if capabilities.is_empty() {
            builder = builder.capability(CapabilitySpec::new(capability));
        }
        for entry in capabilities {
            let mut spec = CapabilitySpec::new(
                entry
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or(capability),
            );
            if let Some(schema) = entry.get("input_schema") {
                spec.input_schema = schema.clone();
            }
            if let Some(schema) = entry.get("output_schema") {
                spec.output_schema = schema.clone();
            }
            builder = builder.capability(spec);
        }

        // Generated tools default to inline dispatch through the generator
        // model unless the draft bound a capability server.
        let binding = draft
            .get("interfaces")
            .and_then(|v| v.as_array())
            .and_then(|interfaces| interfaces.first())
            .and_then(|v| serde_json::from_value::<InterfaceBinding>(v.clone()).ok())
            .unwrap_or(InterfaceBinding::InlineLlm {
                model: self.config.generation_model.clone(),
                prompt_template: format!("{capability}: {{input}}"),
            });

        builder.interface(binding).build()
    }

    /// Extract call parameters from the intent against the manifest's
    /// capability schemas; falls back to `{"intent": ...}`.
    async fn prepare_input(&self, intent: &str, manifest: &ToolManifest) -> serde_json::Value {
        let capabilities: Vec<&str> =
            manifest.capabilities.iter().map(|c| c.name.as_str()).collect();
        let prompt = format!(
            "Extract parameters for this tool from the intent:\n\n\
             Intent: {intent}\n\nTool capabilities: {}\n\n\
             Respond with a JSON object mapping parameter names to values.",
            capabilities.join(", ")
        );
        let request = GenerateRequest::new(&self.config.parameter_extraction_model, prompt);
        match self.llm.generate(request).await {
            Ok(text) => extract_json(&text)
                .map(serde_json::Value::Object)
                .unwrap_or_else(|| serde_json::json!({"intent": intent})),
            Err(e) => {
                tracing::warn!(error = %e, "parameter extraction failed, using intent fallback");
                serde_json::json!({"intent": intent})
            }
        }
    }
}

/// Pull the first JSON object out of model output, tolerating fences and
/// prose around it.
fn extract_json(text: &str) -> Option<serde_json::Map<String, serde_json::Value>> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str::<serde_json::Value>(&text[start..=end])
        .ok()?
        .as_object()
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_with_fences() {
        let text = "Here you go:\n```json\n{\"tool_id\": \"parse_cron\"}\n```";
        let obj = extract_json(text).unwrap();
        assert_eq!(obj["tool_id"], "parse_cron");
    }

    #[test]
    fn test_extract_json_none() {
        assert!(extract_json("no json at all").is_none());
        assert!(extract_json("} backwards {").is_none());
    }
}
