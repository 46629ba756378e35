//! Tool execution.
//!
//! `execute` runs one call end to end: fetch the manifest, ensure its
//! capability server is live, dispatch with a deadline, hash the input and
//! result, and append a provenance record. Provenance is written for every
//! path that reached dispatch, including timeouts and cancellations.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use toolforge::{
    hash, CallMetrics, CancelToken, ForgeError, GenerateRequest, InterfaceBinding, LlmClient,
    Result, RuntimeConfig, SandboxProfile, ToolManifest,
};
use toolforge_registry::Registry;

use crate::provenance::{ProvenanceEntry, ProvenanceLog, ProvenanceRecord};
use crate::server::{ServerManager, ServerSpec};

/// Speed-tier deadlines selected by manifest tags.
const FAST_TIER: Duration = Duration::from_secs(2);
const SLOW_TIER: Duration = Duration::from_secs(60);

/// Result of a successful execution.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    /// 16-hex call identifier.
    pub call_id: String,
    /// The tool's result.
    pub result: serde_json::Value,
    /// The provenance record as written to the log.
    pub provenance: ProvenanceRecord,
    /// Call metrics.
    pub metrics: CallMetrics,
}

/// The sandboxed tool runtime. Exclusively owns capability-server processes.
pub struct ForgeRuntime {
    registry: Arc<Registry>,
    servers: ServerManager,
    provenance: Arc<dyn ProvenanceLog>,
    llm: Option<Arc<dyn LlmClient>>,
    config: RuntimeConfig,
}

impl ForgeRuntime {
    /// Create a runtime over a registry and provenance log.
    pub fn new(
        registry: Arc<Registry>,
        provenance: Arc<dyn ProvenanceLog>,
        config: RuntimeConfig,
    ) -> Self {
        let servers = ServerManager::new(
            Duration::from_millis(config.server_startup_ms),
            Duration::from_millis(config.server_cooldown_ms),
        );
        Self {
            registry,
            servers,
            provenance,
            llm: None,
            config,
        }
    }

    /// Attach the LLM collaborator used by inline-llm tools.
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// The server manager (for operator shutdown paths).
    pub fn servers(&self) -> &ServerManager {
        &self.servers
    }

    /// Execute a tool call.
    pub async fn execute(
        &self,
        tool_id: &str,
        version: Option<&semver::Version>,
        input: serde_json::Value,
        sandbox: Option<SandboxProfile>,
    ) -> Result<ExecutionOutcome> {
        self.execute_cancellable(tool_id, version, input, sandbox, &CancelToken::never())
            .await
    }

    /// Execute a tool call under a cancellation token. Cancellation during
    /// dispatch abandons the call and completes provenance with
    /// `error_kind = cancelled`.
    pub async fn execute_cancellable(
        &self,
        tool_id: &str,
        version: Option<&semver::Version>,
        input: serde_json::Value,
        sandbox: Option<SandboxProfile>,
        cancel: &CancelToken,
    ) -> Result<ExecutionOutcome> {
        if cancel.is_cancelled() {
            return Err(ForgeError::Cancelled);
        }

        let manifest = self
            .registry
            .get(tool_id, version)
            .await?
            .ok_or_else(|| ForgeError::ToolNotFound(tool_id.to_string()))?;
        let version_str = manifest.version.to_string();

        // Tightest of request-level and tool-level profiles.
        let mut profile = sandbox.unwrap_or_default();
        if let Some(tool_profile) = &manifest.sandbox {
            profile = profile.tightest(tool_profile);
        }
        let deadline = self.call_deadline(&manifest, &profile);

        let started_at = Utc::now();
        let call_id = hash::call_id(tool_id, &version_str, started_at);
        let input_hash = hash::input_hash(&input);
        tracing::info!(tool_id, version = %version_str, %call_id, "executing tool");

        // Everything from here on reached dispatch: provenance is written on
        // all outcomes.
        let dispatch = self.dispatch(&manifest, &input, deadline, cancel).await;

        let finished_at = Utc::now();
        let latency_ms = (finished_at - started_at).num_microseconds().unwrap_or(0) as f64 / 1000.0;

        let (success, result_hash, error_kind) = match &dispatch {
            Ok(result) => (true, Some(hash::result_hash(result)), None),
            Err(e) => (false, None, Some(e.kind().as_str().to_string())),
        };

        let provenance = ProvenanceRecord {
            call_id: call_id.clone(),
            tool_id: tool_id.to_string(),
            version: version_str.clone(),
            started_at,
            finished_at,
            input_hash,
            sandbox: profile,
            success,
            error_kind,
        };
        let metrics = CallMetrics {
            latency_ms,
            success,
            timestamp: finished_at,
        };
        let entry = ProvenanceEntry {
            provenance: provenance.clone(),
            metrics: metrics.clone(),
            result_hash,
        };
        if let Err(e) = self.provenance.append(&entry).await {
            tracing::error!(%call_id, error = %e, "failed to write provenance record");
        }

        let result = dispatch?;
        Ok(ExecutionOutcome {
            call_id,
            result,
            provenance,
            metrics,
        })
    }

    /// Deadline from the tool's speed tier and the effective profile.
    fn call_deadline(&self, manifest: &ToolManifest, profile: &SandboxProfile) -> Duration {
        let tier = if manifest.has_tag("fast") {
            FAST_TIER
        } else if manifest.has_tag("slow") {
            SLOW_TIER
        } else {
            Duration::from_millis(self.config.default_call_deadline_ms)
        };
        match profile.deadline {
            Some(profile_deadline) => tier.min(profile_deadline),
            None => tier,
        }
    }

    async fn dispatch(
        &self,
        manifest: &ToolManifest,
        input: &serde_json::Value,
        deadline: Duration,
        cancel: &CancelToken,
    ) -> Result<serde_json::Value> {
        let binding = manifest.interfaces.first().ok_or_else(|| {
            ForgeError::InvalidManifest(format!("tool {} has no interface binding", manifest.tool_id))
        })?;

        match binding {
            InterfaceBinding::CapabilityServer { .. } => {
                let spec = ServerSpec::from_binding(binding).ok_or_else(|| {
                    ForgeError::Internal("capability binding without server spec".to_string())
                })?;
                let capability = manifest
                    .capabilities
                    .first()
                    .map(|c| c.name.as_str())
                    .unwrap_or(manifest.tool_id.as_str());

                let channel = self.servers.ensure(&spec).await?;
                let result = tokio::select! {
                    result = channel.call(capability, input, deadline) => result,
                    _ = cancel.cancelled() => Err(ForgeError::Cancelled),
                };
                self.servers.release(&spec.name).await;
                result
            }
            InterfaceBinding::InlineLlm {
                model,
                prompt_template,
            } => {
                let llm = self.llm.as_ref().ok_or_else(|| {
                    ForgeError::Internal("no LLM collaborator configured for inline tools".into())
                })?;
                let prompt = prompt_template.replace("{input}", &hash::stable_json(input));
                let request =
                    GenerateRequest::new(model, prompt).with_deadline(deadline);
                let generated = tokio::select! {
                    result = llm.generate(request) => result,
                    _ = cancel.cancelled() => Err(ForgeError::Cancelled),
                }?;
                Ok(serde_json::Value::String(generated))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provenance::InMemoryProvenanceLog;
    use std::collections::BTreeMap;
    use toolforge::{CancelToken, CapabilitySpec, ConsensusConfig, MockLlmClient, Origin};
    use toolforge_registry::{HashEmbedder, InMemoryManifestStore, InMemoryVectorStore};

    fn registry() -> Arc<Registry> {
        Arc::new(Registry::new(
            Arc::new(HashEmbedder::default()),
            Arc::new(InMemoryVectorStore::new()),
            Arc::new(InMemoryManifestStore::new()),
            ConsensusConfig::default(),
        ))
    }

    /// An sh-based capability server: ready line, then one JSON response per
    /// request line with sequential ids.
    fn echo_server_script() -> String {
        [
            r#"echo '{"ready": true}'"#,
            "i=0",
            "while read line; do",
            "  i=$((i+1))",
            r#"  echo "{\"id\": $i, \"ok\": true, \"result\": {\"text\": \"bonjour\"}}""#,
            "done",
        ]
        .join("\n")
    }

    async fn register_server_tool(registry: &Registry, tool_id: &str) {
        let manifest = ToolManifest::builder()
            .tool_id(tool_id)
            .version("1.2.3")
            .name("Translate text")
            .description("translates text between languages")
            .origin(Origin::external("alice"))
            .capability(CapabilitySpec::new("translate_text"))
            .interface(InterfaceBinding::CapabilityServer {
                server_name: format!("{tool_id}-server"),
                command: "sh".to_string(),
                args: vec!["-c".to_string(), echo_server_script()],
                env: BTreeMap::new(),
            })
            .build()
            .unwrap();
        registry.register(manifest).await.unwrap();
    }

    fn runtime(registry: Arc<Registry>, log: Arc<InMemoryProvenanceLog>) -> ForgeRuntime {
        ForgeRuntime::new(registry, log, RuntimeConfig::default())
    }

    #[tokio::test]
    async fn test_execute_roundtrip() {
        let registry = registry();
        register_server_tool(&registry, "translate_text").await;
        let log = Arc::new(InMemoryProvenanceLog::new());
        let runtime = runtime(registry, log.clone());

        let outcome = runtime
            .execute(
                "translate_text",
                None,
                serde_json::json!({"text": "hello", "lang": "fr"}),
                None,
            )
            .await
            .unwrap();

        assert_eq!(outcome.result["text"], "bonjour");
        assert_eq!(outcome.call_id.len(), 16);
        assert!(outcome.metrics.success);
        assert!(outcome.provenance.success);

        let entry = log.read(&outcome.call_id).await.unwrap().unwrap();
        assert_eq!(entry.result_hash, Some(hash::result_hash(&outcome.result)));
    }

    #[tokio::test]
    async fn test_repeat_execution_distinct_call_ids_same_hashes() {
        let registry = registry();
        register_server_tool(&registry, "translate_text").await;
        let log = Arc::new(InMemoryProvenanceLog::new());
        let runtime = runtime(registry, log.clone());

        let input = serde_json::json!({"text": "hello", "lang": "fr"});
        let first = runtime
            .execute("translate_text", None, input.clone(), None)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        let second = runtime
            .execute("translate_text", None, input.clone(), None)
            .await
            .unwrap();

        assert_ne!(first.call_id, second.call_id);
        assert_eq!(first.provenance.input_hash, second.provenance.input_hash);
        // Deterministic tool: identical result hashes.
        let e1 = log.read(&first.call_id).await.unwrap().unwrap();
        let e2 = log.read(&second.call_id).await.unwrap().unwrap();
        assert_eq!(e1.result_hash, e2.result_hash);
    }

    #[tokio::test]
    async fn test_not_found_writes_no_provenance() {
        let registry = registry();
        let log = Arc::new(InMemoryProvenanceLog::new());
        let runtime = runtime(registry, log.clone());

        let result = runtime
            .execute("missing_tool", None, serde_json::json!({}), None)
            .await;
        assert!(matches!(result, Err(ForgeError::ToolNotFound(_))));
        assert!(log.is_empty().await);
    }

    #[tokio::test]
    async fn test_timeout_writes_provenance() {
        let registry = registry();
        let manifest = ToolManifest::builder()
            .tool_id("stuck_tool")
            .version("1.0.0")
            .name("Stuck")
            .description("never answers")
            .origin(Origin::external("alice"))
            .capability(CapabilitySpec::new("stuck"))
            .interface(InterfaceBinding::CapabilityServer {
                server_name: "stuck-server".to_string(),
                command: "sh".to_string(),
                args: vec![
                    "-c".to_string(),
                    r#"echo '{"ready": true}'; cat > /dev/null"#.to_string(),
                ],
                env: BTreeMap::new(),
            })
            .build()
            .unwrap();
        registry.register(manifest).await.unwrap();

        let log = Arc::new(InMemoryProvenanceLog::new());
        let runtime = runtime(registry, log.clone());

        let profile = SandboxProfile {
            deadline: Some(Duration::from_millis(150)),
            ..Default::default()
        };
        let result = runtime
            .execute("stuck_tool", None, serde_json::json!({}), Some(profile))
            .await;
        assert!(matches!(result, Err(ForgeError::Timeout(_))));

        assert_eq!(log.len().await, 1);
    }

    #[tokio::test]
    async fn test_cancellation_completes_provenance() {
        let registry = registry();
        let manifest = ToolManifest::builder()
            .tool_id("slow_tool")
            .version("1.0.0")
            .name("Slow")
            .description("slow to answer")
            .origin(Origin::external("alice"))
            .capability(CapabilitySpec::new("slow"))
            .interface(InterfaceBinding::CapabilityServer {
                server_name: "slow-server".to_string(),
                command: "sh".to_string(),
                args: vec![
                    "-c".to_string(),
                    r#"echo '{"ready": true}'; cat > /dev/null"#.to_string(),
                ],
                env: BTreeMap::new(),
            })
            .build()
            .unwrap();
        registry.register(manifest).await.unwrap();

        let log = Arc::new(InMemoryProvenanceLog::new());
        let runtime = runtime(registry, log.clone());

        let (handle, token) = CancelToken::new();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            handle.cancel();
        });

        let result = runtime
            .execute_cancellable("slow_tool", None, serde_json::json!({}), None, &token)
            .await;
        assert!(matches!(result, Err(ForgeError::Cancelled)));

        // Provenance closed with the cancellation.
        assert_eq!(log.len().await, 1);
    }

    #[tokio::test]
    async fn test_inline_llm_tool() {
        let registry = registry();
        let manifest = ToolManifest::builder()
            .tool_id("describe_intent")
            .version("1.0.0")
            .name("Describe")
            .description("describes an intent")
            .origin(Origin::external("alice"))
            .capability(CapabilitySpec::new("describe"))
            .interface(InterfaceBinding::InlineLlm {
                model: "base".to_string(),
                prompt_template: "Describe: {input}".to_string(),
            })
            .build()
            .unwrap();
        registry.register(manifest).await.unwrap();

        let log = Arc::new(InMemoryProvenanceLog::new());
        let runtime = runtime(registry, log.clone())
            .with_llm(Arc::new(MockLlmClient::always("a summary request")));

        let outcome = runtime
            .execute("describe_intent", None, serde_json::json!({"q": 1}), None)
            .await
            .unwrap();
        assert_eq!(outcome.result, serde_json::json!("a summary request"));
    }

    #[tokio::test]
    async fn test_sandbox_tightening() {
        let registry = registry();
        let mut manifest = ToolManifest::builder()
            .tool_id("translate_text")
            .version("1.0.0")
            .name("Translate")
            .description("translates")
            .origin(Origin::external("alice"))
            .capability(CapabilitySpec::new("translate_text"))
            .interface(InterfaceBinding::CapabilityServer {
                server_name: "t-server".to_string(),
                command: "sh".to_string(),
                args: vec!["-c".to_string(), echo_server_script()],
                env: BTreeMap::new(),
            })
            .build()
            .unwrap();
        manifest.sandbox = Some(SandboxProfile {
            network: toolforge::NetworkPolicy::None,
            ..Default::default()
        });
        registry.register(manifest).await.unwrap();

        let log = Arc::new(InMemoryProvenanceLog::new());
        let runtime = runtime(registry, log);

        let outcome = runtime
            .execute(
                "translate_text",
                None,
                serde_json::json!({"text": "hi"}),
                Some(SandboxProfile::open()),
            )
            .await
            .unwrap();
        // Tool-level restriction wins over the open request profile.
        assert_eq!(outcome.provenance.sandbox.network, toolforge::NetworkPolicy::None);
    }
}
