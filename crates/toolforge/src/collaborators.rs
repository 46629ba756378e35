//! Collaborator seams.
//!
//! The Forge consumes LLM backends and cost tracking through these traits;
//! routing, retries, and context-window handling live behind them. Tests and
//! offline wiring use [`MockLlmClient`].

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{ForgeError, Result};

/// A single generation request.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    /// Model alias to route to (e.g. "base", "powerful", "auditor").
    pub model: String,
    /// User prompt.
    pub prompt: String,
    /// Optional system prompt.
    pub system: Option<String>,
    /// Sampling temperature.
    pub temperature: f64,
    /// Optional completion cap.
    pub max_tokens: Option<u32>,
    /// Wall-clock deadline for the call.
    pub deadline: Duration,
}

impl GenerateRequest {
    /// A low-temperature request with the default deadline.
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            system: None,
            temperature: 0.1,
            max_tokens: None,
            deadline: Duration::from_secs(30),
        }
    }

    /// Set the temperature.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the deadline.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }
}

/// LLM backend collaborator.
///
/// Implementations route across providers and enforce the request deadline;
/// the Forge only sees text or a failure.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Generate a completion for the request.
    async fn generate(&self, request: GenerateRequest) -> Result<String>;

    /// Model aliases this client can route to.
    async fn list_models(&self) -> Result<Vec<String>>;
}

/// Optional cost tracking collaborator.
#[async_trait]
pub trait CostTracker: Send + Sync {
    /// Mean cost per call for a tool version, when known.
    async fn cost_per_call(&self, tool_id: &str, version: &str) -> Option<f64>;
}

/// Scripted LLM client for tests and offline wiring.
///
/// Responses are matched by substring against the prompt, in registration
/// order; unmatched prompts fall back to the default response or fail.
pub struct MockLlmClient {
    responses: Mutex<Vec<(String, String)>>,
    default_response: Option<String>,
    calls: Mutex<Vec<GenerateRequest>>,
}

impl MockLlmClient {
    /// Client that fails every call.
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            default_response: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Client that answers every prompt with `response`.
    pub fn always(response: impl Into<String>) -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            default_response: Some(response.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Answer prompts containing `pattern` with `response`.
    pub fn respond_to(self, pattern: impl Into<String>, response: impl Into<String>) -> Self {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((pattern.into(), response.into()));
        self
    }

    /// Prompts seen so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn generate(&self, request: GenerateRequest) -> Result<String> {
        let response = {
            let responses = self.responses.lock().unwrap_or_else(|e| e.into_inner());
            responses
                .iter()
                .find(|(pattern, _)| request.prompt.contains(pattern.as_str()))
                .map(|(_, response)| response.clone())
                .or_else(|| self.default_response.clone())
        };
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request);
        response.ok_or_else(|| ForgeError::Internal("no scripted response".into()))
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        Ok(vec!["base".into(), "powerful".into(), "auditor".into()])
    }
}

/// Static cost table for tests and offline wiring.
#[derive(Default)]
pub struct StaticCostTracker {
    costs: HashMap<(String, String), f64>,
}

impl StaticCostTracker {
    /// Empty tracker: every lookup misses.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a cost for a tool version.
    pub fn with_cost(mut self, tool_id: impl Into<String>, version: impl Into<String>, cost: f64) -> Self {
        self.costs.insert((tool_id.into(), version.into()), cost);
        self
    }
}

#[async_trait]
impl CostTracker for StaticCostTracker {
    async fn cost_per_call(&self, tool_id: &str, version: &str) -> Option<f64> {
        self.costs
            .get(&(tool_id.to_string(), version.to_string()))
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_matches_by_substring() {
        let llm = MockLlmClient::always("fallback")
            .respond_to("capability", "summarize_pdf")
            .respond_to("parameters", r#"{"doc": "report.pdf"}"#);

        let out = llm
            .generate(GenerateRequest::new("base", "Extract the primary capability from ..."))
            .await
            .unwrap();
        assert_eq!(out, "summarize_pdf");

        let out = llm
            .generate(GenerateRequest::new("base", "anything else"))
            .await
            .unwrap();
        assert_eq!(out, "fallback");
        assert_eq!(llm.call_count(), 2);
    }

    #[tokio::test]
    async fn test_mock_without_script_fails() {
        let llm = MockLlmClient::new();
        let result = llm.generate(GenerateRequest::new("base", "hello")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_static_cost_tracker() {
        let tracker = StaticCostTracker::new().with_cost("translate_text", "1.0.0", 0.002);
        assert_eq!(tracker.cost_per_call("translate_text", "1.0.0").await, Some(0.002));
        assert_eq!(tracker.cost_per_call("translate_text", "2.0.0").await, None);
    }
}
