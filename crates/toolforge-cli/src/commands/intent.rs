//! `toolforge intent "<text>" [--capability name]`
//!
//! Drives the full Director flow: discover, (generate), validate, execute,
//! record. Without an LLM backend wired, pass `--capability` so discovery
//! can run; generation of missing tools requires a backend.

use clap::Args;
use std::sync::Arc;

use toolforge::{DirectorConfig, ForgeError, MockLlmClient};
use toolforge_director::{Director, IntentRequest};
use toolforge_registry::QueryConstraints;

use crate::forge::Forge;
use crate::output;

#[derive(Args)]
pub struct IntentArgs {
    /// The intent text.
    pub intent: String,

    /// Explicit capability label (skips LLM extraction).
    #[arg(long)]
    pub capability: Option<String>,

    /// Max acceptable p95 latency in milliseconds.
    #[arg(long = "latency")]
    pub latency_ms: Option<f64>,

    /// Max acceptable risk score.
    #[arg(long)]
    pub risk: Option<f64>,
}

pub async fn run(forge: &Forge, args: IntentArgs) -> Result<i32, ForgeError> {
    let council = forge.council();
    let director = Director::new(
        forge.registry.clone(),
        forge.runtime.clone(),
        Arc::new(council),
        forge.consensus.clone(),
        // No backend wired at the CLI; extraction and generation degrade.
        Arc::new(MockLlmClient::new()),
        DirectorConfig::default(),
    );

    let mut request = IntentRequest::new(&args.intent);
    if let Some(capability) = args.capability {
        request = request.with_capability(capability);
    }
    let constraints = QueryConstraints {
        latency_ms_p95: args.latency_ms,
        risk_score: args.risk,
        ..Default::default()
    };
    if !constraints.is_empty() {
        request = request.with_constraints(constraints);
    }

    let outcome = director.submit(request).await?;

    println!("{}", serde_json::to_string_pretty(&outcome.result)?);
    println!(
        "tool: {} v{}  call_id: {}  latency_ms: {:.1}{}",
        outcome.tool_id,
        outcome.version,
        outcome.call_id,
        outcome.metrics.latency_ms,
        if outcome.generated { "  (generated)" } else { "" }
    );
    output::print_ok("intent completed");
    Ok(0)
}
