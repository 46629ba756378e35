//! `toolforge execute <tool_id> [version] --input <json>`

use clap::Args;

use toolforge::ForgeError;

use crate::forge::Forge;
use crate::output;

#[derive(Args)]
pub struct ExecuteArgs {
    /// Tool identifier.
    pub tool_id: String,

    /// Version to execute; latest active when omitted.
    pub version: Option<String>,

    /// Call input as a JSON object.
    #[arg(long)]
    pub input: String,
}

pub async fn run(forge: &Forge, args: ExecuteArgs) -> Result<i32, ForgeError> {
    let input: serde_json::Value = serde_json::from_str(&args.input)
        .map_err(|e| ForgeError::InvalidInput(format!("--input is not valid JSON: {e}")))?;

    let version = args
        .version
        .as_deref()
        .map(semver::Version::parse)
        .transpose()?;

    let outcome = forge
        .runtime
        .execute(&args.tool_id, version.as_ref(), input, None)
        .await?;

    // Record metrics back so discovery sees fresh data.
    if let Err(e) = forge
        .consensus
        .record_execution(&outcome.provenance.tool_id, &outcome.provenance.version, &outcome.metrics)
        .await
    {
        tracing::warn!(error = %e, "failed to record execution metrics");
    }

    println!("{}", serde_json::to_string_pretty(&outcome.result)?);
    println!(
        "call_id: {}  latency_ms: {:.1}  success: {}",
        outcome.call_id, outcome.metrics.latency_ms, outcome.metrics.success
    );
    output::print_ok(&format!(
        "provenance recorded for {} v{}",
        outcome.provenance.tool_id, outcome.provenance.version
    ));
    Ok(0)
}
