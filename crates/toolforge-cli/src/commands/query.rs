//! `toolforge query <capability> [--latency ms] [--risk x] [--trust lvl]`

use clap::Args;

use toolforge::{ForgeError, TrustLevel};
use toolforge_registry::QueryConstraints;

use crate::forge::Forge;
use crate::output;

#[derive(Args)]
pub struct QueryArgs {
    /// Required capability (e.g. "summarize_pdf").
    pub capability: String,

    /// Max acceptable p95 latency in milliseconds.
    #[arg(long = "latency")]
    pub latency_ms: Option<f64>,

    /// Max acceptable risk score.
    #[arg(long)]
    pub risk: Option<f64>,

    /// Minimum trust level (experimental, third_party, core).
    #[arg(long)]
    pub trust: Option<String>,

    /// Context tags.
    #[arg(long, value_delimiter = ',')]
    pub tags: Vec<String>,

    /// Max results.
    #[arg(long, default_value_t = 5)]
    pub limit: usize,
}

pub async fn run(forge: &Forge, args: QueryArgs) -> Result<i32, ForgeError> {
    let min_trust = args
        .trust
        .as_deref()
        .map(|t| t.parse::<TrustLevel>())
        .transpose()?;

    let constraints = QueryConstraints {
        latency_ms_p95: args.latency_ms,
        risk_score: args.risk,
        ..Default::default()
    };
    let constraints = if constraints.is_empty() { None } else { Some(constraints) };

    let mut result = forge
        .registry
        .query(&args.capability, constraints.as_ref(), &args.tags, args.limit)
        .await;

    if let Some(min_trust) = min_trust {
        result.alternatives.retain(|hit| hit.trust_level >= min_trust);
        if result.best.as_ref().is_some_and(|hit| hit.trust_level < min_trust) {
            let mut remaining = std::mem::take(&mut result.alternatives);
            result.best = if remaining.is_empty() {
                None
            } else {
                Some(remaining.remove(0))
            };
            result.alternatives = remaining;
        }
    }

    let Some(best) = result.best else {
        output::print_error(&format!("no tool matches capability '{}'", args.capability));
        return Ok(3);
    };

    println!(
        "best: {} v{} (weight {}, trust {})",
        best.tool_id,
        best.version,
        output::format_weight(best.weight),
        output::format_trust(best.trust_level)
    );
    if let Some(p95) = best.metrics.latency_ms_p95 {
        println!("  latency_ms_p95: {p95:.1}");
    }

    if !result.alternatives.is_empty() {
        println!("alternatives:");
        for hit in &result.alternatives {
            println!(
                "  {} v{} (weight {}, trust {})",
                hit.tool_id,
                hit.version,
                output::format_weight(hit.weight),
                output::format_trust(hit.trust_level)
            );
        }
    }
    Ok(0)
}
