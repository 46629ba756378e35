//! `toolforge optimize <workflow_id> [--runs n] --tasks <file>`

use async_trait::async_trait;
use clap::Args;
use std::sync::Arc;

use toolforge::{ForgeError, Result as ForgeResult};
use toolforge_optimizer::{
    SpecializationTrigger, VariantRunOutcome, VariantRunner, WorkflowOptimizer, WorkflowTask,
};
use toolforge_runtime::ForgeRuntime;

use crate::forge::Forge;
use crate::output;

#[derive(Args)]
pub struct OptimizeArgs {
    /// Workflow identifier.
    pub workflow_id: String,

    /// Characterization runs per candidate.
    #[arg(long, default_value_t = 10)]
    pub runs: usize,

    /// JSON file describing the workflow tasks and their candidates.
    #[arg(long)]
    pub tasks: std::path::PathBuf,

    /// Optional JSON file with specialization triggers.
    #[arg(long)]
    pub triggers: Option<std::path::PathBuf>,
}

/// Runs candidates through the sandboxed runtime.
struct RuntimeVariantRunner {
    runtime: Arc<ForgeRuntime>,
}

#[async_trait]
impl VariantRunner for RuntimeVariantRunner {
    async fn run_variant(
        &self,
        tool_id: &str,
        version: &str,
        input: serde_json::Value,
    ) -> ForgeResult<VariantRunOutcome> {
        let version = semver::Version::parse(version).ok();
        match self
            .runtime
            .execute(tool_id, version.as_ref(), input, None)
            .await
        {
            Ok(outcome) => Ok(VariantRunOutcome {
                latency_ms: outcome.metrics.latency_ms,
                success: outcome.metrics.success,
                correctness: None,
                cost: None,
            }),
            Err(e) => {
                tracing::debug!(tool_id, error = %e, "characterization run errored");
                Ok(VariantRunOutcome {
                    latency_ms: 0.0,
                    success: false,
                    correctness: None,
                    cost: None,
                })
            }
        }
    }
}

pub async fn run(forge: &Forge, args: OptimizeArgs) -> Result<i32, ForgeError> {
    let tasks_text = std::fs::read_to_string(&args.tasks)?;
    let tasks: Vec<WorkflowTask> = serde_json::from_str(&tasks_text)
        .map_err(|e| ForgeError::InvalidInput(format!("bad tasks file: {e}")))?;

    let triggers: Vec<SpecializationTrigger> = match &args.triggers {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            serde_json::from_str(&text)
                .map_err(|e| ForgeError::InvalidInput(format!("bad triggers file: {e}")))?
        }
        None => Vec::new(),
    };

    let runner = Arc::new(RuntimeVariantRunner {
        runtime: forge.runtime.clone(),
    });
    let optimizer = WorkflowOptimizer::new(runner);
    let result = optimizer
        .optimize_workflow(&args.workflow_id, &tasks, args.runs, &triggers)
        .await?;

    println!("workflow {}:", result.workflow_id);
    println!("best variants:");
    for (task_id, best) in &result.best_variants {
        println!(
            "  {task_id}: {} v{} (score {})",
            best.tool_id,
            best.version,
            output::format_weight(best.score)
        );
    }
    if result.best_variants.is_empty() {
        println!("  (none - all candidates failed characterization)");
    }

    if !result.specializations.is_empty() {
        println!("specializations:");
        for specialization in &result.specializations {
            println!(
                "  {} tags: {}",
                specialization.action,
                specialization.variant_tags.join(",")
            );
        }
    }
    Ok(0)
}
