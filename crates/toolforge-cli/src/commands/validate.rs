//! `toolforge validate <tool_id> [version]`

use clap::Args;

use toolforge::ForgeError;

use crate::forge::Forge;
use crate::output;

#[derive(Args)]
pub struct ValidateArgs {
    /// Tool identifier.
    pub tool_id: String,

    /// Version to validate; latest active when omitted.
    pub version: Option<String>,
}

pub async fn run(forge: &Forge, args: ValidateArgs) -> Result<i32, ForgeError> {
    let version = match &args.version {
        Some(v) => semver::Version::parse(v)?,
        None => {
            forge
                .registry
                .get(&args.tool_id, None)
                .await?
                .ok_or_else(|| ForgeError::ToolNotFound(args.tool_id.clone()))?
                .version
        }
    };

    let council = forge.council();
    let report = council.validate(&args.tool_id, &version, None).await?;

    println!("validation of {} v{version}:", args.tool_id);
    for stage in &report.stages {
        println!(
            "  {:<24} {:<24} score {:.2}",
            stage.stage,
            output::format_stage(stage.success, stage.evaluated),
            stage.score
        );
        for error in &stage.errors {
            println!("      {error}");
        }
    }
    println!("overall score: {:.3}", report.validation_score);

    let unevaluated = report.unevaluated_stages();
    if !unevaluated.is_empty() {
        println!("not evaluated (missing artifacts): {}", unevaluated.join(", "));
    }

    let manifest = forge
        .registry
        .get(&args.tool_id, Some(&version))
        .await?
        .ok_or_else(|| ForgeError::ToolNotFound(args.tool_id.clone()))?;
    println!("trust level: {}", output::format_trust(manifest.trust.level));

    if report.ok {
        Ok(0)
    } else {
        output::print_error(&format!("failed stages: {}", report.failed_stages().join(", ")));
        Ok(4)
    }
}
