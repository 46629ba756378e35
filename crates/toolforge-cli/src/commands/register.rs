//! `toolforge register <tool_name> <type>`

use clap::Args;
use std::io::Write;

use toolforge::{CapabilitySpec, ForgeError, Origin, ToolManifest, ToolType};

use crate::forge::Forge;
use crate::output;

#[derive(Args)]
pub struct RegisterArgs {
    /// Tool name (also the tool id).
    pub tool_name: String,

    /// Tool type: capability-server, inline-llm, native, or workflow.
    pub tool_type: String,

    /// Version to register.
    #[arg(long, default_value = "0.1.0")]
    pub version: String,

    /// Author recorded in the manifest origin.
    #[arg(long, default_value = "operator")]
    pub author: String,
}

fn prompt(label: &str) -> Result<String, ForgeError> {
    print!("{label}: ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

pub async fn run(forge: &Forge, args: RegisterArgs) -> Result<i32, ForgeError> {
    let tool_type: ToolType = args.tool_type.parse()?;

    let description = prompt("Description")?;
    if description.is_empty() {
        return Err(ForgeError::InvalidInput("description must not be empty".into()));
    }
    let tags = prompt("Tags (comma-separated)")?;
    let tags: Vec<String> = tags
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();

    let manifest = ToolManifest::builder()
        .tool_id(&args.tool_name)
        .version(&args.version)
        .name(&args.tool_name)
        .tool_type(tool_type)
        .description(description)
        .origin(Origin::external(&args.author))
        .capability(CapabilitySpec::new(&args.tool_name))
        .tags(tags)
        .build()?;

    forge.registry.register(manifest).await?;
    output::print_ok(&format!(
        "registered {} v{} (trust: experimental, risk: 1.0)",
        args.tool_name, args.version
    ));
    Ok(0)
}
