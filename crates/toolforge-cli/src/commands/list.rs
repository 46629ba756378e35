//! `toolforge list [--trust] [--type] [--tags]`

use clap::Args;
use comfy_table::{presets::UTF8_FULL, Table};

use toolforge::{ForgeError, ToolType, TrustLevel};

use crate::forge::Forge;
use crate::output;

#[derive(Args)]
pub struct ListArgs {
    /// Filter by trust level.
    #[arg(long)]
    pub trust: Option<String>,

    /// Filter by tool type.
    #[arg(long = "type")]
    pub tool_type: Option<String>,

    /// Filter by tags (all must match).
    #[arg(long, value_delimiter = ',')]
    pub tags: Vec<String>,
}

pub async fn run(forge: &Forge, args: ListArgs) -> Result<i32, ForgeError> {
    let trust = args
        .trust
        .as_deref()
        .map(|t| t.parse::<TrustLevel>())
        .transpose()?;
    let tool_type = args
        .tool_type
        .as_deref()
        .map(|t| t.parse::<ToolType>())
        .transpose()?;

    let manifests = forge
        .registry
        .list(trust, tool_type.as_ref(), &args.tags)
        .await?;
    if manifests.is_empty() {
        println!("no tools registered");
        return Ok(0);
    }

    // Grouped by trust level, most trusted first.
    for level in [TrustLevel::Core, TrustLevel::ThirdParty, TrustLevel::Experimental] {
        let group: Vec<_> = manifests.iter().filter(|m| m.trust.level == level).collect();
        if group.is_empty() {
            continue;
        }

        println!("{}", output::format_trust(level));
        let mut table = Table::new();
        table.load_preset(UTF8_FULL).set_header(vec![
            "tool_id",
            "version",
            "type",
            "weight",
            "p95 ms",
            "tags",
        ]);
        for manifest in group {
            let weight = forge
                .registry
                .current_weight(&manifest.tool_id, &manifest.version.to_string())
                .await;
            table.add_row(vec![
                manifest.tool_id.clone(),
                manifest.version.to_string(),
                manifest.tool_type.to_string(),
                output::format_weight(weight),
                manifest
                    .metrics
                    .latest
                    .latency_ms_p95
                    .map(|p| format!("{p:.0}"))
                    .unwrap_or_else(|| "-".to_string()),
                manifest.tags.join(","),
            ]);
        }
        println!("{table}");
    }
    Ok(0)
}
