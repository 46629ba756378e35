//! Tool Forge CLI.
//!
//! Operator-facing surface over the composed Forge. Exit codes:
//! 0 success, 2 invalid arguments, 3 not found, 4 validation failed,
//! 5 execution failed, 6 busy.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod forge;
mod output;

use commands::{execute, intent, list, optimize, query, register, validate};
use toolforge::{ErrorKind, ForgeError};

/// Tool Forge - registry and runtime for machine-generated tools.
#[derive(Parser)]
#[command(name = "toolforge")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Register, validate, query, execute, and optimize tools", long_about = None)]
struct Cli {
    /// Path to the forge config file (TOML).
    #[arg(long, global = true, default_value = "forge.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a tool manifest (prompts for description and tags)
    Register(register::RegisterArgs),

    /// Run the validation council over a tool version
    Validate(validate::ValidateArgs),

    /// Discover tools by capability with constraint filtering
    Query(query::QueryArgs),

    /// Execute a tool through the sandboxed runtime
    Execute(execute::ExecuteArgs),

    /// Run a full intent through the Director (discover, validate, execute)
    Intent(intent::IntentArgs),

    /// Characterize and optimize a workflow's tool variants
    Optimize(optimize::OptimizeArgs),

    /// List registered tools grouped by trust level
    List(list::ListArgs),
}

/// Map a forge error to the operator exit code.
fn exit_code(err: &ForgeError) -> i32 {
    match err.kind() {
        ErrorKind::InvalidInput => 2,
        ErrorKind::NotFound => 3,
        ErrorKind::ValidationFailed => 4,
        ErrorKind::Busy => 6,
        _ => 5,
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    std::process::exit(run(cli).await);
}

async fn run(cli: Cli) -> i32 {
    let forge = match forge::Forge::open(&cli.config).await {
        Ok(forge) => forge,
        Err(e) => {
            output::print_error(&format!("failed to open forge: {e}"));
            return exit_code(&e);
        }
    };

    let result: Result<i32, ForgeError> = match cli.command {
        Commands::Register(args) => register::run(&forge, args).await,
        Commands::Validate(args) => validate::run(&forge, args).await,
        Commands::Query(args) => query::run(&forge, args).await,
        Commands::Execute(args) => execute::run(&forge, args).await,
        Commands::Intent(args) => intent::run(&forge, args).await,
        Commands::Optimize(args) => optimize::run(&forge, args).await,
        Commands::List(args) => list::run(&forge, args).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            output::print_error(&e.to_string());
            exit_code(&e)
        }
    }
}
