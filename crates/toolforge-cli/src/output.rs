//! Output helpers shared by the CLI commands.

use colored::Colorize;

use toolforge::TrustLevel;

/// Print an error line to stderr.
pub fn print_error(message: &str) {
    eprintln!("{} {message}", "error:".red().bold());
}

/// Print a success line.
pub fn print_ok(message: &str) {
    println!("{} {message}", "ok:".green().bold());
}

/// Render a trust level with its conventional color.
pub fn format_trust(level: TrustLevel) -> String {
    match level {
        TrustLevel::Core => "core".green().to_string(),
        TrustLevel::ThirdParty => "third_party".yellow().to_string(),
        TrustLevel::Experimental => "experimental".red().to_string(),
    }
}

/// Render a pass/fail stage marker, dimming vacuous passes.
pub fn format_stage(success: bool, evaluated: bool) -> String {
    match (success, evaluated) {
        (true, true) => "pass".green().to_string(),
        (true, false) => "pass (not evaluated)".dimmed().to_string(),
        (false, _) => "fail".red().to_string(),
    }
}

/// Render a weight as a fixed-width score.
pub fn format_weight(weight: f64) -> String {
    format!("{weight:.3}")
}
