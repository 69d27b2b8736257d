//! Preflight command - runs preflight checks.

use anyhow::Result;

use imgboot::config::Config;
use imgboot::preflight;

/// Execute the preflight command.
pub fn cmd_preflight(config: &Config, strict: bool) -> Result<()> {
    if strict {
        return preflight::run_preflight_or_fail(config);
    }

    let report = preflight::run_preflight(config);
    print!("{}", report);
    if !report.is_ready() {
        println!("Some checks failed. Use --strict to fail with a non-zero exit code.");
    }
    Ok(())
}
