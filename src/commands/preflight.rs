//! Preflight command - runs preflight checks.

use anyhow::{bail, Result};

use devwin::config::Config;
use devwin::{platform, preflight};

/// Execute the preflight command.
pub fn cmd_preflight(strict: bool, config: &Config) -> Result<()> {
    let platform = platform::host(config);
    let report = preflight::run_preflight(platform.as_ref(), config);
    report.print();

    if report.all_passed() {
        println!("All preflight checks passed!\n");
    } else if strict {
        let missing = report.missing_tools();
        if missing.is_empty() {
            bail!(
                "Preflight failed: {} check(s) failed. Fix the issues above before building.",
                report.fail_count()
            );
        }
        bail!(
            "Preflight failed: {} check(s) failed, missing tools: {}",
            report.fail_count(),
            missing.join(", ")
        );
    } else {
        println!("Some checks failed. Use --strict to fail the build.");
    }
    Ok(())
}
