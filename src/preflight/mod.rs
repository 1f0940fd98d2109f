//! Preflight checks for devwin.
//!
//! Validates the host tools of the platform adapter and the working
//! directories before starting a build. Run with `devwin preflight`.

mod environment;
mod host_tools;
mod types;

use tracing::debug;

use crate::config::Config;
use crate::platform::Platform;

pub use types::{CheckGroup, CheckResult, CheckStatus, PreflightReport};

/// Run all preflight checks against `platform`.
pub fn run_preflight(platform: &dyn Platform, config: &Config) -> PreflightReport {
    let mut report = PreflightReport::new(platform.name());

    debug!(adapter = platform.name(), "checking host tools");
    for check in host_tools::check_host_tools(platform) {
        report.push(check);
    }

    debug!("checking working directories");
    report.push(environment::check_writable("cache directory", &config.cache_dir));
    report.push(environment::check_writable("output directory", &config.output_dir));
    report.push(environment::check_temp_dir(&std::env::temp_dir()));

    report
}
