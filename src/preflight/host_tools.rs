//! Host tool availability checks.

use crate::platform::Platform;

use super::types::CheckResult;

/// Where each external tool usually comes from.
fn install_hint(tool: &str) -> &'static str {
    match tool {
        "mount" | "umount" => "Install the 'util-linux' package.",
        "wimlib-imagex" => "Install 'wimlib' (wimtools on Debian/Ubuntu).",
        "xorriso" => "Install the 'xorriso' package.",
        "7z" => "Install '7zip' (p7zip-full on older distributions).",
        "powershell" => "Windows PowerShell ships with Windows.",
        "dism" => "DISM ships with Windows.",
        "oscdimg" => "Install the Windows ADK Deployment Tools or set DEVWIN_OSCDIMG.",
        _ => "Install it and make sure it is on PATH.",
    }
}

/// Check every tool the platform adapter shells out to.
pub fn check_host_tools(platform: &dyn Platform) -> Vec<CheckResult> {
    platform
        .required_tools()
        .iter()
        .map(|tool| match platform.locate_tool(tool) {
            Some(path) => CheckResult::tool_found(tool, &path),
            None => CheckResult::tool_missing(tool, install_hint(tool)),
        })
        .collect()
}
