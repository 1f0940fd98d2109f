//! Preflight report, grouped by what a build needs from the host.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckGroup {
    /// External programs the platform adapter shells out to.
    Tools,
    /// Cache, output and scratch directories.
    Directories,
}

impl CheckGroup {
    fn title(self) -> &'static str {
        match self {
            CheckGroup::Tools => "Host tools",
            CheckGroup::Directories => "Working directories",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Pass,
    /// Builds on this host will not work.
    Fail,
    /// Builds may work, with caveats.
    Warn,
}

impl CheckStatus {
    fn label(self) -> &'static str {
        match self {
            CheckStatus::Pass => "PASS",
            CheckStatus::Fail => "FAIL",
            CheckStatus::Warn => "WARN",
        }
    }
}

/// Result of a single preflight check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub group: CheckGroup,
    /// Tool or directory name.
    pub name: String,
    pub status: CheckStatus,
    /// Resolved path, or what went wrong.
    pub details: String,
    /// How to fix a failure.
    pub hint: Option<String>,
}

impl CheckResult {
    /// A tool the adapter found at `path`.
    pub fn tool_found(name: &str, path: &std::path::Path) -> Self {
        Self {
            group: CheckGroup::Tools,
            name: name.to_string(),
            status: CheckStatus::Pass,
            details: path.display().to_string(),
            hint: None,
        }
    }

    /// A tool the adapter cannot locate.
    pub fn tool_missing(name: &str, hint: &str) -> Self {
        Self {
            group: CheckGroup::Tools,
            name: name.to_string(),
            status: CheckStatus::Fail,
            details: "not found".to_string(),
            hint: Some(hint.to_string()),
        }
    }

    pub fn directory(name: &str, status: CheckStatus, details: impl Into<String>) -> Self {
        Self {
            group: CheckGroup::Directories,
            name: name.to_string(),
            status,
            details: details.into(),
            hint: None,
        }
    }
}

/// Results of all preflight checks for one platform adapter.
#[derive(Debug)]
pub struct PreflightReport {
    /// Adapter the tool checks ran against.
    pub adapter: &'static str,
    pub checks: Vec<CheckResult>,
}

impl PreflightReport {
    pub fn new(adapter: &'static str) -> Self {
        Self {
            adapter,
            checks: Vec::new(),
        }
    }

    pub fn push(&mut self, check: CheckResult) {
        self.checks.push(check);
    }

    /// True if no check failed. Warnings still pass.
    pub fn all_passed(&self) -> bool {
        self.count(CheckStatus::Fail) == 0
    }

    pub fn count(&self, status: CheckStatus) -> usize {
        self.checks.iter().filter(|c| c.status == status).count()
    }

    pub fn fail_count(&self) -> usize {
        self.count(CheckStatus::Fail)
    }

    /// Names of the tools the adapter could not locate.
    pub fn missing_tools(&self) -> Vec<&str> {
        self.checks
            .iter()
            .filter(|c| c.group == CheckGroup::Tools && c.status == CheckStatus::Fail)
            .map(|c| c.name.as_str())
            .collect()
    }

    pub fn print(&self) {
        print!("{self}");
    }
}

impl fmt::Display for PreflightReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Preflight: {} adapter ===", self.adapter)?;

        for group in [CheckGroup::Tools, CheckGroup::Directories] {
            let checks: Vec<_> = self.checks.iter().filter(|c| c.group == group).collect();
            if checks.is_empty() {
                continue;
            }
            writeln!(f, "\n{}:", group.title())?;
            for check in checks {
                writeln!(f, "  [{}] {}: {}", check.status.label(), check.name, check.details)?;
                if let Some(hint) = &check.hint {
                    writeln!(f, "         {hint}")?;
                }
            }
        }

        let passed = self.count(CheckStatus::Pass);
        writeln!(f, "\nSummary: {}/{} passed", passed, self.checks.len())?;
        let missing = self.missing_tools();
        if !missing.is_empty() {
            writeln!(f, "         missing tools: {}", missing.join(", "))?;
        }
        let failed = self.fail_count();
        if failed > 0 {
            writeln!(f, "         {failed} FAILED - image builds will not succeed")?;
        }
        let warned = self.count(CheckStatus::Warn);
        if warned > 0 {
            writeln!(f, "         {warned} warnings")?;
        }
        Ok(())
    }
}
