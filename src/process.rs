//! Centralized command execution with consistent error handling.
//!
//! Every external facility (mount, imaging service, authoring tool, archive
//! extraction) is driven through [`Cmd`], so output is always captured and
//! failures always carry the tool's own stdout/stderr.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use crate::error::{Error, Result};

/// Result of a command execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// Exit code, or -1 if terminated by signal.
    pub code: i32,
    /// Captured stdout as a string.
    pub stdout: String,
    /// Captured stderr as a string.
    pub stderr: String,
}

impl CommandResult {
    /// A successful result with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Returns true if the command exited successfully.
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// Get stdout, trimmed of whitespace.
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }

    /// Get stderr, trimmed of whitespace.
    pub fn stderr_trimmed(&self) -> &str {
        self.stderr.trim()
    }

    /// Stdout and stderr joined, for pattern checks across both streams.
    pub fn combined_output(&self) -> String {
        format!("{}\n{}", self.stdout, self.stderr)
    }
}

/// Classifies a failed result as an elevation failure.
pub type ElevationCheck = fn(&CommandResult) -> bool;

/// Builder for configuring command execution.
pub struct Cmd {
    program: OsString,
    args: Vec<OsString>,
    current_dir: Option<PathBuf>,
    /// If true, don't fail on non-zero exit.
    allow_fail: bool,
    /// Non-zero exit codes treated as success.
    ok_codes: Vec<i32>,
    /// Custom error message prefix.
    error_prefix: Option<String>,
    elevation_check: Option<ElevationCheck>,
}

impl Cmd {
    /// Create a new command builder.
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            allow_fail: false,
            ok_codes: Vec::new(),
            error_prefix: None,
            elevation_check: None,
        }
    }

    /// Add a single argument.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add a path as an argument.
    pub fn arg_path(mut self, path: &Path) -> Self {
        self.args.push(path.as_os_str().to_os_string());
        self
    }

    /// Set the working directory.
    pub fn dir(mut self, dir: &Path) -> Self {
        self.current_dir = Some(dir.to_path_buf());
        self
    }

    /// Allow non-zero exit codes without failing.
    pub fn allow_fail(mut self) -> Self {
        self.allow_fail = true;
        self
    }

    /// Treat the given non-zero exit codes as success.
    pub fn ok_codes(mut self, codes: &[i32]) -> Self {
        self.ok_codes.extend_from_slice(codes);
        self
    }

    /// Set a custom error message prefix.
    pub fn error_msg(mut self, msg: impl AsRef<str>) -> Self {
        self.error_prefix = Some(msg.as_ref().to_string());
        self
    }

    /// Map failures matching `check` to [`Error::ElevationRequired`].
    pub fn elevation_check(mut self, check: ElevationCheck) -> Self {
        self.elevation_check = Some(check);
        self
    }

    /// Program name for messages.
    fn tool_name(&self) -> String {
        Path::new(&self.program)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.to_string_lossy().into_owned())
    }

    /// Command line rendered for logs.
    pub fn display(&self) -> String {
        let mut line = self.program.to_string_lossy().into_owned();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        line
    }

    /// Run the command and capture output.
    pub fn run(self) -> Result<CommandResult> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);

        if let Some(ref dir) = self.current_dir {
            cmd.current_dir(dir);
        }

        debug!(command = %self.display(), "running");

        let output = cmd.output().map_err(|e| Error::Tool {
            tool: self.tool_name(),
            code: -1,
            detail: format!("failed to execute ({e}). Is it installed?"),
        })?;

        let result = CommandResult {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if self.allow_fail || result.success() || self.ok_codes.contains(&result.code) {
            return Ok(result);
        }

        if let Some(check) = self.elevation_check {
            if check(&result) {
                return Err(Error::ElevationRequired {
                    tool: self.tool_name(),
                });
            }
        }

        let prefix = self
            .error_prefix
            .clone()
            .unwrap_or_else(|| format!("executing '{}'", self.display()));
        let stderr = result.stderr_trimmed();
        let stdout = result.stdout_trimmed();
        let detail = match (stdout.is_empty(), stderr.is_empty()) {
            (true, true) => prefix,
            (false, true) => format!("{prefix}\nOutput:\n{stdout}"),
            (true, false) => format!("{prefix}\nError:\n{stderr}"),
            (false, false) => format!("{prefix}\nOutput:\n{stdout}\nError:\n{stderr}"),
        };

        Err(Error::Tool {
            tool: self.tool_name(),
            code: result.code,
            detail,
        })
    }
}

/// Check if a program exists in PATH.
///
/// Returns the full path if found, None otherwise.
pub fn which(program: &str) -> Option<PathBuf> {
    which::which(program).ok()
}
