//! Working directory checks.

use std::fs;
use std::path::Path;

use super::types::{CheckResult, CheckStatus};

const PROBE_FILE: &str = ".devwin-preflight";

/// Check `dir` exists (creating it if needed) and accepts writes.
pub fn check_writable(name: &str, dir: &Path) -> CheckResult {
    if let Err(e) = fs::create_dir_all(dir) {
        return CheckResult::directory(
            name,
            CheckStatus::Fail,
            format!("cannot create {}: {}", dir.display(), e),
        );
    }
    let probe = dir.join(PROBE_FILE);
    match fs::write(&probe, b"probe") {
        Ok(()) => {
            let _ = fs::remove_file(&probe);
            CheckResult::directory(name, CheckStatus::Pass, dir.display().to_string())
        }
        Err(e) => CheckResult::directory(
            name,
            CheckStatus::Fail,
            format!("cannot write to {}: {}", dir.display(), e),
        ),
    }
}

/// Warn when the scratch area is missing; mounts and copies land there.
pub fn check_temp_dir(dir: &Path) -> CheckResult {
    if dir.is_dir() {
        CheckResult::directory("temp directory", CheckStatus::Pass, dir.display().to_string())
    } else {
        CheckResult::directory(
            "temp directory",
            CheckStatus::Warn,
            format!("{} does not exist; writable mounts will fail", dir.display()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_writable_creates_missing_dir() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("cache/nested");
        let result = check_writable("cache", &dir);
        assert_eq!(result.status, CheckStatus::Pass);
        assert!(dir.is_dir());
        assert!(!dir.join(PROBE_FILE).exists());
    }

    #[test]
    fn test_writable_fails_under_a_file() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("plain");
        fs::write(&file, b"x").unwrap();
        let result = check_writable("cache", &file.join("sub"));
        assert_eq!(result.status, CheckStatus::Fail);
    }

    #[test]
    fn test_missing_temp_dir_warns() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(check_temp_dir(tmp.path()).status, CheckStatus::Pass);
        assert_eq!(check_temp_dir(&tmp.path().join("gone")).status, CheckStatus::Warn);
    }
}
