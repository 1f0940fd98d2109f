//! Single-member extraction from compressed archives.
//!
//! Used to pull the product catalog out of the cabinet the manifest endpoint
//! serves. The archive bytes are staged in a scratch directory and handed to
//! an external extractor.

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::common::TempDir;
use crate::error::{Error, Result};
use crate::process::Cmd;

/// Pulls one named member out of an archive.
pub trait ArchiveExtractor: Send + Sync {
    /// Tool name for logs and preflight.
    fn name(&self) -> &'static str;

    /// Return the raw bytes of `member` inside `archive`.
    fn extract_member(&self, archive: &[u8], member: &str) -> Result<Vec<u8>>;
}

/// `7z e` based extractor (p7zip on Linux).
#[derive(Debug, Clone, Default)]
pub struct SevenZip;

impl ArchiveExtractor for SevenZip {
    fn name(&self) -> &'static str {
        "7z"
    }

    fn extract_member(&self, archive: &[u8], member: &str) -> Result<Vec<u8>> {
        let scratch = TempDir::new("devwin-archive")?;
        let archive_path = scratch.path().join("archive.cab");
        let out_dir = scratch.path().join("out");
        fs::write(&archive_path, archive)?;
        fs::create_dir_all(&out_dir)?;

        Cmd::new("7z")
            .args(["e", "-y"])
            .arg(format!("-o{}", out_dir.display()))
            .arg_path(&archive_path)
            .arg(member)
            .error_msg("7z extraction failed. Install: sudo dnf install p7zip-plugins")
            .run()?;

        read_member(&archive_path, &out_dir, member)
    }
}

/// `expand.exe` based extractor (Windows).
#[derive(Debug, Clone, Default)]
pub struct Expand;

impl ArchiveExtractor for Expand {
    fn name(&self) -> &'static str {
        "expand"
    }

    fn extract_member(&self, archive: &[u8], member: &str) -> Result<Vec<u8>> {
        let scratch = TempDir::new("devwin-archive")?;
        let archive_path = scratch.path().join("archive.cab");
        let out_dir = scratch.path().join("out");
        fs::write(&archive_path, archive)?;
        fs::create_dir_all(&out_dir)?;

        Cmd::new("expand.exe")
            .arg(format!("-f:{member}"))
            .arg("-r")
            .arg_path(&archive_path)
            .arg_path(&out_dir)
            .error_msg("CAB extraction failed")
            .run()?;

        read_member(&archive_path, &out_dir, member)
    }
}

fn read_member(archive: &Path, out_dir: &Path, member: &str) -> Result<Vec<u8>> {
    let path = out_dir.join(member);
    if !path.is_file() {
        return Err(Error::format(
            archive,
            format!("member '{member}' not found in archive"),
        ));
    }
    let bytes = fs::read(&path)?;
    debug!(member, bytes = bytes.len(), "extracted archive member");
    Ok(bytes)
}

/// Extractor for the build target.
pub fn host() -> Box<dyn ArchiveExtractor> {
    if cfg!(windows) {
        Box::new(Expand)
    } else {
        Box::new(SevenZip)
    }
}
