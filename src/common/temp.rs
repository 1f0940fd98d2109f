//! Owned temporary directories and files.
//!
//! Both guards delete what they own on drop. Removal is best-effort there;
//! callers that need to observe a failure call `remove()` explicitly.
//! Temp files are also registered for interrupt cleanup, since an image copy
//! can be several gigabytes.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use super::fsutil::TreeRemover;
use crate::cleanup::{self, Release};
use crate::error::Result;

/// Unique name under `parent` with the given prefix.
fn unique_path(parent: &Path, prefix: &str, extension: Option<&str>) -> PathBuf {
    let mut name = format!("{prefix}-{}", Uuid::new_v4().simple());
    if let Some(ext) = extension.filter(|e| !e.is_empty()) {
        name.push('.');
        name.push_str(ext);
    }
    parent.join(name)
}

/// A freshly created, uniquely named directory removed on drop.
#[derive(Debug)]
pub struct TempDir {
    path: PathBuf,
    max_parallelism: usize,
    removed: bool,
}

impl TempDir {
    /// Create `<parent>/<prefix>-<uuid>`.
    pub fn new_in(parent: &Path, prefix: &str) -> Result<Self> {
        fs::create_dir_all(parent)?;
        let path = unique_path(parent, prefix, None);
        fs::create_dir(&path)?;
        debug!(path = %path.display(), "created temp dir");
        Ok(Self {
            path,
            max_parallelism: super::fsutil::DEFAULT_MAX_PARALLELISM,
            removed: false,
        })
    }

    /// Create under the system temp directory.
    pub fn new(prefix: &str) -> Result<Self> {
        Self::new_in(&std::env::temp_dir(), prefix)
    }

    /// Worker count used when tearing the tree down.
    pub fn with_max_parallelism(mut self, n: usize) -> Self {
        self.max_parallelism = n.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the directory now, reporting failures.
    pub fn remove(&mut self) -> Result<()> {
        if self.removed {
            return Ok(());
        }
        self.removed = true;
        TreeRemover::new(&self.path)
            .max_parallelism(self.max_parallelism)
            .remove()
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        if let Err(e) = self.remove() {
            warn!(path = %self.path.display(), error = %e, "failed to remove temp dir");
        }
    }
}

/// Shared between a [`TempFile`] and the cleanup registry.
#[derive(Debug)]
struct FileGuard {
    path: PathBuf,
    armed: AtomicBool,
}

impl FileGuard {
    fn remove(&self) -> io::Result<()> {
        if !self.armed.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        remove_file_if_exists(&self.path)?;
        debug!(path = %self.path.display(), "removed temp file");
        Ok(())
    }
}

impl Release for FileGuard {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn release(&self) -> Result<()> {
        Ok(self.remove()?)
    }
}

/// A file path deleted on drop or interrupt, unless kept.
#[derive(Debug)]
pub struct TempFile {
    guard: Arc<FileGuard>,
}

impl TempFile {
    /// Reserve `<parent>/<prefix>-<uuid>.<extension>`. The file is not created.
    pub fn new_in(parent: &Path, prefix: &str, extension: Option<&str>) -> Result<Self> {
        fs::create_dir_all(parent)?;
        Ok(Self::adopt(unique_path(parent, prefix, extension)))
    }

    /// Guard a caller-chosen path, such as an in-flight download.
    pub fn adopt(path: PathBuf) -> Self {
        let guard = Arc::new(FileGuard {
            path,
            armed: AtomicBool::new(true),
        });
        cleanup::register(&guard);
        Self { guard }
    }

    pub fn path(&self) -> &Path {
        &self.guard.path
    }

    /// Disarm the guard and hand back the path.
    pub fn keep(self) -> PathBuf {
        self.guard.armed.store(false, Ordering::SeqCst);
        self.guard.path.clone()
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if let Err(e) = self.guard.remove() {
            warn!(path = %self.guard.path.display(), error = %e, "failed to remove temp file");
        }
    }
}

/// Remove `path` if it exists, treating a missing file as success.
pub fn remove_file_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
