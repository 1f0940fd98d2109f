//! Bounded-parallel tree copy and removal.
//!
//! Both operations are best-effort batches: every file is an independent
//! unit of work, failures are collected, and a single [`BulkError`] is
//! returned once the whole batch has been attempted.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;

use filetime::FileTime;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::{BulkError, Result};

/// Default worker count for bulk operations.
pub const DEFAULT_MAX_PARALLELISM: usize = 16;

/// Run `op` over `items` on at most `max_parallelism` threads.
///
/// Returns every failure, in no particular order.
pub fn for_each_bounded<T, F>(
    items: &[T],
    max_parallelism: usize,
    op: F,
) -> Vec<(PathBuf, io::Error)>
where
    T: AsRef<Path> + Sync,
    F: Fn(&T) -> io::Result<()> + Sync,
{
    let workers = max_parallelism.max(1).min(items.len());
    let next = AtomicUsize::new(0);
    let failures = Mutex::new(Vec::new());

    thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| loop {
                let i = next.fetch_add(1, Ordering::Relaxed);
                let Some(item) = items.get(i) else {
                    break;
                };
                if let Err(e) = op(item) {
                    if let Ok(mut failures) = failures.lock() {
                        failures.push((item.as_ref().to_path_buf(), e));
                    }
                }
            });
        }
    });

    failures.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Copies a directory tree preserving timestamps and permissions.
#[derive(Debug, Clone)]
pub struct TreeCopier {
    source: PathBuf,
    destination: PathBuf,
    max_parallelism: usize,
}

impl TreeCopier {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            max_parallelism: DEFAULT_MAX_PARALLELISM,
        }
    }

    /// Upper bound on concurrent file copies.
    pub fn max_parallelism(mut self, n: usize) -> Self {
        self.max_parallelism = n.max(1);
        self
    }

    /// Copy the tree. Returns the number of files copied.
    pub fn copy(&self) -> Result<usize> {
        if !self.source.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("source '{}' not found", self.source.display()),
            )
            .into());
        }
        fs::create_dir_all(&self.destination)?;

        let mut dirs = Vec::new();
        let mut files = Vec::new();
        let mut failures = Vec::new();
        for entry in WalkDir::new(&self.source).min_depth(1) {
            match entry {
                Ok(entry) if entry.file_type().is_dir() => dirs.push(entry.into_path()),
                Ok(entry) => files.push(entry.into_path()),
                Err(e) => {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_default();
                    failures.push((path, io::Error::other(e.to_string())));
                }
            }
        }

        // Structure first so file workers never race on parent creation.
        for dir in &dirs {
            if let Err(e) = fs::create_dir_all(self.target(dir)) {
                failures.push((dir.clone(), e));
            }
        }

        debug!(
            source = %self.source.display(),
            files = files.len(),
            dirs = dirs.len(),
            workers = self.max_parallelism,
            "copying tree"
        );
        failures.extend(for_each_bounded(&files, self.max_parallelism, |src| {
            copy_file(src, &self.target(src))
        }));

        // Directory metadata last: copying files into them bumps their mtime.
        for dir in dirs.iter().rev() {
            if let Err(e) = copy_metadata(dir, &self.target(dir)) {
                failures.push((dir.clone(), e));
            }
        }

        if !failures.is_empty() {
            return Err(BulkError {
                operation: "copy",
                root: self.source.clone(),
                failures,
            }
            .into());
        }
        info!(
            source = %self.source.display(),
            destination = %self.destination.display(),
            files = files.len(),
            "tree copied"
        );
        Ok(files.len())
    }

    fn target(&self, path: &Path) -> PathBuf {
        match path.strip_prefix(&self.source) {
            Ok(rel) => self.destination.join(rel),
            Err(_) => self.destination.join(path.file_name().unwrap_or_default()),
        }
    }
}

fn copy_file(src: &Path, dst: &Path) -> io::Result<()> {
    let meta = fs::symlink_metadata(src)?;
    if meta.file_type().is_symlink() {
        return copy_symlink(src, dst);
    }
    if dst.exists() {
        make_writable(dst)?;
    }
    fs::copy(src, dst)?;
    copy_metadata(src, dst)
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> io::Result<()> {
    let target = fs::read_link(src)?;
    if fs::symlink_metadata(dst).is_ok() {
        fs::remove_file(dst)?;
    }
    std::os::unix::fs::symlink(target, dst)
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dst: &Path) -> io::Result<()> {
    fs::copy(src, dst)?;
    copy_metadata(src, dst)
}

/// Apply `src`'s access/modification times and permissions to `dst`.
fn copy_metadata(src: &Path, dst: &Path) -> io::Result<()> {
    let meta = fs::metadata(src)?;
    let atime = FileTime::from_last_access_time(&meta);
    let mtime = FileTime::from_last_modification_time(&meta);
    filetime::set_file_times(dst, atime, mtime)?;
    fs::set_permissions(dst, meta.permissions())
}

#[allow(clippy::permissions_set_readonly_false)]
fn make_writable(path: &Path) -> io::Result<()> {
    let meta = fs::symlink_metadata(path)?;
    if meta.file_type().is_symlink() {
        return Ok(());
    }
    let mut perms = meta.permissions();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = perms.mode();
        if mode & 0o200 != 0 {
            return Ok(());
        }
        perms.set_mode(mode | 0o200);
    }
    #[cfg(not(unix))]
    {
        if !perms.readonly() {
            return Ok(());
        }
        perms.set_readonly(false);
    }
    fs::set_permissions(path, perms)
}

/// Removes a directory tree, clearing read-only attributes first.
///
/// Trees copied off optical media are read-only throughout, which a plain
/// `remove_dir_all` refuses to delete.
#[derive(Debug, Clone)]
pub struct TreeRemover {
    root: PathBuf,
    max_parallelism: usize,
}

impl TreeRemover {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_parallelism: DEFAULT_MAX_PARALLELISM,
        }
    }

    pub fn max_parallelism(mut self, n: usize) -> Self {
        self.max_parallelism = n.max(1);
        self
    }

    /// Remove the tree. A missing root is not an error.
    pub fn remove(&self) -> Result<()> {
        if fs::symlink_metadata(&self.root).is_err() {
            return Ok(());
        }

        let mut dirs = Vec::new();
        let mut files = Vec::new();
        let mut failures = Vec::new();
        for entry in WalkDir::new(&self.root) {
            match entry {
                Ok(entry) if entry.file_type().is_dir() => dirs.push(entry.into_path()),
                Ok(entry) => files.push(entry.into_path()),
                Err(e) => {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_default();
                    failures.push((path, io::Error::other(e.to_string())));
                }
            }
        }

        failures.extend(for_each_bounded(&dirs, self.max_parallelism, |d| {
            make_writable(d)
        }));
        failures.extend(for_each_bounded(&files, self.max_parallelism, |f| {
            make_writable(f)?;
            fs::remove_file(f)
        }));

        // Deepest first; WalkDir yields parents before children.
        for dir in dirs.iter().rev() {
            if let Err(e) = fs::remove_dir(dir) {
                if e.kind() != io::ErrorKind::NotFound {
                    failures.push((dir.clone(), e));
                }
            }
        }

        if !failures.is_empty() {
            return Err(BulkError {
                operation: "remove",
                root: self.root.clone(),
                failures,
            }
            .into());
        }
        debug!(root = %self.root.display(), files = files.len(), "tree removed");
        Ok(())
    }
}
