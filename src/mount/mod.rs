//! Mount sessions over the two supported source kinds.
//!
//! A [`MountSession`] presents a source image as a plain directory tree. An
//! optical image is mounted by the platform and, when writable, copied into
//! an owned temp directory. A packaged image has its primary sub-image mounted
//! and the remaining sub-images exported under `sources/`, so both kinds end
//! up looking like an unpacked installation disc.
//!
//! The platform mount and temp directory are registered with the process-wide
//! [`cleanup`] registry from the moment they exist: a pending open holds
//! them while the tree is copied or sub-images are exported, and hands them
//! to the session once it is ready. Explicit [`MountSession::unmount`],
//! [`MountSession::dispose`], `Drop` and the interrupt handler all funnel into
//! one idempotent teardown guarded by atomic `mounted`/`disposed` flags.

mod optical;
mod packaged;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, error, info, warn};

use crate::cleanup::{self, Release};
use crate::common::fsutil::DEFAULT_MAX_PARALLELISM;
use crate::common::TempDir;
use crate::error::{Error, Result};
use crate::platform::Platform;

/// Source image kind, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    /// `.iso`
    Optical,
    /// `.esd` / `.wim`
    PackagedFilesystem,
}

impl ImageKind {
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "iso" => Ok(ImageKind::Optical),
            "esd" | "wim" => Ok(ImageKind::PackagedFilesystem),
            _ => Err(Error::UnsupportedImage(path.to_path_buf())),
        }
    }
}

impl fmt::Display for ImageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageKind::Optical => f.write_str("optical"),
            ImageKind::PackagedFilesystem => f.write_str("packaged"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MountOptions {
    pub read_only: bool,
    /// Worker bound for the tree copy and teardown.
    pub max_parallelism: usize,
    /// Parent of the session's temp directory.
    pub temp_parent: PathBuf,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            read_only: true,
            max_parallelism: DEFAULT_MAX_PARALLELISM,
            temp_parent: std::env::temp_dir(),
        }
    }
}

impl MountOptions {
    pub fn writable() -> Self {
        Self {
            read_only: false,
            ..Self::default()
        }
    }
}

/// What must be released on unmount.
#[derive(Debug)]
enum Handle {
    /// Disk image mounted by the platform, released by image path.
    DiskImage(PathBuf),
    /// Packaged sub-image mounted at a directory, released with discard.
    Packaged(PathBuf),
}

impl Handle {
    fn release(&self, platform: &dyn Platform) -> Result<()> {
        match self {
            Handle::DiskImage(image) => platform
                .dismount_disk_image(image)
                .map_err(|e| Error::unmount(image, e)),
            Handle::Packaged(dir) => platform
                .unmount_image(dir, false)
                .map_err(|e| Error::unmount(dir, e)),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Remove `temp` whatever the outcome of the unmount before it. The unmount error wins.
fn remove_temp_after(unmounted: Result<()>, temp: Option<TempDir>) -> Result<()> {
    let removed = match temp {
        Some(mut temp) => temp.remove(),
        None => Ok(()),
    };
    match (unmounted, removed) {
        (Err(e), Err(cleanup)) => {
            warn!(error = %cleanup, "failed to remove session temp dir");
            Err(e)
        }
        (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
        (Ok(()), Ok(())) => Ok(()),
    }
}

/// Mount and temp directory of an open still in progress.
///
/// Registered for cleanup before the platform mount is made, so an
/// interrupt during a long copy or export still releases both.
struct PendingOpen {
    platform: Arc<dyn Platform>,
    source: PathBuf,
    handle: Mutex<Option<Handle>>,
    temp: Mutex<Option<TempDir>>,
    released: AtomicBool,
}

impl PendingOpen {
    fn new(platform: Arc<dyn Platform>, source: &Path) -> Arc<Self> {
        let pending = Arc::new(Self {
            platform,
            source: source.to_path_buf(),
            handle: Mutex::new(None),
            temp: Mutex::new(None),
            released: AtomicBool::new(false),
        });
        cleanup::register(&pending);
        pending
    }

    fn platform(&self) -> &dyn Platform {
        self.platform.as_ref()
    }

    /// Take ownership of a mount the strategy just made.
    fn hold_mount(&self, handle: Handle) -> Result<()> {
        let mut slot = lock(&self.handle);
        if self.released.load(Ordering::SeqCst) {
            drop(slot);
            if let Err(e) = handle.release(self.platform()) {
                error!(error = %e, "failed to release mount made after interrupt");
            }
            return Err(Error::Interrupted(self.source.clone()));
        }
        *slot = Some(handle);
        Ok(())
    }

    /// Take ownership of the session temp directory; returns its path.
    fn hold_temp(&self, temp: TempDir) -> Result<PathBuf> {
        let mut slot = lock(&self.temp);
        if self.released.load(Ordering::SeqCst) {
            return Err(Error::Interrupted(self.source.clone()));
        }
        let path = temp.path().to_path_buf();
        *slot = Some(temp);
        Ok(path)
    }

    /// Build the session from what is held, registering it before the
    /// pending entry lets go.
    fn into_session(
        &self,
        kind: ImageKind,
        root: PathBuf,
        read_only: bool,
    ) -> Result<Arc<SessionInner>> {
        let mut handle = lock(&self.handle);
        let mut temp = lock(&self.temp);
        if self.released.load(Ordering::SeqCst) {
            return Err(Error::Interrupted(self.source.clone()));
        }
        let inner = Arc::new(SessionInner {
            platform: Arc::clone(&self.platform),
            kind,
            source: self.source.clone(),
            root,
            read_only,
            handle: Mutex::new(handle.take()),
            temp: Mutex::new(temp.take()),
            mounted: AtomicBool::new(true),
            disposed: AtomicBool::new(false),
        });
        cleanup::register(&inner);
        Ok(inner)
    }
}

impl Release for PendingOpen {
    fn describe(&self) -> String {
        format!("opening {}", self.source.display())
    }

    fn release(&self) -> Result<()> {
        // Holding both locks keeps a concurrent handover from slipping past.
        let mut handle = lock(&self.handle);
        let mut temp = lock(&self.temp);
        self.released.store(true, Ordering::SeqCst);
        let unmounted = match handle.take() {
            Some(handle) => handle.release(self.platform()),
            None => Ok(()),
        };
        remove_temp_after(unmounted, temp.take())
    }
}

struct SessionInner {
    platform: Arc<dyn Platform>,
    kind: ImageKind,
    source: PathBuf,
    root: PathBuf,
    read_only: bool,
    handle: Mutex<Option<Handle>>,
    temp: Mutex<Option<TempDir>>,
    mounted: AtomicBool,
    disposed: AtomicBool,
}

impl SessionInner {
    fn unmount(&self) -> Result<()> {
        if !self.mounted.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let Some(handle) = lock(&self.handle).take() else {
            return Ok(());
        };

        let result = handle.release(self.platform.as_ref());
        match &result {
            Ok(()) => info!(source = %self.source.display(), "unmounted"),
            Err(e) => error!(source = %self.source.display(), error = %e, "unmount failed"),
        }
        result
    }

    fn dispose(&self) -> Result<()> {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!(source = %self.source.display(), "disposing mount session");
        let unmounted = self.unmount();

        let temp = lock(&self.temp).take();
        remove_temp_after(unmounted, temp)
    }
}

impl Release for SessionInner {
    fn describe(&self) -> String {
        self.source.display().to_string()
    }

    fn release(&self) -> Result<()> {
        self.dispose()
    }
}

/// A mounted source image presented as a directory tree.
pub struct MountSession {
    inner: Arc<SessionInner>,
}

impl MountSession {
    /// Mount `source` as `kind`.
    ///
    /// A failed open leaves nothing mounted and no temp directory behind.
    pub fn open(
        platform: Arc<dyn Platform>,
        source: &Path,
        kind: ImageKind,
        options: &MountOptions,
    ) -> Result<Self> {
        info!(
            source = %source.display(),
            %kind,
            read_only = options.read_only,
            adapter = platform.name(),
            "opening mount session"
        );
        let pending = PendingOpen::new(platform, source);
        let opened = match kind {
            ImageKind::Optical => optical::open(&pending, source, options),
            ImageKind::PackagedFilesystem => packaged::open(&pending, source, options),
        };
        let root = match opened {
            Ok(root) => root,
            Err(e) => {
                if let Err(cleanup) = pending.release() {
                    error!(error = %cleanup, "failed to release mount after open failure");
                }
                return Err(e);
            }
        };

        let inner = pending.into_session(kind, root, options.read_only)?;
        info!(root = %inner.root.display(), "mount session ready");
        Ok(Self { inner })
    }

    /// Directory presenting the image contents.
    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    pub fn kind(&self) -> ImageKind {
        self.inner.kind
    }

    pub fn source(&self) -> &Path {
        &self.inner.source
    }

    pub fn is_read_only(&self) -> bool {
        self.inner.read_only
    }

    pub fn is_mounted(&self) -> bool {
        self.inner.mounted.load(Ordering::SeqCst)
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Release the platform mount. A second call is a no-op.
    pub fn unmount(&self) -> Result<()> {
        self.inner.unmount()
    }

    /// Unmount if still mounted and remove the session's temp directory.
    pub fn dispose(&self) -> Result<()> {
        self.inner.dispose()
    }
}

impl fmt::Debug for MountSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MountSession")
            .field("kind", &self.inner.kind)
            .field("source", &self.inner.source)
            .field("root", &self.inner.root)
            .field("mounted", &self.is_mounted())
            .finish()
    }
}

impl Drop for MountSession {
    fn drop(&mut self) {
        if let Err(e) = self.inner.dispose() {
            warn!(source = %self.inner.source.display(), error = %e, "cleanup on drop failed");
        }
    }
}
