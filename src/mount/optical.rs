use std::path::{Path, PathBuf};

use tracing::debug;

use super::{Handle, MountOptions, PendingOpen};
use crate::common::{TempDir, TreeCopier};
use crate::error::{Error, Result};

/// Mount an optical image; copy it into a temp directory when writable.
///
/// Returns the session root. What it mounts and creates is held by `pending`.
pub(super) fn open(pending: &PendingOpen, source: &Path, options: &MountOptions) -> Result<PathBuf> {
    let mounted_root = pending
        .platform()
        .mount_disk_image(source)
        .map_err(|e| Error::mount(source, e))?;
    pending.hold_mount(Handle::DiskImage(source.to_path_buf()))?;

    if options.read_only {
        return Ok(mounted_root);
    }

    let temp = TempDir::new_in(&options.temp_parent, "devwin-mount")?
        .with_max_parallelism(options.max_parallelism);
    let root = pending.hold_temp(temp)?;
    debug!(from = %mounted_root.display(), to = %root.display(), "copying media");
    TreeCopier::new(&mounted_root, &root)
        .max_parallelism(options.max_parallelism)
        .copy()?;
    Ok(root)
}
