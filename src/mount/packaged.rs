use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use super::{Handle, MountOptions, PendingOpen};
use crate::common::TempDir;
use crate::error::{Error, Result};
use crate::platform::{Compression, ExportRequest, MountImageRequest, Platform};

/// Sub-image holding the setup media tree.
pub const PRIMARY_INDEX: u32 = 1;
/// Attempts per sub-image export.
const EXPORT_ATTEMPTS: u32 = 2;

/// Exports that turn a mounted primary sub-image into a disc layout.
///
/// Index 2 (PE) and 3 (setup, bootable) build `sources/boot.wim`; every index
/// from 4 on is appended to `sources/install.esd`, the first with the
/// recovery profile.
pub fn export_plan(source: &Path, root: &Path, image_count: usize) -> Vec<ExportRequest> {
    let boot_wim = root.join("sources").join("boot.wim");
    let install_esd = root.join("sources").join("install.esd");
    let export = |index: u32, destination: &Path, compression, bootable| ExportRequest {
        source: source.to_path_buf(),
        index,
        destination: destination.to_path_buf(),
        compression,
        bootable,
    };

    let mut plan = Vec::new();
    if image_count >= 2 {
        plan.push(export(2, &boot_wim, Some(Compression::Max), false));
    }
    if image_count >= 3 {
        plan.push(export(3, &boot_wim, None, true));
    }
    for index in 4..=image_count as u32 {
        let compression = (index == 4).then_some(Compression::Recovery);
        plan.push(export(index, &install_esd, compression, false));
    }
    plan
}

fn export_with_retry(platform: &dyn Platform, request: &ExportRequest) -> Result<()> {
    let mut attempt = 1;
    loop {
        match platform.export_image(request) {
            Ok(()) => return Ok(()),
            Err(e) if attempt < EXPORT_ATTEMPTS && !e.is_elevation_required() => {
                warn!(index = request.index, attempt, error = %e, "export failed, retrying");
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Mount the primary sub-image and export the rest beneath it.
///
/// Returns the session root. What it mounts and creates is held by `pending`.
pub(super) fn open(pending: &PendingOpen, source: &Path, options: &MountOptions) -> Result<PathBuf> {
    let platform = pending.platform();
    let images = platform
        .image_info(source)
        .map_err(|e| Error::mount(source, e))?;

    let temp = TempDir::new_in(&options.temp_parent, "devwin-wim")?
        .with_max_parallelism(options.max_parallelism);
    let root = pending.hold_temp(temp)?;

    platform
        .mount_image(&MountImageRequest {
            image: source.to_path_buf(),
            index: PRIMARY_INDEX,
            mount_dir: root.clone(),
            read_only: options.read_only,
        })
        .map_err(|e| Error::mount(source, e))?;
    pending.hold_mount(Handle::Packaged(root.clone()))?;

    fs::create_dir_all(root.join("sources"))?;
    for request in export_plan(source, &root, images.len()) {
        info!(
            index = request.index,
            destination = %request.destination.display(),
            "exporting sub-image"
        );
        export_with_retry(platform, &request)?;
    }
    Ok(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_export_plan_full_media() {
        let plan = export_plan(Path::new("/x.esd"), Path::new("/r"), 6);
        let summary: Vec<(u32, PathBuf, Option<Compression>, bool)> = plan
            .into_iter()
            .map(|r| (r.index, r.destination, r.compression, r.bootable))
            .collect();
        assert_eq!(
            summary,
            vec![
                (2, PathBuf::from("/r/sources/boot.wim"), Some(Compression::Max), false),
                (3, PathBuf::from("/r/sources/boot.wim"), None, true),
                (4, PathBuf::from("/r/sources/install.esd"), Some(Compression::Recovery), false),
                (5, PathBuf::from("/r/sources/install.esd"), None, false),
                (6, PathBuf::from("/r/sources/install.esd"), None, false),
            ]
        );
    }

    #[test]
    fn test_export_plan_single_image() {
        assert!(export_plan(Path::new("/x.wim"), Path::new("/r"), 1).is_empty());
    }
}
