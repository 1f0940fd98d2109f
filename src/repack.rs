//! Authoring a bootable image from a mount root.
//!
//! [`RepackEngine::repack`] produces the image and returns its freshly
//! parsed boot catalog. Comparing it with the source catalog is left to the
//! caller.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info};
use walkdir::WalkDir;

use crate::common::remove_file_if_exists;
use crate::eltorito::{BootCatalog, PLATFORM_BIOS, PLATFORM_EFI};
use crate::error::{Error, Result};
use crate::platform::{AuthorRequest, BootBinding, Platform};

/// Legacy BIOS boot sector file.
pub const BIOS_BOOT_ASSET: &str = "boot/etfsboot.com";
/// UEFI El Torito boot image.
pub const EFI_BOOT_ASSET: &str = "efi/microsoft/boot/efisys.bin";

/// Default volume label of repacked media.
pub const DEFAULT_VOLUME_LABEL: &str = "DevWin_ISO_windows";

/// Locate `relative` under `root`, falling back to a case-insensitive match.
///
/// Media copied from a case-insensitive filesystem may carry `BOOT/ETFSBOOT.COM`.
pub fn find_boot_asset(root: &Path, relative: &str) -> Result<PathBuf> {
    let exact = root.join(relative);
    if exact.is_file() {
        return Ok(exact);
    }

    let mut current = root.to_path_buf();
    for component in relative.split('/') {
        let found = fs::read_dir(&current)
            .ok()
            .into_iter()
            .flatten()
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .find(|p| {
                p.file_name()
                    .map(|n| n.to_string_lossy().eq_ignore_ascii_case(component))
                    .unwrap_or(false)
            });
        match found {
            Some(p) => current = p,
            None => return Err(Error::MissingBootAsset(exact)),
        }
    }
    if current.is_file() {
        Ok(current)
    } else {
        Err(Error::MissingBootAsset(exact))
    }
}

pub struct RepackEngine {
    platform: Arc<dyn Platform>,
    volume_label: String,
}

impl RepackEngine {
    pub fn new(platform: Arc<dyn Platform>) -> Self {
        Self {
            platform,
            volume_label: DEFAULT_VOLUME_LABEL.to_string(),
        }
    }

    pub fn volume_label(mut self, label: impl Into<String>) -> Self {
        self.volume_label = label.into();
        self
    }

    /// Author `destination` from `mount_root` and return its boot catalog.
    ///
    /// An existing destination is replaced. On any authoring failure the
    /// destination is removed.
    pub fn repack(&self, mount_root: &Path, destination: &Path) -> Result<BootCatalog> {
        let bios = find_boot_asset(mount_root, BIOS_BOOT_ASSET)?;
        let efi = find_boot_asset(mount_root, EFI_BOOT_ASSET)?;
        debug!(bios = %bios.display(), efi = %efi.display(), "boot assets located");

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }
        remove_file_if_exists(destination)?;

        let request = AuthorRequest {
            source_dir: mount_root.to_path_buf(),
            destination: destination.to_path_buf(),
            volume_label: self.volume_label.clone(),
            ignore_size_limit: true,
            udf_only: true,
            include_hidden: true,
            default_platform: PLATFORM_EFI,
            boot_entries: vec![
                BootBinding {
                    platform_id: PLATFORM_BIOS,
                    payload: bios,
                },
                BootBinding {
                    platform_id: PLATFORM_EFI,
                    payload: efi,
                },
            ],
        };

        info!(
            source = %mount_root.display(),
            destination = %destination.display(),
            files = WalkDir::new(mount_root).into_iter().filter_map(|e| e.ok()).count(),
            "authoring image"
        );
        let result = match self.platform.author_image(&request) {
            Ok(result) => result,
            Err(e) => {
                discard(destination);
                return Err(e);
            }
        };
        if !result.success() {
            discard(destination);
            return Err(Error::Repack {
                destination: destination.to_path_buf(),
                code: result.code,
                stdout: result.stdout,
                stderr: result.stderr,
            });
        }

        let catalog = BootCatalog::parse(destination).inspect_err(|_| discard(destination))?;
        info!(
            destination = %destination.display(),
            entries = catalog.entries.len(),
            "image authored"
        );
        Ok(catalog)
    }
}

fn discard(destination: &Path) {
    if let Err(e) = remove_file_if_exists(destination) {
        error!(path = %destination.display(), error = %e, "failed to remove partial image");
    }
}
