//! Host facilities for mounting, exporting and authoring images.
//!
//! The pipeline never runs an imaging tool directly. Everything goes through
//! [`Platform`], whose inputs are plain request structs and whose outputs are
//! paths or captured command results. [`host`] picks the implementation for
//! the build target.

mod info;
mod linux;
mod windows;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::Config;
use crate::error::Result;
use crate::process::{self, CommandResult};

pub use info::ImageInfo;
pub use linux::LinuxPlatform;
pub use windows::WindowsPlatform;

/// Named compression profile for sub-image export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Fast,
    Max,
    None,
    Recovery,
}

impl Compression {
    pub fn as_str(self) -> &'static str {
        match self {
            Compression::Fast => "fast",
            Compression::Max => "max",
            Compression::None => "none",
            Compression::Recovery => "recovery",
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mount one indexed sub-image of a packaged image at `mount_dir`.
#[derive(Debug, Clone)]
pub struct MountImageRequest {
    pub image: PathBuf,
    pub index: u32,
    pub mount_dir: PathBuf,
    pub read_only: bool,
}

/// Copy sub-image `index` of `source` into the container `destination`.
///
/// The destination is created when missing and appended to otherwise.
#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub source: PathBuf,
    pub index: u32,
    pub destination: PathBuf,
    pub compression: Option<Compression>,
    pub bootable: bool,
}

/// One El Torito boot entry to author: platform id bound to a payload file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootBinding {
    pub platform_id: u8,
    pub payload: PathBuf,
}

/// Arguments of one authoring run.
#[derive(Debug, Clone)]
pub struct AuthorRequest {
    pub source_dir: PathBuf,
    pub destination: PathBuf,
    pub volume_label: String,
    pub ignore_size_limit: bool,
    /// UDF-only output; otherwise ISO9660 with Joliet names.
    pub udf_only: bool,
    pub include_hidden: bool,
    /// Platform id written to the catalog's validation entry.
    pub default_platform: u8,
    /// Boot entries in catalog order. Empty for a non-bootable image.
    pub boot_entries: Vec<BootBinding>,
}

impl AuthorRequest {
    /// Multi-boot binding string: `<count>#p<id>,e,b<path>#p<id>,e,b<path>...`
    pub fn multi_boot_spec(&self) -> Option<String> {
        if self.boot_entries.is_empty() {
            return None;
        }
        let mut spec = self.boot_entries.len().to_string();
        for entry in &self.boot_entries {
            spec.push_str(&format!(
                "#p{:X},e,b{}",
                entry.platform_id,
                entry.payload.display()
            ));
        }
        Some(spec)
    }
}

/// Platform adapter over the external mount, imaging and authoring tools.
pub trait Platform: Send + Sync {
    fn name(&self) -> &'static str;

    /// Mount an optical image and return the root of its filesystem.
    fn mount_disk_image(&self, image: &Path) -> Result<PathBuf>;

    /// Release the mount of `image` made by [`Platform::mount_disk_image`].
    fn dismount_disk_image(&self, image: &Path) -> Result<()>;

    /// Sub-images of a packaged image, in index order.
    fn image_info(&self, image: &Path) -> Result<Vec<ImageInfo>>;

    fn mount_image(&self, request: &MountImageRequest) -> Result<()>;

    /// Unmount a packaged sub-image, committing or discarding changes.
    fn unmount_image(&self, mount_dir: &Path, commit: bool) -> Result<()>;

    fn export_image(&self, request: &ExportRequest) -> Result<()>;

    /// Run the authoring tool. A non-zero exit is returned, not raised.
    fn author_image(&self, request: &AuthorRequest) -> Result<CommandResult>;

    /// Tools this adapter shells out to.
    fn required_tools(&self) -> &'static [&'static str];

    /// Where `tool` would be run from, if it can be found.
    fn locate_tool(&self, tool: &str) -> Option<PathBuf> {
        process::which(tool)
    }
}

/// Adapter for the build target.
pub fn host(config: &Config) -> Arc<dyn Platform> {
    if cfg!(windows) {
        Arc::new(WindowsPlatform::new(config.oscdimg.clone()))
    } else {
        Arc::new(LinuxPlatform::new())
    }
}
