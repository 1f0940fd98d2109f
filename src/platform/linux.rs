//! Linux adapter: loop mounts, wimlib-imagex and xorriso.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{AuthorRequest, Compression, ExportRequest, ImageInfo, MountImageRequest, Platform};
use crate::eltorito::PLATFORM_EFI;
use crate::error::Result;
use crate::process::{Cmd, CommandResult};

const TOOLS: &[&str] = &["mount", "umount", "wimlib-imagex", "xorriso", "7z"];

/// Virtual sectors loaded for a no-emulation BIOS entry.
const BIOS_LOAD_SIZE: &str = "8";

fn needs_elevation(result: &CommandResult) -> bool {
    let out = result.combined_output().to_lowercase();
    out.contains("must be superuser")
        || out.contains("permission denied")
        || out.contains("operation not permitted")
        || out.contains("only root")
}

/// Loop-mount based adapter. Optical mount points are tracked per image path.
#[derive(Debug, Default)]
pub struct LinuxPlatform {
    mounts: Mutex<HashMap<PathBuf, PathBuf>>,
}

impl LinuxPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    fn mounts(&self) -> MutexGuard<'_, HashMap<PathBuf, PathBuf>> {
        self.mounts.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn wimlib(&self) -> Cmd {
        Cmd::new("wimlib-imagex").elevation_check(needs_elevation)
    }
}

/// `path` relative to `root`, as xorriso expects boot image paths.
fn relative_to(root: &Path, path: &Path) -> PathBuf {
    path.strip_prefix(root)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| path.to_path_buf())
}

/// wimlib spelling of a compression profile.
fn wimlib_compression(compression: Compression) -> &'static [&'static str] {
    match compression {
        Compression::Fast => &["--compress=fast"],
        Compression::Max => &["--compress=maximum"],
        Compression::None => &["--compress=none"],
        Compression::Recovery => &["--solid"],
    }
}

/// xorriso argument list for `request`.
fn xorriso_args(request: &AuthorRequest) -> Vec<String> {
    let mut args: Vec<String> = vec!["-as".into(), "mkisofs".into()];
    if request.ignore_size_limit {
        args.extend(["-iso-level".into(), "3".into()]);
    }
    args.extend(["-J".into(), "-joliet-long".into()]);
    args.extend(["-V".into(), request.volume_label.clone()]);

    for (i, entry) in request.boot_entries.iter().enumerate() {
        if i > 0 {
            args.push("-eltorito-alt-boot".into());
        }
        let rel = relative_to(&request.source_dir, &entry.payload)
            .to_string_lossy()
            .replace('\\', "/");
        if entry.platform_id == PLATFORM_EFI {
            args.extend(["-e".into(), rel, "-no-emul-boot".into()]);
        } else {
            args.extend([
                "-b".into(),
                rel,
                "-no-emul-boot".into(),
                "-boot-load-size".into(),
                BIOS_LOAD_SIZE.into(),
            ]);
        }
    }

    args.extend([
        "-o".into(),
        request.destination.display().to_string(),
        request.source_dir.display().to_string(),
    ]);
    args
}

impl Platform for LinuxPlatform {
    fn name(&self) -> &'static str {
        "linux"
    }

    fn mount_disk_image(&self, image: &Path) -> Result<PathBuf> {
        if let Some(existing) = self.mounts().get(image) {
            return Ok(existing.clone());
        }
        let dir = std::env::temp_dir().join(format!("devwin-iso-{}", Uuid::new_v4().simple()));
        fs::create_dir_all(&dir)?;

        let mounted = Cmd::new("mount")
            .args(["-o", "loop,ro"])
            .arg_path(image)
            .arg_path(&dir)
            .elevation_check(needs_elevation)
            .run();
        if let Err(e) = mounted {
            if let Err(cleanup) = fs::remove_dir(&dir) {
                warn!(path = %dir.display(), error = %cleanup, "failed to remove mount point");
            }
            return Err(e);
        }

        info!(image = %image.display(), root = %dir.display(), "disk image mounted");
        self.mounts().insert(image.to_path_buf(), dir.clone());
        Ok(dir)
    }

    fn dismount_disk_image(&self, image: &Path) -> Result<()> {
        let Some(dir) = self.mounts().remove(image) else {
            debug!(image = %image.display(), "disk image not mounted");
            return Ok(());
        };

        let result = Cmd::new("umount")
            .arg_path(&dir)
            .elevation_check(needs_elevation)
            .run();
        if let Err(e) = result {
            self.mounts().insert(image.to_path_buf(), dir);
            return Err(e);
        }
        if let Err(e) = fs::remove_dir(&dir) {
            warn!(path = %dir.display(), error = %e, "failed to remove mount point");
        }
        debug!(image = %image.display(), "disk image dismounted");
        Ok(())
    }

    fn image_info(&self, image: &Path) -> Result<Vec<ImageInfo>> {
        let result = self.wimlib().arg("info").arg_path(image).run()?;
        Ok(ImageInfo::parse_wimlib(&result.stdout))
    }

    fn mount_image(&self, request: &MountImageRequest) -> Result<()> {
        self.wimlib()
            .arg(if request.read_only { "mount" } else { "mountrw" })
            .arg_path(&request.image)
            .arg(request.index.to_string())
            .arg_path(&request.mount_dir)
            .run()?;
        Ok(())
    }

    fn unmount_image(&self, mount_dir: &Path, commit: bool) -> Result<()> {
        let mut cmd = self.wimlib().arg("unmount").arg_path(mount_dir);
        if commit {
            cmd = cmd.arg("--commit");
        }
        cmd.run()?;
        Ok(())
    }

    fn export_image(&self, request: &ExportRequest) -> Result<()> {
        let mut cmd = self
            .wimlib()
            .arg("export")
            .arg_path(&request.source)
            .arg(request.index.to_string())
            .arg_path(&request.destination);
        if let Some(compression) = request.compression {
            cmd = cmd.args(wimlib_compression(compression).iter().copied());
        }
        if request.bootable {
            cmd = cmd.arg("--boot");
        }
        cmd.run()?;
        Ok(())
    }

    fn author_image(&self, request: &AuthorRequest) -> Result<CommandResult> {
        if request.udf_only {
            info!("xorriso cannot author UDF-only images; writing ISO9660 with Joliet");
        }
        if request.boot_entries.is_empty() {
            debug!("authoring non-bootable image");
        }
        Cmd::new("xorriso")
            .args(xorriso_args(request))
            .allow_fail()
            .run()
    }

    fn required_tools(&self) -> &'static [&'static str] {
        TOOLS
    }
}

#[cfg(test)]
mod tests {
    use super::super::BootBinding;
    use super::*;

    fn request(entries: Vec<BootBinding>) -> AuthorRequest {
        AuthorRequest {
            source_dir: PathBuf::from("/work/root"),
            destination: PathBuf::from("/out/new.iso"),
            volume_label: "DevWin_ISO_windows".into(),
            ignore_size_limit: true,
            udf_only: true,
            include_hidden: true,
            default_platform: PLATFORM_EFI,
            boot_entries: entries,
        }
    }

    #[test]
    fn test_xorriso_dual_boot_args() {
        let args = xorriso_args(&request(vec![
            BootBinding {
                platform_id: 0x00,
                payload: PathBuf::from("/work/root/boot/etfsboot.com"),
            },
            BootBinding {
                platform_id: PLATFORM_EFI,
                payload: PathBuf::from("/work/root/efi/microsoft/boot/efisys.bin"),
            },
        ]));
        let line = args.join(" ");
        assert!(line.starts_with("-as mkisofs -iso-level 3"));
        assert!(line.contains("-b boot/etfsboot.com -no-emul-boot -boot-load-size 8"));
        assert!(line.contains("-eltorito-alt-boot -e efi/microsoft/boot/efisys.bin -no-emul-boot"));
        assert!(line.ends_with("-o /out/new.iso /work/root"));
    }

    #[test]
    fn test_xorriso_non_bootable_args() {
        let args = xorriso_args(&request(vec![]));
        assert!(!args.iter().any(|a| a == "-b" || a == "-e"));
        assert!(args.contains(&"-J".to_string()));
    }

    #[test]
    fn test_needs_elevation() {
        let denied = CommandResult {
            code: 32,
            stdout: String::new(),
            stderr: "mount: /mnt: must be superuser to use mount.".into(),
        };
        assert!(needs_elevation(&denied));
        let other = CommandResult {
            code: 32,
            stdout: String::new(),
            stderr: "mount: wrong fs type".into(),
        };
        assert!(!needs_elevation(&other));
    }

    #[test]
    fn test_dismount_unknown_image_is_noop() {
        LinuxPlatform::new()
            .dismount_disk_image(Path::new("/nope.iso"))
            .unwrap();
    }

    #[test]
    fn test_wimlib_compression_flags() {
        assert_eq!(wimlib_compression(Compression::Recovery), &["--solid"]);
        assert_eq!(wimlib_compression(Compression::Max), &["--compress=maximum"]);
    }
}
