//! Windows adapter: Storage cmdlets, DISM and oscdimg.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::{AuthorRequest, ExportRequest, ImageInfo, MountImageRequest, Platform};
use crate::error::{Error, Result};
use crate::process::{self, Cmd, CommandResult};

/// DISM exit code for "requires elevation".
const DISM_ELEVATION_REQUIRED: i32 = 740;
/// DISM exit code on unmount of a directory with nothing mounted.
const DISM_NOT_MOUNTED: i32 = 50;

const TOOLS: &[&str] = &["powershell", "dism", "oscdimg"];

#[derive(Debug, Clone, Default)]
pub struct WindowsPlatform {
    /// Explicit authoring tool location.
    oscdimg: Option<PathBuf>,
}

impl WindowsPlatform {
    pub fn new(oscdimg: Option<PathBuf>) -> Self {
        Self { oscdimg }
    }

    fn powershell(&self, script: &str) -> Result<CommandResult> {
        Cmd::new("powershell.exe")
            .args([
                "-NoProfile",
                "-NonInteractive",
                "-ExecutionPolicy",
                "Bypass",
                "-Command",
            ])
            .arg(script)
            .elevation_check(|r| {
                let out = r.combined_output().to_lowercase();
                out.contains("access is denied") || out.contains("administrator")
            })
            .run()
    }

    fn dism(&self) -> Cmd {
        Cmd::new("dism.exe").elevation_check(|r| r.code == DISM_ELEVATION_REQUIRED)
    }

    /// ADK location of oscdimg for the host architecture.
    fn adk_oscdimg() -> Option<PathBuf> {
        let arch = match std::env::consts::ARCH {
            "x86" => "x86",
            "x86_64" => "amd64",
            "arm" => "arm",
            "aarch64" => "arm64",
            _ => return None,
        };
        let program_files = std::env::var_os("ProgramFiles(x86)")?;
        Some(
            PathBuf::from(program_files)
                .join("Windows Kits")
                .join("10")
                .join("Assessment and Deployment Kit")
                .join("Deployment Tools")
                .join(arch)
                .join("Oscdimg")
                .join("oscdimg.exe"),
        )
    }

    fn find_oscdimg(&self) -> Result<PathBuf> {
        self.locate_tool("oscdimg").ok_or_else(|| Error::Tool {
            tool: "oscdimg".to_string(),
            code: -1,
            detail: "oscdimg.exe not found. Install the Windows ADK Deployment Tools or set DEVWIN_OSCDIMG"
                .to_string(),
        })
    }
}

/// Quote a path for a single-quoted PowerShell string.
fn ps_quote(path: &Path) -> String {
    format!("'{}'", path.display().to_string().replace('\'', "''"))
}

impl Platform for WindowsPlatform {
    fn name(&self) -> &'static str {
        "windows"
    }

    fn mount_disk_image(&self, image: &Path) -> Result<PathBuf> {
        let quoted = ps_quote(image);
        let script = format!(
            "Mount-DiskImage -ImagePath {quoted} | Out-Null; \
             $img = Get-DiskImage -ImagePath {quoted}; \
             Get-Volume -DiskImage $img | Select-Object -ExpandProperty DriveLetter"
        );
        let result = self.powershell(&script)?;
        let letter = result
            .stdout_trimmed()
            .lines()
            .map(str::trim)
            .find(|l| l.len() == 1 && l.chars().all(|c| c.is_ascii_alphabetic()))
            .ok_or_else(|| Error::Tool {
                tool: "Mount-DiskImage".to_string(),
                code: result.code,
                detail: format!("no drive letter assigned to {}", image.display()),
            })?;
        let root = PathBuf::from(format!("{letter}:\\"));
        info!(image = %image.display(), root = %root.display(), "disk image mounted");
        Ok(root)
    }

    fn dismount_disk_image(&self, image: &Path) -> Result<()> {
        self.powershell(&format!("Dismount-DiskImage -ImagePath {} | Out-Null", ps_quote(image)))?;
        debug!(image = %image.display(), "disk image dismounted");
        Ok(())
    }

    fn image_info(&self, image: &Path) -> Result<Vec<ImageInfo>> {
        let result = self
            .dism()
            .arg("/Get-ImageInfo")
            .arg(format!("/ImageFile:{}", image.display()))
            .run()?;
        Ok(ImageInfo::parse_dism(&result.stdout))
    }

    fn mount_image(&self, request: &MountImageRequest) -> Result<()> {
        let mut cmd = self
            .dism()
            .arg("/Mount-Image")
            .arg(format!("/ImageFile:{}", request.image.display()))
            .arg(format!("/MountDir:{}", request.mount_dir.display()))
            .arg(format!("/Index:{}", request.index));
        if request.read_only {
            cmd = cmd.arg("/ReadOnly");
        }
        cmd.run()?;
        Ok(())
    }

    fn unmount_image(&self, mount_dir: &Path, commit: bool) -> Result<()> {
        self.dism()
            .arg("/Unmount-Image")
            .arg(format!("/MountDir:{}", mount_dir.display()))
            .arg(if commit { "/Commit" } else { "/Discard" })
            .ok_codes(&[DISM_NOT_MOUNTED])
            .run()?;
        Ok(())
    }

    fn export_image(&self, request: &ExportRequest) -> Result<()> {
        let mut cmd = self
            .dism()
            .arg("/Export-Image")
            .arg(format!("/SourceImageFile:{}", request.source.display()))
            .arg(format!("/SourceIndex:{}", request.index))
            .arg(format!("/DestinationImageFile:{}", request.destination.display()));
        if let Some(compression) = request.compression {
            cmd = cmd.arg(format!("/Compress:{compression}"));
        }
        if request.bootable {
            cmd = cmd.arg("/Bootable");
        }
        cmd.run()?;
        Ok(())
    }

    fn author_image(&self, request: &AuthorRequest) -> Result<CommandResult> {
        let oscdimg = self.find_oscdimg()?;
        let mut cmd = Cmd::new(&oscdimg).arg(format!("-l{}", request.volume_label));
        if request.ignore_size_limit {
            cmd = cmd.arg("-m");
        }
        cmd = cmd.arg(if request.udf_only { "-u2" } else { "-j1" });
        if request.include_hidden {
            cmd = cmd.arg("-h");
        }
        cmd = cmd.arg_path(&request.source_dir).arg_path(&request.destination);
        if let Some(spec) = request.multi_boot_spec() {
            cmd = cmd
                .arg(format!("-p{:02X}", request.default_platform))
                .arg(format!("-bootdata:{spec}"));
        }
        if let Some(dir) = oscdimg.parent() {
            cmd = cmd.dir(dir);
        }
        cmd.allow_fail().run()
    }

    fn required_tools(&self) -> &'static [&'static str] {
        TOOLS
    }

    fn locate_tool(&self, tool: &str) -> Option<PathBuf> {
        if tool != "oscdimg" {
            return process::which(tool);
        }
        if let Some(path) = &self.oscdimg {
            return path.is_file().then(|| path.clone());
        }
        process::which("oscdimg").or_else(|| Self::adk_oscdimg().filter(|p| p.is_file()))
    }
}
