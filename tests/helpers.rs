//! Shared test utilities for devwin tests.
//!
//! Nothing here touches the network, needs elevation, or runs a real mount
//! or authoring tool.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use sha1::{Digest, Sha1};
use tempfile::TempDir;

use devwin::cache::Fetcher;
use devwin::cleanup;
use devwin::common::TreeCopier;
use devwin::eltorito::{PLATFORM_BIOS, PLATFORM_EFI};
use devwin::platform::{AuthorRequest, ExportRequest, ImageInfo, MountImageRequest, Platform};
use devwin::process::CommandResult;
use devwin::{Error, Result};

pub const SECTOR: usize = 2048;
pub const VIRTUAL_SECTOR: usize = 512;
pub const CATALOG_LBA: u32 = 20;
pub const BIOS_RBA: u32 = 100;
pub const BIOS_SECTORS: u16 = 4;
pub const EFI_RBA: u32 = 200;
pub const EFI_SECTORS: u16 = 8;

/// One boot payload of a synthetic image.
pub struct Payload<'a> {
    pub platform_id: u8,
    pub load_rba: u32,
    pub bytes: &'a [u8],
}

impl Payload<'_> {
    fn sector_count(&self) -> u16 {
        self.bytes.len().div_ceil(VIRTUAL_SECTOR) as u16
    }
}

/// Deterministic, non-uniform payload bytes.
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u32).wrapping_mul(31).wrapping_add(u32::from(seed)) as u8)
        .collect()
}

pub fn bios_payload() -> Vec<u8> {
    pattern(usize::from(BIOS_SECTORS) * VIRTUAL_SECTOR, 0x11)
}

pub fn efi_payload() -> Vec<u8> {
    pattern(usize::from(EFI_SECTORS) * VIRTUAL_SECTOR, 0x5A)
}

/// Bytes of an El Torito image whose catalog lists `payloads` in order.
///
/// The first payload is the initial entry; each later one gets its own
/// section header, the last marked final.
pub fn iso_bytes(payloads: &[Payload]) -> Vec<u8> {
    let end = payloads
        .iter()
        .map(|p| p.load_rba as usize * SECTOR + p.bytes.len())
        .max()
        .unwrap_or(0)
        .max((CATALOG_LBA as usize + 1) * SECTOR);
    let mut img = vec![0u8; end.div_ceil(SECTOR) * SECTOR];

    let brvd = 17 * SECTOR;
    img[brvd + 1..brvd + 6].copy_from_slice(b"CD001");
    img[brvd + 6] = 0x01;
    img[brvd + 7..brvd + 30].copy_from_slice(b"EL TORITO SPECIFICATION");
    img[brvd + 0x47..brvd + 0x4B].copy_from_slice(&CATALOG_LBA.to_le_bytes());

    let cat = CATALOG_LBA as usize * SECTOR;
    img[cat] = 0x01;
    img[cat + 1] = payloads.first().map_or(PLATFORM_BIOS, |p| p.platform_id);
    img[cat + 4..cat + 13].copy_from_slice(b"Microsoft");
    img[cat + 30] = 0x55;
    img[cat + 31] = 0xAA;

    let mut off = cat + 32;
    for (i, p) in payloads.iter().enumerate() {
        if i > 0 {
            img[off] = if i + 1 == payloads.len() { 0x91 } else { 0x90 };
            img[off + 1] = p.platform_id;
            img[off + 2..off + 4].copy_from_slice(&1u16.to_le_bytes());
            off += 32;
        }
        img[off] = 0x88;
        img[off + 6..off + 8].copy_from_slice(&p.sector_count().to_le_bytes());
        img[off + 8..off + 12].copy_from_slice(&p.load_rba.to_le_bytes());
        off += 32;

        let start = p.load_rba as usize * SECTOR;
        img[start..start + p.bytes.len()].copy_from_slice(p.bytes);
    }
    img
}

pub fn write_iso(path: &Path, payloads: &[Payload]) {
    fs::write(path, iso_bytes(payloads)).expect("write synthetic iso");
}

/// Dual-platform image with the standard payloads at their standard RBAs.
pub fn write_base_iso(path: &Path) {
    let bios = bios_payload();
    let efi = efi_payload();
    write_iso(
        path,
        &[
            Payload {
                platform_id: PLATFORM_BIOS,
                load_rba: BIOS_RBA,
                bytes: &bios,
            },
            Payload {
                platform_id: PLATFORM_EFI,
                load_rba: EFI_RBA,
                bytes: &efi,
            },
        ],
    );
}

/// Installation media tree with both boot assets.
pub fn create_media_tree(root: &Path) {
    for dir in ["boot", "efi/microsoft/boot", "sources"] {
        fs::create_dir_all(root.join(dir)).expect("create media dir");
    }
    fs::write(root.join("boot/etfsboot.com"), bios_payload()).expect("write etfsboot");
    fs::write(root.join("efi/microsoft/boot/efisys.bin"), efi_payload()).expect("write efisys");
    fs::write(root.join("sources/install.wim"), b"install image").expect("write install.wim");
    fs::write(root.join("setup.exe"), b"MZ").expect("write setup.exe");
}

pub fn sha1_hex(bytes: &[u8]) -> String {
    hex::encode(Sha1::digest(bytes))
}

/// Scratch layout for one test.
pub struct TestEnv {
    /// Keeps the directory alive for the lifetime of the env.
    pub _temp_dir: TempDir,
    /// What the fake platform presents as mounted media.
    pub media: PathBuf,
    /// Source optical image.
    pub iso: PathBuf,
    /// Parent for session temp directories.
    pub scratch: PathBuf,
    pub out: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let base = temp_dir.path();
        let media = base.join("media");
        let scratch = base.join("scratch");
        let out = base.join("out");
        for dir in [&media, &scratch, &out] {
            fs::create_dir_all(dir).expect("create test dir");
        }
        create_media_tree(&media);
        let iso = base.join("base.iso");
        write_base_iso(&iso);

        Self {
            _temp_dir: temp_dir,
            media,
            iso,
            scratch,
            out,
        }
    }

    pub fn platform(&self) -> Arc<FakePlatform> {
        Arc::new(FakePlatform::new(&self.media))
    }

    /// Entries left in the scratch directory.
    pub fn scratch_entries(&self) -> Vec<PathBuf> {
        fs::read_dir(&self.scratch)
            .expect("read scratch")
            .map(|e| e.expect("scratch entry").path())
            .collect()
    }
}

/// Calls observed by [`FakePlatform`].
#[derive(Debug, Default)]
pub struct FakeState {
    pub disk_mounts: HashSet<PathBuf>,
    pub image_mounts: HashSet<PathBuf>,
    pub dismounts: usize,
    /// `(mount dir, commit)` per unmount.
    pub unmounts: Vec<(PathBuf, bool)>,
    pub exports: Vec<ExportRequest>,
    pub authored: Vec<AuthorRequest>,
    /// Answer file present in each authored tree, if any.
    pub answers: Vec<Option<Vec<u8>>>,
}

/// In-process platform adapter.
///
/// Mounting presents a prepared media tree; authoring writes a synthetic
/// El Torito image from the request's boot payloads, laid out at the same
/// RBAs the base image uses.
pub struct FakePlatform {
    media: PathBuf,
    pub image_count: usize,
    pub require_elevation: AtomicBool,
    pub fail_mount: AtomicBool,
    pub fail_unmount: AtomicBool,
    /// Export calls that fail before exports start succeeding.
    pub export_failures: AtomicUsize,
    /// Non-zero makes authoring exit with this code after writing junk.
    pub author_exit_code: AtomicI32,
    /// Author a different EFI payload than requested.
    pub tamper_efi: AtomicBool,
    /// Run interrupt cleanup once, right after the next disk image mount.
    pub interrupt_on_mount: AtomicBool,
    /// Run interrupt cleanup once, at the start of the next export.
    pub interrupt_on_export: AtomicBool,
    /// Entries released by the last cleanup run triggered above.
    pub interrupt_released: AtomicUsize,
    pub state: Mutex<FakeState>,
}

impl FakePlatform {
    pub fn new(media: &Path) -> Self {
        Self {
            media: media.to_path_buf(),
            image_count: 6,
            require_elevation: AtomicBool::new(false),
            fail_mount: AtomicBool::new(false),
            fail_unmount: AtomicBool::new(false),
            export_failures: AtomicUsize::new(0),
            author_exit_code: AtomicI32::new(0),
            tamper_efi: AtomicBool::new(false),
            interrupt_on_mount: AtomicBool::new(false),
            interrupt_on_export: AtomicBool::new(false),
            interrupt_released: AtomicUsize::new(0),
            state: Mutex::new(FakeState::default()),
        }
    }

    pub fn with_image_count(mut self, count: usize) -> Self {
        self.image_count = count;
        self
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake state")
    }

    /// Nothing mounted through this adapter is still mounted.
    pub fn all_released(&self) -> bool {
        let state = self.state();
        state.disk_mounts.is_empty() && state.image_mounts.is_empty()
    }

    fn check_access(&self, tool: &str) -> Result<()> {
        if self.require_elevation.load(Ordering::SeqCst) {
            return Err(Error::ElevationRequired {
                tool: tool.to_string(),
            });
        }
        Ok(())
    }

    /// What the interrupt handler does before exiting.
    fn interrupt_if(&self, armed: &AtomicBool) {
        if armed.swap(false, Ordering::SeqCst) {
            let released = cleanup::run_registered();
            self.interrupt_released.store(released, Ordering::SeqCst);
        }
    }

    fn tool_error(tool: &str, detail: &str) -> Error {
        Error::Tool {
            tool: tool.to_string(),
            code: 1,
            detail: detail.to_string(),
        }
    }
}

impl Platform for FakePlatform {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn mount_disk_image(&self, image: &Path) -> Result<PathBuf> {
        self.check_access("fake-mount")?;
        if self.fail_mount.load(Ordering::SeqCst) {
            return Err(Self::tool_error("fake-mount", "mount refused"));
        }
        self.state().disk_mounts.insert(image.to_path_buf());
        self.interrupt_if(&self.interrupt_on_mount);
        Ok(self.media.clone())
    }

    fn dismount_disk_image(&self, image: &Path) -> Result<()> {
        if self.fail_unmount.load(Ordering::SeqCst) {
            return Err(Self::tool_error("fake-mount", "device busy"));
        }
        let mut state = self.state();
        if !state.disk_mounts.remove(image) {
            return Err(Self::tool_error("fake-mount", "not mounted"));
        }
        state.dismounts += 1;
        Ok(())
    }

    fn image_info(&self, _image: &Path) -> Result<Vec<ImageInfo>> {
        self.check_access("fake-wim")?;
        Ok((1..=self.image_count as u32)
            .map(|index| ImageInfo {
                index,
                name: format!("Image {index}"),
                description: String::new(),
                size_bytes: 1024,
            })
            .collect())
    }

    fn mount_image(&self, request: &MountImageRequest) -> Result<()> {
        self.check_access("fake-wim")?;
        if self.fail_mount.load(Ordering::SeqCst) {
            return Err(Self::tool_error("fake-wim", "mount refused"));
        }
        TreeCopier::new(&self.media, &request.mount_dir).copy()?;
        self.state().image_mounts.insert(request.mount_dir.clone());
        Ok(())
    }

    fn unmount_image(&self, mount_dir: &Path, commit: bool) -> Result<()> {
        if self.fail_unmount.load(Ordering::SeqCst) {
            return Err(Self::tool_error("fake-wim", "device busy"));
        }
        let mut state = self.state();
        if !state.image_mounts.remove(mount_dir) {
            return Err(Self::tool_error("fake-wim", "not mounted"));
        }
        state.unmounts.push((mount_dir.to_path_buf(), commit));
        Ok(())
    }

    fn export_image(&self, request: &ExportRequest) -> Result<()> {
        self.check_access("fake-wim")?;
        self.interrupt_if(&self.interrupt_on_export);
        let failed = self
            .export_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(Self::tool_error("fake-wim", "export interrupted"));
        }
        let mut content = fs::read(&request.destination).unwrap_or_default();
        content.extend_from_slice(format!("index {}\n", request.index).as_bytes());
        fs::write(&request.destination, content)?;
        self.state().exports.push(request.clone());
        Ok(())
    }

    fn author_image(&self, request: &AuthorRequest) -> Result<CommandResult> {
        {
            let mut state = self.state();
            state.authored.push(request.clone());
            state
                .answers
                .push(fs::read(request.source_dir.join("autounattend.xml")).ok());
        }

        let code = self.author_exit_code.load(Ordering::SeqCst);
        if code != 0 {
            fs::write(&request.destination, b"partial")?;
            return Ok(CommandResult {
                code,
                stdout: String::new(),
                stderr: "authoring failed".to_string(),
            });
        }

        if request.boot_entries.is_empty() {
            let mut listing = Vec::new();
            for entry in fs::read_dir(&request.source_dir)? {
                let entry = entry?;
                listing.extend_from_slice(entry.file_name().to_string_lossy().as_bytes());
                listing.push(b'\n');
                listing.extend_from_slice(&fs::read(entry.path())?);
            }
            fs::write(&request.destination, listing)?;
            return Ok(CommandResult::ok(""));
        }

        let mut payloads = Vec::new();
        for binding in &request.boot_entries {
            let mut bytes = fs::read(&binding.payload)?;
            if binding.platform_id == PLATFORM_EFI && self.tamper_efi.load(Ordering::SeqCst) {
                bytes[0] ^= 0xFF;
            }
            payloads.push((binding.platform_id, bytes));
        }
        let layout: Vec<Payload> = payloads
            .iter()
            .enumerate()
            .map(|(i, (platform_id, bytes))| Payload {
                platform_id: *platform_id,
                load_rba: BIOS_RBA * (i as u32 + 1),
                bytes,
            })
            .collect();
        fs::write(&request.destination, iso_bytes(&layout))?;
        Ok(CommandResult::ok("authored"))
    }

    fn required_tools(&self) -> &'static [&'static str] {
        &["fake-mount", "fake-wim", "fake-author"]
    }

    fn locate_tool(&self, tool: &str) -> Option<PathBuf> {
        (tool != "fake-author").then(|| PathBuf::from("/opt/fake/bin").join(tool))
    }
}

/// In-memory [`Fetcher`] that counts traffic.
#[derive(Default)]
pub struct FakeFetcher {
    bodies: Mutex<HashMap<String, Vec<u8>>>,
    pub fetches: AtomicUsize,
    pub downloads: AtomicUsize,
    /// Serve these bytes for the next download instead of the registered body.
    corrupt_next: Mutex<Option<Vec<u8>>>,
    /// Run interrupt cleanup once, after the next download has written its bytes.
    pub interrupt_after_download: AtomicBool,
    /// Entries released by that cleanup run.
    pub interrupt_released: AtomicUsize,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(&self, url: &str, body: impl Into<Vec<u8>>) {
        self.bodies
            .lock()
            .expect("bodies")
            .insert(url.to_string(), body.into());
    }

    pub fn corrupt_next_download(&self, body: impl Into<Vec<u8>>) {
        *self.corrupt_next.lock().expect("corrupt_next") = Some(body.into());
    }

    fn body(&self, url: &str) -> Result<Vec<u8>> {
        self.bodies
            .lock()
            .expect("bodies")
            .get(url)
            .cloned()
            .ok_or_else(|| Error::Download {
                url: url.to_string(),
                detail: "http 404".to_string(),
            })
    }
}

impl Fetcher for FakeFetcher {
    fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.body(url)
    }

    fn download(&self, url: &str, dest: &Path, _expected_size: Option<u64>) -> Result<u64> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        let body = match self.corrupt_next.lock().expect("corrupt_next").take() {
            Some(body) => body,
            None => self.body(url)?,
        };
        fs::write(dest, &body)?;
        if self.interrupt_after_download.swap(false, Ordering::SeqCst) {
            let released = cleanup::run_registered();
            self.interrupt_released.store(released, Ordering::SeqCst);
        }
        Ok(body.len() as u64)
    }
}

/// One `<File>` element of the published manifest.
pub fn manifest_file(lang: &str, edition: &str, arch: &str, name: &str, sha1: &str, url: &str) -> String {
    format!(
        "<File id=\"{name}\"><FileName>{name}</FileName><LanguageCode>{lang}</LanguageCode>\
         <Language>{lang}</Language><Edition>{edition}</Edition>\
         <Architecture>{arch}</Architecture><Size>0</Size><Sha1>{sha1}</Sha1>\
         <FilePath>{url}</FilePath></File>"
    )
}

pub fn manifest_document(files: &[String]) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?><MCT><Catalogs><Catalog>\
         <PublishedMedia><Files>{}</Files></PublishedMedia></Catalog></Catalogs></MCT>",
        files.concat()
    )
}
