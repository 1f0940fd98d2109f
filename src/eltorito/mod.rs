//! El Torito boot catalog model.
//!
//! A bootable optical image carries a Boot Record Volume Descriptor at
//! logical sector 17 that points at the boot catalog: a validation entry
//! followed by 32-byte records describing each boot payload. This module
//! holds the parsed form; [`parse`] decodes it and [`compare`] proves two
//! catalogs reference byte-identical payloads.

mod compare;
mod parse;

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::error::{Error, Result};

pub use compare::compare;
pub use parse::{parse, read_boot_image};

/// Physical (ISO 9660 logical block) sector size.
pub const PHYSICAL_SECTOR_SIZE: u64 = 2048;
/// Virtual (El Torito load) sector size.
pub const VIRTUAL_SECTOR_SIZE: u64 = 512;
/// Sector holding the Boot Record Volume Descriptor.
pub const BOOT_RECORD_SECTOR: u64 = 17;

/// Boot indicator marking a bootable entry.
pub const BOOTABLE: u8 = 0x88;

pub const PLATFORM_BIOS: u8 = 0x00;
pub const PLATFORM_POWERPC: u8 = 0x01;
pub const PLATFORM_MAC: u8 = 0x02;
pub const PLATFORM_EFI: u8 = 0xEF;

/// Human-readable name for an El Torito platform id.
pub fn platform_name(id: u8) -> String {
    match id {
        PLATFORM_BIOS => "x86 (BIOS)".to_string(),
        PLATFORM_POWERPC => "PowerPC".to_string(),
        PLATFORM_MAC => "Mac".to_string(),
        PLATFORM_EFI => "EFI (UEFI)".to_string(),
        other => format!("Unknown (0x{other:02X})"),
    }
}

/// One bootable record of the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BootEntry {
    pub boot_indicator: u8,
    /// Boot media type (emulation mode).
    pub media_type: u8,
    /// Platform of the section this entry belongs to.
    pub platform_id: u8,
    pub load_segment: u16,
    pub system_type: u8,
    /// Number of 512-byte virtual sectors loaded at boot.
    pub sector_count: u16,
    /// Physical sector of the boot image.
    pub load_rba: u32,
    /// Lowercase hex SHA-256 of the `sector_count * 512` bytes at `load_rba`.
    pub boot_image_sha256: String,
}

impl BootEntry {
    pub fn is_bootable(&self) -> bool {
        self.boot_indicator == BOOTABLE
    }

    /// Byte range of the boot image inside the source file.
    pub fn image_range(&self) -> (u64, u64) {
        let offset = u64::from(self.load_rba) * PHYSICAL_SECTOR_SIZE;
        let len = u64::from(self.sector_count) * VIRTUAL_SECTOR_SIZE;
        (offset, len)
    }
}

impl fmt::Display for BootEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Boot Entry")?;
        writeln!(
            f,
            "  {:<18} 0x{:02X}{}",
            "Boot Indicator:",
            self.boot_indicator,
            if self.is_bootable() { " (bootable)" } else { "" }
        )?;
        writeln!(f, "  {:<18} {}", "Platform:", platform_name(self.platform_id))?;
        writeln!(f, "  {:<18} 0x{:02X}", "Media Type:", self.media_type)?;
        writeln!(f, "  {:<18} 0x{:04X}", "Load Segment:", self.load_segment)?;
        writeln!(f, "  {:<18} 0x{:02X}", "System Type:", self.system_type)?;
        writeln!(f, "  {:<18} {}", "Sector Count:", self.sector_count)?;
        writeln!(f, "  {:<18} {}", "Load RBA:", self.load_rba)?;
        write!(f, "  {:<18} {}", "SHA256:", self.boot_image_sha256)
    }
}

/// Parsed El Torito boot catalog of one image file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BootCatalog {
    /// Image the catalog was read from.
    pub source: PathBuf,
    pub is_valid: bool,
    /// Platform id from the validation entry.
    pub platform_id: u8,
    /// Manufacturer id string, NUL-trimmed.
    pub manufacturer: String,
    /// Physical sector of the catalog.
    pub catalog_lba: u32,
    /// Bootable entries in catalog order.
    pub entries: Vec<BootEntry>,
}

impl BootCatalog {
    /// Parse the catalog of `path`.
    pub fn parse(path: &Path) -> Result<Self> {
        parse(path)
    }

    /// Best-effort parse: `None` when the image carries no readable catalog.
    pub fn probe(path: &Path) -> Option<Self> {
        match parse(path) {
            Ok(catalog) => Some(catalog),
            Err(Error::Format { detail, .. }) => {
                debug!(path = %path.display(), %detail, "no El Torito boot catalog");
                None
            }
            Err(e) => {
                debug!(path = %path.display(), error = %e, "boot catalog probe failed");
                None
            }
        }
    }

    pub fn platform_name(&self) -> String {
        platform_name(self.platform_id)
    }

    /// Verify `repacked` preserves every entry of this catalog.
    pub fn validate_entries(&self, repacked: &[BootEntry]) -> Result<()> {
        compare(self, repacked)
    }
}

impl fmt::Display for BootCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self
            .source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        writeln!(f, "El Torito Boot Catalog ({name})")?;
        writeln!(f, "  {:<18} {}", "Valid:", self.is_valid)?;
        writeln!(f, "  {:<18} {}", "Manufacturer:", self.manufacturer)?;
        writeln!(
            f,
            "  {:<18} 0x{:02X} ({})",
            "Platform ID:",
            self.platform_id,
            self.platform_name()
        )?;
        writeln!(f, "  {:<18} {}", "Catalog Sector:", self.catalog_lba)?;
        write!(f, "  {:<18} {}", "Boot Entries:", self.entries.len())?;
        if self.entries.is_empty() {
            write!(f, "\n  No boot entries found")?;
        }
        for entry in &self.entries {
            write!(f, "\n\n{entry}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! In-memory El Torito images for unit tests.

    use super::*;

    /// Payload placed at `load_rba`, declared as `sector_count` virtual sectors.
    pub struct Payload {
        pub platform_id: u8,
        pub load_rba: u32,
        pub sector_count: u16,
        pub fill: u8,
    }

    pub const CATALOG_LBA: u32 = 20;

    /// Build an image with a catalog at [`CATALOG_LBA`] and one section per payload
    /// after the first (initial entry is the first payload).
    pub fn image(payloads: &[Payload]) -> Vec<u8> {
        let end_sector = payloads
            .iter()
            .map(|p| u64::from(p.load_rba) + 1 + u64::from(p.sector_count) / 4)
            .max()
            .unwrap_or(0)
            .max(u64::from(CATALOG_LBA) + 1);
        let mut img = vec![0u8; (end_sector * PHYSICAL_SECTOR_SIZE) as usize];

        let brvd = (BOOT_RECORD_SECTOR * PHYSICAL_SECTOR_SIZE) as usize;
        img[brvd] = 0x00;
        img[brvd + 1..brvd + 6].copy_from_slice(b"CD001");
        img[brvd + 6] = 0x01;
        img[brvd + 7..brvd + 7 + 23].copy_from_slice(b"EL TORITO SPECIFICATION");
        img[brvd + 0x47..brvd + 0x4B].copy_from_slice(&CATALOG_LBA.to_le_bytes());

        let cat = (u64::from(CATALOG_LBA) * PHYSICAL_SECTOR_SIZE) as usize;
        let platform = payloads.first().map(|p| p.platform_id).unwrap_or(0);
        img[cat] = 0x01;
        img[cat + 1] = platform;
        img[cat + 4..cat + 4 + 9].copy_from_slice(b"Microsoft");
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
            img[off] = BOOTABLE;
            img[off + 2..off + 4].copy_from_slice(&0x07C0u16.to_le_bytes());
            img[off + 6..off + 8].copy_from_slice(&p.sector_count.to_le_bytes());
            img[off + 8..off + 12].copy_from_slice(&p.load_rba.to_le_bytes());
            off += 32;

            let start = (u64::from(p.load_rba) * PHYSICAL_SECTOR_SIZE) as usize;
            let len = (u64::from(p.sector_count) * VIRTUAL_SECTOR_SIZE) as usize;
            img[start..start + len].fill(p.fill);
        }
        img
    }
}
