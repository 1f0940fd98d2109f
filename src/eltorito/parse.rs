use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::debug;

use super::{
    BootCatalog, BootEntry, BOOTABLE, BOOT_RECORD_SECTOR, PHYSICAL_SECTOR_SIZE,
    VIRTUAL_SECTOR_SIZE,
};
use crate::error::{Error, Result};

const ISO_IDENTIFIER: &[u8; 5] = b"CD001";
const BOOT_SYSTEM_ID: &str = "EL TORITO SPECIFICATION";
/// Offset of the catalog pointer inside the boot record.
const CATALOG_POINTER_OFFSET: usize = 0x47;

const RECORD_SIZE: usize = 32;
const VALIDATION_HEADER: u8 = 0x01;
const VALIDATION_SIGNATURE: u16 = 0xAA55;
const SECTION_HEADER: u8 = 0x90;
const FINAL_SECTION_HEADER: u8 = 0x91;
const SECTION_EXTENSION: u8 = 0x44;

/// Parse the El Torito boot catalog of the image at `path`.
///
/// Fails with [`Error::Format`] when the boot record or validation entry is
/// missing or garbled, or when a boot image lies past the end of the file.
pub fn parse(path: &Path) -> Result<BootCatalog> {
    let mut file = File::open(path)?;

    let record = read_sector(&mut file, path, BOOT_RECORD_SECTOR)?;
    if &record[1..6] != ISO_IDENTIFIER {
        return Err(Error::format(path, "missing CD001 identifier at boot record"));
    }
    let system_id = trim_nul(&record[7..39]);
    if system_id != BOOT_SYSTEM_ID {
        return Err(Error::format(
            path,
            format!("boot system identifier is '{system_id}', not an El Torito image"),
        ));
    }
    let catalog_lba = le_u32(&record, CATALOG_POINTER_OFFSET);

    let catalog = read_sector(&mut file, path, u64::from(catalog_lba))?;
    let header = catalog[0];
    let signature = le_u16(&catalog, 30);
    if header != VALIDATION_HEADER || signature != VALIDATION_SIGNATURE {
        return Err(Error::format(
            path,
            format!(
                "invalid validation entry (header 0x{header:02X}, signature 0x{signature:04X})"
            ),
        ));
    }
    let platform_id = catalog[1];
    let manufacturer = trim_nul(&catalog[4..28]);

    let mut entries = Vec::new();
    let mut section_platform = platform_id;
    let mut offset = RECORD_SIZE;
    while offset + RECORD_SIZE <= catalog.len() {
        let record = &catalog[offset..offset + RECORD_SIZE];
        match record[0] {
            0x00 => break,
            SECTION_HEADER | FINAL_SECTION_HEADER => {
                section_platform = record[1];
            }
            BOOTABLE => {
                let mut entry = BootEntry {
                    boot_indicator: record[0],
                    media_type: record[1],
                    platform_id: section_platform,
                    load_segment: le_u16(record, 2),
                    system_type: record[4],
                    sector_count: le_u16(record, 6),
                    load_rba: le_u32(record, 8),
                    boot_image_sha256: String::new(),
                };
                entry.boot_image_sha256 = hash_boot_image(&mut file, path, &entry)?;
                entries.push(entry);
            }
            SECTION_EXTENSION => {}
            other => {
                debug!(offset, entry_type = other, "skipping unknown catalog record");
            }
        }
        offset += RECORD_SIZE;
    }

    Ok(BootCatalog {
        source: path.to_path_buf(),
        is_valid: true,
        platform_id,
        manufacturer,
        catalog_lba,
        entries,
    })
}

/// Read the boot image referenced by `entry`.
pub fn read_boot_image(path: &Path, entry: &BootEntry) -> Result<Vec<u8>> {
    let mut file = File::open(path)?;
    read_boot_image_from(&mut file, path, entry)
}

fn read_boot_image_from(file: &mut File, path: &Path, entry: &BootEntry) -> Result<Vec<u8>> {
    let (offset, len) = entry.image_range();
    file.seek(SeekFrom::Start(offset))?;
    let mut image = vec![0u8; len as usize];
    file.read_exact(&mut image).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => Error::format(
            path,
            format!(
                "boot image at RBA {} ({} sectors of {} bytes) extends past end of image",
                entry.load_rba, entry.sector_count, VIRTUAL_SECTOR_SIZE
            ),
        ),
        _ => Error::Io(e),
    })?;
    Ok(image)
}

fn hash_boot_image(file: &mut File, path: &Path, entry: &BootEntry) -> Result<String> {
    let image = read_boot_image_from(file, path, entry)?;
    Ok(hex::encode(Sha256::digest(&image)))
}

fn read_sector(file: &mut File, path: &Path, lba: u64) -> Result<Vec<u8>> {
    let mut sector = vec![0u8; PHYSICAL_SECTOR_SIZE as usize];
    file.seek(SeekFrom::Start(lba * PHYSICAL_SECTOR_SIZE))?;
    file.read_exact(&mut sector).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => {
            Error::format(path, format!("image too short to contain sector {lba}"))
        }
        _ => Error::Io(e),
    })?;
    Ok(sector)
}

/// Text of a fixed-width field with trailing NULs removed. Spaces are kept.
fn trim_nul(bytes: &[u8]) -> String {
    let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

fn le_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

fn le_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}
