//! Boot catalog parsing and comparison over synthetic images on disk.

mod helpers;

use std::fs;

use helpers::*;

use devwin::eltorito::{compare, read_boot_image, BootCatalog, PLATFORM_BIOS, PLATFORM_EFI};
use devwin::Error;
use sha2::{Digest, Sha256};
use tempfile::TempDir;

#[test]
fn test_parse_dual_platform_digests() {
    let dir = TempDir::new().unwrap();
    let iso = dir.path().join("base.iso");
    write_base_iso(&iso);

    let catalog = BootCatalog::parse(&iso).unwrap();
    assert!(catalog.is_valid);
    assert_eq!(catalog.catalog_lba, CATALOG_LBA);
    assert_eq!(catalog.entries.len(), 2);

    let bios = &catalog.entries[0];
    assert_eq!(bios.platform_id, PLATFORM_BIOS);
    assert_eq!(bios.load_rba, BIOS_RBA);
    assert_eq!(bios.sector_count, BIOS_SECTORS);
    assert_eq!(bios.boot_image_sha256, hex::encode(Sha256::digest(bios_payload())));

    let efi = &catalog.entries[1];
    assert_eq!(efi.platform_id, PLATFORM_EFI);
    assert_eq!(efi.load_rba, EFI_RBA);
    assert_eq!(efi.sector_count, EFI_SECTORS);
    assert_eq!(efi.boot_image_sha256, hex::encode(Sha256::digest(efi_payload())));
}

#[test]
fn test_read_boot_image_returns_payload() {
    let dir = TempDir::new().unwrap();
    let iso = dir.path().join("base.iso");
    write_base_iso(&iso);
    let catalog = BootCatalog::parse(&iso).unwrap();
    assert_eq!(read_boot_image(&iso, &catalog.entries[1]).unwrap(), efi_payload());
}

#[test]
fn test_identical_images_compare_equal() {
    let dir = TempDir::new().unwrap();
    let a = dir.path().join("a.iso");
    let b = dir.path().join("b.iso");
    write_base_iso(&a);
    write_base_iso(&b);

    let original = BootCatalog::parse(&a).unwrap();
    let repacked = BootCatalog::parse(&b).unwrap();
    compare(&original, &repacked.entries).unwrap();
}

#[test]
fn test_changed_payload_fails_on_digest() {
    let dir = TempDir::new().unwrap();
    let a = dir.path().join("a.iso");
    let b = dir.path().join("b.iso");
    write_base_iso(&a);

    let bios = bios_payload();
    let mut efi = efi_payload();
    efi[100] ^= 0x01;
    write_iso(
        &b,
        &[
            Payload { platform_id: PLATFORM_BIOS, load_rba: BIOS_RBA, bytes: &bios },
            Payload { platform_id: PLATFORM_EFI, load_rba: EFI_RBA, bytes: &efi },
        ],
    );

    let original = BootCatalog::parse(&a).unwrap();
    let repacked = BootCatalog::parse(&b).unwrap();
    match compare(&original, &repacked.entries).unwrap_err() {
        Error::Validation(msg) => {
            assert!(msg.contains("BootImageSha256"), "{msg}");
            assert!(msg.contains("index 1"), "{msg}");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_moved_payload_fails_on_rba() {
    let dir = TempDir::new().unwrap();
    let a = dir.path().join("a.iso");
    let b = dir.path().join("b.iso");
    write_base_iso(&a);

    let bios = bios_payload();
    let efi = efi_payload();
    write_iso(
        &b,
        &[
            Payload { platform_id: PLATFORM_BIOS, load_rba: BIOS_RBA + 1, bytes: &bios },
            Payload { platform_id: PLATFORM_EFI, load_rba: EFI_RBA, bytes: &efi },
        ],
    );

    let original = BootCatalog::parse(&a).unwrap();
    let repacked = BootCatalog::parse(&b).unwrap();
    let err = compare(&original, &repacked.entries).unwrap_err();
    assert_eq!(err.reason_code(), "validation_error");
    assert!(err.to_string().contains("LoadRBA mismatch at index 0"));
}

#[test]
fn test_dropped_entry_fails_on_count() {
    let dir = TempDir::new().unwrap();
    let a = dir.path().join("a.iso");
    let b = dir.path().join("b.iso");
    write_base_iso(&a);
    let efi = efi_payload();
    write_iso(&b, &[Payload { platform_id: PLATFORM_EFI, load_rba: EFI_RBA, bytes: &efi }]);

    let original = BootCatalog::parse(&a).unwrap();
    let repacked = BootCatalog::parse(&b).unwrap();
    let err = compare(&original, &repacked.entries).unwrap_err();
    assert!(err.to_string().contains("entry count mismatch"));
}

#[test]
fn test_truncated_image_is_format_error() {
    let dir = TempDir::new().unwrap();
    let iso = dir.path().join("short.iso");
    let mut bytes = iso_bytes(&[Payload {
        platform_id: PLATFORM_EFI,
        load_rba: EFI_RBA,
        bytes: &efi_payload(),
    }]);
    bytes.truncate(EFI_RBA as usize * SECTOR + 100);
    fs::write(&iso, bytes).unwrap();

    let err = BootCatalog::parse(&iso).unwrap_err();
    assert_eq!(err.reason_code(), "format_error");
}

#[test]
fn test_plain_file_probes_as_none() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("plain.iso");
    fs::write(&path, vec![0u8; 40 * SECTOR]).unwrap();
    assert!(BootCatalog::probe(&path).is_none());
    assert!(matches!(
        BootCatalog::parse(&path).unwrap_err(),
        Error::Format { .. }
    ));
}

#[test]
fn test_json_presentation() {
    let dir = TempDir::new().unwrap();
    let iso = dir.path().join("base.iso");
    write_base_iso(&iso);
    let catalog = BootCatalog::parse(&iso).unwrap();

    let json: serde_json::Value = serde_json::to_value(&catalog).unwrap();
    assert_eq!(json["catalog_lba"], CATALOG_LBA);
    assert_eq!(json["entries"][1]["load_rba"], EFI_RBA);
    assert_eq!(json["entries"][1]["platform_id"], 0xEF);

    let text = catalog.to_string();
    assert!(text.contains("EFI (UEFI)"));
    assert!(text.contains("x86 (BIOS)"));
}
