//! Verify command - compares the boot catalogs of two images.

use anyhow::Result;
use std::path::Path;

use devwin::eltorito::{platform_name, BootCatalog};

/// Execute the verify command.
pub fn cmd_verify(original: &Path, repacked: &Path) -> Result<()> {
    let original = BootCatalog::parse(original)?;
    let repacked = BootCatalog::parse(repacked)?;
    original.validate_entries(&repacked.entries)?;
    println!(
        "Boot catalogs match: {} entries, identical boot images.",
        original.entries.len()
    );
    for entry in &original.entries {
        println!(
            "  {:<12} {}",
            platform_name(entry.platform_id),
            entry.boot_image_sha256
        );
    }
    Ok(())
}
