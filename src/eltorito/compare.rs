use super::{BootCatalog, BootEntry};
use crate::error::{Error, Result};

/// Check that `repacked` preserves every boot entry of `original`, in order.
///
/// Fails on a count mismatch, then on the first differing field among boot
/// indicator, load segment, system type, sector count, load RBA and boot
/// image digest.
pub fn compare(original: &BootCatalog, repacked: &[BootEntry]) -> Result<()> {
    if original.entries.len() != repacked.len() {
        return Err(Error::Validation(format!(
            "entry count mismatch. Original: {}, New: {}",
            original.entries.len(),
            repacked.len()
        )));
    }

    for (i, (old, new)) in original.entries.iter().zip(repacked).enumerate() {
        check(i, "BootIndicator", old.boot_indicator, new.boot_indicator)?;
        check(i, "LoadSegment", old.load_segment, new.load_segment)?;
        check(i, "SystemType", old.system_type, new.system_type)?;
        check(i, "SectorCount", old.sector_count, new.sector_count)?;
        check(i, "LoadRBA", old.load_rba, new.load_rba)?;
        check(
            i,
            "BootImageSha256",
            &old.boot_image_sha256,
            &new.boot_image_sha256,
        )?;
    }
    Ok(())
}

fn check<T: PartialEq + std::fmt::Display>(index: usize, field: &str, old: T, new: T) -> Result<()> {
    if old != new {
        return Err(Error::Validation(format!(
            "{field} mismatch at index {index}. Original: {old}, New: {new}"
        )));
    }
    Ok(())
}
