//! Catalog command - dumps an image's boot catalog.

use anyhow::{Context, Result};
use std::path::Path;

use devwin::eltorito::BootCatalog;

/// Execute the catalog command.
pub fn cmd_catalog(image: &Path, json: bool) -> Result<()> {
    let catalog = BootCatalog::parse(image)?;
    if json {
        let out = serde_json::to_string_pretty(&catalog).context("Failed to serialize catalog")?;
        println!("{out}");
    } else {
        println!("{catalog}");
    }
    Ok(())
}
