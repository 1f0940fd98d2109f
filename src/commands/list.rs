//! List command - browses the manifest.

use anyhow::Result;

use devwin::config::Config;

use super::open_cache;

/// Which manifest column to list.
#[derive(Debug, Clone, Copy)]
pub enum ListTarget {
    Languages,
    Editions,
    Architectures,
}

/// Execute the list command.
pub fn cmd_list(target: ListTarget, config: &Config) -> Result<()> {
    let cache = open_cache(config)?;
    let values = match target {
        ListTarget::Languages => cache.languages()?,
        ListTarget::Editions => cache.editions()?,
        ListTarget::Architectures => cache.architectures()?,
    };
    for value in values {
        println!("{value}");
    }
    Ok(())
}
