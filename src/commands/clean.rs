//! Clean command - removes cached and built images.

use anyhow::{Context, Result};

use devwin::common::TreeRemover;
use devwin::config::Config;

use super::open_cache;

/// Clean target for the clean command.
pub enum CleanTarget {
    /// Clean built images only (default)
    Output,
    /// Clean downloaded base images
    Cache,
    /// Clean everything
    All,
}

/// Execute the clean command.
pub fn cmd_clean(target: CleanTarget, config: &Config) -> Result<()> {
    match target {
        CleanTarget::Output => clean_output(config)?,
        CleanTarget::Cache => clean_cache(config)?,
        CleanTarget::All => {
            clean_output(config)?;
            clean_cache(config)?;
        }
    }
    Ok(())
}

fn clean_output(config: &Config) -> Result<()> {
    println!("Removing {}...", config.output_dir.display());
    TreeRemover::new(&config.output_dir)
        .max_parallelism(config.max_parallelism)
        .remove()
        .context("Failed to clean output directory")?;
    println!("Output cleaned.");
    Ok(())
}

fn clean_cache(config: &Config) -> Result<()> {
    println!("Clearing image cache ({})...", config.cache_dir.display());
    open_cache(config)?.clear()?;
    println!("Cache cleared.");
    Ok(())
}
