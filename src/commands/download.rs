//! Download command - resolves a base image into the cache.

use anyhow::Result;

use devwin::config::Config;

use super::{open_cache, Selectors};

/// Execute the download command.
///
/// With `temp`, the cached image is copied to a temp file that is kept and
/// printed, so the caller owns it.
pub fn cmd_download(selectors: &Selectors, temp: bool, config: &Config) -> Result<()> {
    let cache = open_cache(config)?;
    let record = cache.record(
        &selectors.language,
        &selectors.edition,
        &selectors.architecture,
    )?;
    println!("Resolving {} ({})...", record.file_name, record.sha1);

    let path = if temp {
        cache
            .resolve_to_temp(
                &selectors.language,
                &selectors.edition,
                &selectors.architecture,
                &std::env::temp_dir(),
            )?
            .keep()
    } else {
        cache.resolve(
            &selectors.language,
            &selectors.edition,
            &selectors.architecture,
        )?
    };
    println!("{}", path.display());
    Ok(())
}
