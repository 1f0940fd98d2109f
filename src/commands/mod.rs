//! CLI command handlers.
//!
//! Each submodule handles a specific CLI command:
//! - `build` - Build customized installation media
//! - `catalog` - Dump an image's boot catalog
//! - `verify` - Compare two images' boot catalogs
//! - `download` - Resolve a base image into the cache
//! - `list` - Browse the manifest
//! - `clean` - Remove cached and built images
//! - `show` - Display information
//! - `preflight` - Run preflight checks

pub mod build;
mod catalog;
pub mod clean;
mod download;
pub mod list;
mod preflight;
pub mod show;
mod verify;

use anyhow::{Context, Result};

use devwin::cache::{DownloadOptions, ImageCache};
use devwin::config::Config;

pub use build::cmd_build;
pub use catalog::cmd_catalog;
pub use clean::cmd_clean;
pub use download::cmd_download;
pub use list::cmd_list;
pub use preflight::cmd_preflight;
pub use show::cmd_show;
pub use verify::cmd_verify;

/// Manifest selectors with config fallbacks applied.
#[derive(Debug, Clone)]
pub struct Selectors {
    pub language: String,
    pub edition: String,
    pub architecture: String,
}

impl Selectors {
    pub fn resolve(
        language: Option<String>,
        edition: Option<String>,
        architecture: Option<String>,
        config: &Config,
    ) -> Self {
        Self {
            language: language.unwrap_or_else(|| config.language.clone()),
            edition: edition.unwrap_or_else(|| config.edition.clone()),
            architecture: architecture.unwrap_or_else(|| config.architecture.clone()),
        }
    }
}

/// HTTP-backed image cache for `config`.
pub fn open_cache(config: &Config) -> Result<ImageCache> {
    ImageCache::http(
        &config.cache_dir,
        &config.manifest_url,
        DownloadOptions::default().with_retries(config.download_retries),
    )
    .context("Failed to initialize HTTP client")
}
