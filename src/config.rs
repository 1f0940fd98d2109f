//! Configuration management for devwin.
//!
//! Reads configuration from a .env file and environment variables.
//! Environment variables take precedence over the .env file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::common::fsutil::DEFAULT_MAX_PARALLELISM;
use crate::repack::DEFAULT_VOLUME_LABEL;

/// Published product catalog of installation images.
pub const DEFAULT_MANIFEST_URL: &str = "https://go.microsoft.com/fwlink/?LinkId=2156292";
pub const DEFAULT_LANGUAGE: &str = "en-US";
pub const DEFAULT_EDITION: &str = "Professional";
pub const DEFAULT_ARCHITECTURE: &str = "x64";
pub const DEFAULT_DOWNLOAD_RETRIES: u32 = 3;

/// Devwin configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Base image cache (default: <user cache dir>/devwin)
    pub cache_dir: PathBuf,
    /// Output directory (default: ./out)
    pub output_dir: PathBuf,
    pub manifest_url: String,
    pub language: String,
    pub edition: String,
    pub architecture: String,
    /// Worker bound for bulk copy and delete
    pub max_parallelism: usize,
    /// Volume label of repacked media
    pub volume_label: String,
    /// Explicit authoring tool path (Windows)
    pub oscdimg: Option<PathBuf>,
    pub download_retries: u32,
}

impl Config {
    /// Load from `.env` (if present) and the process environment.
    pub fn load() -> Self {
        dotenvy::dotenv().ok();
        let base = std::env::current_dir().unwrap_or_default();
        Self::from_vars(std::env::vars(), &base)
    }

    /// Build from explicit variables. Relative paths resolve against `base`.
    pub fn from_vars<I, K, V>(vars: I, base: &Path) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(_, v)| !v.trim().is_empty())
            .collect();
        let text = |key: &str, default: &str| {
            vars.get(key)
                .map(|v| v.trim().to_string())
                .unwrap_or_else(|| default.to_string())
        };
        let path = |key: &str| vars.get(key).map(|v| resolve(base, v.trim()));

        let cache_dir = path("DEVWIN_CACHE_DIR").unwrap_or_else(|| {
            dirs::cache_dir()
                .map(|d| d.join("devwin"))
                .unwrap_or_else(|| base.join(".cache/devwin"))
        });

        Self {
            cache_dir,
            output_dir: path("DEVWIN_OUTPUT_DIR").unwrap_or_else(|| base.join("out")),
            manifest_url: text("DEVWIN_MANIFEST_URL", DEFAULT_MANIFEST_URL),
            language: text("DEVWIN_LANGUAGE", DEFAULT_LANGUAGE),
            edition: text("DEVWIN_EDITION", DEFAULT_EDITION),
            architecture: text("DEVWIN_ARCH", DEFAULT_ARCHITECTURE),
            max_parallelism: number(&vars, "DEVWIN_MAX_PARALLELISM", DEFAULT_MAX_PARALLELISM).max(1),
            volume_label: text("DEVWIN_VOLUME_LABEL", DEFAULT_VOLUME_LABEL),
            oscdimg: path("DEVWIN_OSCDIMG"),
            download_retries: number(&vars, "DEVWIN_DOWNLOAD_RETRIES", DEFAULT_DOWNLOAD_RETRIES),
        }
    }

    /// Print configuration for debugging.
    pub fn print(&self) {
        println!("Configuration:");
        println!("  DEVWIN_CACHE_DIR: {}", self.cache_dir.display());
        println!("  DEVWIN_OUTPUT_DIR: {}", self.output_dir.display());
        println!("  DEVWIN_MANIFEST_URL: {}", self.manifest_url);
        println!("  DEVWIN_LANGUAGE: {}", self.language);
        println!("  DEVWIN_EDITION: {}", self.edition);
        println!("  DEVWIN_ARCH: {}", self.architecture);
        println!("  DEVWIN_MAX_PARALLELISM: {}", self.max_parallelism);
        println!("  DEVWIN_VOLUME_LABEL: {}", self.volume_label);
        match &self.oscdimg {
            Some(p) => println!("  DEVWIN_OSCDIMG: {}", p.display()),
            None => println!("  DEVWIN_OSCDIMG: (search PATH and ADK)"),
        }
        println!("  DEVWIN_DOWNLOAD_RETRIES: {}", self.download_retries);
        if self.cache_dir.is_dir() {
            println!("  Cache: FOUND");
        } else {
            println!("  Cache: EMPTY (created on first download)");
        }
    }
}

fn resolve(base: &Path, value: &str) -> PathBuf {
    let path = PathBuf::from(value);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

fn number<T: std::str::FromStr + Copy + std::fmt::Display>(
    vars: &HashMap<String, String>,
    key: &str,
    default: T,
) -> T {
    match vars.get(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, %default, "invalid number, using default");
            default
        }),
        None => default,
    }
}
