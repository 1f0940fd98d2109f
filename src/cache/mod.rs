//! Content-addressed cache of downloaded base images.
//!
//! A `(language, edition, architecture)` request is resolved through the
//! remote manifest to one published file. The cache file name embeds the
//! resolved selectors and the published SHA-1, and a hit is only returned
//! after the digest of the bytes on disk has been recomputed.
//!
//! Downloads land in a `.part` file beside the final name and are renamed
//! into place only after verification, so a reader never observes a partial
//! cache entry. The `.part` file and private copies handed out by
//! [`ImageCache::resolve_to_temp`] are removed on interrupt. Two processes resolving the same key still download twice;
//! the second rename wins and both copies carry identical bytes.

pub mod download;
pub mod manifest;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use tracing::{debug, info, warn};

use crate::archive::{self, ArchiveExtractor};
use crate::common::{TempFile, TreeRemover};
use crate::error::{Error, Result};

pub use download::{sha1_file, DownloadOptions, Fetcher, HttpFetcher};
pub use manifest::{Manifest, ManifestFile};

/// Cabinet signature at the start of a compressed manifest.
const CAB_MAGIC: &[u8; 4] = b"MSCF";
/// Member of the cabinet holding the product catalog.
const MANIFEST_MEMBER: &str = "products.xml";

/// Deterministic cache file name for a manifest record.
///
/// `<stem>-<language>-<edition>-<architecture>-<sha1><.ext>`
pub fn cache_file_name(record: &ManifestFile) -> String {
    let path = Path::new(&record.file_name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| record.file_name.clone());
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    format!(
        "{stem}-{}-{}-{}-{}{ext}",
        record.language_code,
        record.edition,
        record.architecture,
        record.sha1.to_ascii_lowercase()
    )
}

/// Local image cache backed by a remote manifest.
pub struct ImageCache<F: Fetcher = HttpFetcher> {
    dir: PathBuf,
    manifest_url: String,
    fetcher: F,
    extractor: Box<dyn ArchiveExtractor>,
    manifest: OnceLock<Manifest>,
}

impl ImageCache<HttpFetcher> {
    /// Cache over HTTP with the host archive extractor.
    pub fn http(dir: impl Into<PathBuf>, manifest_url: impl Into<String>, options: DownloadOptions) -> Result<Self> {
        Ok(Self::new(dir, manifest_url, HttpFetcher::new(options)?))
    }
}

impl<F: Fetcher> ImageCache<F> {
    pub fn new(dir: impl Into<PathBuf>, manifest_url: impl Into<String>, fetcher: F) -> Self {
        Self {
            dir: dir.into(),
            manifest_url: manifest_url.into(),
            fetcher,
            extractor: archive::host(),
            manifest: OnceLock::new(),
        }
    }

    /// Use `extractor` to unpack a compressed manifest.
    pub fn with_extractor(mut self, extractor: Box<dyn ArchiveExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// The manifest, fetched on first use and kept for the life of the cache.
    pub fn manifest(&self) -> Result<&Manifest> {
        if let Some(manifest) = self.manifest.get() {
            return Ok(manifest);
        }
        info!(url = %self.manifest_url, "fetching manifest");
        let payload = self.fetcher.fetch_bytes(&self.manifest_url)?;
        let xml = if payload.starts_with(CAB_MAGIC) {
            debug!(extractor = self.extractor.name(), "manifest is a cabinet");
            self.extractor.extract_member(&payload, MANIFEST_MEMBER)?
        } else {
            payload
        };
        let manifest = Manifest::parse(&xml)?;
        debug!(files = manifest.files().len(), "manifest loaded");
        Ok(self.manifest.get_or_init(|| manifest))
    }

    pub fn languages(&self) -> Result<Vec<String>> {
        Ok(self.manifest()?.languages())
    }

    pub fn editions(&self) -> Result<Vec<String>> {
        Ok(self.manifest()?.editions())
    }

    pub fn architectures(&self) -> Result<Vec<String>> {
        Ok(self.manifest()?.architectures())
    }

    /// The unique manifest record for the selectors.
    pub fn record(&self, language: &str, edition: &str, architecture: &str) -> Result<ManifestFile> {
        Ok(self.manifest()?.select(language, edition, architecture)?.clone())
    }

    /// Resolve the selectors to a verified local file, downloading on a miss.
    pub fn resolve(&self, language: &str, edition: &str, architecture: &str) -> Result<PathBuf> {
        let record = self.record(language, edition, architecture)?;
        let path = self.dir.join(cache_file_name(&record));

        if path.is_file() {
            let actual = sha1_file(&path)?;
            if actual.eq_ignore_ascii_case(&record.sha1) {
                info!(path = %path.display(), "cache hit");
                return Ok(path);
            }
            warn!(
                path = %path.display(),
                expected = %record.sha1,
                %actual,
                "cached image is corrupted, downloading again"
            );
            fs::remove_file(&path)?;
        }

        self.download(&record, &path)?;
        Ok(path)
    }

    /// Resolve, then copy the cached file into a disposable temp file under `parent`.
    pub fn resolve_to_temp(
        &self,
        language: &str,
        edition: &str,
        architecture: &str,
        parent: &Path,
    ) -> Result<TempFile> {
        let cached = self.resolve(language, edition, architecture)?;
        let ext = cached.extension().map(|e| e.to_string_lossy().into_owned());
        let temp = TempFile::new_in(parent, "devwin-base", ext.as_deref())?;
        fs::copy(&cached, temp.path())?;
        debug!(from = %cached.display(), to = %temp.path().display(), "copied base image");
        Ok(temp)
    }

    /// Delete every cache entry.
    pub fn clear(&self) -> Result<()> {
        TreeRemover::new(&self.dir).remove()
    }

    fn download(&self, record: &ManifestFile, path: &Path) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        // Removed on any failure, including an interrupt mid-transfer.
        let part = TempFile::adopt(part_path(path));

        self.fetcher.download(&record.url, part.path(), record.size)?;

        let actual = sha1_file(part.path())?;
        if !actual.eq_ignore_ascii_case(&record.sha1) {
            return Err(Error::Integrity {
                path: path.to_path_buf(),
                expected: record.sha1.clone(),
                actual,
            });
        }

        fs::rename(part.path(), path)?;
        part.keep();
        info!(path = %path.display(), "image cached");
        Ok(())
    }
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".part-{}", std::process::id()));
    path.with_file_name(name)
}
