//! End-to-end build: acquire, mount, inject, repack, verify, dispose.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::cache::{Fetcher, ImageCache};
use crate::common::{remove_file_if_exists, TempDir, TempFile};
use crate::common::fsutil::DEFAULT_MAX_PARALLELISM;
use crate::eltorito::{compare, BootCatalog, PLATFORM_EFI};
use crate::error::{Error, Result};
use crate::mount::{ImageKind, MountOptions, MountSession};
use crate::platform::{AuthorRequest, Platform};
use crate::repack::{RepackEngine, DEFAULT_VOLUME_LABEL};
use crate::timing::Timer;

/// Fixed location of the configuration document inside the media root.
pub const ANSWER_FILE_NAME: &str = "autounattend.xml";
/// Volume label of secondary answer media.
pub const ANSWER_MEDIA_LABEL: &str = "DEVWIN";

/// Where the base image comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceImage {
    /// An image already on disk. Never modified.
    Local(PathBuf),
    /// Resolved through the image cache.
    Download {
        language: String,
        edition: String,
        architecture: String,
    },
}

/// A base image ready to mount.
#[derive(Debug)]
pub enum Acquired {
    Local(PathBuf),
    /// Private copy of a cache entry, deleted on drop.
    Temp(TempFile),
}

impl Acquired {
    pub fn path(&self) -> &Path {
        match self {
            Acquired::Local(path) => path,
            Acquired::Temp(temp) => temp.path(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BuildSettings {
    pub volume_label: String,
    pub max_parallelism: usize,
    /// Parent of mount roots and image copies.
    pub temp_parent: PathBuf,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            volume_label: DEFAULT_VOLUME_LABEL.to_string(),
            max_parallelism: DEFAULT_MAX_PARALLELISM,
            temp_parent: std::env::temp_dir(),
        }
    }
}

/// Outcome of a successful build.
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub destination: PathBuf,
    pub kind: ImageKind,
    /// Catalog of the source image. `None` for packaged sources.
    pub original: Option<BootCatalog>,
    pub repacked: BootCatalog,
}

pub struct Pipeline {
    platform: Arc<dyn Platform>,
    settings: BuildSettings,
}

impl Pipeline {
    pub fn new(platform: Arc<dyn Platform>, settings: BuildSettings) -> Self {
        Self { platform, settings }
    }

    /// Resolve `source` to a file this pipeline may mount.
    pub fn acquire<F: Fetcher>(&self, cache: &ImageCache<F>, source: &SourceImage) -> Result<Acquired> {
        match source {
            SourceImage::Local(path) => {
                if !path.is_file() {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        format!("source image '{}' not found", path.display()),
                    )
                    .into());
                }
                Ok(Acquired::Local(path.clone()))
            }
            SourceImage::Download {
                language,
                edition,
                architecture,
            } => {
                let timer = Timer::start("acquire");
                let temp = cache.resolve_to_temp(language, edition, architecture, &self.settings.temp_parent)?;
                timer.finish();
                Ok(Acquired::Temp(temp))
            }
        }
    }

    /// Acquire `source` and build from it.
    pub fn build_from<F: Fetcher>(
        &self,
        cache: &ImageCache<F>,
        source: &SourceImage,
        answer: &[u8],
        destination: &Path,
    ) -> Result<BuildReport> {
        let acquired = self.acquire(cache, source)?;
        self.build(acquired.path(), answer, destination)
    }

    /// Build `destination` from `image` with `answer` injected at the media root.
    ///
    /// For optical sources the repacked boot catalog must match the source
    /// catalog entry for entry. Any failure once authoring has started leaves
    /// no destination behind, and every path releases the mount.
    pub fn build(&self, image: &Path, answer: &[u8], destination: &Path) -> Result<BuildReport> {
        let kind = ImageKind::from_path(image)?;
        info!(image = %image.display(), %kind, destination = %destination.display(), "starting build");

        let original = match kind {
            ImageKind::Optical => {
                let catalog = BootCatalog::parse(image)?;
                info!(entries = catalog.entries.len(), "source boot catalog captured");
                Some(catalog)
            }
            ImageKind::PackagedFilesystem => None,
        };

        let timer = Timer::start("mount");
        let session = MountSession::open(
            Arc::clone(&self.platform),
            image,
            kind,
            &MountOptions {
                read_only: false,
                max_parallelism: self.settings.max_parallelism,
                temp_parent: self.settings.temp_parent.clone(),
            },
        )?;
        timer.finish();

        let outcome = self.inject_and_repack(&session, answer, destination, original.as_ref());
        let timer = Timer::start("dispose");
        let disposed = session.dispose();
        timer.finish();

        match (outcome, disposed) {
            (Ok(repacked), Ok(())) => {
                info!(destination = %destination.display(), "build complete");
                Ok(BuildReport {
                    destination: destination.to_path_buf(),
                    kind,
                    original,
                    repacked,
                })
            }
            (Ok(_), Err(e)) => {
                discard(destination);
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(cleanup)) => {
                warn!(error = %cleanup, "session cleanup failed after build error");
                Err(e)
            }
        }
    }

    fn inject_and_repack(
        &self,
        session: &MountSession,
        answer: &[u8],
        destination: &Path,
        original: Option<&BootCatalog>,
    ) -> Result<BootCatalog> {
        let answer_path = session.root().join(ANSWER_FILE_NAME);
        fs::write(&answer_path, answer)?;
        info!(path = %answer_path.display(), bytes = answer.len(), "configuration written");

        let timer = Timer::start("repack");
        let repacked = RepackEngine::new(Arc::clone(&self.platform))
            .volume_label(&self.settings.volume_label)
            .repack(session.root(), destination)?;
        timer.finish();

        if let Some(original) = original {
            if let Err(e) = compare(original, &repacked.entries) {
                error!(error = %e, "repacked boot catalog differs from source");
                discard(destination);
                return Err(e);
            }
            info!(entries = repacked.entries.len(), "boot catalog verified");
        }
        Ok(repacked)
    }

    /// Author a small non-bootable image holding only the configuration document.
    pub fn build_answer_media(&self, answer: &[u8], destination: &Path) -> Result<()> {
        let staging = TempDir::new_in(&self.settings.temp_parent, "devwin-answer")?;
        fs::write(staging.path().join(ANSWER_FILE_NAME), answer)?;
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }
        remove_file_if_exists(destination)?;

        let request = AuthorRequest {
            source_dir: staging.path().to_path_buf(),
            destination: destination.to_path_buf(),
            volume_label: ANSWER_MEDIA_LABEL.to_string(),
            ignore_size_limit: false,
            udf_only: false,
            include_hidden: false,
            default_platform: PLATFORM_EFI,
            boot_entries: Vec::new(),
        };
        let result = match self.platform.author_image(&request) {
            Ok(result) => result,
            Err(e) => {
                discard(destination);
                return Err(e);
            }
        };
        if !result.success() {
            discard(destination);
            return Err(Error::Repack {
                destination: destination.to_path_buf(),
                code: result.code,
                stdout: result.stdout,
                stderr: result.stderr,
            });
        }
        info!(destination = %destination.display(), "answer media written");
        Ok(())
    }
}

fn discard(destination: &Path) {
    if let Err(e) = remove_file_if_exists(destination) {
        error!(path = %destination.display(), error = %e, "failed to remove destination image");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_missing_local() {
        struct NoFetch;
        impl Fetcher for NoFetch {
            fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
                panic!("unexpected fetch of {url}")
            }
            fn download(&self, url: &str, _: &Path, _: Option<u64>) -> Result<u64> {
                panic!("unexpected download of {url}")
            }
        }

        let dir = tempfile::TempDir::new().unwrap();
        let cache = ImageCache::new(dir.path(), "http://unused", NoFetch);
        let pipeline = Pipeline::new(
            crate::platform::host(&crate::config::Config::from_vars(
                Vec::<(String, String)>::new(),
                dir.path(),
            )),
            BuildSettings::default(),
        );

        let err = pipeline
            .acquire(&cache, &SourceImage::Local(dir.path().join("none.iso")))
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));

        let present = dir.path().join("base.iso");
        fs::write(&present, b"x").unwrap();
        let acquired = pipeline.acquire(&cache, &SourceImage::Local(present.clone())).unwrap();
        assert_eq!(acquired.path(), present);
    }

    #[test]
    fn test_unsupported_image_rejected_before_mount() {
        let dir = tempfile::TempDir::new().unwrap();
        let pipeline = Pipeline::new(
            crate::platform::host(&crate::config::Config::from_vars(
                Vec::<(String, String)>::new(),
                dir.path(),
            )),
            BuildSettings::default(),
        );
        let err = pipeline
            .build(&dir.path().join("disk.vhdx"), b"<x/>", &dir.path().join("out.iso"))
            .unwrap_err();
        assert_eq!(err.reason_code(), "unsupported_image");
    }
}
