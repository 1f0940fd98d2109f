//! Error taxonomy for the image pipeline.
//!
//! Every failure the library can produce maps onto one variant here. The
//! binary wraps these in `anyhow` for context, but the variant (and its
//! [`Error::reason_code`]) is what tells an operator what went wrong.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Library result type.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Pipeline errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or unexpected binary structure in a source image.
    #[error("format error in {}: {detail}", path.display())]
    Format { path: PathBuf, detail: String },

    /// Zero or several manifest records matched the requested selectors.
    #[error(
        "{matches} manifest records match language={language} edition={edition} \
         architecture={architecture} (expected exactly one)"
    )]
    Selection {
        language: String,
        edition: String,
        architecture: String,
        matches: usize,
    },

    /// Checksum mismatch on a cached or downloaded file.
    #[error("integrity check failed for {}: expected sha1 {expected}, got {actual}", path.display())]
    Integrity {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// A boot payload required for repacking is absent from the source tree.
    #[error("boot asset not found: {}", .0.display())]
    MissingBootAsset(PathBuf),

    /// The authoring tool exited non-zero.
    #[error("authoring {} failed (exit code {code})\nOutput:\n{stdout}\nError:\n{stderr}", destination.display())]
    Repack {
        destination: PathBuf,
        code: i32,
        stdout: String,
        stderr: String,
    },

    /// The repacked boot catalog differs from the original.
    #[error("boot catalog validation failed: {0}")]
    Validation(String),

    /// The platform mount facility failed.
    #[error("failed to mount {}: {source}", image.display())]
    Mount {
        image: PathBuf,
        #[source]
        source: Box<Error>,
    },

    /// The platform unmount facility failed.
    #[error("failed to unmount {}: {source}", target.display())]
    Unmount {
        target: PathBuf,
        #[source]
        source: Box<Error>,
    },

    /// The facility refused to run without administrative rights.
    #[error("{tool} requires elevated privileges")]
    ElevationRequired { tool: String },

    /// Generic external process failure.
    #[error("{tool} failed (exit code {code}): {detail}")]
    Tool {
        tool: String,
        code: i32,
        detail: String,
    },

    /// One or more per-file operations of a bulk copy/delete failed.
    #[error(transparent)]
    Bulk(#[from] BulkError),

    /// Transport-level download failure.
    #[error("download of {url} failed: {detail}")]
    Download { url: String, detail: String },

    /// The manifest document could not be read.
    #[error("manifest error: {0}")]
    Manifest(String),

    /// The source path is not an image kind this tool handles.
    #[error("unsupported image type: {}", .0.display())]
    UnsupportedImage(PathBuf),

    /// Cleanup released a resource while an operation still needed it.
    #[error("interrupted while preparing {}", .0.display())]
    Interrupted(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Stable identifier for this error kind.
    pub fn reason_code(&self) -> &'static str {
        match self {
            Error::Format { .. } => "format_error",
            Error::Selection { .. } => "selection_error",
            Error::Integrity { .. } => "integrity_error",
            Error::MissingBootAsset(_) => "missing_boot_asset",
            Error::Repack { .. } => "repack_error",
            Error::Validation(_) => "validation_error",
            Error::Mount { .. } => "mount_error",
            Error::Unmount { .. } => "unmount_error",
            Error::ElevationRequired { .. } => "elevation_required",
            Error::Tool { .. } => "tool_error",
            Error::Bulk(_) => "bulk_error",
            Error::Download { .. } => "download_error",
            Error::Manifest(_) => "manifest_error",
            Error::UnsupportedImage(_) => "unsupported_image",
            Error::Interrupted(_) => "interrupted",
            Error::Io(_) => "io_error",
        }
    }

    /// True if this error (or the error it wraps) means the caller lacks privileges.
    pub fn is_elevation_required(&self) -> bool {
        match self {
            Error::ElevationRequired { .. } => true,
            Error::Mount { source, .. } | Error::Unmount { source, .. } => {
                source.is_elevation_required()
            }
            _ => false,
        }
    }

    pub(crate) fn format(path: impl Into<PathBuf>, detail: impl Into<String>) -> Self {
        Error::Format {
            path: path.into(),
            detail: detail.into(),
        }
    }

    /// Wrap a platform failure as a mount error, letting elevation failures through.
    pub(crate) fn mount(image: impl Into<PathBuf>, source: Error) -> Self {
        match source {
            e @ Error::ElevationRequired { .. } => e,
            e @ Error::Mount { .. } => e,
            e => Error::Mount {
                image: image.into(),
                source: Box::new(e),
            },
        }
    }

    /// Wrap a platform failure as an unmount error, letting elevation failures through.
    pub(crate) fn unmount(target: impl Into<PathBuf>, source: Error) -> Self {
        match source {
            e @ Error::ElevationRequired { .. } => e,
            e @ Error::Unmount { .. } => e,
            e => Error::Unmount {
                target: target.into(),
                source: Box::new(e),
            },
        }
    }
}

/// Collected failures of a best-effort bulk file operation.
#[derive(Debug)]
pub struct BulkError {
    /// What the batch was doing ("copy", "remove").
    pub operation: &'static str,
    /// Root of the tree the batch operated on.
    pub root: PathBuf,
    /// Every path that failed, with its error.
    pub failures: Vec<(PathBuf, io::Error)>,
}

impl fmt::Display for BulkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} failed for {} path(s)",
            self.operation,
            self.root.display(),
            self.failures.len()
        )?;
        for (path, err) in self.failures.iter().take(10) {
            write!(f, "\n  {}: {}", path.display(), err)?;
        }
        if self.failures.len() > 10 {
            write!(f, "\n  ... and {} more", self.failures.len() - 10)?;
        }
        Ok(())
    }
}

impl std::error::Error for BulkError {}
