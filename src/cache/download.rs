//! HTTP transport for the manifest and base images.
//!
//! The pipeline is synchronous; [`HttpFetcher`] drives `reqwest` on a private
//! tokio runtime per call and streams bodies straight to disk.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::time::Duration;

use futures_util::StreamExt;
use sha1::{Digest, Sha1};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Source of remote bytes.
///
/// Tests substitute an in-memory implementation; nothing else in the cache
/// touches the network.
pub trait Fetcher: Send + Sync {
    /// Fetch a small document into memory.
    fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>>;

    /// Stream `url` into `dest`, replacing it. Returns bytes written.
    fn download(&self, url: &str, dest: &Path, expected_size: Option<u64>) -> Result<u64>;
}

/// Download configuration options.
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Request timeout. `None` for large bodies.
    pub timeout: Option<Duration>,
    /// Retry attempts for transient failures.
    pub retries: u32,
    /// Delay before the first retry; doubles each retry.
    pub retry_delay: Duration,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            retries: 3,
            retry_delay: Duration::from_secs(2),
        }
    }
}

impl DownloadOptions {
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Backoff before attempt `attempt` (1-based retry number), capped at 16x.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.retry_delay * (1u32 << attempt.saturating_sub(1).min(4))
    }
}

/// Download progress, logged every 10%.
#[derive(Debug, Clone, Copy)]
struct Progress {
    downloaded: u64,
    total: Option<u64>,
}

impl Progress {
    fn percent(&self) -> Option<u8> {
        self.total
            .filter(|&t| t > 0)
            .map(|t| ((self.downloaded.min(t) * 100) / t) as u8)
    }

    fn display(&self) -> String {
        let mb = |b: u64| b as f64 / (1024.0 * 1024.0);
        match (self.total, self.percent()) {
            (Some(total), Some(pct)) => {
                format!("{:.1}/{:.1} MB ({}%)", mb(self.downloaded), mb(total), pct)
            }
            _ => format!("{:.1} MB", mb(self.downloaded)),
        }
    }
}

/// `reqwest` backed fetcher with retry and backoff.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    options: DownloadOptions,
}

impl HttpFetcher {
    pub fn new(options: DownloadOptions) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("devwin/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Download {
                url: String::new(),
                detail: format!("failed to create HTTP client: {e}"),
            })?;
        Ok(Self { client, options })
    }

    fn runtime() -> Result<tokio::runtime::Runtime> {
        Ok(tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?)
    }

    async fn with_retries<T, Fut>(&self, url: &str, mut attempt_fn: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            if attempt > 0 {
                let delay = self.options.delay_for(attempt);
                warn!(url, attempt, retries = self.options.retries, ?delay, "retrying download");
                tokio::time::sleep(delay).await;
            }
            attempt += 1;

            match attempt_fn().await {
                Ok(v) => return Ok(v),
                Err(e) if is_retryable_error(&e) && attempt <= self.options.retries => {
                    debug!(url, error = %e, "transient download failure");
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch_attempt(&self, url: &str) -> Result<Vec<u8>> {
        let mut request = self.client.get(url);
        if let Some(timeout) = self.options.timeout {
            request = request.timeout(timeout);
        }
        let response = request.send().await.map_err(|e| transport_error(url, &e))?;
        check_status(url, &response)?;
        let bytes = response.bytes().await.map_err(|e| transport_error(url, &e))?;
        Ok(bytes.to_vec())
    }

    async fn download_attempt(&self, url: &str, dest: &Path, expected_size: Option<u64>) -> Result<u64> {
        let mut request = self.client.get(url);
        if let Some(timeout) = self.options.timeout {
            request = request.timeout(timeout);
        }
        let response = request.send().await.map_err(|e| transport_error(url, &e))?;
        check_status(url, &response)?;

        let total = response.content_length().or(expected_size);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::File::create(dest).await?;
        let mut writer = tokio::io::BufWriter::new(file);

        let mut progress = Progress { downloaded: 0, total };
        let mut last_logged = 0u8;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| transport_error(url, &e))?;
            writer.write_all(&chunk).await?;
            progress.downloaded += chunk.len() as u64;

            if let Some(pct) = progress.percent() {
                if pct >= last_logged.saturating_add(10) {
                    info!(url, progress = %progress.display(), "downloading");
                    last_logged = pct;
                }
            }
        }
        writer.flush().await?;

        if let Some(expected) = expected_size {
            if progress.downloaded != expected {
                return Err(Error::Download {
                    url: url.to_string(),
                    detail: format!(
                        "incomplete: expected {expected} bytes, got {}",
                        progress.downloaded
                    ),
                });
            }
        }
        Ok(progress.downloaded)
    }
}

impl Fetcher for HttpFetcher {
    fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        debug!(url, "fetching");
        Self::runtime()?.block_on(self.with_retries(url, || self.fetch_attempt(url)))
    }

    fn download(&self, url: &str, dest: &Path, expected_size: Option<u64>) -> Result<u64> {
        info!(url, dest = %dest.display(), "downloading");
        Self::runtime()?.block_on(
            self.with_retries(url, || self.download_attempt(url, dest, expected_size)),
        )
    }
}

fn transport_error(url: &str, e: &reqwest::Error) -> Error {
    let kind = if e.is_timeout() {
        "timeout"
    } else if e.is_connect() {
        "connection refused"
    } else {
        "request failed"
    };
    Error::Download {
        url: url.to_string(),
        detail: format!("{kind}: {e}"),
    }
}

fn check_status(url: &str, response: &reqwest::Response) -> Result<()> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    Err(Error::Download {
        url: url.to_string(),
        detail: format!(
            "HTTP {}: {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("Unknown error")
        ),
    })
}

/// Check if an error is likely transient and worth retrying.
fn is_retryable_error(e: &Error) -> bool {
    let Error::Download { detail, .. } = e else {
        return false;
    };
    let msg = detail.to_lowercase();
    msg.contains("timeout")
        || msg.contains("connection reset")
        || msg.contains("connection refused")
        || msg.contains("temporarily unavailable")
        || msg.contains("incomplete")
        || msg.contains("http 502")
        || msg.contains("http 503")
        || msg.contains("http 504")
}

/// Lowercase hex SHA-1 of a file, hashed in 1 MiB chunks.
pub fn sha1_file(path: &Path) -> Result<String> {
    let file = File::open(path)?;
    let mut reader = BufReader::with_capacity(1024 * 1024, file);
    let mut hasher = Sha1::new();
    let mut buffer = vec![0u8; 1024 * 1024];
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn download_error(detail: &str) -> Error {
        Error::Download {
            url: "http://h".to_string(),
            detail: detail.to_string(),
        }
    }

    #[test]
    fn test_download_options_default() {
        let opts = DownloadOptions::default();
        assert_eq!(opts.retries, 3);
        assert!(opts.timeout.is_none());
    }

    #[test]
    fn test_retry_delay_exponential() {
        let opts = DownloadOptions {
            retry_delay: Duration::from_secs(1),
            ..Default::default()
        };
        assert_eq!(opts.delay_for(1), Duration::from_secs(1));
        assert_eq!(opts.delay_for(2), Duration::from_secs(2));
        assert_eq!(opts.delay_for(3), Duration::from_secs(4));
        assert_eq!(opts.delay_for(10), Duration::from_secs(16));
    }

    #[test]
    fn test_progress_display() {
        let p = Progress {
            downloaded: 50 * 1024 * 1024,
            total: Some(100 * 1024 * 1024),
        };
        assert_eq!(p.percent(), Some(50));
        assert_eq!(p.display(), "50.0/100.0 MB (50%)");

        let p = Progress {
            downloaded: 1024 * 1024,
            total: None,
        };
        assert_eq!(p.display(), "1.0 MB");
    }

    #[test]
    fn test_progress_zero_total() {
        let p = Progress {
            downloaded: 10,
            total: Some(0),
        };
        assert_eq!(p.percent(), None);
    }

    #[test]
    fn test_is_retryable() {
        assert!(is_retryable_error(&download_error("timeout: operation timed out")));
        assert!(is_retryable_error(&download_error("HTTP 503: Service Unavailable")));
        assert!(is_retryable_error(&download_error("incomplete: expected 4 bytes, got 2")));
        assert!(!is_retryable_error(&download_error("HTTP 404: Not Found")));
        assert!(!is_retryable_error(&Error::Validation("x".into())));
    }

    #[test]
    fn test_sha1_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("abc");
        fs::write(&path, b"abc").unwrap();
        assert_eq!(
            sha1_file(&path).unwrap(),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn test_sha1_empty_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("empty");
        fs::write(&path, b"").unwrap();
        assert_eq!(
            sha1_file(&path).unwrap(),
            "da39a3ee5e6b4b0d3255bfef95601890afd80709"
        );
    }

    #[test]
    fn test_sha1_missing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(matches!(sha1_file(&dir.path().join("nope")), Err(Error::Io(_))));
    }
}
