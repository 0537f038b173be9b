// src/streams/source.rs

//! Catalog transports
//!
//! A [`CatalogSource`] resolves paths relative to a mirror root. Documents
//! are fetched whole; artifacts are opened as streams so multi-gigabyte
//! images never sit in memory.

use crate::error::{Error, Result};
use reqwest::blocking::Client;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Default timeout for connecting to a mirror
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for whole-document fetches
const DOCUMENT_TIMEOUT: Duration = Duration::from_secs(120);

/// Longest wait for response headers or for any single read of an artifact
/// stream. Transfers of any length proceed as long as data keeps arriving.
pub const ARTIFACT_READ_TIMEOUT: Duration = Duration::from_secs(300);

/// Maximum attempts when the connection itself fails
const MAX_RETRIES: u32 = 3;

/// Retry delay in milliseconds
const RETRY_DELAY_MS: u64 = 1000;

/// Read access to a mirror
pub trait CatalogSource {
    /// Fetch a whole document
    fn fetch(&self, path: &str) -> Result<Vec<u8>>;

    /// Open an artifact as a byte stream
    fn open(&self, path: &str) -> Result<Box<dyn Read + Send>>;

    /// Human-readable location (for logs)
    fn describe(&self, path: &str) -> String;
}

/// Build a source for a mirror URL (`http(s)://`, `file://` or a plain path)
pub fn source_for_url(url: &str) -> Result<Box<dyn CatalogSource>> {
    if let Some(path) = url.strip_prefix("file://") {
        return Ok(Box::new(FileSource::new(path)));
    }
    if url.starts_with("http://") || url.starts_with("https://") {
        return Ok(Box::new(HttpSource::new(url)?));
    }
    Ok(Box::new(FileSource::new(url)))
}

/// HTTP(S) mirror
pub struct HttpSource {
    /// Documents, bounded per request
    client: Client,
    /// Artifact streams, bounded per read
    artifact_client: Client,
    base: Url,
    max_retries: u32,
}

fn build_client(timeout: Option<Duration>) -> Result<Client> {
    Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(timeout)
        .build()
        .map_err(|e| Error::FetchError(format!("Failed to create HTTP client: {e}")))
}

impl HttpSource {
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_read_timeout(base_url, ARTIFACT_READ_TIMEOUT)
    }

    /// Like [`HttpSource::new`] with a custom artifact read timeout
    pub fn with_read_timeout(base_url: &str, read_timeout: Duration) -> Result<Self> {
        let client = build_client(None)?;
        // The blocking client applies its timeout to each wait on the
        // response, so a stalled body fails without capping total length
        let artifact_client = build_client(Some(read_timeout))?;

        // Url::join replaces the last segment unless the base ends with '/'
        let normalized = format!("{}/", base_url.trim_end_matches('/'));
        let base = Url::parse(&normalized)
            .map_err(|e| Error::FetchError(format!("Invalid mirror URL '{}': {e}", base_url)))?;

        Ok(Self {
            client,
            artifact_client,
            base,
            max_retries: MAX_RETRIES,
        })
    }

    fn url_for(&self, path: &str) -> Result<Url> {
        self.base
            .join(path.trim_start_matches('/'))
            .map_err(|e| Error::FetchError(format!("Invalid path '{}': {e}", path)))
    }

    fn get(
        &self,
        client: &Client,
        url: &Url,
        timeout: Option<Duration>,
    ) -> Result<reqwest::blocking::Response> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut request = client.get(url.clone());
            if let Some(timeout) = timeout {
                request = request.timeout(timeout);
            }
            match request.send() {
                Ok(response) => {
                    if !response.status().is_success() {
                        return Err(Error::FetchError(format!(
                            "HTTP {} from {}",
                            response.status(),
                            url
                        )));
                    }
                    return Ok(response);
                }
                Err(e) => {
                    if attempt >= self.max_retries {
                        return Err(Error::FetchError(format!(
                            "Failed to fetch {} after {attempt} attempts: {e}",
                            url
                        )));
                    }
                    warn!("Fetch attempt {} for {} failed: {}, retrying...", attempt, url, e);
                    std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS * attempt as u64));
                }
            }
        }
    }
}

impl CatalogSource for HttpSource {
    fn fetch(&self, path: &str) -> Result<Vec<u8>> {
        let url = self.url_for(path)?;
        info!("Fetching {}", url);
        let response = self.get(&self.client, &url, Some(DOCUMENT_TIMEOUT))?;
        let bytes = response
            .bytes()
            .map_err(|e| Error::FetchError(format!("Failed to read {}: {e}", url)))?;
        debug!("Fetched {} bytes from {}", bytes.len(), url);
        Ok(bytes.to_vec())
    }

    fn open(&self, path: &str) -> Result<Box<dyn Read + Send>> {
        let url = self.url_for(path)?;
        info!("Downloading {}", url);
        Ok(Box::new(self.get(&self.artifact_client, &url, None)?))
    }

    fn describe(&self, path: &str) -> String {
        self.url_for(path)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| format!("{}{}", self.base, path))
    }
}

/// Mirror laid out in a local directory
pub struct FileSource {
    root: PathBuf,
}

impl FileSource {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(Error::FetchError(format!(
                "Path escapes the mirror root: {}",
                path
            )));
        }
        Ok(self.root.join(relative))
    }
}

impl CatalogSource for FileSource {
    fn fetch(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.path_for(path)?;
        debug!("Reading {}", full.display());
        std::fs::read(&full)
            .map_err(|e| Error::FetchError(format!("Failed to read {}: {e}", full.display())))
    }

    fn open(&self, path: &str) -> Result<Box<dyn Read + Send>> {
        let full = self.path_for(path)?;
        let file = File::open(&full)
            .map_err(|e| Error::FetchError(format!("Failed to open {}: {e}", full.display())))?;
        Ok(Box::new(file))
    }

    fn describe(&self, path: &str) -> String {
        self.root.join(path).display().to_string()
    }
}
