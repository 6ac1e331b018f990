use plr_types::{DataError, PlrResult};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::sources::{DataSourceConfig, MnistFile};

/// Trait for anything that can hand over the raw (gzipped) MNIST files
pub trait DatasetProvider: Send + Sync + std::fmt::Debug {
    /// Fetch the raw bytes of `file`
    fn fetch(&self, file: MnistFile) -> PlrResult<Vec<u8>>;

    /// Get provider name
    fn name(&self) -> &str;

    /// Get provider configuration
    fn config(&self) -> serde_json::Value;
}

/// Downloads from a list of HTTP mirrors, falling back to the next mirror on
/// any failure
#[derive(Debug)]
pub struct HttpMirrorProvider {
    pub source: DataSourceConfig,
    client: reqwest::blocking::Client,
}

impl HttpMirrorProvider {
    pub fn new(source: DataSourceConfig) -> PlrResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(source.timeout_secs))
            .build()
            .map_err(|e| DataError::DownloadFailed {
                url: String::new(),
                message: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self { source, client })
    }

    fn fetch_from(&self, url: &str) -> PlrResult<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| DataError::DownloadFailed {
                url: url.to_string(),
                message: format!("HTTP request failed: {}", e),
            })?;

        if !response.status().is_success() {
            return Err(DataError::DownloadFailed {
                url: url.to_string(),
                message: format!("HTTP error: {}", response.status()),
            }
            .into());
        }

        let bytes = response.bytes().map_err(|e| DataError::DownloadFailed {
            url: url.to_string(),
            message: format!("failed to read body: {}", e),
        })?;

        Ok(bytes.to_vec())
    }
}

impl DatasetProvider for HttpMirrorProvider {
    fn fetch(&self, file: MnistFile) -> PlrResult<Vec<u8>> {
        for mirror in &self.source.mirrors {
            let url = DataSourceConfig::url_for(mirror, file);
            tracing::info!("Downloading {}", url);

            match self.fetch_from(&url) {
                Ok(bytes) => {
                    tracing::debug!("Fetched {} bytes from {}", bytes.len(), url);
                    return Ok(bytes);
                }
                Err(e) => {
                    tracing::warn!("Failed to download {}: {}; trying next mirror", url, e);
                }
            }
        }

        Err(DataError::MirrorsExhausted {
            file: file.file_name().to_string(),
        }
        .into())
    }

    fn name(&self) -> &str {
        &self.source.name
    }

    fn config(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "http",
            "mirrors": self.source.mirrors,
            "timeout_secs": self.source.timeout_secs,
        })
    }
}

/// Reads the gzipped files from a local directory (offline installs, tests)
#[derive(Debug)]
pub struct LocalDirProvider {
    pub name: String,
    pub directory: PathBuf,
}

impl LocalDirProvider {
    pub fn new<P: AsRef<Path>>(directory: P) -> Self {
        Self {
            name: "Local directory".to_string(),
            directory: directory.as_ref().to_path_buf(),
        }
    }
}

impl DatasetProvider for LocalDirProvider {
    fn fetch(&self, file: MnistFile) -> PlrResult<Vec<u8>> {
        let path = self.directory.join(file.file_name());
        if !path.exists() {
            return Err(DataError::SourceNotFound(path.to_string_lossy().to_string()).into());
        }
        Ok(std::fs::read(path)?)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn config(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "local",
            "directory": self.directory,
        })
    }
}
