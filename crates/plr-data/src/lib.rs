pub mod cache;
pub mod loader;
pub mod mnist;
pub mod providers;
pub mod sources;

pub use cache::*;
pub use loader::*;
pub use mnist::*;
pub use providers::*;
pub use sources::*;

use plr_types::PlrResult;
use std::path::{Path, PathBuf};

/// Data manager coordinates cache and providers for the MNIST files
#[derive(Debug)]
pub struct DataManager {
    pub cache: cache::CacheManager,
    pub providers: Vec<Box<dyn providers::DatasetProvider>>,
}

impl DataManager {
    /// Default cache root: the platform cache directory
    pub fn default_data_dir() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("plr")
            .join("data")
    }

    /// Manager over `data_dir` with the public HTTP mirrors as provider
    pub fn new<P: AsRef<Path>>(data_dir: P) -> PlrResult<Self> {
        let mut manager = Self::offline(data_dir)?;
        manager.add_provider(Box::new(providers::HttpMirrorProvider::new(
            sources::DataSourceConfig::default(),
        )?));
        Ok(manager)
    }

    /// Manager with no providers; only already-cached files can be loaded
    pub fn offline<P: AsRef<Path>>(data_dir: P) -> PlrResult<Self> {
        Ok(Self {
            cache: cache::CacheManager::new(data_dir)?,
            providers: Vec::new(),
        })
    }

    pub fn add_provider(&mut self, provider: Box<dyn providers::DatasetProvider>) {
        self.providers.push(provider);
    }

    /// Bytes of `file`, from cache or the first provider that has it
    pub fn fetch_file(&mut self, file: MnistFile) -> PlrResult<Vec<u8>> {
        // Check cache first
        if let Some(bytes) = self.cache.get(file)? {
            return Ok(bytes);
        }

        let mut last_error = None;
        for provider in &self.providers {
            match provider.fetch(file) {
                Ok(bytes) => {
                    self.cache.store(file, &bytes)?;
                    return Ok(bytes);
                }
                Err(e) => {
                    tracing::warn!("Provider {} could not supply {}: {}", provider.name(), file, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            plr_types::DataError::SourceNotFound(self.cache.path_for(file).to_string_lossy().to_string())
                .into()
        }))
    }

    /// Load and decode one split
    pub fn load(&mut self, split: Split) -> PlrResult<MnistDataset> {
        let images = self.fetch_file(split.images())?;
        let labels = self.fetch_file(split.labels())?;
        let dataset = MnistDataset::from_bytes(split, &images, &labels)?;

        tracing::info!("Loaded {} {} images", dataset.len(), split);
        Ok(dataset)
    }
}
