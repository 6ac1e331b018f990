use plr_types::PlrResult;
use std::path::{Path, PathBuf};

use crate::sources::MnistFile;

/// On-disk cache of the raw gzipped files, laid out as `<root>/MNIST/raw/<file>`
#[derive(Debug)]
pub struct CacheManager {
    root: PathBuf,
    stats: CacheStats,
}

impl CacheManager {
    pub fn new<P: AsRef<Path>>(root: P) -> PlrResult<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(root.join("MNIST").join("raw"))?;

        Ok(Self {
            root,
            stats: CacheStats::default(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.root.join("MNIST").join("raw")
    }

    pub fn path_for(&self, file: MnistFile) -> PathBuf {
        self.raw_dir().join(file.file_name())
    }

    /// Read a cached file, `None` on miss. Empty files count as a miss so an
    /// interrupted download gets retried.
    pub fn get(&mut self, file: MnistFile) -> PlrResult<Option<Vec<u8>>> {
        let path = self.path_for(file);

        if self.contains(file) {
            self.stats.hits += 1;
            tracing::debug!("Cache hit: {}", path.display());
            return Ok(Some(std::fs::read(&path)?));
        }

        self.stats.misses += 1;
        Ok(None)
    }

    /// Store a downloaded file. Written to a temporary name then renamed so a
    /// partial write never looks like a valid cache entry.
    pub fn store(&mut self, file: MnistFile, bytes: &[u8]) -> PlrResult<PathBuf> {
        let path = self.path_for(file);
        let tmp = path.with_extension("part");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &path)?;

        self.stats.stores += 1;
        self.stats.bytes_stored += bytes.len() as u64;
        tracing::debug!("Cached {} bytes at {}", bytes.len(), path.display());

        Ok(path)
    }

    /// A non-empty file is cached under `file`'s name
    pub fn contains(&self, file: MnistFile) -> bool {
        std::fs::metadata(self.path_for(file))
            .map(|m| m.len() > 0)
            .unwrap_or(false)
    }

    pub fn get_stats(&self) -> CacheStats {
        self.stats.clone()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub stores: u64,
    pub bytes_stored: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        if self.hits + self.misses == 0 {
            0.0
        } else {
            self.hits as f64 / (self.hits + self.misses) as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_basic_operations() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = CacheManager::new(dir.path()).unwrap();

        assert!(cache.get(MnistFile::TrainLabels).unwrap().is_none());

        let path = cache.store(MnistFile::TrainLabels, b"payload").unwrap();
        assert!(path.ends_with("MNIST/raw/train-labels-idx1-ubyte.gz"));
        assert!(cache.contains(MnistFile::TrainLabels));

        let cached = cache.get(MnistFile::TrainLabels).unwrap();
        assert_eq!(cached.as_deref(), Some(&b"payload"[..]));

        let stats = cache.get_stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.stores, 1);
        assert_eq!(stats.bytes_stored, 7);
        assert!((stats.hit_rate() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn empty_file_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = CacheManager::new(dir.path()).unwrap();
        std::fs::write(cache.path_for(MnistFile::TestImages), b"").unwrap();

        assert!(!cache.contains(MnistFile::TestImages));
        assert!(cache.get(MnistFile::TestImages).unwrap().is_none());
    }
}
