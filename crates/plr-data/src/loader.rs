//! Mini-batch iteration over an [`MnistDataset`].

use plr_types::{PlrError, PlrResult};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::mnist::MnistDataset;

/// Loader settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoaderConfig {
    pub batch_size: usize,
    pub shuffle: bool,
    pub seed: u64,
}

impl LoaderConfig {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size,
            shuffle: false,
            seed: 0,
        }
    }

    pub fn with_shuffle(mut self, shuffle: bool, seed: u64) -> Self {
        self.shuffle = shuffle;
        self.seed = seed;
        self
    }
}

/// One mini-batch in plain host memory, ready for conversion into tensors
#[derive(Debug, Clone, PartialEq)]
pub struct MnistBatchData {
    /// `len * rows * cols` normalised pixels, row-major per image
    pub images: Vec<f32>,
    pub labels: Vec<i64>,
    pub rows: usize,
    pub cols: usize,
}

impl MnistBatchData {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Sequential batch loader. The last batch may be shorter than `batch_size`.
#[derive(Debug)]
pub struct DataLoader {
    dataset: Arc<MnistDataset>,
    config: LoaderConfig,
    order: Vec<usize>,
    rng: ChaCha8Rng,
}

impl DataLoader {
    pub fn new(dataset: Arc<MnistDataset>, config: LoaderConfig) -> PlrResult<Self> {
        if config.batch_size == 0 {
            return Err(PlrError::Validation("batch size must be positive".to_string()));
        }

        let order = (0..dataset.len()).collect();
        let rng = ChaCha8Rng::seed_from_u64(config.seed);

        Ok(Self {
            dataset,
            config,
            order,
            rng,
        })
    }

    pub fn dataset(&self) -> &MnistDataset {
        &self.dataset
    }

    /// Number of samples in the underlying dataset
    pub fn dataset_len(&self) -> usize {
        self.dataset.len()
    }

    pub fn batch_size(&self) -> usize {
        self.config.batch_size
    }

    pub fn num_batches(&self) -> usize {
        self.dataset.len().div_ceil(self.config.batch_size)
    }

    /// Start a pass over the data, reshuffling first when enabled.
    pub fn iter(&mut self) -> BatchIter<'_> {
        if self.config.shuffle {
            self.order.shuffle(&mut self.rng);
        }
        BatchIter {
            dataset: &self.dataset,
            order: &self.order,
            batch_size: self.config.batch_size,
            cursor: 0,
        }
    }
}

/// Iterator over the batches of one pass
#[derive(Debug)]
pub struct BatchIter<'a> {
    dataset: &'a MnistDataset,
    order: &'a [usize],
    batch_size: usize,
    cursor: usize,
}

impl Iterator for BatchIter<'_> {
    type Item = MnistBatchData;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.order.len() {
            return None;
        }

        let end = (self.cursor + self.batch_size).min(self.order.len());
        let indices = &self.order[self.cursor..end];
        self.cursor = end;

        let (rows, cols) = self.dataset.dims();
        let mut images = Vec::with_capacity(indices.len() * rows * cols);
        let mut labels = Vec::with_capacity(indices.len());

        for &i in indices {
            if let (Some(image), Some(label)) = (self.dataset.image(i), self.dataset.label(i)) {
                images.extend_from_slice(image);
                labels.push(label as i64);
            }
        }

        Some(MnistBatchData {
            images,
            labels,
            rows,
            cols,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.order.len() - self.cursor).div_ceil(self.batch_size);
        (remaining, Some(remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mnist::IdxImages;
    use crate::sources::Split;

    fn dataset(n: usize) -> Arc<MnistDataset> {
        let pixels: Vec<u8> = (0..n).flat_map(|i| std::iter::repeat(i as u8).take(28 * 28)).collect();
        let labels: Vec<u8> = (0..n).map(|i| (i % 10) as u8).collect();
        let images = IdxImages {
            count: n,
            rows: 28,
            cols: 28,
            pixels,
        };
        Arc::new(MnistDataset::from_idx(Split::Train, images, labels).unwrap())
    }

    #[test]
    fn batches_cover_dataset_with_short_tail() {
        let mut loader = DataLoader::new(dataset(10), LoaderConfig::new(4)).unwrap();
        assert_eq!(loader.num_batches(), 3);

        let sizes: Vec<usize> = loader.iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
    }

    #[test]
    fn unshuffled_order_is_sequential() {
        let mut loader = DataLoader::new(dataset(5), LoaderConfig::new(5)).unwrap();
        let batch = loader.iter().next().unwrap();
        assert_eq!(batch.labels, vec![0, 1, 2, 3, 4]);
        assert_eq!(batch.images.len(), 5 * 28 * 28);
        assert_eq!((batch.rows, batch.cols), (28, 28));
    }

    #[test]
    fn shuffle_is_seeded_and_complete() {
        let config = LoaderConfig::new(20).with_shuffle(true, 42);
        let mut a = DataLoader::new(dataset(20), config.clone()).unwrap();
        let mut b = DataLoader::new(dataset(20), config).unwrap();

        let first_a = a.iter().next().unwrap().labels;
        let first_b = b.iter().next().unwrap().labels;
        assert_eq!(first_a, first_b);

        let mut sorted = first_a.clone();
        sorted.sort();
        let mut expected: Vec<i64> = (0..20).map(|i| i % 10).collect();
        expected.sort();
        assert_eq!(sorted, expected);
    }

    #[test]
    fn size_hint_counts_remaining_batches() {
        let mut loader = DataLoader::new(dataset(9), LoaderConfig::new(4)).unwrap();
        let mut iter = loader.iter();
        assert_eq!(iter.size_hint(), (3, Some(3)));
        iter.next();
        assert_eq!(iter.size_hint(), (2, Some(2)));
    }

    #[test]
    fn zero_batch_size_rejected() {
        assert!(DataLoader::new(dataset(3), LoaderConfig::new(0)).is_err());
    }
}
