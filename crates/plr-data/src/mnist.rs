//! IDX decoding and the in-memory MNIST dataset.

use flate2::read::GzDecoder;
use plr_types::{DataError, PlrResult};
use rayon::prelude::*;
use std::io::Read;

use crate::sources::Split;

/// Per-channel mean of the MNIST training pixels (after scaling to [0, 1])
pub const MNIST_MEAN: f32 = 0.1307;
/// Per-channel standard deviation of the MNIST training pixels
pub const MNIST_STD: f32 = 0.3081;
pub const IMAGE_ROWS: usize = 28;
pub const IMAGE_COLS: usize = 28;
pub const NUM_CLASSES: usize = 10;

const IDX_IMAGES_MAGIC: u32 = 0x0000_0803;
const IDX_LABELS_MAGIC: u32 = 0x0000_0801;
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Decompress gzip payloads; anything else passes through untouched.
pub fn maybe_gunzip(bytes: &[u8]) -> PlrResult<Vec<u8>> {
    if !bytes.starts_with(&GZIP_MAGIC) {
        return Ok(bytes.to_vec());
    }

    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| DataError::Corruption {
            message: format!("gzip decompression failed: {}", e),
        })?;
    Ok(out)
}

fn read_u32(bytes: &[u8], offset: usize) -> PlrResult<u32> {
    bytes
        .get(offset..offset + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| {
            DataError::InvalidFormat {
                message: format!("IDX header truncated at byte {}", offset),
            }
            .into()
        })
}

/// The classifier only accepts 28x28 inputs
fn check_dims(rows: usize, cols: usize) -> PlrResult<()> {
    if rows != IMAGE_ROWS || cols != IMAGE_COLS {
        return Err(DataError::InvalidFormat {
            message: format!(
                "images are {}x{}, expected {}x{}",
                rows, cols, IMAGE_ROWS, IMAGE_COLS
            ),
        }
        .into());
    }
    Ok(())
}

/// Raw image block decoded from an IDX3 file
#[derive(Debug, Clone, PartialEq)]
pub struct IdxImages {
    pub count: usize,
    pub rows: usize,
    pub cols: usize,
    pub pixels: Vec<u8>,
}

pub fn decode_images(bytes: &[u8]) -> PlrResult<IdxImages> {
    let magic = read_u32(bytes, 0)?;
    if magic != IDX_IMAGES_MAGIC {
        return Err(DataError::InvalidFormat {
            message: format!("bad image magic {:#010x}, expected {:#010x}", magic, IDX_IMAGES_MAGIC),
        }
        .into());
    }

    let count = read_u32(bytes, 4)? as usize;
    let rows = read_u32(bytes, 8)? as usize;
    let cols = read_u32(bytes, 12)? as usize;
    check_dims(rows, cols)?;
    let expected = count
        .checked_mul(rows)
        .and_then(|n| n.checked_mul(cols))
        .ok_or_else(|| DataError::InvalidFormat {
            message: format!("image header {}x{}x{} overflows", count, rows, cols),
        })?;
    let payload = &bytes[16..];

    if payload.len() != expected {
        return Err(DataError::Corruption {
            message: format!(
                "image payload has {} bytes, header announces {}x{}x{} = {}",
                payload.len(),
                count,
                rows,
                cols,
                expected
            ),
        }
        .into());
    }

    Ok(IdxImages {
        count,
        rows,
        cols,
        pixels: payload.to_vec(),
    })
}

pub fn decode_labels(bytes: &[u8]) -> PlrResult<Vec<u8>> {
    let magic = read_u32(bytes, 0)?;
    if magic != IDX_LABELS_MAGIC {
        return Err(DataError::InvalidFormat {
            message: format!("bad label magic {:#010x}, expected {:#010x}", magic, IDX_LABELS_MAGIC),
        }
        .into());
    }

    let count = read_u32(bytes, 4)? as usize;
    let payload = &bytes[8..];
    if payload.len() != count {
        return Err(DataError::Corruption {
            message: format!("label payload has {} bytes, header announces {}", payload.len(), count),
        }
        .into());
    }

    if let Some(bad) = payload.iter().find(|&&l| l as usize >= NUM_CLASSES) {
        return Err(DataError::Corruption {
            message: format!("label {} outside 0..{}", bad, NUM_CLASSES),
        }
        .into());
    }

    Ok(payload.to_vec())
}

/// Normalised images plus labels for one split. Built once and shared
/// read-only by every loader and trial.
#[derive(Debug, Clone)]
pub struct MnistDataset {
    split: Split,
    rows: usize,
    cols: usize,
    images: Vec<f32>,
    labels: Vec<u8>,
}

impl MnistDataset {
    /// Build from decoded IDX blocks, scaling pixels to [0, 1] and applying
    /// the mean/std normalisation.
    pub fn from_idx(split: Split, images: IdxImages, labels: Vec<u8>) -> PlrResult<Self> {
        if images.count != labels.len() {
            return Err(DataError::LengthMismatch {
                images: images.count,
                labels: labels.len(),
            }
            .into());
        }
        check_dims(images.rows, images.cols)?;
        if images.pixels.len() != images.count * IMAGE_ROWS * IMAGE_COLS {
            return Err(DataError::Corruption {
                message: format!(
                    "{} pixels for {} images of {}x{}",
                    images.pixels.len(),
                    images.count,
                    IMAGE_ROWS,
                    IMAGE_COLS
                ),
            }
            .into());
        }
        if images.count == 0 {
            return Err(DataError::EmptyDataset {
                split: split.to_string(),
            }
            .into());
        }

        let normalised: Vec<f32> = images
            .pixels
            .par_iter()
            .map(|&p| (p as f32 / 255.0 - MNIST_MEAN) / MNIST_STD)
            .collect();

        Ok(Self {
            split,
            rows: images.rows,
            cols: images.cols,
            images: normalised,
            labels,
        })
    }

    /// Decode a pair of (optionally gzipped) IDX files
    pub fn from_bytes(split: Split, image_bytes: &[u8], label_bytes: &[u8]) -> PlrResult<Self> {
        let images = decode_images(&maybe_gunzip(image_bytes)?)?;
        let labels = decode_labels(&maybe_gunzip(label_bytes)?)?;
        Self::from_idx(split, images, labels)
    }

    pub fn split(&self) -> Split {
        self.split
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn dims(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn pixels_per_image(&self) -> usize {
        self.rows * self.cols
    }

    pub fn image(&self, index: usize) -> Option<&[f32]> {
        let size = self.pixels_per_image();
        self.images.get(index * size..(index + 1) * size)
    }

    pub fn label(&self, index: usize) -> Option<u8> {
        self.labels.get(index).copied()
    }
}
