use burn::prelude::*;
use burn::record::CompactRecorder;
use plr_types::{PlrResult, TrainingError};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::model::Net;

/// Saves trained weights under `<results>/checkpoints/`
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new<P: AsRef<Path>>(results_dir: P) -> PlrResult<Self> {
        let dir = results_dir.as_ref().join("checkpoints");
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path stem for a trial; the recorder adds its own extension.
    pub fn stem_for(&self, trial_number: usize) -> PathBuf {
        self.dir.join(format!("mnist_cnn_trial_{trial_number}"))
    }

    pub fn save<B: Backend>(&self, model: Net<B>, trial_number: usize) -> PlrResult<PathBuf> {
        let stem = self.stem_for(trial_number);
        model
            .save_file(stem.clone(), &CompactRecorder::new())
            .map_err(|e| TrainingError::Checkpoint {
                message: format!("saving {}: {}", stem.display(), e),
            })?;
        info!("Saved trial {} weights to {}", trial_number, stem.display());
        Ok(stem)
    }
}
