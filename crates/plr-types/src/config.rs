use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::errors::{PlrError, PlrResult};

/// Default tracking project name
pub const DEFAULT_PROJECT: &str = "plr-project";

/// Full configuration of a training + search session.
///
/// This is what gets recorded as the run configuration in the tracker, so
/// every field is serialisable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub batch_size: usize,
    pub test_batch_size: usize,
    pub epochs: usize,
    /// Step-decay gamma given on the command line. The search samples its own
    /// gamma per trial; this value is kept for the run record.
    pub gamma: f64,
    pub no_cuda: bool,
    pub dry_run: bool,
    pub seed: u64,
    pub log_interval: usize,
    pub save_model: bool,
    pub n_trials: usize,
    pub sampler: String,
    pub project: String,
    pub results_dir: PathBuf,
    pub data_dir: Option<PathBuf>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            batch_size: 64,
            test_batch_size: 1000,
            epochs: 2,
            gamma: 0.7,
            no_cuda: false,
            dry_run: false,
            seed: 1,
            log_interval: 10,
            save_model: false,
            n_trials: 5,
            sampler: "tpe".to_string(),
            project: DEFAULT_PROJECT.to_string(),
            results_dir: PathBuf::from("results"),
            data_dir: None,
        }
    }
}

impl TrainingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batch_sizes(mut self, train: usize, test: usize) -> Self {
        self.batch_size = train;
        self.test_batch_size = test;
        self
    }

    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_log_interval(mut self, interval: usize) -> Self {
        self.log_interval = interval;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_trials(mut self, n_trials: usize) -> Self {
        self.n_trials = n_trials;
        self
    }

    pub fn with_results_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.results_dir = dir.into();
        self
    }

    /// Reject configurations the training loop cannot run.
    pub fn validate(&self) -> PlrResult<()> {
        if self.batch_size == 0 || self.test_batch_size == 0 {
            return Err(PlrError::Validation("batch sizes must be positive".to_string()));
        }
        if self.epochs == 0 {
            return Err(PlrError::Validation(
                "at least one epoch is required to produce a test loss".to_string(),
            ));
        }
        if self.log_interval == 0 {
            return Err(PlrError::Validation("log interval must be positive".to_string()));
        }
        if self.n_trials == 0 {
            return Err(PlrError::Validation("at least one trial is required".to_string()));
        }
        if !(self.gamma > 0.0 && self.gamma <= 1.0) {
            return Err(PlrError::Validation(format!(
                "gamma must be in (0, 1], got {}",
                self.gamma
            )));
        }
        if self.project.trim().is_empty() {
            return Err(PlrError::Config("project name is empty".to_string()));
        }
        Ok(())
    }

    /// Configuration as a JSON object for the run record.
    pub fn to_json(&self) -> PlrResult<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}
