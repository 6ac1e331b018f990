// MNIST experiment: datasets loaded once, then a hyperparameter study over
// fresh models, each trial reporting into the same tracked run.

use burn::backend::ndarray::NdArrayDevice;
use burn::backend::{Autodiff, NdArray};
use burn::tensor::backend::AutodiffBackend;
use plr_data::{DataLoader, DataManager, LoaderConfig, MnistDataset, Split};
use plr_optimizer::{
    format_params, GridSearch, ObjectiveDirection, ParameterSet, SamplerKind, Study, StudyConfig,
};
use plr_tracking::Run;
use plr_types::{PlrResult, TrainingConfig};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::checkpoint::CheckpointStore;
use crate::device::Accelerator;
use crate::objective::{search_space, MnistObjective};
use crate::train::{EpochSettings, Trainer};

pub const TRIALS_CSV: &str = "trials.csv";

/// Outcome of a finished study
#[derive(Debug, Clone, PartialEq)]
pub struct SearchReport {
    pub best_trial: usize,
    pub best_value: f64,
    pub best_params: ParameterSet,
    pub completed: usize,
    pub failed: usize,
    pub trials_csv: PathBuf,
}

impl fmt::Display for SearchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Best trial:")?;
        writeln!(f, "  Value: {}", self.best_value)?;
        writeln!(f, "  Params: ")?;
        for (key, value) in &self.best_params {
            writeln!(f, "    {key}: {value}")?;
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct Experiment {
    config: TrainingConfig,
    accelerator: Accelerator,
    train: Arc<MnistDataset>,
    test: Arc<MnistDataset>,
}

impl Experiment {
    /// Validate `config` and fetch (or read from cache) both MNIST splits
    pub fn new(config: TrainingConfig, accelerator: Accelerator) -> PlrResult<Self> {
        config.validate()?;

        let data_dir = config
            .data_dir
            .clone()
            .unwrap_or_else(DataManager::default_data_dir);
        info!("Using MNIST cache at {}", data_dir.display());

        let mut manager = DataManager::new(&data_dir)?;
        let train = manager.load(Split::Train)?;
        let test = manager.load(Split::Test)?;

        Self::from_datasets(config, accelerator, Arc::new(train), Arc::new(test))
    }

    pub fn from_datasets(
        config: TrainingConfig,
        accelerator: Accelerator,
        train: Arc<MnistDataset>,
        test: Arc<MnistDataset>,
    ) -> PlrResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            accelerator,
            train,
            test,
        })
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn accelerator(&self) -> Accelerator {
        self.accelerator
    }

    /// Run the study on the selected device
    pub fn run_selected(&self, run: &mut Run) -> PlrResult<SearchReport> {
        info!("Training on {}", self.accelerator);
        match self.accelerator {
            Accelerator::Gpu => self.run_gpu(run),
            Accelerator::Cpu => self.run::<Autodiff<NdArray>>(NdArrayDevice::Cpu, run),
        }
    }

    #[cfg(feature = "gpu")]
    fn run_gpu(&self, run: &mut Run) -> PlrResult<SearchReport> {
        use burn::backend::wgpu::WgpuDevice;
        use burn::backend::Wgpu;
        self.run::<Autodiff<Wgpu>>(WgpuDevice::default(), run)
    }

    #[cfg(not(feature = "gpu"))]
    fn run_gpu(&self, run: &mut Run) -> PlrResult<SearchReport> {
        self.run::<Autodiff<NdArray>>(NdArrayDevice::Cpu, run)
    }

    /// Seed the backend, build the loaders and run `n_trials` trials.
    ///
    /// The trial table is written to `<results>/trials.csv` even when the
    /// study stops on an error; that error takes precedence over a failed
    /// CSV write.
    pub fn run<B: AutodiffBackend>(&self, device: B::Device, run: &mut Run) -> PlrResult<SearchReport> {
        let cfg = &self.config;
        B::seed(cfg.seed);

        // shuffling only on the accelerator path
        let shuffle = self.accelerator.is_accelerated();
        let train_loader = DataLoader::new(
            self.train.clone(),
            LoaderConfig::new(cfg.batch_size).with_shuffle(shuffle, cfg.seed),
        )?;
        let test_loader = DataLoader::new(
            self.test.clone(),
            LoaderConfig::new(cfg.test_batch_size).with_shuffle(shuffle, cfg.seed),
        )?;

        let trainer = Trainer::<B>::new(
            device,
            EpochSettings {
                log_interval: cfg.log_interval,
                dry_run: cfg.dry_run,
            },
        );
        let mut objective = MnistObjective::new(trainer, cfg.epochs, train_loader, test_loader)?;
        if cfg.save_model {
            objective = objective.with_checkpoints(CheckpointStore::new(&cfg.results_dir)?);
        }

        let sampler: SamplerKind = cfg.sampler.parse()?;
        let space = search_space();
        let grid_steps = GridSearch::steps_for_budget(&space, cfg.n_trials);
        let study_config = StudyConfig::new("mnist-cnn", space, sampler)
            .with_seed(cfg.seed)
            .with_objective("test_loss", ObjectiveDirection::Minimize)
            .with_grid_steps(grid_steps);
        let mut study = Study::create(study_config)?;

        info!(
            "Starting {} trials with the {} sampler",
            cfg.n_trials, sampler
        );
        let outcome = study.optimize(|trial| objective.evaluate(trial, run), cfg.n_trials);

        let trials_csv = cfg.results_dir.join(TRIALS_CSV);
        let written = study.write_csv(&trials_csv);
        if let Err(e) = outcome {
            if let Err(csv_error) = written {
                warn!("Could not write {}: {}", trials_csv.display(), csv_error);
            }
            return Err(e);
        }
        written?;

        let best = study.best_trial()?;
        let report = SearchReport {
            best_trial: best.number,
            best_value: study.best_value()?,
            best_params: best.parameters.clone(),
            completed: study.status().trials_completed,
            failed: study.status().trials_failed,
            trials_csv,
        };
        info!(
            "Best is trial {} with value {} and parameters {}",
            report.best_trial,
            report.best_value,
            format_params(&report.best_params)
        );
        Ok(report)
    }
}
