//! The search objective: train a fresh network for a sampled `(lr, gamma)`
//! and return its final test loss.

use burn::optim::AdamConfig;
use burn::tensor::backend::AutodiffBackend;
use plr_data::DataLoader;
use plr_optimizer::{SearchSpace, Trial};
use plr_tracking::Run;
use plr_types::{PlrError, PlrResult, TrainingError};
use tracing::{info, warn};

use crate::checkpoint::CheckpointStore;
use crate::model::{Net, NetConfig};
use crate::scheduler::StepLr;
use crate::train::Trainer;

pub const LR_RANGE: (f64, f64) = (1e-4, 1e-1);
pub const GAMMA_RANGE: (f64, f64) = (0.5, 0.9);

/// `lr` log-uniform in [1e-4, 1e-1], `gamma` uniform in [0.5, 0.9]
pub fn search_space() -> SearchSpace {
    SearchSpace::new()
        .add_log_uniform("lr", LR_RANGE.0, LR_RANGE.1)
        .add_float("gamma", GAMMA_RANGE.0, GAMMA_RANGE.1)
}

#[derive(Debug)]
pub struct MnistObjective<B: AutodiffBackend> {
    trainer: Trainer<B>,
    net: NetConfig,
    epochs: usize,
    train_loader: DataLoader,
    test_loader: DataLoader,
    checkpoints: Option<CheckpointStore>,
}

impl<B: AutodiffBackend> MnistObjective<B> {
    pub fn new(
        trainer: Trainer<B>,
        epochs: usize,
        train_loader: DataLoader,
        test_loader: DataLoader,
    ) -> PlrResult<Self> {
        if epochs == 0 {
            return Err(PlrError::Validation(
                "at least one epoch is required to produce a test loss".to_string(),
            ));
        }
        Ok(Self {
            trainer,
            net: NetConfig::new(),
            epochs,
            train_loader,
            test_loader,
            checkpoints: None,
        })
    }

    /// Save each trial's trained weights into `store`
    pub fn with_checkpoints(mut self, store: CheckpointStore) -> Self {
        self.checkpoints = Some(store);
        self
    }

    /// Train and evaluate for `trial`'s parameters.
    ///
    /// A diverging trial (non-finite training loss) yields `NaN` so the study
    /// records it as failed; every other error is returned.
    pub fn evaluate(&mut self, trial: &Trial, run: &mut Run) -> PlrResult<f64> {
        let lr = trial.float("lr")?;
        let gamma = trial.float("gamma")?;
        info!("Trial {}: lr={:.6}, gamma={:.4}", trial.number, lr, gamma);

        let mut model: Net<B> = self.net.init(self.trainer.device());
        let mut optim = AdamConfig::new().init::<B, Net<B>>();
        let mut scheduler = StepLr::new(lr, gamma);
        let mut test_loss = None;

        for epoch in 0..self.epochs {
            let trained = self.trainer.train_epoch(
                model,
                &mut optim,
                scheduler.lr(),
                &mut self.train_loader,
                epoch,
                run,
            );
            model = match trained {
                Ok((model, _)) => model,
                Err(e @ PlrError::Training(TrainingError::NonFiniteLoss { .. })) => {
                    warn!("Trial {} diverged: {}", trial.number, e);
                    return Ok(f64::NAN);
                }
                Err(e) => return Err(e),
            };

            let summary = self
                .trainer
                .evaluate(&model, &mut self.test_loader, epoch, run)?;
            test_loss = Some(summary.average_loss);
            scheduler.step();
        }

        if let Some(store) = &self.checkpoints {
            store.save(model, trial.number)?;
        }

        test_loss.ok_or_else(|| TrainingError::EmptyEvaluation.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::train::tests::{loader, memory_run, synthetic, TestBackend};
    use crate::train::EpochSettings;
    use burn::backend::ndarray::NdArrayDevice;
    use plr_data::Split;
    use plr_optimizer::{ParameterSet, ParameterValue};

    fn objective(epochs: usize) -> MnistObjective<TestBackend> {
        let trainer = Trainer::<TestBackend>::new(
            NdArrayDevice::Cpu,
            EpochSettings {
                log_interval: 1,
                dry_run: true,
            },
        );
        MnistObjective::new(
            trainer,
            epochs,
            loader(synthetic(Split::Train, 16), 8),
            loader(synthetic(Split::Test, 10), 5),
        )
        .unwrap()
    }

    fn trial(lr: f64, gamma: f64) -> Trial {
        let mut params = ParameterSet::new();
        params.insert("lr".into(), ParameterValue::Float(lr));
        params.insert("gamma".into(), ParameterValue::Float(gamma));
        Trial::new(uuid_nil(), 0, params)
    }

    fn uuid_nil() -> plr_optimizer::StudyId {
        plr_optimizer::StudyId::nil()
    }

    #[test]
    fn returns_final_test_loss() {
        let mut objective = objective(2);
        let (backend, mut run) = memory_run();

        let loss = objective.evaluate(&trial(1e-3, 0.7), &mut run).unwrap();
        assert!(loss.is_finite());
        assert!(loss >= 0.0);

        // per epoch: one train row (dry run) and one test row
        let history = backend.record().history;
        assert_eq!(history.len(), 4);
        assert_eq!(history[3]["test_loss"].as_f64().unwrap(), loss);
        assert_eq!(history[3]["epoch"], 1);
    }

    #[test]
    fn zero_epochs_rejected() {
        let trainer = Trainer::<TestBackend>::new(NdArrayDevice::Cpu, EpochSettings::default());
        let result = MnistObjective::new(
            trainer,
            0,
            loader(synthetic(Split::Train, 4), 4),
            loader(synthetic(Split::Test, 4), 4),
        );
        assert!(result.is_err());
    }

    #[test]
    fn missing_parameter_is_an_error() {
        let mut objective = objective(1);
        let (_, mut run) = memory_run();
        let bare = Trial::new(uuid_nil(), 0, ParameterSet::new());
        assert!(objective.evaluate(&bare, &mut run).is_err());
    }

    #[test]
    fn checkpoints_saved_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path()).unwrap();
        let mut objective = objective(1).with_checkpoints(store.clone());
        let (_, mut run) = memory_run();

        objective.evaluate(&trial(1e-3, 0.7), &mut run).unwrap();
        let saved = std::fs::read_dir(store.dir()).unwrap().count();
        assert_eq!(saved, 1);
    }

    #[test]
    fn search_space_bounds() {
        let space = search_space();
        assert!(space.validate().is_ok());
        assert!(space.get("lr").is_some());
        assert!(space.get("gamma").is_some());
    }
}
