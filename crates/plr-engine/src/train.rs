//! Training and evaluation epochs.

use burn::module::AutodiffModule;
use burn::optim::{GradientsParams, Optimizer};
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::ElementConversion;
use plr_data::DataLoader;
use plr_tracking::Run;
use plr_types::{PlrResult, TestSummary, TrainProgress, TrainingError};
use serde_json::json;
use tracing::info;

use crate::batcher::MnistBatch;
use crate::model::{correct_predictions, nll_loss, Net, Reduction};

/// Per-epoch logging behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochSettings {
    /// Batches between progress lines
    pub log_interval: usize,
    /// Stop after the first logged batch
    pub dry_run: bool,
}

impl Default for EpochSettings {
    fn default() -> Self {
        Self {
            log_interval: 10,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainOutcome {
    /// Optimiser steps taken
    pub batches: usize,
    pub last_loss: Option<f64>,
}

/// Runs epochs for one device
#[derive(Debug, Clone)]
pub struct Trainer<B: AutodiffBackend> {
    device: B::Device,
    settings: EpochSettings,
}

impl<B: AutodiffBackend> Trainer<B> {
    pub fn new(device: B::Device, settings: EpochSettings) -> Self {
        Self { device, settings }
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    /// One pass over `loader` with Adam steps at `lr`.
    ///
    /// Every `log_interval` batches the loss is logged and recorded as
    /// `{epoch, train_loss}`. Returns the updated model.
    pub fn train_epoch<O>(
        &self,
        mut model: Net<B>,
        optim: &mut O,
        lr: f64,
        loader: &mut DataLoader,
        epoch: usize,
        run: &mut Run,
    ) -> PlrResult<(Net<B>, TrainOutcome)>
    where
        O: Optimizer<Net<B>, B>,
    {
        let num_batches = loader.num_batches();
        let dataset_len = loader.dataset_len();
        let mut outcome = TrainOutcome::default();

        for (batch_idx, data) in loader.iter().enumerate() {
            let batch = MnistBatch::<B>::from_host(data, &self.device);
            let batch_len = batch.len();

            let output = model.forward(batch.images);
            let loss = nll_loss(output, batch.targets, Reduction::Mean);
            let loss_value: f64 = loss.clone().into_scalar().elem();
            if !loss_value.is_finite() {
                return Err(TrainingError::NonFiniteLoss {
                    epoch,
                    batch: batch_idx,
                    value: loss_value,
                }
                .into());
            }

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optim.step(lr, model, grads);
            outcome.batches += 1;
            outcome.last_loss = Some(loss_value);

            if batch_idx % self.settings.log_interval == 0 {
                let progress = TrainProgress {
                    epoch,
                    batch_idx,
                    num_batches,
                    samples_seen: batch_idx * batch_len,
                    dataset_len,
                    loss: loss_value,
                };
                info!("{}", progress);
                run.log(json!({ "epoch": epoch, "train_loss": loss_value }))?;

                if self.settings.dry_run {
                    break;
                }
            }
        }

        Ok((model, outcome))
    }

    /// Evaluate without gradient tracking (dropout disabled).
    ///
    /// The average loss is the summed NLL over the whole test set divided by
    /// its size. Records `{test_loss, epoch}`.
    pub fn test_epoch(
        &self,
        model: &Net<B::InnerBackend>,
        loader: &mut DataLoader,
        epoch: usize,
        run: &mut Run,
    ) -> PlrResult<TestSummary> {
        let mut total_loss = 0.0;
        let mut correct = 0;
        let mut seen = 0;

        for data in loader.iter() {
            let batch = MnistBatch::<B::InnerBackend>::from_host(data, &self.device);
            seen += batch.len();

            let output = model.forward(batch.images);
            let loss: f64 = nll_loss(output.clone(), batch.targets.clone(), Reduction::Sum)
                .into_scalar()
                .elem();
            total_loss += loss;
            correct += correct_predictions(output, batch.targets);
        }

        if seen == 0 {
            return Err(TrainingError::EmptyEvaluation.into());
        }

        let summary = TestSummary {
            epoch,
            average_loss: total_loss / seen as f64,
            correct,
            total: seen,
        };
        info!("{}", summary);
        run.log(json!({ "test_loss": summary.average_loss, "epoch": epoch }))?;
        Ok(summary)
    }

    /// Evaluate an autodiff model through its inference copy
    pub fn evaluate(
        &self,
        model: &Net<B>,
        loader: &mut DataLoader,
        epoch: usize,
        run: &mut Run,
    ) -> PlrResult<TestSummary> {
        self.test_epoch(&model.valid(), loader, epoch, run)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model::NetConfig;
    use burn::backend::ndarray::NdArrayDevice;
    use burn::backend::{Autodiff, NdArray};
    use burn::optim::AdamConfig;
    use burn::tensor::backend::Backend;
    use plr_data::{IdxImages, LoaderConfig, MnistDataset, Split};
    use plr_tracking::{MemoryBackend, RunInit};
    use std::sync::Arc;

    pub(crate) type TestBackend = Autodiff<NdArray<f32>>;

    /// Tiny separable dataset: class k images are filled with a k-dependent
    /// intensity
    pub(crate) fn synthetic(split: Split, count: usize) -> Arc<MnistDataset> {
        let labels: Vec<u8> = (0..count).map(|i| (i % 10) as u8).collect();
        let pixels: Vec<u8> = labels
            .iter()
            .flat_map(|&l| std::iter::repeat(l * 25).take(28 * 28))
            .collect();
        let images = IdxImages {
            count,
            rows: 28,
            cols: 28,
            pixels,
        };
        Arc::new(MnistDataset::from_idx(split, images, labels).unwrap())
    }

    pub(crate) fn loader(dataset: Arc<MnistDataset>, batch: usize) -> DataLoader {
        DataLoader::new(dataset, LoaderConfig::new(batch)).unwrap()
    }

    pub(crate) fn memory_run() -> (MemoryBackend, Run) {
        let backend = MemoryBackend::new();
        let run = Run::init(
            Box::new(backend.clone()),
            RunInit::new("plr-project", json!({})),
        )
        .unwrap();
        (backend, run)
    }

    #[test]
    fn dry_run_executes_one_batch_with_finite_loss() {
        let device = NdArrayDevice::Cpu;
        TestBackend::seed(1);
        let trainer = Trainer::<TestBackend>::new(
            device,
            EpochSettings {
                log_interval: 10,
                dry_run: true,
            },
        );
        let model = NetConfig::new().init::<TestBackend>(&device);
        let mut optim = AdamConfig::new().init::<TestBackend, Net<TestBackend>>();
        let mut train = loader(synthetic(Split::Train, 24), 8);
        let (backend, mut run) = memory_run();

        let (_, outcome) = trainer
            .train_epoch(model, &mut optim, 0.01, &mut train, 0, &mut run)
            .unwrap();

        assert_eq!(outcome.batches, 1);
        assert!(outcome.last_loss.unwrap().is_finite());

        let history = backend.record().history;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0]["epoch"], 0);
        assert!(history[0]["train_loss"].as_f64().unwrap().is_finite());
    }

    #[test]
    fn full_epoch_logs_every_interval() {
        let device = NdArrayDevice::Cpu;
        let trainer = Trainer::<TestBackend>::new(
            device,
            EpochSettings {
                log_interval: 2,
                dry_run: false,
            },
        );
        let model = NetConfig::new().init::<TestBackend>(&device);
        let mut optim = AdamConfig::new().init::<TestBackend, Net<TestBackend>>();
        // 5 batches, the last one short
        let mut train = loader(synthetic(Split::Train, 18), 4);
        let (backend, mut run) = memory_run();

        let (_, outcome) = trainer
            .train_epoch(model, &mut optim, 1e-3, &mut train, 1, &mut run)
            .unwrap();

        assert_eq!(outcome.batches, 5);
        // batches 0, 2 and 4
        assert_eq!(backend.record().history.len(), 3);
    }

    #[test]
    fn evaluation_properties() {
        let device = NdArrayDevice::Cpu;
        let trainer = Trainer::<TestBackend>::new(device, EpochSettings::default());
        let model = NetConfig::new().init::<TestBackend>(&device);
        let mut test = loader(synthetic(Split::Test, 13), 5);
        let (backend, mut run) = memory_run();

        let summary = trainer.evaluate(&model, &mut test, 0, &mut run).unwrap();
        assert!(summary.average_loss >= 0.0);
        assert!(summary.average_loss.is_finite());
        assert!(summary.correct <= summary.total);
        assert_eq!(summary.total, 13);

        let history = backend.record().history;
        assert_eq!(history.len(), 1);
        assert!(history[0].contains_key("test_loss"));
    }
}
