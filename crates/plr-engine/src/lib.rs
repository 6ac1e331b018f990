// MNIST CNN training with hyperparameter search and experiment tracking

pub mod batcher;
pub mod checkpoint;
pub mod device;
pub mod experiment;
pub mod model;
pub mod objective;
pub mod scheduler;
pub mod train;

pub use batcher::MnistBatch;
pub use checkpoint::CheckpointStore;
pub use device::Accelerator;
pub use experiment::{Experiment, SearchReport, TRIALS_CSV};
pub use model::{Net, NetConfig};
pub use objective::{search_space, MnistObjective};
pub use scheduler::StepLr;
pub use train::{EpochSettings, TrainOutcome, Trainer};
