//! plr-train: MNIST CNN training with hyperparameter search.
//!
//! ```bash
//! # five TPE trials of two epochs each, tracked online when WANDB_API_KEY is set
//! plr-train --epochs 2 --n-trials 5
//!
//! # quick smoke run on the CPU without a tracking account
//! WANDB_MODE=offline plr-train --dry-run --no-cuda --n-trials 1
//! ```

use anyhow::Context;
use clap::Parser;
use plr_engine::{Accelerator, Experiment};
use plr_tracking::{default_include, Run, RunInit, TrackingSettings};
use plr_types::TrainingConfig;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "plr-train")]
#[command(version)]
#[command(about = "MNIST CNN training with hyperparameter search and run tracking")]
struct Cli {
    /// Input batch size for training
    #[arg(long, default_value_t = 64)]
    batch_size: usize,

    /// Input batch size for testing
    #[arg(long, default_value_t = 1000)]
    test_batch_size: usize,

    /// Number of epochs to train each trial
    #[arg(long, default_value_t = 2)]
    epochs: usize,

    /// Learning rate step gamma
    #[arg(long, default_value_t = 0.7)]
    gamma: f64,

    /// Disable the GPU backend
    #[arg(long)]
    no_cuda: bool,

    /// Quickly check a single pass
    #[arg(long)]
    dry_run: bool,

    /// Random seed
    #[arg(long, default_value_t = 1)]
    seed: u64,

    /// How many batches to wait before logging training status
    #[arg(long, default_value_t = 10)]
    log_interval: usize,

    /// Save each trial's trained weights
    #[arg(long)]
    save_model: bool,

    /// Number of hyperparameter trials
    #[arg(long, default_value_t = 5)]
    n_trials: usize,

    /// Sampler: tpe, random or grid
    #[arg(long, default_value = "tpe")]
    sampler: String,

    /// Run output directory
    #[arg(long, default_value = "results")]
    results_dir: PathBuf,

    /// MNIST cache directory
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Tracking project name
    #[arg(long, default_value = plr_types::DEFAULT_PROJECT)]
    project: String,
}

impl From<Cli> for TrainingConfig {
    fn from(cli: Cli) -> Self {
        TrainingConfig {
            batch_size: cli.batch_size,
            test_batch_size: cli.test_batch_size,
            epochs: cli.epochs,
            gamma: cli.gamma,
            no_cuda: cli.no_cuda,
            dry_run: cli.dry_run,
            seed: cli.seed,
            log_interval: cli.log_interval,
            save_model: cli.save_model,
            n_trials: cli.n_trials,
            sampler: cli.sampler,
            project: cli.project,
            results_dir: cli.results_dir,
            data_dir: cli.data_dir,
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config: TrainingConfig = Cli::parse().into();
    config.validate()?;

    let settings = TrackingSettings::from_env()?;
    std::fs::create_dir_all(&config.results_dir)
        .with_context(|| format!("creating {}", config.results_dir.display()))?;
    let backend = plr_tracking::login(&settings, &config.results_dir)?;

    let init = RunInit::new(config.project.clone(), config.to_json()?)
        .with_entity(settings.entity.clone())
        .with_name(settings.run_name.clone());
    let mut run = Run::init(backend, init)?;
    info!("Tracking run {} via {}", run.id(), run.backend_name());

    let source_root = std::env::current_dir()?;
    run.log_code("source_files", &source_root, default_include)?;

    let accelerator = Accelerator::select(config.no_cuda);
    let outcome = Experiment::new(config, accelerator).and_then(|experiment| experiment.run_selected(&mut run));

    match outcome {
        Ok(report) => {
            print!("{report}");
            run.finish()?;
            Ok(())
        }
        Err(e) => {
            error!("Search failed: {}", e);
            run.finish_with_code(1)?;
            Err(e.into())
        }
    }
}
