//! Step decay learning-rate schedule.
//!
//! `lr = initial_lr * gamma^(epoch / step_size)`, stepped once per epoch.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepLr {
    initial_lr: f64,
    gamma: f64,
    step_size: usize,
    epoch: usize,
}

impl StepLr {
    /// Decay by `gamma` after every epoch
    pub fn new(initial_lr: f64, gamma: f64) -> Self {
        Self::with_step_size(initial_lr, gamma, 1)
    }

    pub fn with_step_size(initial_lr: f64, gamma: f64, step_size: usize) -> Self {
        Self {
            initial_lr,
            gamma,
            step_size: step_size.max(1),
            epoch: 0,
        }
    }

    /// Learning rate for a given number of completed epochs
    pub fn lr_at(&self, epoch: usize) -> f64 {
        let decays = (epoch / self.step_size) as i32;
        self.initial_lr * self.gamma.powi(decays)
    }

    /// Current learning rate
    pub fn lr(&self) -> f64 {
        self.lr_at(self.epoch)
    }

    /// Advance one epoch
    pub fn step(&mut self) {
        self.epoch += 1;
    }

    pub fn epoch(&self) -> usize {
        self.epoch
    }
}
