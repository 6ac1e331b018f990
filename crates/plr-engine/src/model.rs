//! The two-convolution MNIST classifier.

use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::activation::{log_softmax, relu};
use burn::tensor::ElementConversion;

/// Flattened feature size after two valid 3x3 convs and a 2x2 pool on 28x28.
pub const FLAT_FEATURES: usize = 64 * 12 * 12;

#[derive(Config, Debug)]
pub struct NetConfig {
    #[config(default = 10)]
    pub num_classes: usize,
    #[config(default = 0.25)]
    pub conv_dropout: f64,
    #[config(default = 0.5)]
    pub dense_dropout: f64,
}

impl NetConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Net<B> {
        Net {
            conv1: Conv2dConfig::new([1, 32], [3, 3]).init(device),
            conv2: Conv2dConfig::new([32, 64], [3, 3]).init(device),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            dropout1: DropoutConfig::new(self.conv_dropout).init(),
            fc1: LinearConfig::new(FLAT_FEATURES, 128).init(device),
            dropout2: DropoutConfig::new(self.dense_dropout).init(),
            fc2: LinearConfig::new(128, self.num_classes).init(device),
        }
    }
}

/// conv(1→32) → relu → conv(32→64) → relu → maxpool → dropout → flatten →
/// fc(9216→128) → relu → dropout → fc(128→10) → log-softmax
#[derive(Module, Debug)]
pub struct Net<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    pool: MaxPool2d,
    dropout1: Dropout,
    fc1: Linear<B>,
    dropout2: Dropout,
    fc2: Linear<B>,
}

impl<B: Backend> Net<B> {
    /// `images` is `[batch, 1, 28, 28]`; returns log-probabilities `[batch, classes]`.
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = relu(self.conv1.forward(images));
        let x = relu(self.conv2.forward(x));
        let x = self.pool.forward(x);
        let x = self.dropout1.forward(x);

        let x: Tensor<B, 2> = x.flatten(1, 3);
        let x = relu(self.fc1.forward(x));
        let x = self.dropout2.forward(x);

        log_softmax(self.fc2.forward(x), 1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reduction {
    Mean,
    Sum,
}

/// Negative log-likelihood of `targets` under `log_probs`.
pub fn nll_loss<B: Backend>(
    log_probs: Tensor<B, 2>,
    targets: Tensor<B, 1, Int>,
    reduction: Reduction,
) -> Tensor<B, 1> {
    let [batch] = targets.dims();
    let picked = log_probs.gather(1, targets.reshape([batch, 1])).neg();
    match reduction {
        Reduction::Mean => picked.mean(),
        Reduction::Sum => picked.sum(),
    }
}

/// Number of rows whose argmax equals the target.
pub fn correct_predictions<B: Backend>(log_probs: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> usize {
    let [batch] = targets.dims();
    let predicted = log_probs.argmax(1).reshape([batch]);
    let correct: i64 = predicted.equal(targets).int().sum().into_scalar().elem();
    correct.max(0) as usize
}
