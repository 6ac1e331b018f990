use burn::prelude::*;
use burn::tensor::TensorData;
use plr_data::MnistBatchData;

/// A mini-batch on the device
#[derive(Debug, Clone)]
pub struct MnistBatch<B: Backend> {
    /// `[batch, 1, rows, cols]`
    pub images: Tensor<B, 4>,
    /// `[batch]` class indices
    pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> MnistBatch<B> {
    pub fn from_host(batch: MnistBatchData, device: &B::Device) -> Self {
        let n = batch.len();
        let images = Tensor::<B, 4>::from_data(
            TensorData::new(batch.images, [n, 1, batch.rows, batch.cols]),
            device,
        );
        let targets = Tensor::<B, 1, Int>::from_data(TensorData::new(batch.labels, [n]), device);
        Self { images, targets }
    }

    pub fn len(&self) -> usize {
        self.targets.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
