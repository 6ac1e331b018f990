use serde::{Deserialize, Serialize};
use std::fmt;

/// Progress of one logged training batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainProgress {
    pub epoch: usize,
    pub batch_idx: usize,
    pub num_batches: usize,
    pub samples_seen: usize,
    pub dataset_len: usize,
    pub loss: f64,
}

impl TrainProgress {
    pub fn percent(&self) -> f64 {
        if self.num_batches == 0 {
            0.0
        } else {
            100.0 * self.batch_idx as f64 / self.num_batches as f64
        }
    }
}

impl fmt::Display for TrainProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Train Epoch: {} [{}/{} ({:.0}%)]\tLoss: {:.6}",
            self.epoch,
            self.samples_seen,
            self.dataset_len,
            self.percent(),
            self.loss
        )
    }
}

/// Result of evaluating the model over the test set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSummary {
    pub epoch: usize,
    /// Summed NLL divided by the number of test samples
    pub average_loss: f64,
    pub correct: usize,
    pub total: usize,
}

impl TestSummary {
    pub fn accuracy(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f64 / self.total as f64
        }
    }
}

impl fmt::Display for TestSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Test set: Average loss: {:.4}, Accuracy: {}/{} ({:.0}%)",
            self.average_loss,
            self.correct,
            self.total,
            100.0 * self.accuracy()
        )
    }
}
