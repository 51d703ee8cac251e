//! Collaborator contracts the evaluator runs against.
//!
//! A session is anything implementing both [`CheckpointStore`] and
//! [`ExecutionBackend`]: it binds a checkpoint's weights, then realizes the
//! metric outputs of the network one batch at a time.

use serde::{Deserialize, Serialize};

use crate::error::MayoError;
use crate::session::CheckpointKey;

/// Per-example correctness for one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchMetrics {
    pub top1: Vec<bool>,
    pub top5: Vec<bool>,
}

impl BatchMetrics {
    pub fn new(top1: Vec<bool>, top5: Vec<bool>) -> Self {
        Self { top1, top5 }
    }

    pub(crate) fn len(&self) -> usize {
        self.top1.len()
    }
}

/// Names of the metric outputs to realize, resolved once per evaluator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricOps {
    pub top1: String,
    pub top5: String,
}

impl Default for MetricOps {
    fn default() -> Self {
        Self {
            top1: "top1".to_string(),
            top5: "top5".to_string(),
        }
    }
}

/// Loads and enumerates checkpoints.
pub trait CheckpointStore {
    /// Bind the weights of `key` to the session.
    fn load(&mut self, key: &CheckpointKey) -> Result<(), MayoError>;

    /// Epochs that have a checkpoint, in evaluation order.
    fn list_epochs(&self) -> Result<Vec<u64>, MayoError>;
}

/// Runs the network on the current checkpoint.
pub trait ExecutionBackend {
    /// Resolve the top-1/top-5 outputs of the network.
    fn metric_ops(&mut self) -> Result<MetricOps, MayoError>;

    /// Realize `ops` for the next batch. Blocks until the batch is done.
    fn run_metrics(&mut self, ops: &MetricOps) -> Result<BatchMetrics, MayoError>;

    /// Training progress of the loaded checkpoint, in (fractional) epochs.
    fn epoch_progress(&mut self) -> Result<f64, MayoError>;

    /// Whether evaluation uses exponential moving averages of the weights.
    fn moving_average_enabled(&self) -> bool {
        false
    }
}
