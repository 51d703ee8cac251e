//! Shared fixtures for mayo-core integration tests.

#![allow(dead_code)]

use std::collections::HashMap;

use mayo_core::MayoConfig;
use mayo_core::error::MayoError;
use mayo_core::session::{BatchMetrics, CheckpointKey, CheckpointStore, ExecutionBackend, MetricOps};
use tokio_util::sync::CancellationToken;

/// Scripted behaviour of one checkpoint.
#[derive(Clone)]
pub struct ScriptedCheckpoint {
    pub epoch_progress: f64,
    /// Leading examples of each batch marked correct for top-1 and top-5.
    pub top1_hits: usize,
    pub top5_hits: usize,
    /// Cancel the token on this (1-based) batch of the pass.
    pub interrupt_at: Option<usize>,
    /// Fail with a backend error on this (1-based) batch.
    pub fail_at: Option<usize>,
}

impl ScriptedCheckpoint {
    pub fn new(epoch_progress: f64, top1_hits: usize, top5_hits: usize) -> Self {
        Self {
            epoch_progress,
            top1_hits,
            top5_hits,
            interrupt_at: None,
            fail_at: None,
        }
    }
}

/// In-memory session driven by per-epoch scripts.
pub struct ScriptedSession {
    pub batch_size: usize,
    pub checkpoints: HashMap<u64, ScriptedCheckpoint>,
    pub cancel: CancellationToken,
    pub loads: Vec<CheckpointKey>,
    current: Option<u64>,
    batches: usize,
}

impl ScriptedSession {
    pub fn new(batch_size: usize, cancel: CancellationToken) -> Self {
        Self {
            batch_size,
            checkpoints: HashMap::new(),
            cancel,
            loads: Vec::new(),
            current: None,
            batches: 0,
        }
    }

    pub fn with_checkpoint(mut self, epoch: u64, script: ScriptedCheckpoint) -> Self {
        self.checkpoints.insert(epoch, script);
        self
    }
}

impl CheckpointStore for ScriptedSession {
    fn load(&mut self, key: &CheckpointKey) -> Result<(), MayoError> {
        self.loads.push(key.clone());
        let epoch = match key {
            CheckpointKey::Epoch(epoch) => *epoch,
            CheckpointKey::Latest => *self
                .checkpoints
                .keys()
                .max()
                .ok_or_else(|| MayoError::not_found("no checkpoints"))?,
            CheckpointKey::Named(name) => {
                return Err(MayoError::not_found(format!("checkpoint {name}")));
            }
        };
        if !self.checkpoints.contains_key(&epoch) {
            return Err(MayoError::not_found(format!("checkpoint {epoch}")));
        }
        self.current = Some(epoch);
        self.batches = 0;
        Ok(())
    }

    fn list_epochs(&self) -> Result<Vec<u64>, MayoError> {
        let mut epochs: Vec<u64> = self.checkpoints.keys().copied().collect();
        epochs.sort_unstable();
        Ok(epochs)
    }
}

impl ExecutionBackend for ScriptedSession {
    fn metric_ops(&mut self) -> Result<MetricOps, MayoError> {
        Ok(MetricOps::default())
    }

    fn run_metrics(&mut self, _ops: &MetricOps) -> Result<BatchMetrics, MayoError> {
        let epoch = self
            .current
            .ok_or_else(|| MayoError::checkpoint("nothing loaded"))?;
        let script = &self.checkpoints[&epoch];
        self.batches += 1;
        if script.interrupt_at == Some(self.batches) {
            self.cancel.cancel();
        }
        if script.fail_at == Some(self.batches) {
            return Err(MayoError::backend("device lost"));
        }
        let hits = |n: usize| (0..self.batch_size).map(|i| i < n).collect();
        Ok(BatchMetrics::new(hits(script.top1_hits), hits(script.top5_hits)))
    }

    fn epoch_progress(&mut self) -> Result<f64, MayoError> {
        let epoch = self
            .current
            .ok_or_else(|| MayoError::checkpoint("nothing loaded"))?;
        Ok(self.checkpoints[&epoch].epoch_progress)
    }
}

pub fn config(num_examples: usize, batch_size: usize) -> MayoConfig {
    let mut config = MayoConfig::default();
    config.dataset.num_examples_per_epoch.validate = num_examples;
    config.system.batch_size = batch_size;
    config
}
