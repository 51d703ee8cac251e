//! File-backed session that replays recorded network outputs.
//!
//! A checkpoint directory holds a [`CheckpointManifest`] and, for every
//! checkpoint, a predictions file with the per-example top-1/top-5
//! correctness the network produced on the validation split. Batches are cut
//! from those records like an input pipeline that repeats the dataset: the
//! last batch of a pass wraps around to the first examples.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use crate::config::ExecutionMode;
use crate::error::MayoError;
use crate::persistence::{load_json, sha256_file};
use crate::session::{
    BatchMetrics, CheckpointEntry, CheckpointKey, CheckpointManifest, CheckpointStore,
    ExecutionBackend, MetricOps,
};

/// Recorded correctness for every validation example.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Predictions {
    pub top1: Vec<bool>,
    pub top5: Vec<bool>,
}

struct Loaded {
    entry: CheckpointEntry,
    predictions: Predictions,
    cursor: usize,
    prefetched: VecDeque<BatchMetrics>,
}

impl Loaded {
    fn next_batch(&mut self, batch_size: usize) -> BatchMetrics {
        let n = self.predictions.top1.len();
        let indices: Vec<usize> = (0..batch_size).map(|i| (self.cursor + i) % n).collect();
        self.cursor = (self.cursor + batch_size) % n;
        BatchMetrics {
            top1: indices.iter().map(|&i| self.predictions.top1[i]).collect(),
            top5: indices.iter().map(|&i| self.predictions.top5[i]).collect(),
        }
    }

    /// Queue one pass worth of batches.
    fn prefetch(&mut self, batch_size: usize) {
        let batches = self.predictions.top1.len().div_ceil(batch_size);
        for _ in 0..batches {
            let batch = self.next_batch(batch_size);
            self.prefetched.push_back(batch);
        }
    }
}

/// Checkpoint store and execution backend over a checkpoint directory.
pub struct ReplaySession {
    dir: PathBuf,
    manifest: CheckpointManifest,
    batch_size: usize,
    mode: ExecutionMode,
    loaded: Option<Loaded>,
}

impl ReplaySession {
    pub fn open(dir: &Path, batch_size: usize, mode: ExecutionMode) -> Result<Self, MayoError> {
        if batch_size == 0 {
            return Err(MayoError::config("batch size must be at least 1"));
        }
        if !dir.is_dir() {
            return Err(MayoError::not_found(format!(
                "checkpoint directory {}",
                dir.display()
            )));
        }
        let manifest = CheckpointManifest::load(dir)?;
        tracing::debug!(
            dir = %dir.display(),
            checkpoints = manifest.checkpoints.len(),
            ?mode,
            "opened replay session"
        );
        Ok(Self {
            dir: dir.to_path_buf(),
            manifest,
            batch_size,
            mode,
            loaded: None,
        })
    }

    /// Entry of the currently loaded checkpoint.
    pub fn loaded(&self) -> Option<&CheckpointEntry> {
        self.loaded.as_ref().map(|l| &l.entry)
    }

    fn read_predictions(&self, entry: &CheckpointEntry) -> Result<Predictions, MayoError> {
        let path = self.dir.join(&entry.predictions);
        if let Some(expected) = &entry.sha256 {
            let actual = sha256_file(&path)?;
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(MayoError::checkpoint(format!(
                    "{} does not match its recorded hash",
                    path.display()
                )));
            }
        }
        let predictions: Predictions = load_json(&path)?.ok_or_else(|| {
            MayoError::checkpoint(format!("missing predictions file {}", path.display()))
        })?;
        if predictions.top1.len() != predictions.top5.len() {
            return Err(MayoError::checkpoint(format!(
                "{}: top1 has {} entries but top5 has {}",
                path.display(),
                predictions.top1.len(),
                predictions.top5.len()
            )));
        }
        if predictions.top1.is_empty() {
            return Err(MayoError::checkpoint(format!(
                "{} holds no predictions",
                path.display()
            )));
        }
        Ok(predictions)
    }
}

impl CheckpointStore for ReplaySession {
    fn load(&mut self, key: &CheckpointKey) -> Result<(), MayoError> {
        let entry = self.manifest.resolve(key)?.clone();
        let predictions = self.read_predictions(&entry)?;
        let mut loaded = Loaded {
            entry,
            predictions,
            cursor: 0,
            prefetched: VecDeque::new(),
        };
        if self.mode == ExecutionMode::Concurrent {
            loaded.prefetch(self.batch_size);
        }
        tracing::debug!(checkpoint = %key, epoch = loaded.entry.epoch, "checkpoint loaded");
        self.loaded = Some(loaded);
        Ok(())
    }

    fn list_epochs(&self) -> Result<Vec<u64>, MayoError> {
        Ok(self.manifest.epochs())
    }
}

impl ExecutionBackend for ReplaySession {
    fn metric_ops(&mut self) -> Result<MetricOps, MayoError> {
        Ok(MetricOps::default())
    }

    fn run_metrics(&mut self, ops: &MetricOps) -> Result<BatchMetrics, MayoError> {
        let known = MetricOps::default();
        if ops != &known {
            return Err(MayoError::backend(format!(
                "unknown metric outputs {} / {}",
                ops.top1, ops.top5
            )));
        }
        let batch_size = self.batch_size;
        let mode = self.mode;
        let loaded = self
            .loaded
            .as_mut()
            .ok_or_else(|| MayoError::checkpoint("no checkpoint loaded"))?;
        if mode == ExecutionMode::Concurrent {
            if loaded.prefetched.is_empty() {
                loaded.prefetch(batch_size);
            }
            if let Some(batch) = loaded.prefetched.pop_front() {
                return Ok(batch);
            }
        }
        Ok(loaded.next_batch(batch_size))
    }

    fn epoch_progress(&mut self) -> Result<f64, MayoError> {
        self.loaded
            .as_ref()
            .map(|l| l.entry.epoch_progress)
            .ok_or_else(|| MayoError::checkpoint("no checkpoint loaded"))
    }

    fn moving_average_enabled(&self) -> bool {
        self.manifest.moving_average
    }
}
