//! Multi-checkpoint sweeps.

use serde::{Deserialize, Serialize};

use crate::error::MayoError;
use crate::report::{Percent, Table};
use crate::session::{
    CheckpointKey, CheckpointStore, EvalOutcome, Evaluator, ExecutionBackend, InterruptPolicy,
};

/// Accuracy of one checkpoint in a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweepRow {
    /// Checkpoint epoch that was loaded.
    pub checkpoint: u64,
    /// Training progress reported by the backend after evaluation.
    pub epoch: f64,
    pub top1: Percent,
    pub top5: Percent,
}

/// Rows collected by [`Evaluator::eval_all`], in evaluation order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    pub rows: Vec<SweepRow>,
    /// Set when the sweep stopped before visiting every checkpoint.
    pub interrupted: bool,
}

impl SweepReport {
    pub const HEADERS: [&'static str; 3] = ["Epoch", "Top1", "Top5"];

    pub fn table(&self) -> Table {
        let mut table = Table::new(Self::HEADERS);
        for row in &self.rows {
            table.add_row([
                format!("{:.3}", row.epoch),
                row.top1.to_string(),
                row.top5.to_string(),
            ]);
        }
        table
    }

    /// The report as aligned text.
    pub fn format(&self) -> String {
        self.table().format()
    }
}

impl<S> Evaluator<S>
where
    S: CheckpointStore + ExecutionBackend,
{
    /// Evaluate every checkpoint the store lists.
    ///
    /// Each pass runs with the logger demoted so only per-epoch summaries
    /// show at `info`. An interruption ends the sweep and returns the rows
    /// gathered before it; the interrupted checkpoint gets no row. Any other
    /// error is returned as is.
    pub fn eval_all(&mut self) -> Result<SweepReport, MayoError> {
        self.logger().info("Evaluating all checkpoints...");
        let epochs = self.session().list_epochs()?;
        let listed = epochs
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        self.logger().info(format!("Checkpoints to evaluate: {listed}"));

        let mut report = SweepReport::default();
        for epoch in epochs {
            let outcome = {
                let _quiet = self.logger().demote();
                self.eval(Some(&CheckpointKey::Epoch(epoch)), InterruptPolicy::Propagate)
            };
            let accuracy = match outcome {
                Ok(EvalOutcome::Completed(accuracy)) => accuracy,
                Ok(EvalOutcome::Aborted) | Err(MayoError::Interrupted) => {
                    report.interrupted = true;
                    break;
                }
                Err(err) => return Err(err),
            };

            let progress = match self.session_mut().epoch_progress() {
                Ok(progress) => progress,
                Err(MayoError::Interrupted) => {
                    report.interrupted = true;
                    break;
                }
                Err(err) => return Err(err),
            };
            self.logger().info(format!(
                "epoch: {progress:.3}, top1: {}, top5: {}",
                accuracy.top1, accuracy.top5
            ));
            report.rows.push(SweepRow {
                checkpoint: epoch,
                epoch: progress,
                top1: accuracy.top1,
                top5: accuracy.top5,
            });
        }
        Ok(report)
    }
}
