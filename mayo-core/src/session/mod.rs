//! Evaluation sessions: checkpoint stores, backends, the evaluation loop and sweeps.

pub mod backend;
pub mod checkpoint;
pub mod eval;
pub mod replay;
pub mod sweep;

pub use backend::{BatchMetrics, CheckpointStore, ExecutionBackend, MetricOps};
pub use checkpoint::{CheckpointEntry, CheckpointKey, CheckpointManifest};
pub use eval::{
    Accuracy, EvalOutcome, EvalState, Evaluator, InterruptPolicy, IterationPlan, RunningTotals,
};
pub use replay::{Predictions, ReplaySession};
pub use sweep::{SweepReport, SweepRow};
