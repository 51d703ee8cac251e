//! # mayo-core: evaluation harness for trained checkpoints
//!
//! This crate provides the pieces Mayo needs to score checkpoints of a
//! classification or detection network:
//!
//! 1. **Geometry**: box-format conversion, cartesian pairing, IOU and
//!    average precision over `ndarray` arrays
//! 2. **Change**: per-key deltas and exponential moving averages used for
//!    throughput reporting
//! 3. **Session**: the evaluation loop, the multi-checkpoint sweep, and the
//!    collaborator traits they run against
//!
//! Model execution and checkpoint persistence are collaborators behind the
//! traits in [`session::backend`]; [`session::replay::ReplaySession`] is a
//! file-backed implementation of both.

// Foundation
pub mod config;
pub mod error;
pub mod log;
pub mod persistence;

// Numeric kernels
pub mod change;
pub mod geometry;

// Evaluation
pub mod report;
pub mod session;

// Re-exports
pub use change::{Change, MovingValue};
pub use config::{ExecutionMode, MayoConfig, load_config};
pub use error::MayoError;
pub use log::{Logger, VerbosityGuard};
pub use report::{Percent, Table};
pub use session::{
    Accuracy, CheckpointKey, EvalOutcome, Evaluator, InterruptPolicy, IterationPlan, SweepReport,
};
