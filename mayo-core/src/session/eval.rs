//! Single-checkpoint evaluation loop.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::change::{Change, Clock, MonotonicClock};
use crate::config::MayoConfig;
use crate::error::MayoError;
use crate::log::Logger;
use crate::report::Percent;
use crate::session::{BatchMetrics, CheckpointKey, CheckpointStore, ExecutionBackend, MetricOps};

/// How many batches a pass takes and how full the last one is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationPlan {
    pub num_examples: usize,
    pub batch_size: usize,
    pub num_iterations: usize,
    pub final_batch_size: usize,
}

impl IterationPlan {
    pub fn new(num_examples: usize, batch_size: usize) -> Result<Self, MayoError> {
        if batch_size == 0 {
            return Err(MayoError::config("batch size must be at least 1"));
        }
        let remainder = num_examples % batch_size;
        Ok(Self {
            num_examples,
            batch_size,
            num_iterations: num_examples.div_ceil(batch_size),
            final_batch_size: if remainder == 0 { batch_size } else { remainder },
        })
    }

    /// Examples counted at `step`; only the last step can be short.
    pub fn examples_in(&self, step: usize) -> usize {
        if step + 1 == self.num_iterations {
            self.final_batch_size
        } else {
            self.batch_size
        }
    }
}

/// Correct predictions and examples seen so far in a pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunningTotals {
    pub top1_correct: usize,
    pub top5_correct: usize,
    pub examples: usize,
}

impl RunningTotals {
    /// Count the first `count` results of `batch`.
    pub fn accumulate(&mut self, batch: &BatchMetrics, count: usize) -> Result<(), MayoError> {
        if batch.top1.len() != batch.top5.len() {
            return Err(MayoError::backend(format!(
                "top1 and top5 outputs differ in length: {} vs {}",
                batch.top1.len(),
                batch.top5.len()
            )));
        }
        if batch.len() < count {
            return Err(MayoError::backend(format!(
                "batch holds {} results, expected at least {count}",
                batch.len()
            )));
        }
        self.top1_correct += batch.top1[..count].iter().filter(|&&c| c).count();
        self.top5_correct += batch.top5[..count].iter().filter(|&&c| c).count();
        self.examples += count;
        Ok(())
    }

    pub fn top1(&self) -> Percent {
        Percent(ratio(self.top1_correct, self.examples))
    }

    pub fn top5(&self) -> Percent {
        Percent(ratio(self.top5_correct, self.examples))
    }
}

fn ratio(correct: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        correct as f64 / total as f64
    }
}

/// Final accuracy of a completed pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Accuracy {
    pub top1: Percent,
    pub top5: Percent,
    pub examples: usize,
}

/// Result of one evaluation pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EvalOutcome {
    Completed(Accuracy),
    /// Interrupted; no accuracy is reported.
    Aborted,
}

impl EvalOutcome {
    pub fn accuracy(&self) -> Option<&Accuracy> {
        match self {
            Self::Completed(accuracy) => Some(accuracy),
            Self::Aborted => None,
        }
    }
}

/// What an interrupted pass hands back to its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterruptPolicy {
    /// Return `Ok(EvalOutcome::Aborted)`.
    Swallow,
    /// Return `Err(MayoError::Interrupted)`.
    #[default]
    Propagate,
}

/// Lifecycle of the evaluator's most recent pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvalState {
    Idle,
    Running,
    Completed,
    /// Interrupted, or stopped by a collaborator error.
    Aborted,
}

/// Drives evaluation passes over a session.
pub struct Evaluator<S> {
    session: S,
    config: MayoConfig,
    ops: MetricOps,
    log: Logger,
    cancel: CancellationToken,
    clock: Box<dyn Clock>,
    change: Change,
    state: EvalState,
}

impl<S> Evaluator<S>
where
    S: CheckpointStore + ExecutionBackend,
{
    /// Resolve the metric outputs of `session` and validate `config`.
    pub fn new(
        mut session: S,
        config: MayoConfig,
        log: Logger,
        cancel: CancellationToken,
    ) -> Result<Self, MayoError> {
        config.validate()?;
        let ops = session.metric_ops()?;
        let using = if session.moving_average_enabled() {
            "Using"
        } else {
            "Not using"
        };
        log.debug(format!("{using} exponential moving averages."));
        Ok(Self {
            session,
            config,
            ops,
            log,
            cancel,
            clock: Box::new(MonotonicClock::new()),
            change: Change::new(),
            state: EvalState::Idle,
        })
    }

    /// Replace the wall clock used for throughput.
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn state(&self) -> EvalState {
        self.state
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut S {
        &mut self.session
    }

    pub fn logger(&self) -> &Logger {
        &self.log
    }

    /// Evaluate one checkpoint, or the configured default when `key` is `None`.
    ///
    /// The cancellation token is checked before every batch and after every
    /// backend call. A backend returning [`MayoError::Interrupted`] counts as
    /// a cancellation too. What an interrupted pass returns is chosen by
    /// `policy`; accuracy gathered so far is only logged.
    pub fn eval(
        &mut self,
        key: Option<&CheckpointKey>,
        policy: InterruptPolicy,
    ) -> Result<EvalOutcome, MayoError> {
        self.state = EvalState::Running;
        match self.run_pass(key) {
            Ok(Some(accuracy)) => {
                self.state = EvalState::Completed;
                Ok(EvalOutcome::Completed(accuracy))
            }
            Ok(None) => self.abort(policy),
            Err(err) if err.is_interrupted() => self.abort(policy),
            Err(err) => {
                self.state = EvalState::Aborted;
                Err(err)
            }
        }
    }

    /// `Ok(None)` when the pass was cancelled.
    fn run_pass(&mut self, key: Option<&CheckpointKey>) -> Result<Option<Accuracy>, MayoError> {
        let key = key
            .cloned()
            .unwrap_or_else(|| self.config.system.checkpoint.load.clone());
        self.session.load(&key)?;

        let plan = IterationPlan::new(
            self.config.dataset.num_examples_per_epoch.validate,
            self.config.system.batch_size,
        )?;
        tracing::debug!(
            checkpoint = %key,
            iterations = plan.num_iterations,
            final_batch = plan.final_batch_size,
            "iteration plan"
        );

        self.log.info("Starting evaluation...");
        self.change.reset();
        self.change.delta("step.duration", self.clock.now_secs());
        self.change.delta("step", 0.0);

        let mut totals = RunningTotals::default();
        for step in 0..plan.num_iterations {
            if self.cancel.is_cancelled() {
                return Ok(None);
            }
            let batch = self.session.run_metrics(&self.ops)?;
            if self.cancel.is_cancelled() {
                return Ok(None);
            }
            totals.accumulate(&batch, plan.examples_in(step))?;
            self.update_progress(step + 1, &totals, &plan);
        }

        self.log.info("Evaluation complete.");
        self.log.info(format!(
            "    top1: {}, top5: {} [{} images]",
            totals.top1(),
            totals.top5(),
            totals.examples
        ));
        Ok(Some(Accuracy {
            top1: totals.top1(),
            top5: totals.top5(),
            examples: totals.examples,
        }))
    }

    fn update_progress(&mut self, step: usize, totals: &RunningTotals, plan: &IterationPlan) {
        let interval = self.change.delta("step.duration", self.clock.now_secs());
        if interval == 0.0 {
            return;
        }
        let steps = self.change.delta("step", step as f64);
        let imgs_per_sec = plan.batch_size as f64 * steps / interval;
        let imgs_per_sec = self
            .change
            .moving_metrics(
                "imgs_per_sec",
                imgs_per_sec,
                false,
                self.config.system.log.metrics_history_count,
            )
            .mean;
        self.log.info_update(format!(
            "eval: {} | top1: {} | top5: {} | {:.1}/s",
            Percent(step as f64 / plan.num_iterations as f64),
            totals.top1(),
            totals.top5(),
            imgs_per_sec
        ));
    }

    fn abort(&mut self, policy: InterruptPolicy) -> Result<EvalOutcome, MayoError> {
        self.state = EvalState::Aborted;
        self.log.info("Evaluation aborted.");
        match policy {
            InterruptPolicy::Swallow => Ok(EvalOutcome::Aborted),
            InterruptPolicy::Propagate => Err(MayoError::Interrupted),
        }
    }
}
