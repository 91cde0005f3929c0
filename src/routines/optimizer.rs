//! Projected momentum descent over the probability simplex
//!
//! The optimizer is split in two: [OptimizerState] is an immutable value with pure
//! transitions, and [ProjectedMomentumOptimizer::run] is the driver that owns the current
//! state, asks an [Objective] for losses and gradients, and decides when to stop.

use crate::error::{Result, WeightError};
use crate::routines::output::{SearchResult, StepRecord, Trajectory};
use crate::routines::simplex;
use crate::structs::weights::GroupWeights;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Hyperparameters of one search.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameters {
    /// Maximum number of steps, failed steps included.
    pub steps: usize,
    pub lr: f64,
    pub momentum: f64,
    /// Number of consecutive non-improving steps before stopping.
    pub patience: usize,
    /// Number of consecutive failed steps before giving up.
    pub max_step_failures: usize,
    /// Factor applied to the learning rate after each failed step.
    pub failure_backoff: f64,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self {
            steps: 100,
            lr: 0.1,
            momentum: 0.5,
            patience: 5,
            max_step_failures: 3,
            failure_backoff: 0.5,
        }
    }
}

impl Hyperparameters {
    pub fn new(steps: usize, lr: f64, momentum: f64, patience: usize) -> Self {
        Self {
            steps,
            lr,
            momentum,
            patience,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.steps < 1 {
            return Err(invalid("steps", "must be at least 1".to_string()));
        }
        if self.lr.is_nan() || self.lr <= 0.0 || self.lr.is_infinite() {
            return Err(invalid("lr", format!("must be positive and finite, got {}", self.lr)));
        }
        if self.momentum.is_nan() || !(0.0..1.0).contains(&self.momentum) {
            return Err(invalid(
                "momentum",
                format!("must lie in [0, 1), got {}", self.momentum),
            ));
        }
        if self.patience < 1 {
            return Err(invalid("patience", "must be at least 1".to_string()));
        }
        if self.max_step_failures < 1 {
            return Err(invalid("max_step_failures", "must be at least 1".to_string()));
        }
        if self.failure_backoff.is_nan()
            || self.failure_backoff <= 0.0
            || self.failure_backoff > 1.0
        {
            return Err(invalid(
                "failure_backoff",
                format!("must lie in (0, 1], got {}", self.failure_backoff),
            ));
        }
        Ok(())
    }
}

fn invalid(name: &'static str, reason: String) -> WeightError {
    WeightError::InvalidHyperparameter { name, reason }
}

/// Loss and gradient of the search objective at one point.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub loss: f64,
    pub gradient: Array1<f64>,
    /// The gradient came from a ridge-regularized Hessian.
    pub regularized: bool,
}

/// A function of the group weights that the optimizer minimizes.
///
/// An `Err` from [Objective::evaluate] is a failed step: the optimizer keeps its last
/// committed point and tries again with a smaller learning rate.
pub trait Objective {
    fn evaluate(&mut self, p: &GroupWeights) -> Result<Evaluation>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepOutcome {
    Improving,
    Stalled,
    Failed,
}

impl std::fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepOutcome::Improving => write!(f, "Improving"),
            StepOutcome::Stalled => write!(f, "Stalled"),
            StepOutcome::Failed => write!(f, "Failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Convergence {
    /// Too many consecutive steps without improvement.
    Patience,
    /// The step budget is spent.
    Budget,
}

/// Represents the status of a search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Running,
    Converged(Convergence),
    /// Stopped after too many consecutive failed steps.
    DegradedConvergence,
    /// Stopped by the caller.
    Cancelled,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Running => write!(f, "Running"),
            Status::Converged(Convergence::Patience) => write!(f, "Converged (patience)"),
            Status::Converged(Convergence::Budget) => write!(f, "Converged (step budget)"),
            Status::DegradedConvergence => write!(f, "Degraded convergence"),
            Status::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Trajectory state of the optimizer.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizerState {
    pub current: GroupWeights,
    pub previous: GroupWeights,
    pub best: GroupWeights,
    pub best_loss: f64,
    pub stall_count: usize,
    pub consecutive_failures: usize,
}

impl OptimizerState {
    pub fn new(p0: GroupWeights) -> Self {
        Self {
            previous: p0.clone(),
            best: p0.clone(),
            current: p0,
            best_loss: f64::INFINITY,
            stall_count: 0,
            consecutive_failures: 0,
        }
    }

    /// Next point: `project(p_t - lr·grad + momentum·(p_t - p_{t-1}))`.
    pub fn propose(&self, gradient: &Array1<f64>, lr: f64, momentum: f64) -> Result<GroupWeights> {
        if gradient.len() != self.current.len() {
            return Err(WeightError::ShapeMismatch(format!(
                "gradient has {} entries for {} groups",
                gradient.len(),
                self.current.len()
            )));
        }
        let current = self.current.weights();
        let velocity = current - self.previous.weights();
        let raw = current - &(gradient * lr) + &(velocity * momentum);
        Ok(GroupWeights::new(simplex::project(&raw)?))
    }

    /// Record the loss of the starting point without moving or touching the stall counter.
    pub fn observe(self, loss: f64) -> Self {
        if loss < self.best_loss {
            Self {
                best: self.current.clone(),
                best_loss: loss,
                ..self
            }
        } else {
            self
        }
    }

    /// Move to `next`, whose validation loss is `loss`.
    pub fn commit(self, next: GroupWeights, loss: f64) -> (Self, StepOutcome) {
        let improved = loss < self.best_loss;
        let (best, best_loss, stall_count, outcome) = if improved {
            (next.clone(), loss, 0, StepOutcome::Improving)
        } else {
            (self.best, self.best_loss, self.stall_count + 1, StepOutcome::Stalled)
        };
        let state = Self {
            previous: self.current,
            current: next,
            best,
            best_loss,
            stall_count,
            consecutive_failures: 0,
        };
        (state, outcome)
    }

    /// Keep the committed point after a failed step.
    pub fn reject(self) -> Self {
        Self {
            consecutive_failures: self.consecutive_failures + 1,
            ..self
        }
    }
}

/// Runs projected momentum descent against an [Objective].
#[derive(Debug, Clone, Default)]
pub struct ProjectedMomentumOptimizer {
    hyper: Hyperparameters,
    stop: Option<Arc<AtomicBool>>,
}

impl ProjectedMomentumOptimizer {
    pub fn new(hyper: Hyperparameters) -> Result<Self> {
        hyper.validate()?;
        Ok(Self { hyper, stop: None })
    }

    /// Poll `stop` at the top of every step; the run ends with [Status::Cancelled] once it is set.
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = Some(stop);
        self
    }

    pub fn hyperparameters(&self) -> &Hyperparameters {
        &self.hyper
    }

    fn cancelled(&self) -> bool {
        self.stop
            .as_ref()
            .map(|flag| flag.load(Ordering::Relaxed))
            .unwrap_or(false)
    }

    /// Minimize `objective` starting from `p0`, which must lie on the simplex.
    ///
    /// The starting point is evaluated first, so the returned point is never worse than `p0`.
    /// Failed evaluations are not errors; they are counted on the result.
    pub fn run<O: Objective>(&self, objective: &mut O, p0: GroupWeights) -> Result<SearchResult> {
        p0.validate()?;
        let hyper = &self.hyper;
        let span = tracing::info_span!("search");
        let _enter = span.enter();
        tracing::info!(
            "Starting weight search over {} groups \
             (steps = {}, lr = {}, momentum = {}, patience = {})",
            p0.len(),
            hyper.steps,
            hyper.lr,
            hyper.momentum,
            hyper.patience
        );

        let mut trajectory = Trajectory::new();
        let mut state = OptimizerState::new(p0);
        let mut step_failures = 0;
        let mut regularized_steps = 0;

        let mut gradient = match objective.evaluate(&state.current) {
            Ok(eval) if eval.loss.is_finite() => {
                if eval.regularized {
                    regularized_steps += 1;
                }
                state = state.observe(eval.loss);
                trajectory.push(StepRecord::new(
                    0,
                    &state.current,
                    eval.loss,
                    norm(&eval.gradient),
                    0,
                    None,
                    0.0,
                ));
                eval.gradient
            }
            Ok(eval) => {
                tracing::warn!("Validation loss at the starting point is {}", eval.loss);
                return Ok(self.finish(state, Status::DegradedConvergence, 0, 1, 0, trajectory));
            }
            Err(err) => {
                tracing::warn!("Could not evaluate the starting point: {}", err);
                return Ok(self.finish(state, Status::DegradedConvergence, 0, 1, 0, trajectory));
            }
        };

        let mut t = 0;
        let status = loop {
            if self.cancelled() {
                break Status::Cancelled;
            }
            if state.stall_count >= hyper.patience {
                break Status::Converged(Convergence::Patience);
            }
            if state.consecutive_failures >= hyper.max_step_failures {
                break Status::DegradedConvergence;
            }
            if t >= hyper.steps {
                break Status::Converged(Convergence::Budget);
            }
            t += 1;

            let lr = hyper.lr * hyper.failure_backoff.powi(state.consecutive_failures as i32);
            let evaluated = state
                .propose(&gradient, lr, hyper.momentum)
                .and_then(|next| {
                    let eval = objective.evaluate(&next)?;
                    if eval.loss.is_finite() {
                        Ok((next, eval))
                    } else {
                        Err(WeightError::InvalidInput(format!(
                            "validation loss is {}",
                            eval.loss
                        )))
                    }
                });

            match evaluated {
                Ok((next, eval)) => {
                    if eval.regularized {
                        regularized_steps += 1;
                    }
                    let (committed, outcome) = state.commit(next, eval.loss);
                    state = committed;
                    tracing::debug!(
                        "Step {}: loss = {:.6e}, |grad| = {:.3e}, stall = {} ({})",
                        t,
                        eval.loss,
                        norm(&eval.gradient),
                        state.stall_count,
                        outcome
                    );
                    trajectory.push(StepRecord::new(
                        t,
                        &state.current,
                        eval.loss,
                        norm(&eval.gradient),
                        state.stall_count,
                        Some(outcome),
                        lr,
                    ));
                    gradient = eval.gradient;
                }
                Err(err) => {
                    step_failures += 1;
                    state = state.reject();
                    tracing::warn!(
                        "Step {} failed ({} in a row): {}",
                        t,
                        state.consecutive_failures,
                        err
                    );
                    trajectory.push(StepRecord::new(
                        t,
                        &state.current,
                        f64::NAN,
                        f64::NAN,
                        state.stall_count,
                        Some(StepOutcome::Failed),
                        lr,
                    ));
                }
            }
        };

        Ok(self.finish(state, status, t, step_failures, regularized_steps, trajectory))
    }

    fn finish(
        &self,
        state: OptimizerState,
        status: Status,
        steps: usize,
        step_failures: usize,
        regularized_steps: usize,
        trajectory: Trajectory,
    ) -> SearchResult {
        match status {
            Status::DegradedConvergence => tracing::warn!(
                "Search stopped with degraded convergence after {} steps ({} failed)",
                steps,
                step_failures
            ),
            _ => tracing::info!("Search finished after {} steps: {}", steps, status),
        }
        tracing::info!("Best validation loss {:.6e} at {}", state.best_loss, state.best);
        SearchResult {
            p_hat: state.best,
            best_loss: state.best_loss,
            status,
            steps,
            step_failures,
            regularized_steps,
            trajectory,
        }
    }
}

fn norm(v: &Array1<f64>) -> f64 {
    v.dot(v).sqrt()
}
