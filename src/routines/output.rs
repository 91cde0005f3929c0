use crate::routines::optimizer::{Status, StepOutcome};
use crate::structs::groups::{GroupIndex, GroupLabel};
use crate::structs::weights::GroupWeights;
use csv::WriterBuilder;
use eyre::{Result, WrapErr};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{create_dir_all, File, OpenOptions};
use std::path::Path;

/// A [StepRecord] holds the summary of one optimizer step
/// - `step`: step number, `0` for the starting point
/// - `p`: the committed group weights after the step
/// - `loss`: validation loss at the evaluated point, `NaN` if the step failed
/// - `gradient_norm`: Euclidean norm of the implicit gradient at that point
/// - `stall_count`: consecutive non-improving steps so far
/// - `outcome`: what the step did, `None` for the starting point
/// - `lr`: learning rate the step was taken with
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    step: usize,
    p: GroupWeights,
    loss: f64,
    gradient_norm: f64,
    stall_count: usize,
    outcome: Option<StepOutcome>,
    lr: f64,
}

impl StepRecord {
    pub fn new(
        step: usize,
        p: &GroupWeights,
        loss: f64,
        gradient_norm: f64,
        stall_count: usize,
        outcome: Option<StepOutcome>,
        lr: f64,
    ) -> Self {
        Self {
            step,
            p: p.clone(),
            loss,
            gradient_norm,
            stall_count,
            outcome,
            lr,
        }
    }

    pub fn step(&self) -> usize {
        self.step
    }
    pub fn p(&self) -> &GroupWeights {
        &self.p
    }
    pub fn loss(&self) -> f64 {
        self.loss
    }
    pub fn gradient_norm(&self) -> f64 {
        self.gradient_norm
    }
    pub fn stall_count(&self) -> usize {
        self.stall_count
    }
    pub fn outcome(&self) -> Option<StepOutcome> {
        self.outcome
    }
    pub fn lr(&self) -> f64 {
        self.lr
    }
}

/// This holds every [StepRecord] of a search, in order
#[derive(Debug, Clone, Default, Serialize)]
pub struct Trajectory {
    steps: Vec<StepRecord>,
}

impl Trajectory {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    pub fn steps(&self) -> &[StepRecord] {
        &self.steps
    }

    pub fn push(&mut self, record: StepRecord) {
        self.steps.push(record);
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Losses of the steps that were evaluated successfully.
    pub fn losses(&self) -> Vec<f64> {
        self.steps
            .iter()
            .filter(|s| s.outcome != Some(StepOutcome::Failed))
            .map(|s| s.loss)
            .collect()
    }

    /// Write the trajectory as CSV, one row per step and one `p.<label>` column per group.
    pub fn write(&self, path: &str, index: &GroupIndex) -> Result<()> {
        tracing::debug!("Writing trajectory...");
        let file = create_output_file(path)?;
        let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);

        writer.write_field("step")?;
        writer.write_field("outcome")?;
        writer.write_field("loss")?;
        writer.write_field("gradient_norm")?;
        writer.write_field("stall_count")?;
        writer.write_field("lr")?;
        for label in index.labels() {
            writer.write_field(format!("p.{}", label))?;
        }
        writer.write_record(None::<&[u8]>)?;

        for record in &self.steps {
            writer.write_field(format!("{}", record.step))?;
            match record.outcome {
                Some(outcome) => writer.write_field(format!("{}", outcome))?,
                None => writer.write_field("Start")?,
            }
            writer.write_field(format!("{}", record.loss))?;
            writer.write_field(format!("{}", record.gradient_norm))?;
            writer.write_field(format!("{}", record.stall_count))?;
            writer.write_field(format!("{}", record.lr))?;
            for p in record.p.iter() {
                writer.write_field(format!("{}", p))?;
            }
            writer.write_record(None::<&[u8]>)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Defines the result of a weight search
///
/// `p_hat` is the best point seen, which is always on the simplex. The remaining fields
/// describe how the run went.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub p_hat: GroupWeights,
    /// Validation loss at `p_hat`, infinite if not even the starting point could be evaluated.
    pub best_loss: f64,
    pub status: Status,
    /// Steps taken, failed steps included.
    pub steps: usize,
    pub step_failures: usize,
    /// Evaluations whose gradient needed a ridge-regularized Hessian.
    pub regularized_steps: usize,
    pub trajectory: Trajectory,
}

impl SearchResult {
    /// `p_hat` keyed by group label.
    pub fn p_hat_by_group(&self, index: &GroupIndex) -> BTreeMap<GroupLabel, f64> {
        index.to_map(&self.p_hat)
    }

    pub fn is_degraded(&self) -> bool {
        self.status == Status::DegradedConvergence
    }

    /// Write the full report, trajectory included, as pretty-printed JSON.
    pub fn write_json(&self, path: &str) -> Result<()> {
        tracing::debug!("Writing search report...");
        let file = create_output_file(path)?;
        serde_json::to_writer_pretty(file, self)
            .wrap_err_with(|| format!("Failed to serialize search report to {}", path))?;
        Ok(())
    }
}

fn create_output_file(path: &str) -> Result<File> {
    let path = Path::new(path);
    if let Some(parent) = path.parent() {
        create_dir_all(parent)
            .wrap_err_with(|| format!("Failed to create directories for {:?}", parent))?;
    }
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .wrap_err_with(|| format!("Failed to open file: {:?}", path))
}
