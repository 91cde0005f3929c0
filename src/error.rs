//! Error types for the weight search

use crate::structs::groups::GroupLabel;
use thiserror::Error;

/// Fatal errors raised by the weight search.
///
/// Numerical trouble inside a single optimizer step is not represented here: regularized
/// Hessians, failed steps and degraded convergence are reported on
/// [crate::routines::output::SearchResult] instead.
#[derive(Debug, Error)]
pub enum WeightError {
    #[error("Invalid probability vector: {0}")]
    InvalidProbabilityVector(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Group {label} has zero empirical proportion in the training split")]
    DegenerateGroup { label: GroupLabel },

    #[error("Group mismatch: {0}")]
    GroupMismatch(String),

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Invalid hyperparameter {name}: {reason}")]
    InvalidHyperparameter { name: &'static str, reason: String },

    #[error("Model fit failed: {0}")]
    FitFailure(String),

    #[error("Model has not been fitted")]
    NotFitted,

    #[error("Hessian is singular after ridge regularization (condition estimate {condition:e})")]
    SingularHessian { condition: f64 },

    #[error("Linear algebra failure: {0}")]
    Linalg(#[from] linfa_linalg::LinalgError),
}

/// Result type for weight search operations
pub type Result<T> = std::result::Result<T, WeightError>;
