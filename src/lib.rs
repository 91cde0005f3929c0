//! Group-weight search under group-distribution shift
//!
//! A model trained on data with group proportions `p_train` should perform well on a known
//! target distribution `p_ood`. This crate searches for per-group weights `p` on the
//! probability simplex that minimize the validation loss of a model trained with the induced
//! per-example weights `p[g] / p_train[g]`. Gradients with respect to `p` come from implicitly
//! differentiating the model's optimality condition.
//!
//! The entry point is [searcher::WeightSearcher]:
//!
//! ```no_run
//! use optweights::prelude::*;
//! use std::collections::BTreeMap;
//! # fn splits() -> (Dataset, Dataset) { unimplemented!() }
//!
//! let (train, val) = splits();
//! let p_ood = BTreeMap::from([(1, 0.5), (2, 0.5)]);
//! let model = WeightedLogisticRegression::default();
//! let mut searcher = WeightSearcher::new(train, val, &p_ood, model)?;
//! let p_hat = searcher.optimize_weights(100, 0.1, 0.5, 5, None)?;
//! let w = searcher.return_weights(&p_hat, searcher.train().groups())?;
//! # Ok::<(), optweights::error::WeightError>(())
//! ```

pub mod entrypoints;
pub mod error;
pub mod logger;
pub mod model;
pub mod routines;
pub mod searcher;
pub mod structs;

pub mod prelude {
    pub use crate::entrypoints::fit;
    pub use crate::error::{Result, WeightError};
    pub use crate::logger;
    pub use crate::model::{
        DifferentiableModel, WeightedLinearRegression, WeightedLogisticRegression,
    };
    pub use crate::routines::ift::{ImplicitGradient, ImplicitGradientEngine};
    pub use crate::routines::mapping::{Membership, WeightMapper};
    pub use crate::routines::optimizer::{
        Convergence, Hyperparameters, Objective, OptimizerState, ProjectedMomentumOptimizer,
        Status, StepOutcome,
    };
    pub use crate::routines::output::{SearchResult, StepRecord, Trajectory};
    pub use crate::routines::settings::{self, Settings};
    pub use crate::routines::simplex::project;
    pub use crate::searcher::WeightSearcher;
    pub use crate::structs::dataset::Dataset;
    pub use crate::structs::gprob::GroupProbabilities;
    pub use crate::structs::groups::{GroupIndex, GroupLabel};
    pub use crate::structs::weights::GroupWeights;
}

//Tests
#[cfg(test)]
mod tests;
