use crate::error::{Result, WeightError};
use crate::model::DifferentiableModel;
use crate::routines::ift::ImplicitGradientEngine;
use crate::routines::mapping::{Membership, WeightMapper};
use crate::routines::optimizer::{
    Evaluation, Hyperparameters, Objective, ProjectedMomentumOptimizer,
};
use crate::routines::output::SearchResult;
use crate::structs::dataset::Dataset;
use crate::structs::gprob::GroupProbabilities;
use crate::structs::groups::{validate_distribution, GroupIndex, GroupLabel};
use crate::structs::weights::GroupWeights;
use ndarray::Array1;
use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Finds group weights that minimize the validation loss of a weighted model.
///
/// Owns both data splits, the target distribution `p_ood` and the model. The canonical group
/// ordering is the ascending order of the `p_ood` keys and is fixed for the lifetime of the
/// searcher. Training examples are attributed to groups by their observed labels, or by a
/// soft posterior once one is set with [WeightSearcher::set_g_prob].
///
/// The validation loss is weighted by `p_ood[g] / p_val[g]` so that it estimates the loss
/// under the target distribution.
#[derive(Debug, Clone)]
pub struct WeightSearcher<M: DifferentiableModel> {
    train: Dataset,
    val: Dataset,
    index: GroupIndex,
    p_ood: GroupWeights,
    mapper: WeightMapper,
    train_positions: Vec<usize>,
    w_val: Array1<f64>,
    g_prob: Option<GroupProbabilities>,
    engine: ImplicitGradientEngine,
    model: M,
}

impl<M: DifferentiableModel> WeightSearcher<M> {
    /// # Errors
    ///
    /// All structural problems are reported here, before any fitting:
    /// an invalid `p_ood`, labels outside `p_ood`, a group without training examples
    /// ([WeightError::DegenerateGroup]) and splits with different feature counts.
    pub fn new(
        train: Dataset,
        val: Dataset,
        p_ood: &BTreeMap<GroupLabel, f64>,
        model: M,
    ) -> Result<Self> {
        validate_distribution(p_ood)?;
        let index = GroupIndex::from_distribution(p_ood)?;
        let p_ood = index.to_weights(p_ood)?;

        if train.n_features() != val.n_features() {
            return Err(WeightError::ShapeMismatch(format!(
                "training split has {} features, validation split has {}",
                train.n_features(),
                val.n_features()
            )));
        }

        let train_positions = index.positions(train.groups())?;
        let mapper = WeightMapper::new(index.clone(), train.groups())?;

        let val_positions = index.positions(val.groups())?;
        let p_val = index.proportions(&val_positions);
        let w_val = val_positions
            .iter()
            .map(|&j| p_ood[j] / p_val[j])
            .collect();

        tracing::debug!(
            "Groups {:?}: p_train = {}, p_val = {}, p_ood = {}",
            index.labels(),
            mapper.p_train(),
            p_val,
            p_ood
        );

        Ok(Self {
            train,
            val,
            index,
            p_ood,
            mapper,
            train_positions,
            w_val,
            g_prob: None,
            engine: ImplicitGradientEngine::default(),
            model,
        })
    }

    pub fn with_engine(mut self, engine: ImplicitGradientEngine) -> Self {
        self.engine = engine;
        self
    }

    /// Use soft group posteriors for the training split from now on.
    ///
    /// `g_prob` must have one row per training example and one column per group.
    pub fn set_g_prob(&mut self, g_prob: GroupProbabilities) -> Result<()> {
        if g_prob.nrows() != self.train.len() || g_prob.ngroups() != self.index.len() {
            return Err(WeightError::ShapeMismatch(format!(
                "group probabilities are {} × {}, expected {} × {}",
                g_prob.nrows(),
                g_prob.ngroups(),
                self.train.len(),
                self.index.len()
            )));
        }
        self.g_prob = Some(g_prob);
        Ok(())
    }

    /// Go back to the observed training labels.
    pub fn clear_g_prob(&mut self) -> Option<GroupProbabilities> {
        self.g_prob.take()
    }

    pub fn g_prob(&self) -> Option<&GroupProbabilities> {
        self.g_prob.as_ref()
    }

    pub fn groups(&self) -> &GroupIndex {
        &self.index
    }

    pub fn p_ood(&self) -> &GroupWeights {
        &self.p_ood
    }

    pub fn p_train(&self) -> &Array1<f64> {
        self.mapper.p_train()
    }

    pub fn validation_weights(&self) -> &Array1<f64> {
        &self.w_val
    }

    pub fn train(&self) -> &Dataset {
        &self.train
    }

    pub fn val(&self) -> &Dataset {
        &self.val
    }

    /// The model, fitted at the last evaluated weights.
    pub fn model(&self) -> &M {
        &self.model
    }

    /// Search for `p_hat` and return it.
    ///
    /// Starts from `p_init`, or from the uniform distribution. The result is always on the
    /// simplex; if the search degrades the best point seen so far is returned.
    pub fn optimize_weights(
        &mut self,
        steps: usize,
        lr: f64,
        momentum: f64,
        patience: usize,
        p_init: Option<GroupWeights>,
    ) -> Result<GroupWeights> {
        let hyper = Hyperparameters::new(steps, lr, momentum, patience);
        Ok(self.optimize(&hyper, p_init, None)?.p_hat)
    }

    /// Search for `p_hat` and return the full run report.
    ///
    /// A raised `stop` flag ends the search at the top of the next step.
    pub fn optimize(
        &mut self,
        hyper: &Hyperparameters,
        p_init: Option<GroupWeights>,
        stop: Option<Arc<AtomicBool>>,
    ) -> Result<SearchResult> {
        let mut optimizer = ProjectedMomentumOptimizer::new(*hyper)?;
        if let Some(stop) = stop {
            optimizer = optimizer.with_stop_flag(stop);
        }

        let p0 = match p_init {
            Some(p) if p.len() != self.index.len() => {
                return Err(WeightError::ShapeMismatch(format!(
                    "initial weights have {} entries for {} groups",
                    p.len(),
                    self.index.len()
                )))
            }
            Some(p) => p,
            None => GroupWeights::uniform(self.index.len()),
        };

        let membership = match &self.g_prob {
            Some(g_prob) => Membership::Soft(g_prob),
            None => Membership::Hard(&self.train_positions),
        };
        let mut objective = SearchObjective {
            train: &self.train,
            val: &self.val,
            membership,
            mapper: &self.mapper,
            w_val: &self.w_val,
            engine: &self.engine,
            model: &mut self.model,
        };
        let result = optimizer.run(&mut objective, p0)?;

        // leave the model fitted at the returned weights
        let w = self.mapper.weights(&result.p_hat, membership)?;
        if let Err(err) = self.model.fit(self.train.x(), self.train.y(), &w) {
            tracing::warn!("Could not refit the model at the returned weights: {}", err);
        }
        Ok(result)
    }

    /// Per-example training weights for `p` and the observed labels `groups`.
    pub fn return_weights(&self, p: &GroupWeights, groups: &[GroupLabel]) -> Result<Array1<f64>> {
        self.mapper.return_weights(p, groups)
    }

    /// Training weights for `p` under the current group attribution, soft if `g_prob` is set.
    pub fn training_weights(&self, p: &GroupWeights) -> Result<Array1<f64>> {
        self.mapper.weights(p, self.membership())
    }

    /// The closed-form baseline `p_ood[g] / p_train[g]` for every training example.
    pub fn analytic_weights(&self) -> Result<Array1<f64>> {
        self.mapper.hard_weights(&self.p_ood, &self.train_positions)
    }

    /// Fit the model at `p` and return the weighted validation loss.
    pub fn validation_loss(&mut self, p: &GroupWeights) -> Result<f64> {
        let w = self.training_weights(p)?;
        self.model.fit(self.train.x(), self.train.y(), &w)?;
        self.model
            .weighted_loss(self.val.x(), self.val.y(), &self.w_val)
    }

    fn membership(&self) -> Membership<'_> {
        match &self.g_prob {
            Some(g_prob) => Membership::Soft(g_prob),
            None => Membership::Hard(&self.train_positions),
        }
    }
}

/// Refit, then implicit gradient, for one point of the search.
struct SearchObjective<'a, M: DifferentiableModel> {
    train: &'a Dataset,
    val: &'a Dataset,
    membership: Membership<'a>,
    mapper: &'a WeightMapper,
    w_val: &'a Array1<f64>,
    engine: &'a ImplicitGradientEngine,
    model: &'a mut M,
}

impl<M: DifferentiableModel> Objective for SearchObjective<'_, M> {
    fn evaluate(&mut self, p: &GroupWeights) -> Result<Evaluation> {
        let w = self.mapper.weights(p, self.membership)?;
        self.model.fit(self.train.x(), self.train.y(), &w)?;
        let implicit = self.engine.gradient(
            &*self.model,
            self.train,
            self.membership,
            self.mapper,
            self.val,
            self.w_val,
            p,
        )?;
        Ok(Evaluation {
            loss: implicit.validation_loss,
            regularized: implicit.is_regularized(),
            gradient: implicit.gradient,
        })
    }
}
