//! Mapping from group weights to per-example sample weights

use crate::error::{Result, WeightError};
use crate::structs::gprob::GroupProbabilities;
use crate::structs::groups::{GroupIndex, GroupLabel};
use crate::structs::weights::GroupWeights;
use ndarray::{Array1, Array2};

/// How training examples are attributed to groups.
#[derive(Debug, Clone, Copy)]
pub enum Membership<'a> {
    /// Observed labels, already mapped to canonical positions.
    Hard(&'a [usize]),
    /// Soft posteriors over the canonical groups.
    Soft(&'a GroupProbabilities),
}

impl Membership<'_> {
    pub fn len(&self) -> usize {
        match self {
            Membership::Hard(positions) => positions.len(),
            Membership::Soft(g_prob) => g_prob.nrows(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Turns a group-weight vector into importance weights relative to the training proportions.
///
/// The training proportions are taken from the training labels once, at construction, and
/// share the canonical ordering of the [GroupIndex].
#[derive(Debug, Clone)]
pub struct WeightMapper {
    index: GroupIndex,
    p_train: Array1<f64>,
}

impl WeightMapper {
    /// # Errors
    ///
    /// [WeightError::DegenerateGroup] if a known group never occurs in `g_train`, and
    /// [WeightError::GroupMismatch] if `g_train` contains an unknown group.
    pub fn new(index: GroupIndex, g_train: &[GroupLabel]) -> Result<Self> {
        let positions = index.positions(g_train)?;
        let p_train = index.proportions(&positions);
        Self::from_proportions(index, p_train)
    }

    pub fn from_proportions(index: GroupIndex, p_train: Array1<f64>) -> Result<Self> {
        if p_train.len() != index.len() {
            return Err(WeightError::ShapeMismatch(format!(
                "{} training proportions for {} groups",
                p_train.len(),
                index.len()
            )));
        }
        if let Some(j) = p_train.iter().position(|&p| p <= 0.0 || !p.is_finite()) {
            return Err(WeightError::DegenerateGroup {
                label: index.label(j),
            });
        }
        Ok(Self { index, p_train })
    }

    pub fn index(&self) -> &GroupIndex {
        &self.index
    }

    /// Empirical training proportion of every group.
    pub fn p_train(&self) -> &Array1<f64> {
        &self.p_train
    }

    /// The per-group ratio `p_j / p_train_j`.
    pub fn ratios(&self, p: &GroupWeights) -> Result<Array1<f64>> {
        if p.len() != self.p_train.len() {
            return Err(WeightError::ShapeMismatch(format!(
                "weight vector has {} entries for {} groups",
                p.len(),
                self.p_train.len()
            )));
        }
        Ok(p.weights() / &self.p_train)
    }

    /// Deployable weights for hard labels: `w_i = p[g_i] / p_train[g_i]`.
    pub fn return_weights(&self, p: &GroupWeights, groups: &[GroupLabel]) -> Result<Array1<f64>> {
        let positions = self.index.positions(groups)?;
        self.hard_weights(p, &positions)
    }

    /// Same as [WeightMapper::return_weights] for labels already mapped to positions.
    pub fn hard_weights(&self, p: &GroupWeights, positions: &[usize]) -> Result<Array1<f64>> {
        let ratios = self.ratios(p)?;
        Ok(positions.iter().map(|&j| ratios[j]).collect())
    }

    /// Expected hard weight under the soft posterior:
    /// `w_i = Σ_j g_prob[i, j] · p[j] / p_train[j]`.
    pub fn soft_weights(
        &self,
        p: &GroupWeights,
        g_prob: &GroupProbabilities,
    ) -> Result<Array1<f64>> {
        if g_prob.ngroups() != self.p_train.len() {
            return Err(WeightError::ShapeMismatch(format!(
                "group probabilities have {} columns for {} groups",
                g_prob.ngroups(),
                self.p_train.len()
            )));
        }
        let ratios = self.ratios(p)?;
        Ok(g_prob.matrix().dot(&ratios))
    }

    pub fn weights(&self, p: &GroupWeights, membership: Membership<'_>) -> Result<Array1<f64>> {
        match membership {
            Membership::Hard(positions) => self.hard_weights(p, positions),
            Membership::Soft(g_prob) => self.soft_weights(p, g_prob),
        }
    }

    /// Jacobian of the sample weights with respect to `p`, an `n × k` matrix with entries
    /// `∂w_i / ∂p_j`. The mapping is linear in `p`, so this does not depend on `p`.
    pub fn jacobian(&self, membership: Membership<'_>) -> Array2<f64> {
        let k = self.p_train.len();
        match membership {
            Membership::Hard(positions) => {
                let mut jac = Array2::zeros((positions.len(), k));
                for (i, &j) in positions.iter().enumerate() {
                    jac[[i, j]] = 1.0 / self.p_train[j];
                }
                jac
            }
            Membership::Soft(g_prob) => g_prob.matrix() / &self.p_train,
        }
    }
}
