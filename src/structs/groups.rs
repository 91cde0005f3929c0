use crate::error::{Result, WeightError};
use crate::structs::weights::{GroupWeights, SIMPLEX_TOLERANCE};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A group label as found in the data, e.g. `1` or `2`.
pub type GroupLabel = u32;

/// The canonical group ordering.
///
/// Labels are stored in ascending order and position `i` of every group-indexed vector
/// (`p`, columns of the group-probability matrix, empirical proportions) refers to
/// `labels[i]`. The ordering is fixed once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupIndex {
    labels: Vec<GroupLabel>,
}

impl GroupIndex {
    pub fn new(labels: impl IntoIterator<Item = GroupLabel>) -> Self {
        let mut labels: Vec<GroupLabel> = labels.into_iter().collect();
        labels.sort_unstable();
        labels.dedup();
        Self { labels }
    }

    /// Build the ordering from the keys of a target distribution.
    pub fn from_distribution(distribution: &BTreeMap<GroupLabel, f64>) -> Result<Self> {
        if distribution.is_empty() {
            return Err(WeightError::InvalidProbabilityVector(
                "target distribution has no groups".to_string(),
            ));
        }
        Ok(Self::new(distribution.keys().copied()))
    }

    pub fn labels(&self) -> &[GroupLabel] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn position(&self, label: GroupLabel) -> Option<usize> {
        self.labels.binary_search(&label).ok()
    }

    pub fn label(&self, position: usize) -> GroupLabel {
        self.labels[position]
    }

    /// Map every label to its canonical position.
    ///
    /// A label outside the ordering is a structural error.
    pub fn positions(&self, groups: &[GroupLabel]) -> Result<Vec<usize>> {
        groups
            .iter()
            .map(|&label| {
                self.position(label).ok_or_else(|| {
                    WeightError::GroupMismatch(format!(
                        "group {} is not one of the known groups {:?}",
                        label, self.labels
                    ))
                })
            })
            .collect()
    }

    /// Convert a label-keyed distribution into a canonical [GroupWeights].
    ///
    /// The keys must be exactly the known groups and the values must form a probability vector.
    pub fn to_weights(&self, distribution: &BTreeMap<GroupLabel, f64>) -> Result<GroupWeights> {
        if distribution.len() != self.len()
            || distribution.keys().any(|label| self.position(*label).is_none())
        {
            return Err(WeightError::GroupMismatch(format!(
                "distribution groups {:?} do not match {:?}",
                distribution.keys().collect::<Vec<_>>(),
                self.labels
            )));
        }
        let weights = GroupWeights::from_vec(
            self.labels
                .iter()
                .map(|label| distribution[label])
                .collect(),
        );
        weights.validate()?;
        Ok(weights)
    }

    /// Convert a canonical vector back into a label-keyed map.
    pub fn to_map(&self, weights: &GroupWeights) -> BTreeMap<GroupLabel, f64> {
        self.labels
            .iter()
            .copied()
            .zip(weights.iter())
            .collect()
    }

    /// Count how many examples fall in each group, given canonical positions.
    pub fn counts(&self, positions: &[usize]) -> Array1<f64> {
        let mut counts = Array1::zeros(self.len());
        for &j in positions {
            counts[j] += 1.0;
        }
        counts
    }

    /// Empirical group proportions, given canonical positions.
    pub fn proportions(&self, positions: &[usize]) -> Array1<f64> {
        let counts = self.counts(positions);
        if positions.is_empty() {
            return counts;
        }
        counts / positions.len() as f64
    }
}

/// Check that a label-keyed distribution is a probability vector.
pub fn validate_distribution(distribution: &BTreeMap<GroupLabel, f64>) -> Result<()> {
    let sum: f64 = distribution.values().sum();
    if distribution.values().any(|v| !v.is_finite() || *v < 0.0) {
        return Err(WeightError::InvalidProbabilityVector(
            "target distribution has negative or non-finite entries".to_string(),
        ));
    }
    if (sum - 1.0).abs() > SIMPLEX_TOLERANCE {
        return Err(WeightError::InvalidProbabilityVector(format!(
            "target distribution sums to {}",
            sum
        )));
    }
    Ok(())
}
