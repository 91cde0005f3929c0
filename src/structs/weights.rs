use crate::error::{Result, WeightError};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::ops::{Index, IndexMut};

/// Tolerance used when checking that a vector lies on the probability simplex.
pub const SIMPLEX_TOLERANCE: f64 = 1e-6;

/// The group-weight vector `p`, one probability per group.
///
/// Entries follow the canonical ordering of a [crate::structs::groups::GroupIndex].
/// It is a thin wrapper around [ndarray::Array1<f64>] so that vector arithmetic
/// (gradient steps, momentum, projection) stays direct.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupWeights {
    weights: Array1<f64>,
}

impl Default for GroupWeights {
    fn default() -> Self {
        Self {
            weights: Array1::zeros(0),
        }
    }
}

impl GroupWeights {
    pub fn new(weights: Array1<f64>) -> Self {
        Self { weights }
    }

    /// The uniform distribution over `k` groups.
    pub fn uniform(k: usize) -> Self {
        Self {
            weights: Array1::from_elem(k, 1.0 / k as f64),
        }
    }

    /// Create a new [GroupWeights] instance from a vector of weights.
    pub fn from_vec(weights: Vec<f64>) -> Self {
        Self {
            weights: Array1::from_vec(weights),
        }
    }

    /// Get a reference to the weights.
    pub fn weights(&self) -> &Array1<f64> {
        &self.weights
    }

    /// Get a mutable reference to the weights.
    pub fn weights_mut(&mut self) -> &mut Array1<f64> {
        &mut self.weights
    }

    /// Get the number of groups.
    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// Get a vector representation of the weights.
    pub fn to_vec(&self) -> Vec<f64> {
        self.weights.to_vec()
    }

    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.weights.iter().cloned()
    }

    pub fn sum(&self) -> f64 {
        self.weights.sum()
    }

    /// Check that every entry is finite and non-negative and that the entries sum to one.
    pub fn validate(&self) -> Result<()> {
        if self.weights.is_empty() {
            return Err(WeightError::InvalidProbabilityVector(
                "vector is empty".to_string(),
            ));
        }
        if let Some(bad) = self.weights.iter().find(|w| !w.is_finite() || **w < 0.0) {
            return Err(WeightError::InvalidProbabilityVector(format!(
                "entry {} is negative or not finite",
                bad
            )));
        }
        let sum = self.sum();
        if (sum - 1.0).abs() > SIMPLEX_TOLERANCE {
            return Err(WeightError::InvalidProbabilityVector(format!(
                "entries sum to {} instead of 1",
                sum
            )));
        }
        Ok(())
    }

    pub fn is_feasible(&self) -> bool {
        self.validate().is_ok()
    }

    /// Euclidean distance to another weight vector of the same length.
    pub fn distance(&self, other: &GroupWeights) -> f64 {
        self.weights
            .iter()
            .zip(other.weights.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f64>()
            .sqrt()
    }
}

impl Serialize for GroupWeights {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_vec().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for GroupWeights {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let weights_vec = Vec::<f64>::deserialize(deserializer)?;
        Ok(Self::from_vec(weights_vec))
    }
}

impl std::fmt::Display for GroupWeights {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.4}", self.weights)
    }
}

impl From<Vec<f64>> for GroupWeights {
    fn from(weights: Vec<f64>) -> Self {
        Self::from_vec(weights)
    }
}

impl From<Array1<f64>> for GroupWeights {
    fn from(weights: Array1<f64>) -> Self {
        Self { weights }
    }
}

impl Index<usize> for GroupWeights {
    type Output = f64;

    fn index(&self, index: usize) -> &Self::Output {
        &self.weights[index]
    }
}

impl IndexMut<usize> for GroupWeights {
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.weights[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_is_feasible() {
        let p = GroupWeights::uniform(4);
        assert_eq!(p.len(), 4);
        assert!((p.sum() - 1.0).abs() < 1e-12);
        assert!(p.is_feasible());
    }

    #[test]
    fn rejects_negative_entries() {
        let p = GroupWeights::from_vec(vec![1.2, -0.2]);
        assert!(matches!(
            p.validate(),
            Err(WeightError::InvalidProbabilityVector(_))
        ));
    }

    #[test]
    fn rejects_wrong_sum() {
        let p = GroupWeights::from_vec(vec![0.5, 0.4]);
        assert!(p.validate().is_err());
        assert!(GroupWeights::default().validate().is_err());
    }

    #[test]
    fn serializes_as_plain_list() {
        let p = GroupWeights::from_vec(vec![0.25, 0.75]);
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, "[0.25,0.75]");
        let back: GroupWeights = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }
}
