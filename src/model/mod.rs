//! Weighted models that expose the analytic structure needed for implicit differentiation
//!
//! A model is trained by minimizing
//!
//! `L_train(θ; w) = (1/n) Σ_i w_i ℓ(θ; x_i, y_i) + R(θ)`
//!
//! where `R` is an optional penalty. The [DifferentiableModel] trait asks for the pieces of
//! this objective that the implicit gradient needs: per-example loss gradients, the Hessian
//! of the data term and the penalty's gradient and Hessian. Everything else has a default
//! implementation in terms of those.

use crate::error::{Result, WeightError};
use ndarray::{concatenate, Array1, Array2, Axis};

pub mod linear;
pub mod logistic;

pub use linear::WeightedLinearRegression;
pub use logistic::WeightedLogisticRegression;

/// Capability interface for a weighted risk minimizer.
///
/// Parameters are a flat vector `θ`; implementations decide the layout (the bundled models
/// put the intercept first).
pub trait DifferentiableModel {
    /// Fit the model with per-example sample weights. Blocks until the fit is done.
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>, sample_weight: &Array1<f64>) -> Result<()>;

    /// Predictions for new data (probabilities for classifiers).
    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>>;

    /// Fitted parameters `θ*`.
    fn params(&self) -> Result<&Array1<f64>>;

    /// Unweighted per-example loss `ℓ(θ*; x_i, y_i)`.
    fn per_example_loss(&self, x: &Array2<f64>, y: &Array1<f64>) -> Result<Array1<f64>>;

    /// Per-example loss gradients `∇_θ ℓ(θ*; x_i, y_i)`, an `n × d` matrix.
    fn per_example_gradients(&self, x: &Array2<f64>, y: &Array1<f64>) -> Result<Array2<f64>>;

    /// Hessian of the weighted data term `(1/n) Σ_i w_i ℓ_i` with respect to `θ`.
    fn loss_hessian(&self, x: &Array2<f64>, y: &Array1<f64>, w: &Array1<f64>)
        -> Result<Array2<f64>>;

    /// Gradient of the penalty `R` at `θ*`.
    fn penalty_gradient(&self) -> Result<Array1<f64>>;

    /// Hessian of the penalty `R` at `θ*`.
    fn penalty_hessian(&self) -> Result<Array2<f64>>;

    /// Weighted mean loss `(1/n) Σ_i w_i ℓ_i`, without the penalty.
    fn weighted_loss(&self, x: &Array2<f64>, y: &Array1<f64>, w: &Array1<f64>) -> Result<f64> {
        check_weights(x, w)?;
        let losses = self.per_example_loss(x, y)?;
        Ok(losses.dot(w) / x.nrows() as f64)
    }

    /// Gradient of the weighted data term with respect to `θ`.
    fn loss_gradient(
        &self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        w: &Array1<f64>,
    ) -> Result<Array1<f64>> {
        check_weights(x, w)?;
        let grads = self.per_example_gradients(x, y)?;
        Ok(grads.t().dot(w) / x.nrows() as f64)
    }

    /// Jacobian of [DifferentiableModel::loss_gradient] with respect to the sample weights,
    /// a `d × n` matrix.
    fn weight_jacobian(&self, x: &Array2<f64>, y: &Array1<f64>) -> Result<Array2<f64>> {
        let grads = self.per_example_gradients(x, y)?;
        Ok(grads.reversed_axes() / x.nrows() as f64)
    }

    /// Gradient of the full training objective. Zero at a stationary fit.
    fn training_gradient(
        &self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        w: &Array1<f64>,
    ) -> Result<Array1<f64>> {
        Ok(self.loss_gradient(x, y, w)? + self.penalty_gradient()?)
    }

    /// Hessian of the full training objective.
    fn training_hessian(
        &self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        w: &Array1<f64>,
    ) -> Result<Array2<f64>> {
        Ok(self.loss_hessian(x, y, w)? + self.penalty_hessian()?)
    }
}

/// Prepend a column of ones for the intercept.
pub(crate) fn with_intercept(x: &Array2<f64>) -> Array2<f64> {
    let ones = Array2::ones((x.nrows(), 1));
    concatenate![Axis(1), ones, *x]
}

/// Check that a weight vector fits the data and is usable for a fit.
pub(crate) fn check_weights(x: &Array2<f64>, w: &Array1<f64>) -> Result<()> {
    if w.len() != x.nrows() {
        return Err(WeightError::ShapeMismatch(format!(
            "{} sample weights for {} rows",
            w.len(),
            x.nrows()
        )));
    }
    if w.iter().any(|v| !v.is_finite() || *v < 0.0) {
        return Err(WeightError::InvalidInput(
            "sample weights must be finite and non-negative".to_string(),
        ));
    }
    Ok(())
}

/// `Xᵀ diag(c) X / n`.
pub(crate) fn weighted_gram(xa: &Array2<f64>, c: &Array1<f64>) -> Array2<f64> {
    let scaled = xa * &c.view().insert_axis(Axis(1));
    xa.t().dot(&scaled) / xa.nrows() as f64
}

/// Penalty `(alpha / 2) ||θ_{1..}||²` that leaves the intercept (index 0) unpenalized.
pub(crate) fn ridge_gradient(theta: &Array1<f64>, alpha: f64) -> Array1<f64> {
    let mut grad = theta * alpha;
    grad[0] = 0.0;
    grad
}

pub(crate) fn ridge_hessian(d: usize, alpha: f64) -> Array2<f64> {
    let mut hess = Array2::<f64>::eye(d) * alpha;
    hess[[0, 0]] = 0.0;
    hess
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn intercept_column_comes_first() {
        let x = array![[2.0, 3.0], [4.0, 5.0]];
        assert_eq!(with_intercept(&x), array![[1.0, 2.0, 3.0], [1.0, 4.0, 5.0]]);
    }

    #[test]
    fn ridge_leaves_intercept_unpenalized() {
        let hess = ridge_hessian(3, 0.5);
        assert_eq!(hess, array![[0.0, 0.0, 0.0], [0.0, 0.5, 0.0], [0.0, 0.0, 0.5]]);
        assert_eq!(ridge_gradient(&array![1.0, 2.0, -4.0], 0.5), array![0.0, 1.0, -2.0]);
    }
}
