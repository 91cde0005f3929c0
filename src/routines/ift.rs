//! Gradient of the validation loss with respect to the group weights
//!
//! The fitted parameters satisfy `∇_θ L_train(θ*; w(p)) = 0`. Differentiating that condition
//! gives `dθ*/dp = -H⁻¹ J`, where `H` is the Hessian of the training objective and
//! `J = ∂(∇_θ L_train)/∂p`. By the chain rule
//!
//! `d L_val / dp = -Jᵀ H⁻¹ ∇_θ L_val(θ*)`,
//!
//! which costs one symmetric solve per gradient.

use crate::error::{Result, WeightError};
use crate::model::DifferentiableModel;
use crate::routines::linalg::regularized_solve_vec;
use crate::routines::mapping::{Membership, WeightMapper};
use crate::structs::dataset::Dataset;
use crate::structs::weights::GroupWeights;
use ndarray::Array1;

/// Numerical health of the Hessian solve behind one gradient.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HessianDiagnostics {
    /// Condition estimate of the matrix that was factorized.
    pub condition: f64,
    /// Ridge added to the Hessian diagonal, zero if none was needed.
    pub ridge: f64,
    /// Largest absolute entry of the training gradient at the fitted parameters.
    pub stationarity: f64,
}

#[derive(Debug, Clone)]
pub struct ImplicitGradient {
    pub gradient: Array1<f64>,
    pub validation_loss: f64,
    pub diagnostics: HessianDiagnostics,
}

impl ImplicitGradient {
    /// True when the Hessian needed a ridge, i.e. the gradient is approximate.
    pub fn is_regularized(&self) -> bool {
        self.diagnostics.ridge > 0.0
    }
}

/// Computes implicit gradients for a fitted [DifferentiableModel].
#[derive(Debug, Clone)]
pub struct ImplicitGradientEngine {
    base_ridge: f64,
    max_condition: f64,
    max_attempts: usize,
    stationarity_tol: f64,
}

impl Default for ImplicitGradientEngine {
    fn default() -> Self {
        Self {
            base_ridge: 1e-8,
            max_condition: 1e12,
            max_attempts: 8,
            stationarity_tol: 1e-6,
        }
    }
}

impl ImplicitGradientEngine {
    pub fn new(base_ridge: f64, max_condition: f64) -> Result<Self> {
        if base_ridge.is_nan() || base_ridge <= 0.0 || base_ridge.is_infinite() {
            return Err(WeightError::InvalidHyperparameter {
                name: "ridge",
                reason: format!("must be positive and finite, got {}", base_ridge),
            });
        }
        if max_condition.is_nan() || max_condition <= 1.0 {
            return Err(WeightError::InvalidHyperparameter {
                name: "max_condition",
                reason: format!("must be greater than one, got {}", max_condition),
            });
        }
        Ok(Self {
            base_ridge,
            max_condition,
            ..Default::default()
        })
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_stationarity_tol(mut self, stationarity_tol: f64) -> Self {
        self.stationarity_tol = stationarity_tol;
        self
    }

    pub fn base_ridge(&self) -> f64 {
        self.base_ridge
    }

    pub fn max_condition(&self) -> f64 {
        self.max_condition
    }

    /// Gradient of the weighted validation loss with respect to `p`.
    ///
    /// `model` must already be fitted on `train` with the sample weights that `mapper` derives
    /// from `p` and `membership`. `w_val` weights the validation loss and stays fixed for a
    /// whole run.
    ///
    /// # Errors
    ///
    /// Shape errors are structural. [WeightError::SingularHessian] is returned when no ridge
    /// within the attempt budget makes `H` usable; the optimizer treats that as a failed step.
    #[allow(clippy::too_many_arguments)]
    pub fn gradient<M: DifferentiableModel>(
        &self,
        model: &M,
        train: &Dataset,
        membership: Membership<'_>,
        mapper: &WeightMapper,
        val: &Dataset,
        w_val: &Array1<f64>,
        p: &GroupWeights,
    ) -> Result<ImplicitGradient> {
        if membership.len() != train.len() {
            return Err(WeightError::ShapeMismatch(format!(
                "group membership covers {} examples, training split has {}",
                membership.len(),
                train.len()
            )));
        }
        let w_train = mapper.weights(p, membership)?;

        let stationarity = model
            .training_gradient(train.x(), train.y(), &w_train)?
            .iter()
            .fold(0.0_f64, |acc, g| acc.max(g.abs()));
        if stationarity > self.stationarity_tol {
            tracing::warn!(
                "Fitted model is not stationary (max |gradient| = {:e}), \
                 implicit gradient is approximate",
                stationarity
            );
        }

        let hessian = model.training_hessian(train.x(), train.y(), &w_train)?;
        let val_gradient = model.loss_gradient(val.x(), val.y(), w_val)?;
        let validation_loss = model.weighted_loss(val.x(), val.y(), w_val)?;

        let (v, ridge, condition) = regularized_solve_vec(
            &hessian,
            &val_gradient,
            self.base_ridge,
            self.max_condition,
            self.max_attempts,
        )?;
        if ridge > 0.0 {
            tracing::warn!(
                "Training Hessian is ill-conditioned, solved with ridge {:e} (condition {:e})",
                ridge,
                condition
            );
        }
        tracing::trace!("Hessian condition estimate {:e}", condition);

        // d × k: sensitivity of the training gradient to each group weight
        let jacobian = model
            .weight_jacobian(train.x(), train.y())?
            .dot(&mapper.jacobian(membership));
        let gradient = -jacobian.t().dot(&v);

        if !validation_loss.is_finite() || gradient.iter().any(|g| !g.is_finite()) {
            return Err(WeightError::InvalidInput(
                "implicit gradient is not finite".to_string(),
            ));
        }

        Ok(ImplicitGradient {
            gradient,
            validation_loss,
            diagnostics: HessianDiagnostics {
                condition,
                ridge,
                stationarity,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::WeightedLinearRegression;
    use crate::structs::groups::GroupIndex;
    use ndarray::array;

    fn splits() -> (Dataset, Dataset) {
        let train = Dataset::new(
            array![[0.0], [1.0], [2.0], [0.5], [1.5], [2.5]],
            array![0.1, 1.2, 1.9, 2.6, 3.4, 4.6],
            vec![1, 1, 1, 2, 2, 2],
        )
        .unwrap();
        let val = Dataset::new(
            array![[0.2], [1.8], [0.7], [2.2]],
            array![0.3, 1.7, 2.8, 4.3],
            vec![1, 1, 2, 2],
        )
        .unwrap();
        (train, val)
    }

    #[test]
    fn rejects_bad_hyperparameters() {
        assert!(ImplicitGradientEngine::new(0.0, 1e12).is_err());
        assert!(ImplicitGradientEngine::new(1e-8, 0.5).is_err());
        assert!(ImplicitGradientEngine::new(1e-8, 1e12).is_ok());
    }

    #[test]
    fn matches_finite_difference_for_linear_model() {
        let (train, val) = splits();
        let index = GroupIndex::new(vec![1, 2]);
        let positions = index.positions(train.groups()).unwrap();
        let mapper = WeightMapper::new(index, train.groups()).unwrap();
        let membership = Membership::Hard(&positions);
        let w_val = Array1::ones(val.len());
        let engine = ImplicitGradientEngine::default();

        let val_loss = |p: &GroupWeights| {
            let mut model = WeightedLinearRegression::new(0.1);
            let w = mapper.weights(p, membership).unwrap();
            model.fit(train.x(), train.y(), &w).unwrap();
            model.weighted_loss(val.x(), val.y(), &w_val).unwrap()
        };

        let p = GroupWeights::from_vec(vec![0.4, 0.6]);
        let mut model = WeightedLinearRegression::new(0.1);
        model
            .fit(train.x(), train.y(), &mapper.weights(&p, membership).unwrap())
            .unwrap();
        let result = engine
            .gradient(&model, &train, membership, &mapper, &val, &w_val, &p)
            .unwrap();
        assert!(!result.is_regularized());
        assert!((result.validation_loss - val_loss(&p)).abs() < 1e-12);

        let h = 1e-6;
        for j in 0..2 {
            let mut up = p.clone();
            up[j] += h;
            let mut down = p.clone();
            down[j] -= h;
            let fd = (val_loss(&up) - val_loss(&down)) / (2.0 * h);
            let analytic = result.gradient[j];
            assert!(
                (fd - analytic).abs() <= 1e-5 * fd.abs().max(1.0),
                "group {}: finite difference {} vs implicit {}",
                j,
                fd,
                analytic
            );
        }
    }

    #[test]
    fn singular_hessian_is_regularized() {
        let (train, val) = splits();
        // Duplicated feature columns make the unpenalized Hessian exactly singular
        let duplicate = |d: &Dataset| {
            let x = ndarray::concatenate![ndarray::Axis(1), *d.x(), *d.x()];
            Dataset::new(x, d.y().clone(), d.groups().to_vec()).unwrap()
        };
        let (train, val) = (duplicate(&train), duplicate(&val));
        let index = GroupIndex::new(vec![1, 2]);
        let positions = index.positions(train.groups()).unwrap();
        let mapper = WeightMapper::new(index, train.groups()).unwrap();
        let membership = Membership::Hard(&positions);
        let w_val = Array1::ones(val.len());
        let p = GroupWeights::from_vec(vec![0.4, 0.6]);

        let mut model = WeightedLinearRegression::new(0.0);
        model
            .fit(train.x(), train.y(), &mapper.weights(&p, membership).unwrap())
            .unwrap();
        let result = ImplicitGradientEngine::default()
            .gradient(&model, &train, membership, &mapper, &val, &w_val, &p)
            .unwrap();

        assert!(result.is_regularized());
        assert!(result.diagnostics.ridge > 0.0);
        assert!(result.diagnostics.condition <= 1e12);
        assert!(result.gradient.iter().all(|g| g.is_finite()));
        assert!(result.validation_loss.is_finite());
    }

    #[test]
    fn membership_must_cover_training_split() {
        let (train, val) = splits();
        let index = GroupIndex::new(vec![1, 2]);
        let mapper = WeightMapper::new(index, train.groups()).unwrap();
        let positions = vec![0, 1];
        let p = GroupWeights::uniform(2);
        let mut model = WeightedLinearRegression::new(0.1);
        model
            .fit(train.x(), train.y(), &Array1::ones(train.len()))
            .unwrap();
        let result = ImplicitGradientEngine::default().gradient(
            &model,
            &train,
            Membership::Hard(&positions),
            &mapper,
            &val,
            &Array1::ones(val.len()),
            &p,
        );
        assert!(matches!(result, Err(WeightError::ShapeMismatch(_))));
    }
}
