use crate::error::WeightError;
use crate::model::WeightedLogisticRegression;
use crate::routines::ift::ImplicitGradientEngine;
use crate::routines::optimizer::Hyperparameters;
use config::Config as eConfig;
use serde::Deserialize;
use serde_derive::Serialize;

/// Settings for a weight search
///
/// Read from a TOML file with [read]. Every field has a default, so an empty file is valid.
/// Any field can be overridden from the environment as `OPTWEIGHTS_<SECTION>__<FIELD>`,
/// e.g. `OPTWEIGHTS_CONFIG__PATIENCE=10`.
#[derive(Debug, Deserialize, Clone, Serialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub config: Config,
    #[serde(default)]
    pub model: Model,
    #[serde(default)]
    pub output: Output,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct Config {
    #[serde(default = "default_steps")]
    pub steps: usize,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default = "default_momentum")]
    pub momentum: f64,
    #[serde(default = "default_patience")]
    pub patience: usize,
    #[serde(default = "default_max_step_failures")]
    pub max_step_failures: usize,
    #[serde(default = "default_failure_backoff")]
    pub failure_backoff: f64,
    /// Base ridge for ill-conditioned Hessians, relative to the mean diagonal.
    #[serde(default = "default_ridge")]
    pub ridge: f64,
    #[serde(default = "default_max_condition")]
    pub max_condition: f64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            steps: default_steps(),
            learning_rate: default_learning_rate(),
            momentum: default_momentum(),
            patience: default_patience(),
            max_step_failures: default_max_step_failures(),
            failure_backoff: default_failure_backoff(),
            ridge: default_ridge(),
            max_condition: default_max_condition(),
            log_level: default_log_level(),
        }
    }
}

/// Settings for the bundled logistic regression
#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct Model {
    /// L2 strength on the coefficients
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    #[serde(default = "default_max_iter")]
    pub max_iter: u64,
    #[serde(default = "default_tol")]
    pub tol: f64,
}

impl Default for Model {
    fn default() -> Self {
        Self {
            alpha: default_alpha(),
            max_iter: default_max_iter(),
            tol: default_tol(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Serialize, Default)]
pub struct Output {
    pub log_out: Option<String>,
    pub trajectory: Option<String>,
    pub report: Option<String>,
}

impl Settings {
    pub fn hyperparameters(&self) -> Hyperparameters {
        Hyperparameters {
            steps: self.config.steps,
            lr: self.config.learning_rate,
            momentum: self.config.momentum,
            patience: self.config.patience,
            max_step_failures: self.config.max_step_failures,
            failure_backoff: self.config.failure_backoff,
        }
    }

    pub fn engine(&self) -> Result<ImplicitGradientEngine, WeightError> {
        ImplicitGradientEngine::new(self.config.ridge, self.config.max_condition)
    }

    pub fn logistic_model(&self) -> WeightedLogisticRegression {
        WeightedLogisticRegression::new(self.model.alpha)
            .with_max_iter(self.model.max_iter)
            .with_tol(self.model.tol)
    }

    /// Check every value against its domain.
    pub fn validate(&self) -> Result<(), WeightError> {
        self.hyperparameters().validate()?;
        self.engine()?;
        if self.model.alpha.is_nan() || self.model.alpha < 0.0 {
            return Err(WeightError::InvalidHyperparameter {
                name: "alpha",
                reason: format!("must be non-negative, got {}", self.model.alpha),
            });
        }
        if self.model.tol.is_nan() || self.model.tol <= 0.0 {
            return Err(WeightError::InvalidHyperparameter {
                name: "tol",
                reason: format!("must be positive, got {}", self.model.tol),
            });
        }
        Ok(())
    }
}

/// Read and validate settings from a TOML file, with environment overrides on top.
///
/// Overrides use the `OPTWEIGHTS_` prefix and `__` between section and key, e.g.
/// `OPTWEIGHTS_CONFIG__STEPS=200`.
pub fn read(path: &str) -> eyre::Result<Settings> {
    read_with_environment(path, environment())
}

fn environment() -> config::Environment {
    config::Environment::with_prefix("OPTWEIGHTS")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

/// Like [read], with an explicit environment source.
pub(crate) fn read_with_environment(
    path: &str,
    environment: config::Environment,
) -> eyre::Result<Settings> {
    let parsed = eConfig::builder()
        .add_source(config::File::with_name(path).format(config::FileFormat::Toml))
        .add_source(environment)
        .build()?;

    let settings: Settings = parsed.try_deserialize()?;
    settings.validate()?;
    Ok(settings)
}

// *********************************
// Default values for deserializing
// *********************************
fn default_steps() -> usize {
    100
}

fn default_learning_rate() -> f64 {
    0.1
}

fn default_momentum() -> f64 {
    0.5
}

fn default_patience() -> usize {
    5
}

fn default_max_step_failures() -> usize {
    3
}

fn default_failure_backoff() -> f64 {
    0.5
}

fn default_ridge() -> f64 {
    1e-8
}

fn default_max_condition() -> f64 {
    1e12
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_alpha() -> f64 {
    1e-3
}

fn default_max_iter() -> u64 {
    500
}

fn default_tol() -> f64 {
    1e-10
}
