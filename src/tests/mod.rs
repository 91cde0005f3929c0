use crate::prelude::*;

#[test]
fn read_settings_file() {
    let settings = settings::read("src/tests/config.toml").unwrap();
    assert_eq!(settings.config.steps, 250);
    assert_eq!(settings.config.learning_rate, 0.05);
    assert_eq!(settings.config.momentum, 0.3);
    assert_eq!(settings.config.log_level, "debug");
    assert_eq!(settings.model.alpha, 0.01);
    assert_eq!(
        settings.output.trajectory.as_deref(),
        Some("outputs/trajectory.csv")
    );
    assert!(settings.output.report.is_none());
}

#[test]
fn missing_values_use_defaults() {
    let settings = settings::read("src/tests/config.toml").unwrap();
    assert_eq!(settings.config.failure_backoff, 0.5);
    assert_eq!(settings.config.ridge, 1e-8);
    assert_eq!(settings.config.max_condition, 1e12);
    assert_eq!(settings.model.tol, 1e-10);
}

#[test]
fn environment_overrides_file() {
    let vars = config::Map::from([
        ("OPTWEIGHTS_MODEL__MAX_ITER".to_string(), "42".to_string()),
        ("OPTWEIGHTS_CONFIG__STEPS".to_string(), "12".to_string()),
    ]);
    let environment = config::Environment::with_prefix("OPTWEIGHTS")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
        .source(Some(vars));
    let settings =
        settings::read_with_environment("src/tests/config.toml", environment).unwrap();
    assert_eq!(settings.model.max_iter, 42);
    assert_eq!(settings.config.steps, 12);
    assert_eq!(settings.config.learning_rate, 0.05);
}

#[test]
fn settings_map_to_hyperparameters() {
    let settings = settings::read("src/tests/config.toml").unwrap();
    let hyper = settings.hyperparameters();
    assert_eq!(hyper.steps, 250);
    assert_eq!(hyper.lr, 0.05);
    assert!(hyper.validate().is_ok());
    assert_eq!(settings.engine().unwrap().base_ridge(), 1e-8);
    assert_eq!(settings.logistic_model().alpha(), 0.01);
}

#[test]
fn invalid_settings_are_rejected() {
    let mut settings = Settings::default();
    assert!(settings.validate().is_ok());
    settings.config.momentum = 1.0;
    assert!(settings.validate().is_err());
    settings.config.momentum = 0.5;
    settings.config.ridge = 0.0;
    assert!(settings.validate().is_err());
}

#[test]
fn missing_file_is_an_error() {
    assert!(settings::read("src/tests/does_not_exist.toml").is_err());
}
