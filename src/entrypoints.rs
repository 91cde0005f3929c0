use crate::logger;
use crate::model::DifferentiableModel;
use crate::routines::output::SearchResult;
use crate::routines::settings::Settings;
use crate::searcher::WeightSearcher;
use crate::structs::dataset::Dataset;
use crate::structs::gprob::GroupProbabilities;
use crate::structs::groups::GroupLabel;
use eyre::Result;
use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;

/// Primary entrypoint for optweights
///
/// Sets up logging, runs one weight search with the hyperparameters in `settings` and writes
/// the outputs configured in the `output` section:
/// - `trajectory`: CSV with one row per step
/// - `report`: JSON with `p_hat`, the terminal status and the full trajectory
///
/// `g_prob`, if given, attributes training examples to groups softly.
pub fn fit<M: DifferentiableModel>(
    settings: &Settings,
    train: Dataset,
    val: Dataset,
    p_ood: &BTreeMap<GroupLabel, f64>,
    model: M,
    g_prob: Option<GroupProbabilities>,
    stop: Option<Arc<AtomicBool>>,
) -> Result<SearchResult> {
    let now = Instant::now();
    settings.validate()?;
    logger::setup_log(settings)?;
    tracing::info!("Starting optweights");
    tracing::info!(
        "Training split has {} examples, validation split has {}",
        train.len(),
        val.len()
    );

    let mut searcher =
        WeightSearcher::new(train, val, p_ood, model)?.with_engine(settings.engine()?);
    if let Some(g_prob) = g_prob {
        searcher.set_g_prob(g_prob)?;
    }

    let result = searcher.optimize(&settings.hyperparameters(), None, stop)?;
    tracing::info!("Total time: {:.2?}", now.elapsed());

    if let Some(path) = &settings.output.trajectory {
        result.trajectory.write(path, searcher.groups())?;
    }
    if let Some(path) = &settings.output.report {
        result.write_json(path)?;
    }
    Ok(result)
}
