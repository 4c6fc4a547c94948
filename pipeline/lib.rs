#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
//! # Prognos
//!
//! Cross-validated model evaluation for clinical tabular cohorts. One run:
//!
//! 1. loads features and outcomes and joins them into a cohort;
//! 2. splits the cohort into fixed test patients and training patients;
//! 3. resolves hyperparameters, by grid search or by taking first candidates;
//! 4. predicts the training set with shuffled 5-fold cross-validation and the
//!    test set with a model fitted on all training patients;
//! 5. appends a row with parameters, predictions and metrics to the results log.

pub mod config;
pub mod data;
pub mod evaluate;
pub mod metrics;
pub mod params;
pub mod results;
pub mod search;

#[path = "../models/mod.rs"]
pub mod models;

use crate::config::{ConfigError, ExperimentConfig};
use crate::data::{Cohort, DataError, load_feature_table, load_outcome_table};
use crate::evaluate::{
    EvaluationError, PredictionRecord, cross_validated_predictions, holdout_predictions,
};
use crate::metrics::Scoring;
use crate::models::{MethodFamily, ModelError};
use crate::params::{ParamError, ParamValue, ResolvedParams};
use crate::results::{ResultsError, ResultsRow, write_results};
use crate::search::{SearchError, grid_search, write_search_log};
use thiserror::Error;

/// Key under which the search metric is recorded next to the model parameters.
pub const SCORING_PARAM_KEY: &str = "scoringOptiMetric";

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Data(#[from] DataError),
    #[error(transparent)]
    Param(#[from] ParamError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Search(#[from] SearchError),
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),
    #[error(transparent)]
    Results(#[from] ResultsError),
}

/// Everything one run produced.
#[derive(Debug, Clone)]
pub struct ExperimentOutcome {
    pub method: MethodFamily,
    pub scoring: Scoring,
    /// Parameters the evaluated models were built with.
    pub params: ResolvedParams,
    pub validation: PredictionRecord,
    pub test: PredictionRecord,
    pub row: ResultsRow,
}

/// Runs one experiment end to end and appends its results row.
pub fn run_experiment(config: &ExperimentConfig) -> Result<ExperimentOutcome, PipelineError> {
    let method: MethodFamily = config.model.method.parse()?;
    let scoring: Scoring = match &config.model.scoring {
        Some(name) => name.parse()?,
        None => Scoring::default(),
    };

    let features = load_feature_table(&config.data.features, &config.data.selected_features)?;
    let outcomes = load_outcome_table(&config.data.outcomes)?;
    let cohort = Cohort::intersect(&features, &outcomes)?;
    let partition = cohort.partition(&config.test_partition())?;

    let params = if config.model.optimize {
        let space = config.model.params.clone().into_search_space()?;
        let outcome = grid_search(
            method,
            &space,
            partition.x_train.view(),
            partition.y_train.view(),
            scoring,
        )?;
        write_search_log(&config.output.search_log, &space, &outcome)?;
        outcome.best_params().clone()
    } else {
        config.model.params.resolve_first()?
    };
    log::info!("Evaluating {method} with {params}");

    let validation = cross_validated_predictions(
        method,
        &params,
        partition.x_train.view(),
        partition.y_train.view(),
    )?;
    let test = holdout_predictions(
        method,
        &params,
        partition.x_train.view(),
        partition.y_train.view(),
        partition.x_test.view(),
        partition.y_test.view(),
    )?;

    let mut logged_params = params.clone();
    logged_params.insert(SCORING_PARAM_KEY, ParamValue::Text(scoring.name().to_string()));
    let row = ResultsRow {
        selection_features_path: config.data.features.display().to_string(),
        fs_method: config.feature_selection.method.clone(),
        fs_params: config.feature_selection.params.clone(),
        selected_features: config.data.selected_features.clone(),
        ml_method: method.to_string(),
        ml_params: logged_params.to_string(),
        test: test.clone(),
        validation: validation.clone(),
    };
    write_results(&config.output.results, &row)?;

    Ok(ExperimentOutcome {
        method,
        scoring,
        params,
        validation,
        test,
        row,
    })
}
