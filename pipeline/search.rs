//! Exhaustive hyperparameter search with k-fold cross-validation.
//!
//! Every candidate of a [`SearchSpace`] is fitted and scored on each fold.
//! Candidates are ranked by mean held-out score (ties share the lowest rank)
//! and the first candidate with rank 1 wins. The complete per-candidate table
//! is written to the search log, replacing any previous log.

use crate::metrics::Scoring;
use crate::models::folds::{self, Fold, FoldStrategy};
use crate::models::{MethodFamily, ModelError, build_estimator};
use crate::params::{ResolvedParams, SearchSpace, format_float};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use ndarray::{ArrayView1, ArrayView2, Axis};
use std::io::IsTerminal;
use std::path::Path;
use std::time::Instant;
use thiserror::Error;

/// Upper bound on the number of search folds.
pub const MAX_SEARCH_FOLDS: usize = 5;

/// Seed every candidate model is constructed with.
const MODEL_SEED: u64 = 0;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error(
        "Grid search needs at least 4 training rows for 2 folds, but only {0} are available."
    )]
    TooFewRows(usize),
    #[error("Every parameter candidate failed to fit; the last error was: {0}")]
    AllCandidatesFailed(ModelError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("Failed to write search log: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error while writing search log: {0}")]
    Io(#[from] std::io::Error),
}

/// Cross-validation record of one parameter candidate.
#[derive(Debug, Clone)]
pub struct CandidateResult {
    pub params: ResolvedParams,
    /// Seconds spent fitting, per fold.
    pub fit_times: Vec<f64>,
    /// Seconds spent predicting and scoring, per fold.
    pub score_times: Vec<f64>,
    /// Held-out score per fold; NaN where fitting failed.
    pub split_scores: Vec<f64>,
    pub mean_score: f64,
    pub std_score: f64,
    pub rank: usize,
}

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub scoring: Scoring,
    pub n_splits: usize,
    pub candidates: Vec<CandidateResult>,
    pub best_index: usize,
}

impl SearchOutcome {
    pub fn best_params(&self) -> &ResolvedParams {
        &self.candidates[self.best_index].params
    }
}

/// Number of folds used for `n_rows` training rows.
pub fn search_fold_count(n_rows: usize) -> usize {
    MAX_SEARCH_FOLDS.min(n_rows / 2)
}

fn create_progress_bar(len: u64, message: &str) -> ProgressBar {
    let draw_target = if std::io::stderr().is_terminal() {
        ProgressDrawTarget::stderr_with_hz(20)
    } else {
        ProgressDrawTarget::hidden()
    };

    let pb = ProgressBar::with_draw_target(Some(len), draw_target);
    if let Ok(style) = ProgressStyle::with_template(
        "> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} fits ({eta}) {msg}",
    ) {
        pb.set_style(style.progress_chars("█▉▊▋▌▍▎▏  "));
    }
    pb.set_message(message.to_string());
    pb
}

/// Population mean and standard deviation.
fn mean_and_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (f64::NAN, f64::NAN);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

/// Ranks by descending mean score; equal scores share the lowest rank and
/// failed candidates rank after every finite one.
fn rank_candidates(means: &[f64]) -> Vec<usize> {
    let finite = means.iter().filter(|m| m.is_finite()).count();
    means
        .iter()
        .map(|&mean| {
            if mean.is_finite() {
                1 + means.iter().filter(|&&other| other.is_finite() && other > mean).count()
            } else {
                finite + 1
            }
        })
        .collect()
}

fn score_fold(
    method: MethodFamily,
    params: &ResolvedParams,
    fold: &Fold,
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    scoring: Scoring,
) -> Result<(f64, f64, f64), ModelError> {
    let x_train = x.select(Axis(0), &fold.train);
    let x_test = x.select(Axis(0), &fold.test);
    let y_train = y.select(Axis(0), &fold.train);
    let y_test = y.select(Axis(0), &fold.test);

    let fit_start = Instant::now();
    let mut model = build_estimator(method, params, MODEL_SEED)?;
    model.fit(x_train.view(), y_train.view())?;
    let fit_time = fit_start.elapsed().as_secs_f64();

    let score_start = Instant::now();
    let predictions = model.predict(x_test.view())?;
    let score = scoring.score(&y_test.to_vec(), &predictions.to_vec());
    let score_time = score_start.elapsed().as_secs_f64();

    Ok((score, fit_time, score_time))
}

/// Scores every candidate of `space` with cross-validation on `(x, y)`.
///
/// Regressors use contiguous folds, classifiers use stratified folds; neither
/// shuffles. Features are scored as given, without standardization, for every
/// family.
pub fn grid_search(
    method: MethodFamily,
    space: &SearchSpace,
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    scoring: Scoring,
) -> Result<SearchOutcome, SearchError> {
    // Candidate parameters are validated before any fitting starts.
    let candidates = space.candidates();
    for params in &candidates {
        build_estimator(method, params, MODEL_SEED)?;
    }

    let n_splits = search_fold_count(y.len());
    if n_splits < 2 {
        return Err(SearchError::TooFewRows(y.len()));
    }
    let strategy = if method.is_classifier() {
        FoldStrategy::Stratified
    } else {
        FoldStrategy::KFold { shuffle_seed: None }
    };
    let labels = y.to_vec();
    let folds = folds::split(strategy, n_splits, &labels)?;

    log::info!(
        "Grid search for {method}: {} candidates x {n_splits} folds, scoring '{scoring}'",
        candidates.len()
    );
    let pb = create_progress_bar((candidates.len() * n_splits) as u64, method.name());

    let mut results = Vec::with_capacity(candidates.len());
    let mut last_error = None;
    for params in candidates {
        let mut fit_times = Vec::with_capacity(n_splits);
        let mut score_times = Vec::with_capacity(n_splits);
        let mut split_scores = Vec::with_capacity(n_splits);
        for (i, fold) in folds.iter().enumerate() {
            match score_fold(method, &params, fold, x, y, scoring) {
                Ok((score, fit_time, score_time)) => {
                    split_scores.push(score);
                    fit_times.push(fit_time);
                    score_times.push(score_time);
                }
                Err(e) => {
                    log::warn!("Fold {i} failed for {params}: {e}");
                    split_scores.push(f64::NAN);
                    fit_times.push(0.0);
                    score_times.push(0.0);
                    last_error = Some(e);
                }
            }
            pb.inc(1);
        }
        let (mean_score, std_score) = mean_and_std(&split_scores);
        log::debug!("{params}: mean {scoring} {mean_score:.4} (std {std_score:.4})");
        results.push(CandidateResult {
            params,
            fit_times,
            score_times,
            split_scores,
            mean_score,
            std_score,
            rank: 0,
        });
    }
    pb.finish_and_clear();

    let means: Vec<f64> = results.iter().map(|r| r.mean_score).collect();
    if means.iter().all(|m| !m.is_finite()) {
        if let Some(e) = last_error {
            return Err(SearchError::AllCandidatesFailed(e));
        }
    }
    for (result, rank) in results.iter_mut().zip(rank_candidates(&means)) {
        result.rank = rank;
    }
    let best_index = results.iter().position(|r| r.rank == 1).unwrap_or(0);

    log::info!(
        "Best parameters {} with mean {scoring} {:.4}",
        results[best_index].params,
        results[best_index].mean_score
    );
    Ok(SearchOutcome {
        scoring,
        n_splits,
        candidates: results,
        best_index,
    })
}

/// Writes the per-candidate table as a `;`-separated file, replacing `path`.
pub fn write_search_log(
    path: &Path,
    space: &SearchSpace,
    outcome: &SearchOutcome,
) -> Result<(), SearchError> {
    let mut writer = csv::WriterBuilder::new().delimiter(b';').from_path(path)?;

    let names: Vec<&str> = space.names().collect();
    let mut header = vec![
        String::new(),
        "mean_fit_time".to_string(),
        "std_fit_time".to_string(),
        "mean_score_time".to_string(),
        "std_score_time".to_string(),
    ];
    header.extend(names.iter().map(|name| format!("param_{name}")));
    header.push("params".to_string());
    header.extend((0..outcome.n_splits).map(|i| format!("split{i}_test_score")));
    header.extend([
        "mean_test_score".to_string(),
        "std_test_score".to_string(),
        "rank_test_score".to_string(),
    ]);
    writer.write_record(&header)?;

    for (index, candidate) in outcome.candidates.iter().enumerate() {
        let (mean_fit, std_fit) = mean_and_std(&candidate.fit_times);
        let (mean_score_time, std_score_time) = mean_and_std(&candidate.score_times);

        let mut record = vec![
            index.to_string(),
            format_float(mean_fit),
            format_float(std_fit),
            format_float(mean_score_time),
            format_float(std_score_time),
        ];
        record.extend(names.iter().map(|name| {
            candidate
                .params
                .get(name)
                .map(ToString::to_string)
                .unwrap_or_default()
        }));
        record.push(candidate.params.to_string());
        record.extend(candidate.split_scores.iter().map(|s| format_float(*s)));
        record.push(format_float(candidate.mean_score));
        record.push(format_float(candidate.std_score));
        record.push(candidate.rank.to_string());
        writer.write_record(&record)?;
    }
    writer.flush()?;

    log::info!(
        "Wrote {} search candidates to '{}'",
        outcome.candidates.len(),
        path.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{ParamGrid, ParamSpec, ParamValue};
    use ndarray::{Array1, Array2};

    fn separable(n: usize) -> (Array2<f64>, Array1<f64>) {
        let x = Array2::from_shape_fn((n, 2), |(i, j)| {
            if j == 0 { i as f64 } else { ((i * 5) % 7) as f64 }
        });
        let y = Array1::from_shape_fn(n, |i| if i >= n / 2 { 1.0 } else { 0.0 });
        (x, y)
    }

    #[test]
    fn fold_count_is_capped_by_half_the_rows() {
        assert_eq!(search_fold_count(52), 5);
        assert_eq!(search_fold_count(7), 3);
        assert_eq!(search_fold_count(3), 1);
    }

    #[test]
    fn ranks_use_minimum_on_ties() {
        assert_eq!(rank_candidates(&[0.5, 0.9, 0.5, 0.1]), vec![2, 1, 2, 4]);
        assert_eq!(rank_candidates(&[f64::NAN, 0.2]), vec![2, 1]);
    }

    #[test]
    fn single_candidate_is_returned_unchanged() {
        let (x, y) = separable(20);
        let space = ParamGrid::new()
            .with("C", ParamSpec::One(ParamValue::Float(0.5)))
            .with("solver", ParamSpec::One(ParamValue::Text("newton-cg".to_string())))
            .into_search_space()
            .unwrap();
        let outcome = grid_search(
            MethodFamily::LogisticRegression,
            &space,
            x.view(),
            y.view(),
            Scoring::Accuracy,
        )
        .unwrap();

        assert_eq!(outcome.candidates.len(), 1);
        assert_eq!(outcome.candidates[0].rank, 1);
        assert_eq!(outcome.best_params().get("C"), Some(&ParamValue::Float(0.5)));
        assert_eq!(outcome.n_splits, 5);
    }

    #[test]
    fn logistic_search_scores_unscaled_features() {
        // Feature magnitudes differ by orders, so scaling would change the fit.
        let n = 30;
        let x = Array2::from_shape_fn((n, 2), |(i, j)| {
            if j == 0 {
                10.0 * i as f64
            } else {
                ((i * 7) % 5) as f64 * 0.01
            }
        });
        let y = Array1::from_shape_fn(n, |i| if (i * 7) % 5 >= 2 { 1.0 } else { 0.0 });
        let space = ParamGrid::new()
            .with("C", ParamSpec::One(ParamValue::Float(0.01)))
            .into_search_space()
            .unwrap();
        let outcome = grid_search(
            MethodFamily::LogisticRegression,
            &space,
            x.view(),
            y.view(),
            Scoring::Accuracy,
        )
        .unwrap();

        let params = outcome.best_params().clone();
        let folds = folds::split(FoldStrategy::Stratified, 5, &y.to_vec()).unwrap();
        for (fold, &logged) in folds.iter().zip(&outcome.candidates[0].split_scores) {
            let mut model = build_estimator(MethodFamily::LogisticRegression, &params, 0).unwrap();
            let x_train = x.select(Axis(0), &fold.train);
            let y_train = y.select(Axis(0), &fold.train);
            model.fit(x_train.view(), y_train.view()).unwrap();
            let predicted = model.predict(x.select(Axis(0), &fold.test).view()).unwrap();
            let expected = Scoring::Accuracy.score(
                &y.select(Axis(0), &fold.test).to_vec(),
                &predicted.to_vec(),
            );
            assert_eq!(logged, expected);
        }
    }

    #[test]
    fn too_few_rows_is_an_error() {
        let (x, y) = separable(3);
        let space = ParamGrid::new().into_search_space().unwrap();
        assert!(matches!(
            grid_search(
                MethodFamily::RandomForestRegressor,
                &space,
                x.view(),
                y.view(),
                Scoring::R2
            ),
            Err(SearchError::TooFewRows(3))
        ));
    }

    #[test]
    fn unknown_parameter_fails_before_fitting() {
        let (x, y) = separable(20);
        let space = ParamGrid::new()
            .with("gamma", ParamSpec::One(ParamValue::Float(1.0)))
            .into_search_space()
            .unwrap();
        assert!(matches!(
            grid_search(
                MethodFamily::RandomForestClassifier,
                &space,
                x.view(),
                y.view(),
                Scoring::Accuracy
            ),
            Err(SearchError::Model(ModelError::UnknownParameter { .. }))
        ));
    }

    #[test]
    fn search_log_has_one_row_per_candidate() {
        let (x, y) = separable(30);
        let space = ParamGrid::new()
            .with(
                "n_estimators",
                ParamSpec::Many(vec![ParamValue::Int(3), ParamValue::Int(6)]),
            )
            .with(
                "max_depth",
                ParamSpec::Many(vec![ParamValue::Int(2), ParamValue::Text("none".to_string())]),
            )
            .into_search_space()
            .unwrap();
        let outcome = grid_search(
            MethodFamily::RandomForestRegressor,
            &space,
            x.view(),
            y.view(),
            Scoring::NegMeanSquaredError,
        )
        .unwrap();
        assert_eq!(outcome.candidates.len(), 4);
        assert!(outcome.candidates.iter().all(|c| c.split_scores.len() == 5));
        assert!(outcome.candidates.iter().all(|c| c.mean_score <= 0.0));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("paramSearchResults.csv");
        std::fs::write(&path, "stale content\n").unwrap();
        write_search_log(&path, &space, &outcome).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[0].starts_with(";mean_fit_time;std_fit_time;"));
        assert!(lines[0].contains("param_max_depth;param_n_estimators;params;split0_test_score"));
        assert!(lines[0].ends_with("mean_test_score;std_test_score;rank_test_score"));
        assert!(lines[1].starts_with("0;"));
        assert!(lines[1].contains(";2;3;{'max_depth': 2, 'n_estimators': 3};"));
        assert!(lines[2].contains(";2;6;"));
        assert!(lines[3].contains(";None;3;"));
    }
}
