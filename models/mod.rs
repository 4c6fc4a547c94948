//! # Model Families
//!
//! In-crate implementations of the three supervised model families the
//! experiment runner can evaluate:
//!
//! - `RFreg`: bagged regression trees, predictions are the mean over trees.
//! - `RFclass`: bagged classification trees, predictions are the class with
//!   the largest summed leaf proportion.
//! - `LogReg`: L2-penalized logistic regression.
//!
//! Every family is constructed from a seed and a [`ResolvedParams`] through
//! [`build_estimator`] and used only through the [`Estimator`] trait.

pub mod folds;
pub mod forest;
pub mod linalg;
pub mod logistic;
pub mod scaler;
pub mod tree;

use crate::params::{ParamValue, ResolvedParams};
use forest::{ForestSettings, ForestTask, MaxFeatures, RandomForest};
use logistic::{LogisticRegression, LogisticSettings, Penalty, Solver};
use ndarray::{Array1, ArrayView1, ArrayView2};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tree::SplitCriterion;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Unsupported ML method '{0}'. Expected one of: RFreg, RFclass, LogReg.")]
    UnsupportedMethod(String),
    #[error("Parameter '{name}' is not recognized by {method}.")]
    UnknownParameter { method: MethodFamily, name: String },
    #[error("Parameter '{name}' has an invalid value '{value}': expected {expected}.")]
    InvalidParameter {
        name: String,
        value: String,
        expected: &'static str,
    },
    /// For stratified splits `n_samples` is the size of the largest class.
    #[error("Cannot split {n_samples} rows into {n_splits} folds; at least 2 folds and one row per fold (of the largest class, when stratified) are required.")]
    InvalidFoldCount { n_splits: usize, n_samples: usize },
    #[error("The model must be fitted before it can predict.")]
    NotFitted,
    #[error("Shape mismatch: expected {expected}, found {found}.")]
    ShapeMismatch { expected: String, found: String },
    #[error("Training outcomes contain a single class ({class}); at least two are required.")]
    SingleClass { class: f64 },
    #[error("Cannot fit a model on an empty training set.")]
    EmptyTrainingSet,
    #[error("Optimization failed: {0}")]
    OptimizationFailed(String),
}

/// Supported model families, named as they appear in configs and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodFamily {
    RandomForestRegressor,
    RandomForestClassifier,
    LogisticRegression,
}

impl MethodFamily {
    pub fn name(self) -> &'static str {
        match self {
            MethodFamily::RandomForestRegressor => "RFreg",
            MethodFamily::RandomForestClassifier => "RFclass",
            MethodFamily::LogisticRegression => "LogReg",
        }
    }

    /// Classifiers are searched with stratified folds.
    pub fn is_classifier(self) -> bool {
        !matches!(self, MethodFamily::RandomForestRegressor)
    }

    /// Whether features are standardized before fitting.
    pub fn standardizes_features(self) -> bool {
        matches!(self, MethodFamily::LogisticRegression)
    }
}

impl fmt::Display for MethodFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MethodFamily {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RFreg" => Ok(MethodFamily::RandomForestRegressor),
            "RFclass" => Ok(MethodFamily::RandomForestClassifier),
            "LogReg" => Ok(MethodFamily::LogisticRegression),
            other => Err(ModelError::UnsupportedMethod(other.to_string())),
        }
    }
}

/// A supervised model over a dense feature matrix and a numeric outcome.
pub trait Estimator {
    fn fit(&mut self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<(), ModelError>;

    fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>, ModelError>;
}

pub(crate) fn check_shapes(x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<(), ModelError> {
    if x.nrows() != y.len() {
        return Err(ModelError::ShapeMismatch {
            expected: format!("{} outcome values", x.nrows()),
            found: format!("{} outcome values", y.len()),
        });
    }
    if x.nrows() == 0 {
        return Err(ModelError::EmptyTrainingSet);
    }
    Ok(())
}

/// Distinct outcome values in ascending order.
pub(crate) fn sorted_classes(y: ArrayView1<f64>) -> Vec<f64> {
    let mut classes = y.to_vec();
    classes.sort_by(f64::total_cmp);
    classes.dedup();
    classes
}

/// Constructs an unfitted model of the given family.
///
/// Parameters not set in `params` take the family's defaults. Names a family
/// does not know are rejected rather than ignored.
pub fn build_estimator(
    method: MethodFamily,
    params: &ResolvedParams,
    seed: u64,
) -> Result<Box<dyn Estimator>, ModelError> {
    match method {
        MethodFamily::RandomForestRegressor | MethodFamily::RandomForestClassifier => {
            let (task, settings) = forest_settings(method, params)?;
            Ok(Box::new(RandomForest::new(task, settings, seed)))
        }
        MethodFamily::LogisticRegression => {
            Ok(Box::new(LogisticRegression::new(logistic_settings(params)?)))
        }
    }
}

const FOREST_PARAMETERS: &[&str] = &[
    "n_estimators",
    "max_depth",
    "max_features",
    "min_samples_split",
    "min_samples_leaf",
    "bootstrap",
    "criterion",
];

const LOGISTIC_PARAMETERS: &[&str] = &["penalty", "C", "solver", "max_iter", "tol", "fit_intercept"];

fn forest_settings(
    method: MethodFamily,
    params: &ResolvedParams,
) -> Result<(ForestTask, ForestSettings), ModelError> {
    let reader = ParamReader::new(method, params, FOREST_PARAMETERS)?;
    let (task, defaults) = match method {
        MethodFamily::RandomForestClassifier => {
            (ForestTask::Classification, ForestSettings::classifier())
        }
        _ => (ForestTask::Regression, ForestSettings::regressor()),
    };

    let max_features = match params.get("max_features") {
        None => defaults.max_features,
        Some(value) if value.is_none() => MaxFeatures::All,
        Some(ParamValue::Text(t)) if t == "sqrt" => MaxFeatures::Sqrt,
        Some(ParamValue::Text(t)) if t == "log2" => MaxFeatures::Log2,
        Some(ParamValue::Int(n)) if *n >= 1 => MaxFeatures::Count(*n as usize),
        Some(ParamValue::Float(f)) if *f > 0.0 && *f <= 1.0 => MaxFeatures::Fraction(*f),
        Some(other) => {
            return Err(invalid(
                "max_features",
                other,
                "'sqrt', 'log2', 'none', a positive integer or a fraction in (0, 1]",
            ));
        }
    };

    let criterion = match params.get("criterion") {
        None => defaults.criterion,
        Some(value) => match (task, value.as_text()) {
            (ForestTask::Regression, Some("squared_error")) => SplitCriterion::SquaredError,
            (ForestTask::Classification, Some("gini")) => SplitCriterion::Gini,
            (ForestTask::Classification, Some("entropy" | "log_loss")) => SplitCriterion::Entropy,
            (ForestTask::Regression, _) => {
                return Err(invalid("criterion", value, "'squared_error'"));
            }
            (ForestTask::Classification, _) => {
                return Err(invalid("criterion", value, "'gini', 'entropy' or 'log_loss'"));
            }
        },
    };

    let settings = ForestSettings {
        n_estimators: reader.count("n_estimators", defaults.n_estimators, 1)?,
        max_depth: reader.optional_count("max_depth", 1)?,
        min_samples_split: reader.count("min_samples_split", defaults.min_samples_split, 2)?,
        min_samples_leaf: reader.count("min_samples_leaf", defaults.min_samples_leaf, 1)?,
        max_features,
        bootstrap: reader.flag("bootstrap", defaults.bootstrap)?,
        criterion,
    };
    Ok((task, settings))
}

fn logistic_settings(params: &ResolvedParams) -> Result<LogisticSettings, ModelError> {
    let reader = ParamReader::new(MethodFamily::LogisticRegression, params, LOGISTIC_PARAMETERS)?;
    let defaults = LogisticSettings::default();

    let penalty = match params.get("penalty") {
        None => defaults.penalty,
        Some(value) if value.is_none() => Penalty::None,
        Some(ParamValue::Text(t)) if t == "l2" => Penalty::L2,
        Some(other) => {
            return Err(invalid(
                "penalty",
                other,
                "'l2' or 'none' ('l1' and 'elasticnet' are not supported)",
            ));
        }
    };

    let solver = match params.get("solver") {
        None => defaults.solver,
        Some(ParamValue::Text(t)) if t == "lbfgs" => Solver::Lbfgs,
        Some(ParamValue::Text(t)) if t == "newton-cg" || t == "newton-cholesky" => Solver::Newton,
        Some(other) => {
            return Err(invalid(
                "solver",
                other,
                "'lbfgs', 'newton-cg' or 'newton-cholesky' ('liblinear', 'sag' and 'saga' are not supported)",
            ));
        }
    };

    Ok(LogisticSettings {
        penalty,
        c: reader.positive_real("C", defaults.c)?,
        solver,
        max_iter: reader.count("max_iter", defaults.max_iter, 1)?,
        tol: reader.positive_real("tol", defaults.tol)?,
        fit_intercept: reader.flag("fit_intercept", defaults.fit_intercept)?,
    })
}

fn invalid(name: &str, value: &ParamValue, expected: &'static str) -> ModelError {
    ModelError::InvalidParameter {
        name: name.to_string(),
        value: value.to_string(),
        expected,
    }
}

/// Typed access to resolved parameters with family defaults.
struct ParamReader<'a> {
    params: &'a ResolvedParams,
}

impl<'a> ParamReader<'a> {
    fn new(
        method: MethodFamily,
        params: &'a ResolvedParams,
        known: &[&str],
    ) -> Result<Self, ModelError> {
        if let Some((name, _)) = params.iter().find(|(name, _)| !known.contains(name)) {
            return Err(ModelError::UnknownParameter {
                method,
                name: name.to_string(),
            });
        }
        Ok(Self { params })
    }

    fn count(&self, name: &str, default: usize, minimum: usize) -> Result<usize, ModelError> {
        match self.params.get(name) {
            None => Ok(default),
            Some(value) => match value.as_i64() {
                Some(n) if n >= minimum as i64 => Ok(n as usize),
                _ => Err(invalid(name, value, "an integer within range")),
            },
        }
    }

    fn optional_count(&self, name: &str, minimum: usize) -> Result<Option<usize>, ModelError> {
        match self.params.get(name) {
            None => Ok(None),
            Some(value) if value.is_none() => Ok(None),
            Some(_) => self.count(name, 0, minimum).map(Some),
        }
    }

    fn positive_real(&self, name: &str, default: f64) -> Result<f64, ModelError> {
        match self.params.get(name) {
            None => Ok(default),
            Some(value) => match value.as_f64() {
                Some(v) if v > 0.0 && v.is_finite() => Ok(v),
                _ => Err(invalid(name, value, "a positive number")),
            },
        }
    }

    fn flag(&self, name: &str, default: bool) -> Result<bool, ModelError> {
        match self.params.get(name) {
            None => Ok(default),
            Some(value) => value
                .as_bool()
                .ok_or_else(|| invalid(name, value, "true or false")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn params(entries: &[(&str, ParamValue)]) -> ResolvedParams {
        let mut resolved = ResolvedParams::default();
        for (name, value) in entries {
            resolved.insert(name, value.clone());
        }
        resolved
    }

    #[test]
    fn method_names_round_trip() {
        for name in ["RFreg", "RFclass", "LogReg"] {
            let method: MethodFamily = name.parse().unwrap();
            assert_eq!(method.to_string(), name);
        }
        assert!(matches!(
            "SVM".parse::<MethodFamily>(),
            Err(ModelError::UnsupportedMethod(name)) if name == "SVM"
        ));
    }

    #[test]
    fn forest_parameters_override_defaults() {
        let resolved = params(&[
            ("n_estimators", ParamValue::Int(12)),
            ("max_depth", ParamValue::Text("None".to_string())),
            ("max_features", ParamValue::Text("log2".to_string())),
            ("criterion", ParamValue::Text("entropy".to_string())),
        ]);
        let (task, settings) =
            forest_settings(MethodFamily::RandomForestClassifier, &resolved).unwrap();
        assert_eq!(task, ForestTask::Classification);
        assert_eq!(settings.n_estimators, 12);
        assert_eq!(settings.max_depth, None);
        assert_eq!(settings.max_features, MaxFeatures::Log2);
        assert_eq!(settings.criterion, SplitCriterion::Entropy);
        assert!(settings.bootstrap);
    }

    #[test]
    fn unknown_parameter_is_rejected() {
        let resolved = params(&[("learning_rate", ParamValue::Float(0.1))]);
        let err = build_estimator(MethodFamily::LogisticRegression, &resolved, 0)
            .err()
            .unwrap();
        assert!(matches!(err, ModelError::UnknownParameter { ref name, .. } if name == "learning_rate"));
    }

    #[test]
    fn ill_typed_parameter_is_rejected() {
        let resolved = params(&[("C", ParamValue::Text("large".to_string()))]);
        assert!(matches!(
            logistic_settings(&resolved),
            Err(ModelError::InvalidParameter { .. })
        ));

        let resolved = params(&[("criterion", ParamValue::Text("gini".to_string()))]);
        assert!(forest_settings(MethodFamily::RandomForestRegressor, &resolved).is_err());
    }

    #[test]
    fn unsupported_penalty_and_solver_are_named_in_the_error() {
        let resolved = params(&[("penalty", ParamValue::Text("l1".to_string()))]);
        let message = logistic_settings(&resolved).err().unwrap().to_string();
        assert!(message.contains("'l1'"), "{message}");
        assert!(message.contains("'l1' and 'elasticnet' are not supported"), "{message}");

        let resolved = params(&[("solver", ParamValue::Text("liblinear".to_string()))]);
        let message = logistic_settings(&resolved).err().unwrap().to_string();
        assert!(message.contains("'liblinear', 'sag' and 'saga' are not supported"), "{message}");
    }

    #[test]
    fn logistic_parameters_accept_integers_for_reals() {
        let resolved = params(&[
            ("C", ParamValue::Int(10)),
            ("solver", ParamValue::Text("newton-cholesky".to_string())),
            ("penalty", ParamValue::Text("none".to_string())),
        ]);
        let settings = logistic_settings(&resolved).unwrap();
        assert_eq!(settings.c, 10.0);
        assert_eq!(settings.solver, Solver::Newton);
        assert_eq!(settings.penalty, Penalty::None);
    }

    #[test]
    fn built_estimators_fit_and_predict() {
        let x = array![[0.0], [1.0], [2.0], [3.0], [4.0], [5.0]];
        let y = array![0.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        for method in [
            MethodFamily::RandomForestRegressor,
            MethodFamily::RandomForestClassifier,
            MethodFamily::LogisticRegression,
        ] {
            let resolved = if method == MethodFamily::LogisticRegression {
                ResolvedParams::default()
            } else {
                params(&[("n_estimators", ParamValue::Int(5))])
            };
            let mut model = build_estimator(method, &resolved, 0).unwrap();
            model.fit(x.view(), y.view()).unwrap();
            assert_eq!(model.predict(x.view()).unwrap().len(), 6);
        }
    }

    #[test]
    fn sorted_classes_are_distinct_and_ascending() {
        assert_eq!(sorted_classes(array![2.0, 0.0, 2.0, 1.0].view()), vec![0.0, 1.0, 2.0]);
    }
}
