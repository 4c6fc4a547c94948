//! Validation and holdout predictions for resolved model parameters.

use crate::metrics::{print_summary, round_to_classes};
use crate::models::folds::{self, FoldStrategy};
use crate::models::scaler::StandardScaler;
use crate::models::{MethodFamily, ModelError, build_estimator};
use crate::params::ResolvedParams;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use thiserror::Error;

/// Folds of the in-sample validation.
pub const VALIDATION_FOLDS: usize = 5;
/// Seed of the validation fold shuffle.
pub const VALIDATION_SHUFFLE_SEED: u64 = 15;
/// Seed every evaluated model is constructed with.
pub const MODEL_SEED: u64 = 0;

#[derive(Error, Debug)]
pub enum EvaluationError {
    #[error("Model failed during evaluation: {0}")]
    Model(#[from] ModelError),
    #[error("Training and test matrices have {train} and {test} feature columns.")]
    FeatureCountMismatch { train: usize, test: usize },
}

/// True outcomes paired with raw model predictions.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionRecord {
    pub y_true: Vec<f64>,
    pub y_pred: Vec<f64>,
}

impl PredictionRecord {
    /// Predictions rounded half-to-even to class labels.
    pub fn predicted_classes(&self) -> Vec<f64> {
        round_to_classes(&self.y_pred)
    }

    pub fn len(&self) -> usize {
        self.y_true.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y_true.is_empty()
    }
}

/// Shuffled 5-fold cross-validated predictions over the training set.
///
/// Each row is predicted exactly once, by the model fitted on the other
/// folds, and stored at its original position. For standardizing families the
/// features are scaled once with statistics of the whole training set.
pub fn cross_validated_predictions(
    method: MethodFamily,
    params: &ResolvedParams,
    x_train: ArrayView2<f64>,
    y_train: ArrayView1<f64>,
) -> Result<PredictionRecord, EvaluationError> {
    let x: Array2<f64> = if method.standardizes_features() {
        StandardScaler::fit(x_train).transform(x_train)
    } else {
        x_train.to_owned()
    };

    let labels = y_train.to_vec();
    let folds = folds::split(
        FoldStrategy::KFold {
            shuffle_seed: Some(VALIDATION_SHUFFLE_SEED),
        },
        VALIDATION_FOLDS,
        &labels,
    )?;

    let mut y_pred = Array1::<f64>::zeros(y_train.len());
    for (i, fold) in folds.iter().enumerate() {
        let mut model = build_estimator(method, params, MODEL_SEED)?;
        model.fit(
            x.select(Axis(0), &fold.train).view(),
            y_train.select(Axis(0), &fold.train).view(),
        )?;
        let predicted = model.predict(x.select(Axis(0), &fold.test).view())?;
        for (&row, &value) in fold.test.iter().zip(predicted.iter()) {
            y_pred[row] = value;
        }
        log::debug!("Validation fold {i}: {} held-out rows", fold.test.len());
    }

    let record = PredictionRecord {
        y_true: labels,
        y_pred: y_pred.to_vec(),
    };
    print_summary("Validation (5-fold cross-validation)", &record.y_true, &record.y_pred);
    Ok(record)
}

/// Fits on the full training set and predicts the test set.
///
/// For standardizing families the scaler is fitted on the training rows only
/// and applied unchanged to the test rows.
pub fn holdout_predictions(
    method: MethodFamily,
    params: &ResolvedParams,
    x_train: ArrayView2<f64>,
    y_train: ArrayView1<f64>,
    x_test: ArrayView2<f64>,
    y_test: ArrayView1<f64>,
) -> Result<PredictionRecord, EvaluationError> {
    if x_train.ncols() != x_test.ncols() {
        return Err(EvaluationError::FeatureCountMismatch {
            train: x_train.ncols(),
            test: x_test.ncols(),
        });
    }
    let (x_train, x_test) = if method.standardizes_features() {
        let scaler = StandardScaler::fit(x_train);
        (scaler.transform(x_train), scaler.transform(x_test))
    } else {
        (x_train.to_owned(), x_test.to_owned())
    };

    let mut model = build_estimator(method, params, MODEL_SEED)?;
    model.fit(x_train.view(), y_train)?;
    let predicted = model.predict(x_test.view())?;

    let record = PredictionRecord {
        y_true: y_test.to_vec(),
        y_pred: predicted.to_vec(),
    };
    print_summary("Test (holdout patients)", &record.y_true, &record.y_pred);
    Ok(record)
}
