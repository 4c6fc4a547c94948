//! # Cohort Loading
//!
//! Reads the semicolon-separated feature and outcome files, joins them on the
//! patient identifier and splits the joined cohort into the fixed train/test
//! partition.
//!
//! Both files carry a header row and use their first column as the patient
//! identifier, whatever that column is called. Identifiers are compared as
//! text, so `1` in one file matches `1` in the other regardless of how each
//! column was typed on load.

use crate::config::TestPartition;
use ndarray::{Array1, Array2, Axis};
use polars::prelude::*;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::path::Path;
use thiserror::Error;

/// Column in the outcome file holding the label.
pub const OUTCOME_COLUMN: &str = "outcome";

#[derive(Error, Debug)]
pub enum DataError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    Polars(#[from] PolarsError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("The column '{column}' was not found in '{path}'. Please check spelling and case.")]
    ColumnNotFound { column: String, path: String },
    #[error(
        "The column '{column_name}' could not be converted to numbers; it contains non-numeric data. (Found type: {found_type})"
    )]
    ColumnWrongType {
        column_name: String,
        found_type: String,
    },
    #[error("Missing values were found in feature '{feature}' for patient '{patient}'.")]
    MissingValuesFound { feature: String, patient: String },
    #[error("Patient identifier '{id}' appears more than once in '{path}'.")]
    DuplicateIdentifier { id: String, path: String },
    #[error("Test patient '{0}' is not part of the cohort (no features or no valid outcome).")]
    TestIdentifierNotInCohort(String),
    #[error("No features were selected; at least one feature column is required.")]
    NoFeaturesSelected,
    #[error("'{0}' has no identifier column.")]
    MissingIdentifierColumn(String),
}

/// Feature values per patient, restricted to the selected columns.
///
/// Missing cells are stored as NaN and rejected only if the patient ends up in
/// the cohort.
#[derive(Debug, Clone)]
pub struct FeatureTable {
    pub ids: Vec<String>,
    pub feature_names: Vec<String>,
    /// Shape: [n_patients, n_features].
    pub values: Array2<f64>,
    pub source: String,
}

/// Labeled outcomes. Rows with a negative or missing outcome are dropped on
/// load.
#[derive(Debug, Clone)]
pub struct OutcomeTable {
    pub ids: Vec<String>,
    pub outcomes: Vec<f64>,
    pub source: String,
}

/// Patients present in both tables, in feature file order.
#[derive(Debug, Clone)]
pub struct Cohort {
    pub ids: Vec<String>,
    pub feature_names: Vec<String>,
    pub x: Array2<f64>,
    pub y: Array1<f64>,
}

/// Disjoint train/test split of a cohort. Test rows follow the configured
/// identifier order, training rows follow cohort order.
#[derive(Debug, Clone)]
pub struct Partition {
    pub train_ids: Vec<String>,
    pub test_ids: Vec<String>,
    pub x_train: Array2<f64>,
    pub y_train: Array1<f64>,
    pub x_test: Array2<f64>,
    pub y_test: Array1<f64>,
}

fn read_semicolon_file(path: &Path) -> Result<DataFrame, DataError> {
    let df = CsvReader::new(File::open(path)?)
        .with_options(
            CsvReadOptions::default()
                .with_has_header(true)
                .with_parse_options(CsvParseOptions::default().with_separator(b';')),
        )
        .finish()?;
    log::debug!(
        "Read {} rows x {} columns from '{}'",
        df.height(),
        df.width(),
        path.display()
    );
    Ok(df)
}

fn identifier_column(df: &DataFrame, path: &Path) -> Result<Vec<String>, DataError> {
    let column = df
        .get_columns()
        .first()
        .ok_or_else(|| DataError::MissingIdentifierColumn(path.display().to_string()))?;
    let as_text = column.cast(&DataType::String)?;
    let ids = as_text
        .str()?
        .into_iter()
        .map(|id| id.unwrap_or_default().trim().to_string())
        .collect();
    Ok(ids)
}

/// Casts a column to `f64`, keeping missing cells as `None`.
fn numeric_column(df: &DataFrame, column_name: &str) -> Result<Vec<Option<f64>>, DataError> {
    let column = df.column(column_name)?;
    let casted = column
        .cast(&DataType::Float64)
        .map_err(|_| DataError::ColumnWrongType {
            column_name: column_name.to_string(),
            found_type: format!("{:?}", column.dtype()),
        })?;

    // A non-strict cast turns unparsable text into nulls.
    if casted.null_count() > column.null_count() {
        return Err(DataError::ColumnWrongType {
            column_name: column_name.to_string(),
            found_type: format!("{:?}", column.dtype()),
        });
    }

    Ok(casted.f64()?.into_iter().collect())
}

fn ensure_unique(ids: &[String], source: &str) -> Result<(), DataError> {
    let mut seen = HashSet::with_capacity(ids.len());
    for id in ids {
        if !seen.insert(id.as_str()) {
            return Err(DataError::DuplicateIdentifier {
                id: id.clone(),
                path: source.to_string(),
            });
        }
    }
    Ok(())
}

/// Loads the requested feature columns for every patient in the file.
pub fn load_feature_table(path: &Path, selected_features: &[String]) -> Result<FeatureTable, DataError> {
    if selected_features.is_empty() {
        return Err(DataError::NoFeaturesSelected);
    }
    let source = path.display().to_string();
    let df = read_semicolon_file(path)?;
    let ids = identifier_column(&df, path)?;

    let available: HashSet<String> = df
        .get_column_names()
        .into_iter()
        .skip(1)
        .map(|name| name.to_string())
        .collect();
    for feature in selected_features {
        if !available.contains(feature) {
            return Err(DataError::ColumnNotFound {
                column: feature.clone(),
                path: source.clone(),
            });
        }
    }

    let mut values = Array2::<f64>::zeros((ids.len(), selected_features.len()));
    for (j, feature) in selected_features.iter().enumerate() {
        let column = numeric_column(&df, feature)?;
        for (i, value) in column.into_iter().enumerate() {
            values[[i, j]] = value.unwrap_or(f64::NAN);
        }
    }

    log::info!(
        "Loaded {} features for {} patients from '{}'",
        selected_features.len(),
        ids.len(),
        source
    );
    Ok(FeatureTable {
        ids,
        feature_names: selected_features.to_vec(),
        values,
        source,
    })
}

/// Loads labeled outcomes, dropping rows whose outcome is negative or missing.
pub fn load_outcome_table(path: &Path) -> Result<OutcomeTable, DataError> {
    let source = path.display().to_string();
    let df = read_semicolon_file(path)?;
    let all_ids = identifier_column(&df, path)?;

    let has_outcome = df
        .get_column_names()
        .iter()
        .skip(1)
        .any(|name| name.as_str() == OUTCOME_COLUMN);
    if !has_outcome {
        return Err(DataError::ColumnNotFound {
            column: OUTCOME_COLUMN.to_string(),
            path: source,
        });
    }
    let raw = numeric_column(&df, OUTCOME_COLUMN)?;

    let (ids, outcomes): (Vec<String>, Vec<f64>) = all_ids
        .into_iter()
        .zip(raw)
        .filter_map(|(id, outcome)| match outcome {
            Some(value) if value >= 0.0 => Some((id, value)),
            _ => None,
        })
        .unzip();

    log::info!(
        "Loaded {} labeled outcomes ({} rows unlabeled) from '{}'",
        ids.len(),
        df.height() - ids.len(),
        source
    );
    Ok(OutcomeTable {
        ids,
        outcomes,
        source,
    })
}

impl Cohort {
    /// Joins features and labeled outcomes on patient identifier.
    pub fn intersect(features: &FeatureTable, outcomes: &OutcomeTable) -> Result<Self, DataError> {
        ensure_unique(&features.ids, &features.source)?;
        ensure_unique(&outcomes.ids, &outcomes.source)?;

        let outcome_by_id: HashMap<&str, f64> = outcomes
            .ids
            .iter()
            .map(String::as_str)
            .zip(outcomes.outcomes.iter().copied())
            .collect();

        let mut rows = Vec::new();
        let mut y = Vec::new();
        for (row, id) in features.ids.iter().enumerate() {
            if let Some(&outcome) = outcome_by_id.get(id.as_str()) {
                rows.push(row);
                y.push(outcome);
            }
        }

        let x = features.values.select(Axis(0), &rows);
        for (i, values) in x.rows().into_iter().enumerate() {
            if let Some(j) = values.iter().position(|v| v.is_nan()) {
                return Err(DataError::MissingValuesFound {
                    feature: features.feature_names[j].clone(),
                    patient: features.ids[rows[i]].clone(),
                });
            }
        }

        log::info!(
            "Cohort: {} patients with features and a valid outcome",
            rows.len()
        );
        Ok(Self {
            ids: rows.iter().map(|&row| features.ids[row].clone()).collect(),
            feature_names: features.feature_names.clone(),
            x,
            y: Array1::from_vec(y),
        })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Splits the cohort into the configured test patients and everyone else.
    pub fn partition(&self, test: &TestPartition) -> Result<Partition, DataError> {
        let position: HashMap<&str, usize> = self
            .ids
            .iter()
            .enumerate()
            .map(|(row, id)| (id.as_str(), row))
            .collect();

        let mut test_rows = Vec::with_capacity(test.ids().len());
        for id in test.ids() {
            let row = position
                .get(id.as_str())
                .ok_or_else(|| DataError::TestIdentifierNotInCohort(id.clone()))?;
            test_rows.push(*row);
        }

        let test_set: HashSet<usize> = test_rows.iter().copied().collect();
        let train_rows: Vec<usize> = (0..self.len()).filter(|row| !test_set.contains(row)).collect();

        log::info!(
            "Partition: {} training patients, {} test patients",
            train_rows.len(),
            test_rows.len()
        );
        Ok(Partition {
            train_ids: train_rows.iter().map(|&row| self.ids[row].clone()).collect(),
            test_ids: test_rows.iter().map(|&row| self.ids[row].clone()).collect(),
            x_train: self.x.select(Axis(0), &train_rows),
            y_train: self.y.select(Axis(0), &train_rows),
            x_test: self.x.select(Axis(0), &test_rows),
            y_test: self.y.select(Axis(0), &test_rows),
        })
    }
}
