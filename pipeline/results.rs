//! The cumulative results log.
//!
//! One `;`-separated row per experiment run. The header is written only when
//! the file does not exist yet; later runs append data rows and never check
//! the existing header. Each row is serialized in memory first and appended
//! with a single write.

use crate::evaluate::PredictionRecord;
use crate::metrics::MetricSet;
use crate::params::format_float;
use itertools::Itertools;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResultsError {
    #[error("Failed to write results log '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to serialize results row: {0}")]
    Csv(#[from] csv::Error),
}

const METADATA_COLUMNS: [&str; 12] = [
    "selectionFeaturesPath",
    "FSmethod",
    "FSparams",
    "selectedFeatures",
    "MLmethod",
    "MLparams",
    "yTrueTest",
    "yPredRegTest",
    "yPredClassTest",
    "yTrueVal",
    "yPredRegVal",
    "yPredClassVal",
];

const METRIC_COLUMNS: [&str; 9] = [
    "accuracy",
    "precisionMicro",
    "precisionMacro",
    "recallMicro",
    "recallMacro",
    "f1Micro",
    "f1Macro",
    "r2",
    "rmse",
];

/// Snapshot of one finished run.
#[derive(Debug, Clone)]
pub struct ResultsRow {
    pub selection_features_path: String,
    pub fs_method: String,
    pub fs_params: String,
    pub selected_features: Vec<String>,
    pub ml_method: String,
    /// Rendered parameters, including the scoring metric.
    pub ml_params: String,
    pub test: PredictionRecord,
    pub validation: PredictionRecord,
}

fn float_list(values: &[f64]) -> String {
    format!("[{}]", values.iter().map(|v| format_float(*v)).join(", "))
}

fn class_list(values: &[f64]) -> String {
    format!("[{}]", values.iter().map(|v| format!("{}", *v as i64)).join(", "))
}

// Integral outcomes are written as integers, anything else as floats.
fn truth_list(values: &[f64]) -> String {
    if values.iter().all(|v| v.is_finite() && v.fract() == 0.0) {
        class_list(values)
    } else {
        float_list(values)
    }
}

fn text_list(values: &[String]) -> String {
    format!("[{}]", values.iter().map(|v| format!("'{v}'")).join(", "))
}

impl ResultsRow {
    pub fn header() -> Vec<String> {
        let mut header: Vec<String> = METADATA_COLUMNS.iter().map(|c| c.to_string()).collect();
        for suffix in ["Test", "Val"] {
            header.extend(METRIC_COLUMNS.iter().map(|c| format!("{c}{suffix}")));
        }
        header
    }

    pub fn record(&self) -> Vec<String> {
        let mut record = vec![
            self.selection_features_path.clone(),
            self.fs_method.clone(),
            self.fs_params.clone(),
            text_list(&self.selected_features),
            self.ml_method.clone(),
            self.ml_params.clone(),
            truth_list(&self.test.y_true),
            float_list(&self.test.y_pred),
            class_list(&self.test.predicted_classes()),
            truth_list(&self.validation.y_true),
            float_list(&self.validation.y_pred),
            class_list(&self.validation.predicted_classes()),
        ];
        for evaluation in [&self.test, &self.validation] {
            let metrics = MetricSet::compute(&evaluation.y_true, &evaluation.y_pred);
            record.extend(metrics.values().iter().map(|v| format_float(*v)));
        }
        record
    }
}

/// Appends `row` to the log at `path`, writing the header first if the file
/// does not exist.
pub fn write_results(path: &Path, row: &ResultsRow) -> Result<(), ResultsError> {
    let write_header = !path.exists();

    let mut writer = csv::WriterBuilder::new()
        .delimiter(b';')
        .from_writer(Vec::new());
    if write_header {
        writer.write_record(ResultsRow::header())?;
    }
    writer.write_record(row.record())?;
    let io_error = |source| ResultsError::Io {
        path: path.display().to_string(),
        source,
    };
    let bytes = writer
        .into_inner()
        .map_err(|e| io_error(std::io::Error::new(e.error().kind(), e.error().to_string())))?;

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(io_error)?;
    file.write_all(&bytes).map_err(io_error)?;

    log::info!(
        "{} results row to '{}'",
        if write_header { "Wrote header and" } else { "Appended" },
        path.display()
    );
    Ok(())
}
