//! Performance metrics over paired outcome arrays.
//!
//! Classification metrics are computed on predictions rounded half-to-even to
//! the nearest integer class, so regression output is scored as an ordinal
//! class prediction. Labels are the union of true and predicted values, and
//! every zero denominator yields 0.

use crate::params::ParamError;
use std::fmt;
use std::str::FromStr;

/// Rounds raw predictions to class labels, ties to even.
pub fn round_to_classes(predictions: &[f64]) -> Vec<f64> {
    predictions.iter().map(|p| p.round_ties_even()).collect()
}

pub fn accuracy(y_true: &[f64], y_pred: &[f64]) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    let correct = y_true.iter().zip(y_pred).filter(|(t, p)| t == p).count();
    correct as f64 / y_true.len() as f64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Average {
    Micro,
    Macro,
}

/// True positive, false positive and false negative counts for one label.
#[derive(Debug, Clone, Copy, Default)]
struct LabelCounts {
    true_pos: usize,
    false_pos: usize,
    false_neg: usize,
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

fn label_counts(y_true: &[f64], y_pred: &[f64]) -> Vec<LabelCounts> {
    let mut labels: Vec<f64> = y_true.iter().chain(y_pred).copied().collect();
    labels.sort_by(f64::total_cmp);
    labels.dedup();

    let position = |v: &f64| labels.binary_search_by(|l| l.total_cmp(v)).unwrap_or_default();
    let mut counts = vec![LabelCounts::default(); labels.len()];
    for (t, p) in y_true.iter().zip(y_pred) {
        if t == p {
            counts[position(t)].true_pos += 1;
        } else {
            counts[position(p)].false_pos += 1;
            counts[position(t)].false_neg += 1;
        }
    }
    counts
}

fn averaged(y_true: &[f64], y_pred: &[f64], average: Average, per_label: fn(&LabelCounts) -> f64) -> f64 {
    let counts = label_counts(y_true, y_pred);
    match average {
        Average::Micro => {
            let total = counts.iter().fold(LabelCounts::default(), |acc, c| LabelCounts {
                true_pos: acc.true_pos + c.true_pos,
                false_pos: acc.false_pos + c.false_pos,
                false_neg: acc.false_neg + c.false_neg,
            });
            per_label(&total)
        }
        Average::Macro => {
            if counts.is_empty() {
                return 0.0;
            }
            counts.iter().map(per_label).sum::<f64>() / counts.len() as f64
        }
    }
}

pub fn precision(y_true: &[f64], y_pred: &[f64], average: Average) -> f64 {
    averaged(y_true, y_pred, average, |c| ratio(c.true_pos, c.true_pos + c.false_pos))
}

pub fn recall(y_true: &[f64], y_pred: &[f64], average: Average) -> f64 {
    averaged(y_true, y_pred, average, |c| ratio(c.true_pos, c.true_pos + c.false_neg))
}

pub fn f1(y_true: &[f64], y_pred: &[f64], average: Average) -> f64 {
    averaged(y_true, y_pred, average, |c| ratio(2 * c.true_pos, 2 * c.true_pos + c.false_pos + c.false_neg))
}

/// Coefficient of determination. A constant target scores 1.0 when it is
/// predicted exactly and 0.0 otherwise.
pub fn r2(y_true: &[f64], y_pred: &[f64]) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    let mean = y_true.iter().sum::<f64>() / y_true.len() as f64;
    let ss_res: f64 = y_true.iter().zip(y_pred).map(|(t, p)| (t - p).powi(2)).sum();
    let ss_tot: f64 = y_true.iter().map(|t| (t - mean).powi(2)).sum();
    if ss_tot == 0.0 {
        return if ss_res == 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

pub fn mean_squared_error(y_true: &[f64], y_pred: &[f64]) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    y_true.iter().zip(y_pred).map(|(t, p)| (t - p).powi(2)).sum::<f64>() / y_true.len() as f64
}

pub fn rmse(y_true: &[f64], y_pred: &[f64]) -> f64 {
    mean_squared_error(y_true, y_pred).sqrt()
}

pub fn mean_absolute_error(y_true: &[f64], y_pred: &[f64]) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    y_true.iter().zip(y_pred).map(|(t, p)| (t - p).abs()).sum::<f64>() / y_true.len() as f64
}

/// The full metric set stored per evaluation in the results log.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSet {
    pub accuracy: f64,
    pub precision_micro: f64,
    pub precision_macro: f64,
    pub recall_micro: f64,
    pub recall_macro: f64,
    pub f1_micro: f64,
    pub f1_macro: f64,
    pub r2: f64,
    pub rmse: f64,
}

impl MetricSet {
    /// Class metrics use rounded predictions, `r2` and `rmse` the raw ones.
    pub fn compute(y_true: &[f64], y_pred: &[f64]) -> Self {
        let classes = round_to_classes(y_pred);
        Self {
            accuracy: accuracy(y_true, &classes),
            precision_micro: precision(y_true, &classes, Average::Micro),
            precision_macro: precision(y_true, &classes, Average::Macro),
            recall_micro: recall(y_true, &classes, Average::Micro),
            recall_macro: recall(y_true, &classes, Average::Macro),
            f1_micro: f1(y_true, &classes, Average::Micro),
            f1_macro: f1(y_true, &classes, Average::Macro),
            r2: r2(y_true, y_pred),
            rmse: rmse(y_true, y_pred),
        }
    }

    /// Values in results-log column order.
    pub fn values(&self) -> [f64; 9] {
        [
            self.accuracy,
            self.precision_micro,
            self.precision_macro,
            self.recall_micro,
            self.recall_macro,
            self.f1_micro,
            self.f1_macro,
            self.r2,
            self.rmse,
        ]
    }
}

/// Prints the short classification summary shown after each evaluation.
pub fn print_summary(title: &str, y_true: &[f64], y_pred: &[f64]) {
    let classes = round_to_classes(y_pred);
    println!();
    println!("{title} ({} patients)", y_true.len());
    println!("Accuracy:          {:.4}", accuracy(y_true, &classes));
    println!("Precision (micro): {:.4}", precision(y_true, &classes, Average::Micro));
    println!("Recall (micro):    {:.4}", recall(y_true, &classes, Average::Micro));
    println!("Precision (macro): {:.4}", precision(y_true, &classes, Average::Macro));
    println!("Recall (macro):    {:.4}", recall(y_true, &classes, Average::Macro));
}

/// Metric maximized by grid search. Error metrics are negated so that larger
/// is always better.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scoring {
    #[default]
    R2,
    Accuracy,
    NegMeanSquaredError,
    NegRootMeanSquaredError,
    NegMeanAbsoluteError,
    PrecisionMicro,
    PrecisionMacro,
    RecallMicro,
    RecallMacro,
    F1Micro,
    F1Macro,
}

impl Scoring {
    pub fn name(self) -> &'static str {
        match self {
            Scoring::R2 => "r2",
            Scoring::Accuracy => "accuracy",
            Scoring::NegMeanSquaredError => "neg_mean_squared_error",
            Scoring::NegRootMeanSquaredError => "neg_root_mean_squared_error",
            Scoring::NegMeanAbsoluteError => "neg_mean_absolute_error",
            Scoring::PrecisionMicro => "precision_micro",
            Scoring::PrecisionMacro => "precision_macro",
            Scoring::RecallMicro => "recall_micro",
            Scoring::RecallMacro => "recall_macro",
            Scoring::F1Micro => "f1_micro",
            Scoring::F1Macro => "f1_macro",
        }
    }

    pub fn score(self, y_true: &[f64], y_pred: &[f64]) -> f64 {
        let classes = || round_to_classes(y_pred);
        match self {
            Scoring::R2 => r2(y_true, y_pred),
            Scoring::Accuracy => accuracy(y_true, &classes()),
            Scoring::NegMeanSquaredError => -mean_squared_error(y_true, y_pred),
            Scoring::NegRootMeanSquaredError => -rmse(y_true, y_pred),
            Scoring::NegMeanAbsoluteError => -mean_absolute_error(y_true, y_pred),
            Scoring::PrecisionMicro => precision(y_true, &classes(), Average::Micro),
            Scoring::PrecisionMacro => precision(y_true, &classes(), Average::Macro),
            Scoring::RecallMicro => recall(y_true, &classes(), Average::Micro),
            Scoring::RecallMacro => recall(y_true, &classes(), Average::Macro),
            Scoring::F1Micro => f1(y_true, &classes(), Average::Micro),
            Scoring::F1Macro => f1(y_true, &classes(), Average::Macro),
        }
    }
}

impl fmt::Display for Scoring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Scoring {
    type Err = ParamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let scoring = match s {
            "r2" => Scoring::R2,
            "accuracy" => Scoring::Accuracy,
            "neg_mean_squared_error" => Scoring::NegMeanSquaredError,
            "neg_root_mean_squared_error" => Scoring::NegRootMeanSquaredError,
            "neg_mean_absolute_error" => Scoring::NegMeanAbsoluteError,
            "precision_micro" => Scoring::PrecisionMicro,
            "precision_macro" => Scoring::PrecisionMacro,
            "recall_micro" => Scoring::RecallMicro,
            "recall_macro" => Scoring::RecallMacro,
            "f1_micro" => Scoring::F1Micro,
            "f1_macro" => Scoring::F1Macro,
            other => return Err(ParamError::UnknownScoring(other.to_string())),
        };
        Ok(scoring)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn rounding_is_half_to_even() {
        assert_eq!(
            round_to_classes(&[0.5, 1.5, 2.5, -0.5, 0.49, 0.51]),
            vec![0.0, 2.0, 2.0, -0.0, 0.0, 1.0]
        );
    }

    #[test]
    fn micro_averages_equal_accuracy() {
        let y_true = [0.0, 1.0, 2.0, 2.0, 1.0, 0.0];
        let y_pred = [0.0, 2.0, 2.0, 1.0, 1.0, 0.0];
        let acc = accuracy(&y_true, &y_pred);
        assert_abs_diff_eq!(acc, 4.0 / 6.0);
        assert_abs_diff_eq!(precision(&y_true, &y_pred, Average::Micro), acc);
        assert_abs_diff_eq!(recall(&y_true, &y_pred, Average::Micro), acc);
        assert_abs_diff_eq!(f1(&y_true, &y_pred, Average::Micro), acc);
    }

    #[test]
    fn macro_averages_include_labels_only_predicted() {
        // Label 3 is never true, so its precision and recall are 0.
        let y_true = [0.0, 0.0, 1.0, 1.0];
        let y_pred = [0.0, 3.0, 1.0, 1.0];
        assert_abs_diff_eq!(precision(&y_true, &y_pred, Average::Macro), (1.0 + 1.0 + 0.0) / 3.0);
        assert_abs_diff_eq!(recall(&y_true, &y_pred, Average::Macro), (0.5 + 1.0 + 0.0) / 3.0);
        let f1_zero = 2.0 / 3.0;
        assert_abs_diff_eq!(f1(&y_true, &y_pred, Average::Macro), (f1_zero + 1.0 + 0.0) / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn r2_handles_constant_targets() {
        assert_abs_diff_eq!(r2(&[1.0, 1.0], &[1.0, 1.0]), 1.0);
        assert_abs_diff_eq!(r2(&[1.0, 1.0], &[1.0, 0.0]), 0.0);
        assert_abs_diff_eq!(r2(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]), 1.0);
        assert_abs_diff_eq!(r2(&[1.0, 2.0, 3.0], &[2.0, 2.0, 2.0]), 0.0);
    }

    #[test]
    fn metric_set_scores_rounded_classes_and_raw_values() {
        let metrics = MetricSet::compute(&[0.0, 1.0, 1.0, 0.0], &[0.2, 0.7, 0.4, 0.0]);
        assert_abs_diff_eq!(metrics.accuracy, 0.75);
        assert_abs_diff_eq!(metrics.rmse, ((0.04 + 0.09 + 0.36) / 4.0_f64).sqrt(), epsilon = 1e-12);
        assert_eq!(metrics.values().len(), 9);
    }

    #[test]
    fn scoring_names_parse_and_negate_errors() {
        let scoring: Scoring = "neg_mean_absolute_error".parse().unwrap();
        assert_abs_diff_eq!(scoring.score(&[1.0, 2.0], &[2.0, 2.0]), -0.5);
        assert_eq!(Scoring::default().to_string(), "r2");
        assert!(matches!(
            "roc_auc".parse::<Scoring>(),
            Err(ParamError::UnknownScoring(_))
        ));
    }
}
