//! Hyperparameter grids and the two shapes they are resolved into.
//!
//! User input is a [`ParamGrid`], where every entry is either a single value or
//! a list of candidates. A grid is turned into exactly one of:
//!
//! - a [`SearchSpace`] (every entry a non-empty candidate list), consumed by
//!   grid search;
//! - a [`ResolvedParams`] (every entry a single value), consumed by model
//!   construction.

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParamError {
    #[error("Parameter '{0}' has an empty candidate list.")]
    EmptyCandidates(String),
    #[error(
        "Unknown scoring metric '{0}'. Expected one of: r2, accuracy, neg_mean_squared_error, neg_root_mean_squared_error, neg_mean_absolute_error, precision_micro, precision_macro, recall_micro, recall_macro, f1_micro, f1_macro."
    )]
    UnknownScoring(String),
}

/// One scalar hyperparameter value as written in the experiment config.
///
/// The text `"none"` (any case) stands for an absent value, for example an
/// unlimited `max_depth`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl ParamValue {
    pub fn is_none(&self) -> bool {
        matches!(self, ParamValue::Text(t) if t.eq_ignore_ascii_case("none"))
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(i) => Some(*i as f64),
            ParamValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ParamValue::Text(t) => Some(t),
            _ => None,
        }
    }

    /// Rendering used inside dictionary-like cells: text is single-quoted,
    /// `none` becomes `None`.
    pub fn quoted(&self) -> String {
        match self {
            ParamValue::Text(t) if !self.is_none() => format!("'{t}'"),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(true) => f.write_str("True"),
            ParamValue::Bool(false) => f.write_str("False"),
            ParamValue::Int(i) => write!(f, "{i}"),
            ParamValue::Float(v) => f.write_str(&format_float(*v)),
            ParamValue::Text(_) if self.is_none() => f.write_str("None"),
            ParamValue::Text(t) => f.write_str(t),
        }
    }
}

/// Shortest round-tripping rendering, always with a decimal point for finite
/// values (`1.0`, `0.25`, `1e-7`).
pub fn format_float(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let mut buffer = ryu::Buffer::new();
    buffer.format_finite(value).to_string()
}

/// A grid entry: a fixed value or a list of candidates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamSpec {
    One(ParamValue),
    Many(Vec<ParamValue>),
}

/// Hyperparameters as given by the user, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamGrid(pub BTreeMap<String, ParamSpec>);

impl ParamGrid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, spec: ParamSpec) -> Self {
        self.0.insert(name.to_string(), spec);
        self
    }

    /// Wraps single values into one-element candidate lists.
    pub fn into_search_space(self) -> Result<SearchSpace, ParamError> {
        let mut entries = BTreeMap::new();
        for (name, spec) in self.0 {
            let candidates = match spec {
                ParamSpec::One(value) => vec![value],
                ParamSpec::Many(values) => values,
            };
            if candidates.is_empty() {
                return Err(ParamError::EmptyCandidates(name));
            }
            entries.insert(name, candidates);
        }
        Ok(SearchSpace { entries })
    }

    /// Collapses every candidate list to its first element.
    pub fn resolve_first(&self) -> Result<ResolvedParams, ParamError> {
        let mut resolved = ResolvedParams::default();
        for (name, spec) in &self.0 {
            let value = match spec {
                ParamSpec::One(value) => value.clone(),
                ParamSpec::Many(values) => values
                    .first()
                    .cloned()
                    .ok_or_else(|| ParamError::EmptyCandidates(name.clone()))?,
            };
            resolved.insert(name, value);
        }
        Ok(resolved)
    }
}

/// Candidate lists to search exhaustively. Every list is non-empty.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchSpace {
    entries: BTreeMap<String, Vec<ParamValue>>,
}

impl SearchSpace {
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Cartesian product of all candidate lists, names in sorted order with
    /// the last name varying fastest.
    pub fn candidates(&self) -> Vec<ResolvedParams> {
        if self.entries.is_empty() {
            return vec![ResolvedParams::default()];
        }
        self.entries
            .values()
            .map(|values| values.iter().cloned())
            .multi_cartesian_product()
            .map(|combination| ResolvedParams {
                values: self.entries.keys().cloned().zip(combination).collect(),
            })
            .collect()
    }
}

/// One concrete value per hyperparameter, ready for model construction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedParams {
    values: BTreeMap<String, ParamValue>,
}

impl ResolvedParams {
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    pub fn insert(&mut self, name: &str, value: ParamValue) {
        self.values.insert(name.to_string(), value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Display for ResolvedParams {
    /// Renders as `{'C': 1.0, 'penalty': 'l2'}`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let body = self
            .values
            .iter()
            .map(|(name, value)| format!("'{name}': {}", value.quoted()))
            .join(", ");
        write!(f, "{{{body}}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(t: &str) -> ParamValue {
        ParamValue::Text(t.to_string())
    }

    #[test]
    fn fixed_mode_takes_first_candidate_and_keeps_scalars() {
        let grid = ParamGrid::new()
            .with(
                "C",
                ParamSpec::Many(vec![ParamValue::Float(0.1), ParamValue::Float(1.0)]),
            )
            .with("penalty", ParamSpec::One(text("l2")));
        let resolved = grid.resolve_first().unwrap();
        assert_eq!(resolved.get("C"), Some(&ParamValue::Float(0.1)));
        assert_eq!(resolved.get("penalty"), Some(&text("l2")));
    }

    #[test]
    fn fixed_mode_is_idempotent() {
        let grid = ParamGrid::new()
            .with("max_depth", ParamSpec::Many(vec![ParamValue::Int(3), text("none")]))
            .with("n_estimators", ParamSpec::One(ParamValue::Int(50)));
        let once = grid.resolve_first().unwrap();

        let mut regrown = ParamGrid::new();
        for (name, value) in once.iter() {
            regrown = regrown.with(name, ParamSpec::One(value.clone()));
        }
        assert_eq!(regrown.resolve_first().unwrap(), once);
    }

    #[test]
    fn search_space_orders_last_name_fastest() {
        let space = ParamGrid::new()
            .with("b", ParamSpec::Many(vec![ParamValue::Int(1), ParamValue::Int(2)]))
            .with("a", ParamSpec::Many(vec![text("x"), text("y")]))
            .into_search_space()
            .unwrap();
        let rendered: Vec<String> = space.candidates().iter().map(|c| c.to_string()).collect();
        assert_eq!(
            rendered,
            vec![
                "{'a': 'x', 'b': 1}",
                "{'a': 'x', 'b': 2}",
                "{'a': 'y', 'b': 1}",
                "{'a': 'y', 'b': 2}",
            ]
        );
    }

    #[test]
    fn empty_candidate_list_is_rejected() {
        let grid = ParamGrid::new().with("C", ParamSpec::Many(Vec::new()));
        assert!(matches!(
            grid.clone().into_search_space(),
            Err(ParamError::EmptyCandidates(name)) if name == "C"
        ));
        assert!(grid.resolve_first().is_err());
    }

    #[test]
    fn empty_grid_has_one_default_candidate() {
        let space = ParamGrid::new().into_search_space().unwrap();
        let candidates = space.candidates();
        assert_eq!(candidates.len(), 1);
        assert!(candidates[0].is_empty());
    }

    #[test]
    fn values_render_like_the_search_log() {
        assert_eq!(ParamValue::Float(1.0).to_string(), "1.0");
        assert_eq!(ParamValue::Bool(true).to_string(), "True");
        assert_eq!(text("None").to_string(), "None");
        assert_eq!(text("none").quoted(), "None");
        assert_eq!(text("sqrt").quoted(), "'sqrt'");
    }

    #[test]
    fn grid_deserializes_scalars_and_lists_from_toml() {
        let grid: ParamGrid = toml::from_str(
            "C = [0.1, 1.0]\npenalty = \"l2\"\nmax_iter = 200\nfit_intercept = true\n",
        )
        .unwrap();
        assert_eq!(
            grid.0.get("C"),
            Some(&ParamSpec::Many(vec![
                ParamValue::Float(0.1),
                ParamValue::Float(1.0)
            ]))
        );
        assert_eq!(grid.0.get("max_iter"), Some(&ParamSpec::One(ParamValue::Int(200))));
        assert_eq!(
            grid.0.get("fit_intercept"),
            Some(&ParamSpec::One(ParamValue::Bool(true)))
        );
    }
}
