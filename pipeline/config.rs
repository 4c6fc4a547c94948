//! Experiment configuration, read from a TOML file.
//!
//! ```toml
//! [data]
//! features = "selectionFeatures.csv"
//! outcomes = "manualFeatures.csv"
//! selected_features = ["age", "bmi"]
//!
//! [model]
//! method = "LogReg"
//!
//! [model.params]
//! max_iter = [100, 200]
//! ```
//!
//! Relative paths are resolved against the directory holding the config file.

use crate::params::ParamGrid;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Test patients used when the config does not list its own.
pub const DEFAULT_TEST_IDS: [i64; 8] = [1, 8, 13, 20, 40, 44, 49, 55];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse TOML config file: {0}")]
    TomlParseError(#[from] toml::de::Error),
}

/// A patient identifier as written in the config, either a number or text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PatientId {
    Number(i64),
    Text(String),
}

impl fmt::Display for PatientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatientId::Number(n) => write!(f, "{n}"),
            PatientId::Text(t) => f.write_str(t),
        }
    }
}

/// The fixed list of patients held out for testing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestPartition {
    ids: Vec<String>,
}

impl TestPartition {
    /// Repeated identifiers are kept once, at their first position.
    pub fn new(ids: Vec<String>) -> Self {
        let mut unique: Vec<String> = Vec::with_capacity(ids.len());
        for id in ids {
            if !unique.contains(&id) {
                unique.push(id);
            }
        }
        Self { ids: unique }
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }
}

impl Default for TestPartition {
    fn default() -> Self {
        Self::new(DEFAULT_TEST_IDS.iter().map(|id| id.to_string()).collect())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataSection {
    pub features: PathBuf,
    pub outcomes: PathBuf,
    pub selected_features: Vec<String>,
    #[serde(default)]
    pub test_ids: Option<Vec<PatientId>>,
}

/// Metadata about how the feature subset was chosen. Copied verbatim to the
/// results log.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeatureSelectionSection {
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub params: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelSection {
    pub method: String,
    #[serde(default)]
    pub optimize: bool,
    #[serde(default)]
    pub scoring: Option<String>,
    #[serde(default)]
    pub params: ParamGrid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputSection {
    #[serde(default = "default_results_path")]
    pub results: PathBuf,
    #[serde(default = "default_search_log_path")]
    pub search_log: PathBuf,
}

fn default_results_path() -> PathBuf {
    PathBuf::from("predResults.csv")
}

fn default_search_log_path() -> PathBuf {
    PathBuf::from("paramSearchResults.csv")
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            results: default_results_path(),
            search_log: default_search_log_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExperimentConfig {
    pub data: DataSection,
    #[serde(default)]
    pub feature_selection: FeatureSelectionSection,
    pub model: ModelSection,
    #[serde(default)]
    pub output: OutputSection,
}

impl ExperimentConfig {
    /// Parses a config from TOML text. Paths are left as written.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Reads a config file and resolves its relative paths against the
    /// file's directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut config = Self::parse(&text)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        log::info!("Loaded experiment config from '{}'", path.display());
        Ok(config)
    }

    fn resolve_paths(&mut self, base: &Path) {
        for path in [
            &mut self.data.features,
            &mut self.data.outcomes,
            &mut self.output.results,
            &mut self.output.search_log,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    pub fn test_partition(&self) -> TestPartition {
        match &self.data.test_ids {
            Some(ids) => TestPartition::new(ids.iter().map(PatientId::to_string).collect()),
            None => TestPartition::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{ParamSpec, ParamValue};
    use std::io::Write;

    const MINIMAL: &str = r#"
[data]
features = "selectionFeatures.csv"
outcomes = "manualFeatures.csv"
selected_features = ["age", "bmi"]

[model]
method = "RFclass"

[model.params]
n_estimators = [10, 50]
max_depth = "none"
"#;

    #[test]
    fn minimal_config_takes_defaults() {
        let config = ExperimentConfig::parse(MINIMAL).unwrap();
        assert!(!config.model.optimize);
        assert_eq!(config.model.scoring, None);
        assert_eq!(config.output.results, PathBuf::from("predResults.csv"));
        assert_eq!(config.feature_selection.method, "");
        assert_eq!(
            config.test_partition().ids(),
            &["1", "8", "13", "20", "40", "44", "49", "55"]
        );
        assert_eq!(
            config.model.params.0.get("n_estimators"),
            Some(&ParamSpec::Many(vec![ParamValue::Int(10), ParamValue::Int(50)]))
        );
    }

    #[test]
    fn test_ids_accept_numbers_and_text() {
        let text = MINIMAL.replace(
            "selected_features = [\"age\", \"bmi\"]",
            "selected_features = [\"age\"]\ntest_ids = [3, \"P7\", 3]",
        );
        let config = ExperimentConfig::parse(&text).unwrap();
        assert_eq!(config.test_partition().ids(), &["3", "P7"]);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let text = MINIMAL.replace("[model]", "[model]\nmethdo = \"x\"");
        assert!(matches!(
            ExperimentConfig::parse(&text),
            Err(ConfigError::TomlParseError(_))
        ));
    }

    #[test]
    fn relative_paths_resolve_against_config_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("experiment.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();

        let config = ExperimentConfig::load(&path).unwrap();
        assert_eq!(config.data.features, dir.path().join("selectionFeatures.csv"));
        assert_eq!(config.output.search_log, dir.path().join("paramSearchResults.csv"));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        assert!(matches!(
            ExperimentConfig::load(Path::new("/nonexistent/prognos.toml")),
            Err(ConfigError::Io { .. })
        ));
    }
}
