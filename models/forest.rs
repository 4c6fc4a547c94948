//! Bagged ensembles of CART trees for the `RFreg` and `RFclass` families.

use crate::models::tree::{DecisionTree, SplitCriterion, TreeSettings, TreeTarget};
use crate::models::{Estimator, ModelError, check_shapes, sorted_classes};
use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

/// Features examined at every split.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MaxFeatures {
    All,
    Sqrt,
    Log2,
    Count(usize),
    Fraction(f64),
}

impl MaxFeatures {
    /// Resolves the strategy against the number of available features.
    pub fn resolve(self, n_features: usize) -> usize {
        let count = match self {
            MaxFeatures::All => n_features,
            MaxFeatures::Sqrt => (n_features as f64).sqrt().floor() as usize,
            MaxFeatures::Log2 => (n_features as f64).log2().floor() as usize,
            MaxFeatures::Count(n) => n,
            MaxFeatures::Fraction(f) => (f * n_features as f64).floor() as usize,
        };
        count.clamp(1, n_features.max(1))
    }
}

/// Whether the forest averages regression outputs or votes on class labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForestTask {
    Regression,
    Classification,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForestSettings {
    pub n_estimators: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: MaxFeatures,
    pub bootstrap: bool,
    pub criterion: SplitCriterion,
}

impl ForestSettings {
    pub fn regressor() -> Self {
        Self {
            n_estimators: 100,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: MaxFeatures::All,
            bootstrap: true,
            criterion: SplitCriterion::SquaredError,
        }
    }

    pub fn classifier() -> Self {
        Self {
            max_features: MaxFeatures::Sqrt,
            criterion: SplitCriterion::Gini,
            ..Self::regressor()
        }
    }
}

#[derive(Debug, Clone)]
pub struct RandomForest {
    task: ForestTask,
    settings: ForestSettings,
    seed: u64,
    trees: Vec<DecisionTree>,
    classes: Vec<f64>,
    n_features: usize,
}

impl RandomForest {
    pub fn new(task: ForestTask, settings: ForestSettings, seed: u64) -> Self {
        Self {
            task,
            settings,
            seed,
            trees: Vec::new(),
            classes: Vec::new(),
            n_features: 0,
        }
    }

    pub fn settings(&self) -> &ForestSettings {
        &self.settings
    }

    pub fn trees(&self) -> &[DecisionTree] {
        &self.trees
    }
}

impl Estimator for RandomForest {
    fn fit(&mut self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<(), ModelError> {
        check_shapes(x, y)?;
        let n_samples = x.nrows();
        let n_features = x.ncols();

        let targets: Vec<f64> = y.to_vec();
        let (classes, class_index) = match self.task {
            ForestTask::Regression => (Vec::new(), Vec::new()),
            ForestTask::Classification => {
                let classes = sorted_classes(y);
                let index: Vec<usize> = targets
                    .iter()
                    .map(|v| {
                        classes
                            .binary_search_by(|c| c.total_cmp(v))
                            .unwrap_or_default()
                    })
                    .collect();
                (classes, index)
            }
        };

        let tree_settings = TreeSettings {
            max_depth: self.settings.max_depth,
            min_samples_split: self.settings.min_samples_split,
            min_samples_leaf: self.settings.min_samples_leaf,
            max_features: self.settings.max_features.resolve(n_features),
            criterion: self.settings.criterion,
        };
        let n_classes = classes.len();
        let bootstrap = self.settings.bootstrap;
        let base_seed = self.seed;
        let task = self.task;

        log::debug!(
            "Growing {} trees on {} rows x {} features (max_features={})",
            self.settings.n_estimators,
            n_samples,
            n_features,
            tree_settings.max_features
        );

        let trees: Vec<DecisionTree> = (0..self.settings.n_estimators)
            .into_par_iter()
            .map(|tree_idx| {
                let mut rng = ChaCha8Rng::seed_from_u64(base_seed.wrapping_add(tree_idx as u64));
                let rows: Vec<usize> = if bootstrap {
                    (0..n_samples).map(|_| rng.gen_range(0..n_samples)).collect()
                } else {
                    (0..n_samples).collect()
                };
                let target = match task {
                    ForestTask::Regression => TreeTarget::Regression(&targets),
                    ForestTask::Classification => TreeTarget::Classification {
                        classes: &class_index,
                        n_classes,
                    },
                };
                DecisionTree::fit(x, target, &rows, tree_settings, &mut rng)
            })
            .collect();

        self.trees = trees;
        self.classes = classes;
        self.n_features = n_features;
        Ok(())
    }

    fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>, ModelError> {
        if self.trees.is_empty() {
            return Err(ModelError::NotFitted);
        }
        if x.ncols() != self.n_features {
            return Err(ModelError::ShapeMismatch {
                expected: format!("{} feature columns", self.n_features),
                found: format!("{} feature columns", x.ncols()),
            });
        }

        let n_trees = self.trees.len() as f64;
        let predictions = x
            .rows()
            .into_iter()
            .map(|row| {
                let row = row.to_vec();
                match self.task {
                    ForestTask::Regression => {
                        self.trees.iter().map(|t| t.predict_row(&row)[0]).sum::<f64>() / n_trees
                    }
                    ForestTask::Classification => {
                        let mut votes = vec![0.0; self.classes.len()];
                        for tree in &self.trees {
                            for (acc, p) in votes.iter_mut().zip(tree.predict_row(&row)) {
                                *acc += p;
                            }
                        }
                        let mut best = 0;
                        for (k, &score) in votes.iter().enumerate() {
                            if score > votes[best] {
                                best = k;
                            }
                        }
                        self.classes[best]
                    }
                }
            })
            .collect::<Vec<f64>>();

        Ok(Array1::from_vec(predictions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn noisy_threshold_data(n: usize) -> (Array2<f64>, Array1<f64>) {
        let x = Array2::from_shape_fn((n, 3), |(i, j)| match j {
            0 => i as f64 / n as f64,
            1 => ((i * 7) % 11) as f64,
            _ => ((i * 3) % 5) as f64,
        });
        let y = Array1::from_shape_fn(n, |i| if (i as f64 / n as f64) > 0.5 { 1.0 } else { 0.0 });
        (x, y)
    }

    #[test]
    fn max_features_resolution_matches_common_conventions() {
        assert_eq!(MaxFeatures::Sqrt.resolve(10), 3);
        assert_eq!(MaxFeatures::Log2.resolve(10), 3);
        assert_eq!(MaxFeatures::Fraction(0.5).resolve(10), 5);
        assert_eq!(MaxFeatures::Count(20).resolve(10), 10);
        assert_eq!(MaxFeatures::All.resolve(4), 4);
        assert_eq!(MaxFeatures::Sqrt.resolve(1), 1);
    }

    #[test]
    fn classifier_recovers_threshold_labels() {
        let (x, y) = noisy_threshold_data(60);
        let mut settings = ForestSettings::classifier();
        settings.n_estimators = 25;
        let mut forest = RandomForest::new(ForestTask::Classification, settings, 0);
        forest.fit(x.view(), y.view()).unwrap();

        let predictions = forest.predict(x.view()).unwrap();
        let correct = predictions
            .iter()
            .zip(y.iter())
            .filter(|(p, t)| p == t)
            .count();
        assert!(correct >= 57, "only {correct} of 60 correct");
        assert!(predictions.iter().all(|&p| p == 0.0 || p == 1.0));
    }

    #[test]
    fn regressor_is_deterministic_for_a_seed() {
        let (x, y) = noisy_threshold_data(40);
        let mut settings = ForestSettings::regressor();
        settings.n_estimators = 10;

        let mut first = RandomForest::new(ForestTask::Regression, settings.clone(), 0);
        first.fit(x.view(), y.view()).unwrap();
        let mut second = RandomForest::new(ForestTask::Regression, settings, 0);
        second.fit(x.view(), y.view()).unwrap();

        let a = first.predict(x.view()).unwrap();
        let b = second.predict(x.view()).unwrap();
        assert_eq!(a, b);
        assert_eq!(first.trees().len(), 10);
        assert!(a.iter().all(|&v| (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn predicting_before_fit_is_an_error() {
        let forest = RandomForest::new(ForestTask::Regression, ForestSettings::regressor(), 0);
        let x = Array2::zeros((2, 3));
        assert!(matches!(forest.predict(x.view()), Err(ModelError::NotFitted)));
    }
}
