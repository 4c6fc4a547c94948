//! CART decision trees, the building block of the random-forest families.
//!
//! Nodes live in a flat arena. Splits are found by sorting the node's rows on
//! each candidate feature and sweeping once with running statistics, so a node
//! costs `O(k n log n)` for `k` candidate features.

use ndarray::ArrayView2;
use rand::Rng;
use rand::seq::index;

/// Impurity measure minimized when choosing a split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitCriterion {
    SquaredError,
    Gini,
    Entropy,
}

/// Targets a tree is grown on.
#[derive(Debug, Clone, Copy)]
pub enum TreeTarget<'a> {
    Regression(&'a [f64]),
    /// Class indices in `0..n_classes`.
    Classification { classes: &'a [usize], n_classes: usize },
}

/// Growth limits for a single tree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreeSettings {
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Number of features drawn (without replacement) at every split.
    pub max_features: usize,
    pub criterion: SplitCriterion,
}

#[derive(Debug, Clone)]
enum Node {
    /// Mean target for regression, class proportions for classification.
    Leaf { value: Vec<f64> },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone)]
pub struct DecisionTree {
    nodes: Vec<Node>,
    settings: TreeSettings,
}

const PURITY_EPSILON: f64 = 1e-7;

#[derive(Debug, Clone, Copy)]
struct SplitCandidate {
    feature: usize,
    threshold: f64,
    child_impurity: f64,
}

/// Running per-side statistics during a sweep.
#[derive(Debug, Clone)]
struct SideStats {
    count: usize,
    sum: f64,
    sum_sq: f64,
    class_counts: Vec<usize>,
}

impl SideStats {
    fn empty(n_classes: usize) -> Self {
        Self {
            count: 0,
            sum: 0.0,
            sum_sq: 0.0,
            class_counts: vec![0; n_classes],
        }
    }

    fn push(&mut self, target: &TreeTarget<'_>, row: usize) {
        self.count += 1;
        match target {
            TreeTarget::Regression(y) => {
                self.sum += y[row];
                self.sum_sq += y[row] * y[row];
            }
            TreeTarget::Classification { classes, .. } => self.class_counts[classes[row]] += 1,
        }
    }

    fn remove(&mut self, target: &TreeTarget<'_>, row: usize) {
        self.count -= 1;
        match target {
            TreeTarget::Regression(y) => {
                self.sum -= y[row];
                self.sum_sq -= y[row] * y[row];
            }
            TreeTarget::Classification { classes, .. } => self.class_counts[classes[row]] -= 1,
        }
    }

    fn impurity(&self, criterion: SplitCriterion) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let n = self.count as f64;
        match criterion {
            SplitCriterion::SquaredError => {
                let mean = self.sum / n;
                (self.sum_sq / n - mean * mean).max(0.0)
            }
            SplitCriterion::Gini => {
                1.0 - self
                    .class_counts
                    .iter()
                    .map(|&c| {
                        let p = c as f64 / n;
                        p * p
                    })
                    .sum::<f64>()
            }
            SplitCriterion::Entropy => self
                .class_counts
                .iter()
                .filter(|&&c| c > 0)
                .map(|&c| {
                    let p = c as f64 / n;
                    -p * p.log2()
                })
                .sum(),
        }
    }

    fn leaf_value(&self) -> Vec<f64> {
        if self.class_counts.is_empty() {
            let mean = if self.count > 0 {
                self.sum / self.count as f64
            } else {
                0.0
            };
            vec![mean]
        } else {
            let n = self.count.max(1) as f64;
            self.class_counts.iter().map(|&c| c as f64 / n).collect()
        }
    }
}

impl DecisionTree {
    /// Grows a tree on the rows listed in `rows` (duplicates allowed, as
    /// produced by bootstrap sampling).
    pub fn fit<R: Rng + ?Sized>(
        x: ArrayView2<f64>,
        target: TreeTarget<'_>,
        rows: &[usize],
        settings: TreeSettings,
        rng: &mut R,
    ) -> Self {
        let mut tree = Self {
            nodes: Vec::new(),
            settings,
        };
        let mut working: Vec<usize> = rows.to_vec();
        tree.grow(x, &target, &mut working, 0, rng);
        tree
    }

    fn grow<R: Rng + ?Sized>(
        &mut self,
        x: ArrayView2<f64>,
        target: &TreeTarget<'_>,
        rows: &mut [usize],
        depth: usize,
        rng: &mut R,
    ) -> usize {
        let width = match target {
            TreeTarget::Regression(_) => 0,
            TreeTarget::Classification { n_classes, .. } => *n_classes,
        };
        let mut stats = SideStats::empty(width);
        for &row in rows.iter() {
            stats.push(target, row);
        }

        let n = rows.len();
        let node_impurity = stats.impurity(self.settings.criterion);
        let at_depth_limit = self.settings.max_depth.is_some_and(|limit| depth >= limit);
        let stop = at_depth_limit
            || n < self.settings.min_samples_split
            || n < 2 * self.settings.min_samples_leaf.max(1)
            || node_impurity <= PURITY_EPSILON;

        let candidate = if stop {
            None
        } else {
            self.best_split(x, target, rows, &stats, rng)
        };

        let Some(split) = candidate else {
            let id = self.nodes.len();
            self.nodes.push(Node::Leaf {
                value: stats.leaf_value(),
            });
            return id;
        };

        let id = self.nodes.len();
        self.nodes.push(Node::Leaf { value: Vec::new() });

        rows.sort_unstable_by(|&a, &b| {
            let go_left_a = x[[a, split.feature]] <= split.threshold;
            let go_left_b = x[[b, split.feature]] <= split.threshold;
            go_left_b.cmp(&go_left_a)
        });
        let n_left = rows
            .iter()
            .take_while(|&&row| x[[row, split.feature]] <= split.threshold)
            .count();
        let (left_rows, right_rows) = rows.split_at_mut(n_left);

        let left = self.grow(x, target, left_rows, depth + 1, rng);
        let right = self.grow(x, target, right_rows, depth + 1, rng);
        self.nodes[id] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        id
    }

    fn best_split<R: Rng + ?Sized>(
        &self,
        x: ArrayView2<f64>,
        target: &TreeTarget<'_>,
        rows: &[usize],
        totals: &SideStats,
        rng: &mut R,
    ) -> Option<SplitCandidate> {
        let n_features = x.ncols();
        let n_candidates = self.settings.max_features.clamp(1, n_features.max(1));
        let features = index::sample(rng, n_features, n_candidates);
        let min_leaf = self.settings.min_samples_leaf.max(1);
        let n = rows.len() as f64;

        let mut best: Option<SplitCandidate> = None;
        let mut sorted: Vec<usize> = rows.to_vec();

        for feature in features.iter() {
            sorted.sort_by(|&a, &b| x[[a, feature]].total_cmp(&x[[b, feature]]));
            if x[[sorted[0], feature]] == x[[sorted[sorted.len() - 1], feature]] {
                continue;
            }

            let mut left = SideStats::empty(totals.class_counts.len());
            let mut right = totals.clone();

            for position in 0..sorted.len() - 1 {
                let row = sorted[position];
                left.push(target, row);
                right.remove(target, row);

                let here = x[[row, feature]];
                let next = x[[sorted[position + 1], feature]];
                if next <= here + PURITY_EPSILON {
                    continue;
                }
                if left.count < min_leaf || right.count < min_leaf {
                    continue;
                }

                let child_impurity = (left.count as f64 * left.impurity(self.settings.criterion)
                    + right.count as f64 * right.impurity(self.settings.criterion))
                    / n;

                if best.is_none_or(|b| child_impurity < b.child_impurity) {
                    let mut threshold = here + (next - here) / 2.0;
                    if threshold >= next {
                        threshold = here;
                    }
                    best = Some(SplitCandidate {
                        feature,
                        threshold,
                        child_impurity,
                    });
                }
            }
        }

        best
    }

    /// Leaf output for one feature row.
    pub fn predict_row(&self, row: &[f64]) -> &[f64] {
        let mut node = 0;
        loop {
            match &self.nodes[node] {
                Node::Leaf { value } => return value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if row[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], id: usize) -> usize {
            match &nodes[id] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        if self.nodes.is_empty() {
            0
        } else {
            walk(&self.nodes, 0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn settings(criterion: SplitCriterion, max_features: usize) -> TreeSettings {
        TreeSettings {
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features,
            criterion,
        }
    }

    #[test]
    fn regression_tree_fits_step_function_exactly() {
        let x = Array2::from_shape_fn((10, 1), |(i, _)| i as f64);
        let y: Vec<f64> = (0..10).map(|i| if i < 5 { 1.0 } else { 3.0 }).collect();
        let rows: Vec<usize> = (0..10).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(0);

        let tree = DecisionTree::fit(
            x.view(),
            TreeTarget::Regression(&y),
            &rows,
            settings(SplitCriterion::SquaredError, 1),
            &mut rng,
        );

        assert_eq!(tree.depth(), 1);
        assert_eq!(tree.node_count(), 3);
        assert_abs_diff_eq!(tree.predict_row(&[2.0])[0], 1.0);
        assert_abs_diff_eq!(tree.predict_row(&[7.0])[0], 3.0);
        assert_abs_diff_eq!(tree.predict_row(&[4.5])[0], 1.0);
    }

    #[test]
    fn classification_tree_separates_on_informative_feature() {
        let x = Array2::from_shape_fn((12, 2), |(i, j)| if j == 0 { i as f64 } else { 1.0 });
        let classes: Vec<usize> = (0..12).map(|i| usize::from(i >= 6)).collect();
        let rows: Vec<usize> = (0..12).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(3);

        let tree = DecisionTree::fit(
            x.view(),
            TreeTarget::Classification {
                classes: &classes,
                n_classes: 2,
            },
            &rows,
            settings(SplitCriterion::Gini, 2),
            &mut rng,
        );

        assert_eq!(tree.predict_row(&[1.0, 1.0]), &[1.0, 0.0]);
        assert_eq!(tree.predict_row(&[10.0, 1.0]), &[0.0, 1.0]);
    }

    #[test]
    fn depth_limit_is_respected() {
        let x = Array2::from_shape_fn((32, 1), |(i, _)| i as f64);
        let y: Vec<f64> = (0..32).map(|i| (i * i) as f64).collect();
        let rows: Vec<usize> = (0..32).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let mut limited = settings(SplitCriterion::SquaredError, 1);
        limited.max_depth = Some(2);

        let tree = DecisionTree::fit(x.view(), TreeTarget::Regression(&y), &rows, limited, &mut rng);
        assert!(tree.depth() <= 2);
        assert!(tree.node_count() <= 7);
    }

    #[test]
    fn constant_features_produce_a_single_leaf() {
        let x = Array2::from_elem((6, 2), 4.0);
        let y = vec![0.0, 1.0, 0.0, 1.0, 0.0, 1.0];
        let rows: Vec<usize> = (0..6).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(0);

        let tree = DecisionTree::fit(
            x.view(),
            TreeTarget::Regression(&y),
            &rows,
            settings(SplitCriterion::SquaredError, 2),
            &mut rng,
        );
        assert_eq!(tree.node_count(), 1);
        assert_abs_diff_eq!(tree.predict_row(&[4.0, 4.0])[0], 0.5);
    }
}
