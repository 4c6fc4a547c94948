//! K-fold splitters used by cross-validated prediction and grid search.

use crate::models::ModelError;
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;

/// One train/held-out split over row positions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fold {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// How rows are distributed over folds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FoldStrategy {
    /// Consecutive blocks, optionally after a seeded shuffle of row order.
    KFold { shuffle_seed: Option<u64> },
    /// Unshuffled folds that keep each class's share roughly equal per fold.
    Stratified,
}

/// Splits `n_samples` rows into `n_splits` folds.
///
/// Every row lands in exactly one held-out set. Held-out and training index
/// lists are returned in ascending order.
pub fn split(
    strategy: FoldStrategy,
    n_splits: usize,
    labels: &[f64],
) -> Result<Vec<Fold>, ModelError> {
    let n_samples = labels.len();
    if n_splits < 2 {
        return Err(ModelError::InvalidFoldCount {
            n_splits,
            n_samples,
        });
    }
    if n_samples < n_splits {
        return Err(ModelError::InvalidFoldCount {
            n_splits,
            n_samples,
        });
    }

    let assignment = match strategy {
        FoldStrategy::KFold { shuffle_seed } => kfold_assignment(n_samples, n_splits, shuffle_seed),
        FoldStrategy::Stratified => {
            check_class_counts(labels, n_splits)?;
            stratified_assignment(labels, n_splits)
        }
    };

    Ok(folds_from_assignment(&assignment, n_splits))
}

fn kfold_assignment(n_samples: usize, n_splits: usize, shuffle_seed: Option<u64>) -> Vec<usize> {
    let mut order: Vec<usize> = (0..n_samples).collect();
    if let Some(seed) = shuffle_seed {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        order.shuffle(&mut rng);
    }

    let base = n_samples / n_splits;
    let remainder = n_samples % n_splits;
    let mut assignment = vec![0usize; n_samples];
    let mut cursor = 0;
    for fold in 0..n_splits {
        let size = if fold < remainder { base + 1 } else { base };
        for &row in &order[cursor..cursor + size] {
            assignment[row] = fold;
        }
        cursor += size;
    }
    assignment
}

// Every fold must receive a row of the largest class. Classes smaller than
// the fold count leave some training parts without them, which is allowed
// but logged.
fn check_class_counts(labels: &[f64], n_splits: usize) -> Result<(), ModelError> {
    let mut counts: HashMap<u64, usize> = HashMap::new();
    for label in labels {
        *counts.entry(label.to_bits()).or_insert(0) += 1;
    }
    let largest = counts.values().copied().max().unwrap_or(0);
    if largest < n_splits {
        return Err(ModelError::InvalidFoldCount {
            n_splits,
            n_samples: largest,
        });
    }
    let smallest = counts.values().copied().min().unwrap_or(0);
    if smallest < n_splits {
        log::warn!(
            "The smallest class has only {smallest} rows, fewer than the {n_splits} stratified folds"
        );
    }
    Ok(())
}

// Classes are encoded by order of first appearance. The sorted encoded labels
// are dealt round-robin to decide how many rows of each class every fold gets,
// then each class fills folds 0, 1, ... in row order.
fn stratified_assignment(labels: &[f64], n_splits: usize) -> Vec<usize> {
    let mut encoding: HashMap<u64, usize> = HashMap::new();
    let encoded: Vec<usize> = labels
        .iter()
        .map(|label| {
            let next = encoding.len();
            *encoding.entry(label.to_bits()).or_insert(next)
        })
        .collect();
    let n_classes = encoding.len();

    let mut sorted = encoded.clone();
    sorted.sort_unstable();

    let mut allocation = vec![vec![0usize; n_classes]; n_splits];
    for (position, &class) in sorted.iter().enumerate() {
        allocation[position % n_splits][class] += 1;
    }

    let mut remaining: Vec<Vec<usize>> = (0..n_classes)
        .map(|class| {
            let mut queue = Vec::new();
            for (fold, counts) in allocation.iter().enumerate() {
                queue.extend(std::iter::repeat_n(fold, counts[class]));
            }
            queue.reverse();
            queue
        })
        .collect();

    encoded
        .iter()
        .map(|&class| remaining[class].pop().unwrap_or(0))
        .collect()
}

fn folds_from_assignment(assignment: &[usize], n_splits: usize) -> Vec<Fold> {
    (0..n_splits)
        .map(|fold| {
            let (test, train): (Vec<usize>, Vec<usize>) =
                (0..assignment.len()).partition(|&row| assignment[row] == fold);
            Fold { train, test }
        })
        .collect()
}
