//! Dense SPD solves for the Newton steps of the linear models, backed by
//! faer's LLᵀ factorization.
//!
//! The systems solved here are (p+1)x(p+1) penalized Hessians where `p` is the
//! number of selected features.

use faer::linalg::solvers::{Llt, Solve};
use faer::{Mat, MatRef, Side};
use ndarray::{Array1, Array2};

fn to_faer(matrix: &Array2<f64>) -> Mat<f64> {
    Mat::from_fn(matrix.nrows(), matrix.ncols(), |i, j| matrix[[i, j]])
}

fn column_to_array(column: MatRef<'_, f64>) -> Array1<f64> {
    Array1::from_iter((0..column.nrows()).map(|i| column[(i, 0)]))
}

/// Solves `A x = b` for symmetric positive-definite `A`. Returns `None` when
/// the factorization fails or the solution is not finite.
pub fn solve_spd(matrix: &Array2<f64>, rhs: &Array1<f64>) -> Option<Array1<f64>> {
    if matrix.nrows() != matrix.ncols() || matrix.nrows() != rhs.len() {
        return None;
    }
    let factor = Llt::new(to_faer(matrix).as_ref(), Side::Lower).ok()?;
    let rhs = Mat::from_fn(rhs.len(), 1, |i, _| rhs[i]);
    let solution = column_to_array(factor.solve(rhs.as_ref()).as_ref());
    solution.iter().all(|v| v.is_finite()).then_some(solution)
}

/// Solves a symmetric positive-definite system, retrying with a growing ridge
/// on the diagonal when the factorization breaks down.
pub fn solve_spd_with_ridge(matrix: &Array2<f64>, rhs: &Array1<f64>) -> Option<Array1<f64>> {
    let scale = matrix
        .diag()
        .iter()
        .fold(0.0_f64, |acc, &v| acc.max(v.abs()))
        .max(1.0);

    let mut ridge = 0.0;
    for attempt in 0..8 {
        let mut regularized = matrix.clone();
        if ridge > 0.0 {
            regularized.diag_mut().mapv_inplace(|v| v + ridge);
        }
        if let Some(solution) = solve_spd(&regularized, rhs) {
            if attempt > 0 {
                log::debug!("LLᵀ solve succeeded after adding ridge {ridge:.3e}");
            }
            return Some(solution);
        }
        ridge = if ridge == 0.0 { scale * 1e-10 } else { ridge * 100.0 };
    }
    None
}
