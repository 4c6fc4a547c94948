//! L2-penalized logistic regression for the `LogReg` family.
//!
//! The penalized mean log-loss
//!
//! ```text
//! f(w) = (1/n) * [ sum_i softplus(eta_i) - t_i * eta_i ] + (1 / (2 C n)) * |beta|^2
//! ```
//!
//! is minimized either by quasi-Newton BFGS (`solver = "lbfgs"`) or by damped
//! Newton iterations (`"newton-cg"`, `"newton-cholesky"`). The intercept is
//! never penalized. Problems with more than two classes are fit one-vs-rest.

use crate::models::linalg::solve_spd_with_ridge;
use crate::models::{Estimator, ModelError, check_shapes, sorted_classes};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, s};
use wolfe_bfgs::{Bfgs, BfgsSolution};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Penalty {
    L2,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Solver {
    Lbfgs,
    Newton,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogisticSettings {
    pub penalty: Penalty,
    /// Inverse regularization strength.
    pub c: f64,
    pub solver: Solver,
    pub max_iter: usize,
    pub tol: f64,
    pub fit_intercept: bool,
}

impl Default for LogisticSettings {
    fn default() -> Self {
        Self {
            penalty: Penalty::L2,
            c: 1.0,
            solver: Solver::Lbfgs,
            max_iter: 100,
            tol: 1e-4,
            fit_intercept: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogisticRegression {
    settings: LogisticSettings,
    classes: Vec<f64>,
    /// One row per binary sub-problem; the last column is the intercept when
    /// `fit_intercept` is set.
    coefficients: Array2<f64>,
}

impl LogisticRegression {
    pub fn new(settings: LogisticSettings) -> Self {
        Self {
            settings,
            classes: Vec::new(),
            coefficients: Array2::zeros((0, 0)),
        }
    }

    pub fn coefficients(&self) -> &Array2<f64> {
        &self.coefficients
    }

    fn design(&self, x: ArrayView2<f64>) -> Array2<f64> {
        if !self.settings.fit_intercept {
            return x.to_owned();
        }
        let mut design = Array2::<f64>::ones((x.nrows(), x.ncols() + 1));
        design.slice_mut(s![.., ..x.ncols()]).assign(&x);
        design
    }

    /// Linear predictor for every sub-problem, shape `[n_rows, n_problems]`.
    pub fn decision_function(&self, x: ArrayView2<f64>) -> Result<Array2<f64>, ModelError> {
        if self.classes.is_empty() {
            return Err(ModelError::NotFitted);
        }
        let expected = self.coefficients.ncols() - usize::from(self.settings.fit_intercept);
        if x.ncols() != expected {
            return Err(ModelError::ShapeMismatch {
                expected: format!("{expected} feature columns"),
                found: format!("{} feature columns", x.ncols()),
            });
        }
        Ok(self.design(x).dot(&self.coefficients.t()))
    }
}

impl Estimator for LogisticRegression {
    fn fit(&mut self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<(), ModelError> {
        check_shapes(x, y)?;
        let classes = sorted_classes(y);
        if classes.len() < 2 {
            return Err(ModelError::SingleClass {
                class: classes.first().copied().unwrap_or(f64::NAN),
            });
        }

        let design = self.design(x);
        let penalized = x.ncols();
        let problems: Vec<f64> = if classes.len() == 2 {
            vec![classes[1]]
        } else {
            classes.clone()
        };

        let mut coefficients = Array2::<f64>::zeros((problems.len(), design.ncols()));
        for (k, positive) in problems.iter().enumerate() {
            let targets = y.mapv(|v| if v == *positive { 1.0 } else { 0.0 });
            let objective = Objective::new(&design, targets, penalized, &self.settings);
            let w = match self.settings.solver {
                Solver::Lbfgs => minimize_bfgs(&objective, &self.settings),
                Solver::Newton => minimize_newton(&objective, &self.settings),
            }?;
            coefficients.row_mut(k).assign(&w);
        }

        self.classes = classes;
        self.coefficients = coefficients;
        Ok(())
    }

    fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>, ModelError> {
        let scores = self.decision_function(x)?;
        let labels = scores
            .axis_iter(Axis(0))
            .map(|row| {
                if self.classes.len() == 2 {
                    if row[0] > 0.0 {
                        self.classes[1]
                    } else {
                        self.classes[0]
                    }
                } else {
                    let mut best = 0;
                    for k in 1..row.len() {
                        if row[k] > row[best] {
                            best = k;
                        }
                    }
                    self.classes[best]
                }
            })
            .collect::<Vec<f64>>();
        Ok(Array1::from_vec(labels))
    }
}

/// Penalized mean log-loss of one binary sub-problem.
#[derive(Debug, Clone)]
struct Objective {
    design: Array2<f64>,
    targets: Array1<f64>,
    /// Leading coefficients that carry the ridge penalty.
    penalized: usize,
    lambda: f64,
}

impl Objective {
    fn new(
        design: &Array2<f64>,
        targets: Array1<f64>,
        penalized: usize,
        settings: &LogisticSettings,
    ) -> Self {
        let n = design.nrows().max(1) as f64;
        let lambda = match settings.penalty {
            Penalty::L2 => 1.0 / (settings.c * n),
            Penalty::None => 0.0,
        };
        Self {
            design: design.clone(),
            targets,
            penalized,
            lambda,
        }
    }

    fn n_coefficients(&self) -> usize {
        self.design.ncols()
    }

    fn value_and_gradient(&self, w: &Array1<f64>) -> (f64, Array1<f64>) {
        let n = self.design.nrows().max(1) as f64;
        let eta = self.design.dot(w);

        let mut loss = 0.0;
        let mut residual = Array1::<f64>::zeros(eta.len());
        for i in 0..eta.len() {
            loss += softplus(eta[i]) - self.targets[i] * eta[i];
            residual[i] = sigmoid(eta[i]) - self.targets[i];
        }

        let mut gradient = self.design.t().dot(&residual) / n;
        let mut penalty = 0.0;
        for j in 0..self.penalized {
            penalty += w[j] * w[j];
            gradient[j] += self.lambda * w[j];
        }

        (loss / n + 0.5 * self.lambda * penalty, gradient)
    }

    fn hessian(&self, w: &Array1<f64>) -> Array2<f64> {
        let n = self.design.nrows().max(1) as f64;
        let eta = self.design.dot(w);
        let weights = eta.mapv(|e| {
            let p = sigmoid(e);
            p * (1.0 - p)
        });

        let mut weighted = self.design.clone();
        for (mut row, &weight) in weighted.rows_mut().into_iter().zip(weights.iter()) {
            row *= weight;
        }
        let mut hessian = self.design.t().dot(&weighted) / n;
        for j in 0..self.penalized {
            hessian[[j, j]] += self.lambda;
        }
        hessian
    }
}

fn sigmoid(eta: f64) -> f64 {
    if eta >= 0.0 {
        1.0 / (1.0 + (-eta).exp())
    } else {
        let e = eta.exp();
        e / (1.0 + e)
    }
}

fn softplus(eta: f64) -> f64 {
    if eta > 0.0 {
        eta + (-eta).exp().ln_1p()
    } else {
        eta.exp().ln_1p()
    }
}

fn minimize_bfgs(objective: &Objective, settings: &LogisticSettings) -> Result<Array1<f64>, ModelError> {
    let initial = Array1::<f64>::zeros(objective.n_coefficients());
    let problem = objective.clone();
    let cost_and_grad = move |w: &Array1<f64>| -> (f64, Array1<f64>) { problem.value_and_gradient(w) };

    match Bfgs::new(initial, cost_and_grad)
        .with_tolerance(settings.tol)
        .with_max_iterations(settings.max_iter)
        .run()
    {
        Ok(BfgsSolution {
            final_point,
            final_value,
            iterations,
            ..
        }) => {
            log::debug!("BFGS converged in {iterations} iterations, loss {final_value:.6}");
            Ok(final_point)
        }
        Err(e) => {
            log::warn!("BFGS did not converge ({e:?}); continuing with Newton iterations");
            minimize_newton(objective, settings)
        }
    }
}

fn minimize_newton(objective: &Objective, settings: &LogisticSettings) -> Result<Array1<f64>, ModelError> {
    let mut w = Array1::<f64>::zeros(objective.n_coefficients());
    let (mut value, mut gradient) = objective.value_and_gradient(&w);

    for iteration in 0..settings.max_iter {
        let max_gradient = gradient.iter().fold(0.0_f64, |acc, g| acc.max(g.abs()));
        if max_gradient <= settings.tol {
            log::debug!("Newton converged after {iteration} iterations, loss {value:.6}");
            return Ok(w);
        }

        let hessian = objective.hessian(&w);
        let direction = solve_spd_with_ridge(&hessian, &gradient).ok_or_else(|| {
            ModelError::OptimizationFailed("penalized Hessian could not be factorized".to_string())
        })?;

        let mut step = 1.0;
        let mut accepted = false;
        for _ in 0..30 {
            let trial = &w - &(&direction * step);
            let (trial_value, trial_gradient) = objective.value_and_gradient(&trial);
            if trial_value.is_finite() && trial_value <= value {
                w = trial;
                value = trial_value;
                gradient = trial_gradient;
                accepted = true;
                break;
            }
            step *= 0.5;
        }
        if !accepted {
            log::debug!("Newton step halving stalled at iteration {iteration}");
            return Ok(w);
        }
    }

    log::warn!(
        "Logistic regression reached max_iter={} before the gradient fell below tol={}",
        settings.max_iter,
        settings.tol
    );
    Ok(w)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn overlapping_binary() -> (Array2<f64>, Array1<f64>) {
        let x = array![
            [-2.0],
            [-1.5],
            [-1.0],
            [-0.5],
            [0.2],
            [-0.2],
            [0.5],
            [1.0],
            [1.5],
            [2.0]
        ];
        let y = array![0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 1.0];
        (x, y)
    }

    #[test]
    fn newton_and_bfgs_agree_on_the_optimum() {
        let (x, y) = overlapping_binary();
        let mut newton = LogisticRegression::new(LogisticSettings {
            solver: Solver::Newton,
            tol: 1e-10,
            ..LogisticSettings::default()
        });
        newton.fit(x.view(), y.view()).unwrap();

        let mut bfgs = LogisticRegression::new(LogisticSettings {
            tol: 1e-8,
            ..LogisticSettings::default()
        });
        bfgs.fit(x.view(), y.view()).unwrap();

        for (a, b) in newton.coefficients().iter().zip(bfgs.coefficients().iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-3);
        }
        assert!(newton.coefficients()[[0, 0]] > 0.0);
    }

    #[test]
    fn gradient_is_zero_at_newton_solution() {
        let (x, y) = overlapping_binary();
        let mut model = LogisticRegression::new(LogisticSettings {
            solver: Solver::Newton,
            tol: 1e-12,
            max_iter: 200,
            ..LogisticSettings::default()
        });
        model.fit(x.view(), y.view()).unwrap();

        let design = model.design(x.view());
        let objective = Objective::new(&design, y.clone(), 1, &LogisticSettings::default());
        let w = model.coefficients().row(0).to_owned();
        let (_, gradient) = objective.value_and_gradient(&w);
        assert!(gradient.iter().all(|g| g.abs() < 1e-9));
    }

    #[test]
    fn predicts_original_class_labels() {
        let x = array![[-3.0], [-2.0], [-1.0], [1.0], [2.0], [3.0]];
        let y = array![2.0, 2.0, 2.0, 5.0, 5.0, 5.0];
        let mut model = LogisticRegression::new(LogisticSettings::default());
        model.fit(x.view(), y.view()).unwrap();
        let predicted = model.predict(array![[-2.5], [2.5]].view()).unwrap();
        assert_eq!(predicted, array![2.0, 5.0]);
    }

    #[test]
    fn three_classes_use_one_vs_rest() {
        let x = array![[-4.0], [-3.0], [-2.5], [0.0], [0.2], [-0.2], [3.0], [3.5], [4.0]];
        let y = array![0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 2.0, 2.0, 2.0];
        let mut model = LogisticRegression::new(LogisticSettings {
            c: 100.0,
            solver: Solver::Newton,
            ..LogisticSettings::default()
        });
        model.fit(x.view(), y.view()).unwrap();
        assert_eq!(model.coefficients().nrows(), 3);

        let predicted = model.predict(array![[-3.5], [3.8]].view()).unwrap();
        assert_eq!(predicted, array![0.0, 2.0]);
    }

    #[test]
    fn single_class_training_set_is_rejected() {
        let x = array![[1.0], [2.0]];
        let y = array![1.0, 1.0];
        let mut model = LogisticRegression::new(LogisticSettings::default());
        assert!(matches!(
            model.fit(x.view(), y.view()),
            Err(ModelError::SingleClass { .. })
        ));
    }

    #[test]
    fn softplus_is_stable_for_large_inputs() {
        assert_abs_diff_eq!(softplus(800.0), 800.0);
        assert_abs_diff_eq!(softplus(-800.0), 0.0);
        assert_abs_diff_eq!(sigmoid(-800.0), 0.0);
        assert_abs_diff_eq!(sigmoid(0.0), 0.5);
    }
}
