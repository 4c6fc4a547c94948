//! Column standardization for the linear model family.

use ndarray::{Array1, Array2, ArrayView2, Axis};

/// Per-column location and scale learned from a training matrix.
///
/// Scale is the sample standard deviation (`n - 1` denominator). Columns with
/// zero spread keep a scale of one so they are centered but not blown up.
#[derive(Debug, Clone, PartialEq)]
pub struct StandardScaler {
    pub mean: Array1<f64>,
    pub std: Array1<f64>,
}

impl StandardScaler {
    pub fn fit(x: ArrayView2<f64>) -> Self {
        let n = x.nrows();
        let mean = x
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(x.ncols()));

        let std = if n > 1 {
            x.std_axis(Axis(0), 1.0)
        } else {
            Array1::zeros(x.ncols())
        };
        let std = std.mapv(|s| if s > 0.0 && s.is_finite() { s } else { 1.0 });

        Self { mean, std }
    }

    pub fn transform(&self, x: ArrayView2<f64>) -> Array2<f64> {
        let mut out = x.to_owned();
        for mut row in out.rows_mut() {
            row -= &self.mean;
            row /= &self.std;
        }
        out
    }

    pub fn fit_transform(x: ArrayView2<f64>) -> (Self, Array2<f64>) {
        let scaler = Self::fit(x);
        let transformed = scaler.transform(x);
        (scaler, transformed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn standardized_columns_have_zero_mean_unit_sample_std() {
        let x = array![[1.0, 10.0], [2.0, 20.0], [3.0, 30.0], [6.0, 0.0]];
        let (scaler, z) = StandardScaler::fit_transform(x.view());

        let means = z.mean_axis(Axis(0)).unwrap();
        let stds = z.std_axis(Axis(0), 1.0);
        for j in 0..2 {
            assert_abs_diff_eq!(means[j], 0.0, epsilon = 1e-12);
            assert_abs_diff_eq!(stds[j], 1.0, epsilon = 1e-12);
        }
        assert_abs_diff_eq!(scaler.mean[0], 3.0, epsilon = 1e-12);
    }

    #[test]
    fn constant_column_is_only_centered() {
        let x = array![[5.0, 1.0], [5.0, 2.0], [5.0, 3.0]];
        let (scaler, z) = StandardScaler::fit_transform(x.view());
        assert_abs_diff_eq!(scaler.std[0], 1.0);
        assert!(z.column(0).iter().all(|&v| v == 0.0));
    }
}
