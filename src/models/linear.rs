//! Линейные модели: OLS, Ridge, Lasso

#![allow(non_snake_case)]

use linfa::traits::Fit;
use linfa::Dataset;
use linfa_linear::LinearRegression;
use ndarray::{s, Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{MlError, Result};

/// Регуляризация, с которой OLS решается при вырожденной матрице
const FALLBACK_ALPHA: f64 = 1e-6;
/// Признаки стандартизованы, поэтому коэффициенты такого порядка означают вырожденность
const MAX_COEFFICIENT: f64 = 1e10;
const LASSO_TOL: f64 = 1e-8;
const CV_FOLDS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    weights: Vec<f64>,
    bias: f64,
    /// Выбранный параметр регуляризации (Ridge/Lasso)
    alpha: Option<f64>,
}

impl LinearModel {
    /// Метод наименьших квадратов через linfa
    pub fn fit_ols(X: &Array2<f64>, y: &Array1<f64>) -> Result<Self> {
        check_shapes(X, y)?;

        let dataset = Dataset::new(X.clone(), y.clone());
        match LinearRegression::new().fit(&dataset) {
            Ok(fitted)
                if fitted
                    .params()
                    .iter()
                    .all(|p| p.is_finite() && p.abs() < MAX_COEFFICIENT) =>
            {
                Ok(Self {
                    weights: fitted.params().to_vec(),
                    bias: fitted.intercept(),
                    alpha: None,
                })
            }
            Ok(_) => {
                tracing::warn!("OLS is ill-conditioned, refitting with tiny ridge penalty");
                Self::fit_ridge(X, y, FALLBACK_ALPHA).map(|m| m.without_alpha())
            }
            Err(e) => {
                tracing::warn!("OLS failed ({}), refitting with tiny ridge penalty", e);
                Self::fit_ridge(X, y, FALLBACK_ALPHA).map(|m| m.without_alpha())
            }
        }
    }

    /// Ridge Regression: (Xc^T Xc + αI)^(-1) Xc^T yc на центрированных данных
    pub fn fit_ridge(X: &Array2<f64>, y: &Array1<f64>, alpha: f64) -> Result<Self> {
        check_shapes(X, y)?;
        let (Xc, yc, x_mean, y_mean) = center(X, y)?;

        let mut xtx = Xc.t().dot(&Xc);
        for i in 0..xtx.nrows() {
            xtx[[i, i]] += alpha;
        }
        let xty = Xc.t().dot(&yc);

        let weights = solve_linear_system(&xtx, &xty)?;
        let bias = y_mean - x_mean.dot(&weights);

        Ok(Self {
            weights: weights.to_vec(),
            bias,
            alpha: Some(alpha),
        })
    }

    /// Lasso покоординатным спуском, цель (1/2n)·||y − Xw − b||² + α·||w||₁
    pub fn fit_lasso(X: &Array2<f64>, y: &Array1<f64>, alpha: f64, max_iter: usize) -> Result<Self> {
        check_shapes(X, y)?;
        let (Xc, yc, x_mean, y_mean) = center(X, y)?;
        let n = Xc.nrows() as f64;
        let n_features = Xc.ncols();

        let col_sq: Vec<f64> = Xc.columns().into_iter().map(|c| c.dot(&c)).collect();
        let mut w = Array1::<f64>::zeros(n_features);
        let mut residual = yc;

        for iteration in 0..max_iter {
            let mut max_delta: f64 = 0.0;
            for j in 0..n_features {
                if col_sq[j] == 0.0 {
                    continue;
                }
                let column = Xc.column(j);
                let rho = column.dot(&residual) + col_sq[j] * w[j];
                let updated = soft_threshold(rho, n * alpha) / col_sq[j];
                let delta = updated - w[j];
                if delta != 0.0 {
                    residual.scaled_add(-delta, &column);
                    w[j] = updated;
                }
                max_delta = max_delta.max(delta.abs());
            }
            if max_delta < LASSO_TOL {
                tracing::debug!(iteration, alpha, "lasso converged");
                break;
            }
        }

        let bias = y_mean - x_mean.dot(&w);
        Ok(Self {
            weights: w.to_vec(),
            bias,
            alpha: Some(alpha),
        })
    }

    fn without_alpha(mut self) -> Self {
        self.alpha = None;
        self
    }

    pub fn predict(&self, X: &Array2<f64>) -> Result<Array1<f64>> {
        if X.ncols() != self.weights.len() {
            return Err(MlError::SchemaMismatch(format!(
                "model expects {} features, got {}",
                self.weights.len(),
                X.ncols()
            )));
        }
        let weights = Array1::from(self.weights.clone());
        Ok(X.dot(&weights) + self.bias)
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.weights
    }

    pub fn intercept(&self) -> f64 {
        self.bias
    }

    pub fn alpha(&self) -> Option<f64> {
        self.alpha
    }
}

fn check_shapes(X: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
    if X.nrows() == 0 || X.ncols() == 0 {
        return Err(MlError::InsufficientData("empty dataset".to_string()));
    }
    if X.nrows() != y.len() {
        return Err(MlError::Model(format!(
            "{} rows but {} targets",
            X.nrows(),
            y.len()
        )));
    }
    Ok(())
}

fn center(
    X: &Array2<f64>,
    y: &Array1<f64>,
) -> Result<(Array2<f64>, Array1<f64>, Array1<f64>, f64)> {
    let x_mean = X
        .mean_axis(Axis(0))
        .ok_or_else(|| MlError::InsufficientData("empty dataset".to_string()))?;
    let y_mean = y.mean().unwrap_or(0.0);
    let Xc = X - &x_mean;
    let yc = y - y_mean;
    Ok((Xc, yc, x_mean, y_mean))
}

fn soft_threshold(value: f64, lambda: f64) -> f64 {
    if value > lambda {
        value - lambda
    } else if value < -lambda {
        value + lambda
    } else {
        0.0
    }
}

/// Метод Гаусса с выбором главного элемента
fn solve_linear_system(A: &Array2<f64>, b: &Array1<f64>) -> Result<Array1<f64>> {
    let n = A.nrows();
    let mut augmented = Array2::zeros((n, n + 1));
    augmented.slice_mut(s![.., ..n]).assign(A);
    augmented.column_mut(n).assign(b);

    // Прямой ход
    for i in 0..n {
        let mut max_row = i;
        let mut max_val = augmented[[i, i]].abs();
        for k in (i + 1)..n {
            if augmented[[k, i]].abs() > max_val {
                max_val = augmented[[k, i]].abs();
                max_row = k;
            }
        }

        if max_row != i {
            for j in 0..=n {
                augmented.swap([i, j], [max_row, j]);
            }
        }

        let pivot = augmented[[i, i]];
        if pivot.abs() < 1e-12 {
            return Err(MlError::Model("singular matrix".to_string()));
        }

        for k in (i + 1)..n {
            let factor = augmented[[k, i]] / pivot;
            for j in i..=n {
                augmented[[k, j]] -= factor * augmented[[i, j]];
            }
        }
    }

    // Обратный ход
    let mut x = Array1::zeros(n);
    for i in (0..n).rev() {
        let mut sum = augmented[[i, n]];
        for j in (i + 1)..n {
            sum -= augmented[[i, j]] * x[j];
        }
        x[i] = sum / augmented[[i, i]];
    }

    Ok(x)
}

/// Выбор alpha по k-fold кросс-валидации (среднеквадратичная ошибка)
pub fn select_alpha<F>(X: &Array2<f64>, y: &Array1<f64>, alphas: &[f64], fit: F) -> Result<f64>
where
    F: Fn(&Array2<f64>, &Array1<f64>, f64) -> Result<LinearModel>,
{
    let first = *alphas
        .first()
        .ok_or_else(|| MlError::Model("no alpha candidates".to_string()))?;
    let n = X.nrows();
    let folds = CV_FOLDS.min(n);
    if alphas.len() == 1 || folds < 2 {
        return Ok(first);
    }

    let mut best = (first, f64::INFINITY);
    for &alpha in alphas {
        let mut total = 0.0;
        for fold in 0..folds {
            let start = fold * n / folds;
            let end = (fold + 1) * n / folds;
            let train_idx: Vec<usize> = (0..n).filter(|i| *i < start || *i >= end).collect();
            let test_idx: Vec<usize> = (start..end).collect();

            let model = fit(
                &X.select(Axis(0), &train_idx),
                &y.select(Axis(0), &train_idx),
                alpha,
            )?;
            let predicted = model.predict(&X.select(Axis(0), &test_idx))?;
            let actual = y.select(Axis(0), &test_idx);
            total += (&predicted - &actual).mapv(|e| e * e).sum();
        }
        let mse = total / n as f64;
        tracing::debug!(alpha, mse, "cross-validated alpha");
        if mse < best.1 {
            best = (alpha, mse);
        }
    }

    Ok(best.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn line() -> (Array2<f64>, Array1<f64>) {
        let X = array![[0.0, 1.0], [1.0, 0.0], [2.0, 1.0], [3.0, 0.0], [4.0, 1.0], [5.0, 0.0]];
        let y = X.column(0).mapv(|x| 2.0 * x + 1.0) + X.column(1).mapv(|z| 3.0 * z);
        (X, y)
    }

    #[test]
    fn test_ols_recovers_coefficients() {
        let (X, y) = line();
        let model = LinearModel::fit_ols(&X, &y).unwrap();
        assert!((model.coefficients()[0] - 2.0).abs() < 1e-6);
        assert!((model.coefficients()[1] - 3.0).abs() < 1e-6);
        assert!((model.intercept() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_ols_handles_collinear_one_hot() {
        // две one-hot колонки в сумме дают константу
        let X = array![[1.0, 0.0], [0.0, 1.0], [1.0, 0.0], [0.0, 1.0]];
        let y = array![1.0, 3.0, 1.0, 3.0];
        let model = LinearModel::fit_ols(&X, &y).unwrap();
        let predicted = model.predict(&X).unwrap();
        for (p, t) in predicted.iter().zip(y.iter()) {
            assert!((p - t).abs() < 1e-3);
        }
    }

    #[test]
    fn test_ridge_shrinks() {
        let (X, y) = line();
        let weak = LinearModel::fit_ridge(&X, &y, 0.01).unwrap();
        let strong = LinearModel::fit_ridge(&X, &y, 100.0).unwrap();
        assert!(strong.coefficients()[0].abs() < weak.coefficients()[0].abs());
        assert_eq!(strong.alpha(), Some(100.0));
    }

    #[test]
    fn test_lasso_zeroes_with_large_alpha() {
        let (X, y) = line();
        let model = LinearModel::fit_lasso(&X, &y, 1e3, 1000).unwrap();
        assert!(model.coefficients().iter().all(|w| *w == 0.0));
        let mean = y.mean().unwrap();
        assert!((model.intercept() - mean).abs() < 1e-12);

        let model = LinearModel::fit_lasso(&X, &y, 1e-4, 10_000).unwrap();
        assert!((model.coefficients()[0] - 2.0).abs() < 1e-2);
    }

    #[test]
    fn test_select_alpha_prefers_small_penalty_on_clean_data() {
        let (X, y) = line();
        let alpha = select_alpha(&X, &y, &[100.0, 0.001], LinearModel::fit_ridge).unwrap();
        assert_eq!(alpha, 0.001);
    }

    #[test]
    fn test_predict_checks_width() {
        let (X, y) = line();
        let model = LinearModel::fit_ridge(&X, &y, 1.0).unwrap();
        let err = model.predict(&array![[1.0]]).unwrap_err();
        assert!(matches!(err, MlError::SchemaMismatch(_)));
    }
}
