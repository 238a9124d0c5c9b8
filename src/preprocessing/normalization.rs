//! Нормализация данных

#![allow(non_snake_case)]

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::error::{MlError, Result};

const MIN_STD: f64 = 1e-10;

/// Стандартизация (x - mean) / std по каждому признаку.
/// Пропуски (NaN) не участвуют в статистиках и после преобразования равны 0,
/// то есть заполняются средним.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataNormalizer {
    names: Vec<String>,
    mean: Vec<f64>,
    std: Vec<f64>,
    is_fitted: bool,
}

impl DataNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fit(&mut self, names: &[String], X: &Array2<f64>) -> Result<()> {
        if X.nrows() == 0 {
            return Err(MlError::InsufficientData("empty dataset".to_string()));
        }
        if names.len() != X.ncols() {
            return Err(MlError::Schema(format!(
                "{} names for {} features",
                names.len(),
                X.ncols()
            )));
        }

        let mut mean = Vec::with_capacity(X.ncols());
        let mut std = Vec::with_capacity(X.ncols());

        for (j, column) in X.columns().into_iter().enumerate() {
            let present: Vec<f64> = column.iter().copied().filter(|v| !v.is_nan()).collect();
            if present.is_empty() {
                return Err(MlError::Schema(format!(
                    "numeric column '{}' has no values",
                    names[j]
                )));
            }

            let m = present.iter().sum::<f64>() / present.len() as f64;
            let variance =
                present.iter().map(|v| (v - m).powi(2)).sum::<f64>() / present.len() as f64;
            let s = variance.sqrt();

            // Известное ограничение: колонку без разброса не масштабируем
            if s < MIN_STD {
                return Err(MlError::Schema(format!(
                    "numeric column '{}' has zero variance",
                    names[j]
                )));
            }

            mean.push(m);
            std.push(s);
        }

        self.names = names.to_vec();
        self.mean = mean;
        self.std = std;
        self.is_fitted = true;
        Ok(())
    }

    pub fn transform(&self, X: &Array2<f64>) -> Result<Array2<f64>> {
        if !self.is_fitted {
            return Err(MlError::Model("normalizer not fitted".to_string()));
        }
        if X.ncols() != self.mean.len() {
            return Err(MlError::SchemaMismatch(format!(
                "expected {} numeric features ({}), got {}",
                self.mean.len(),
                self.names.join(", "),
                X.ncols()
            )));
        }

        let mut normalized = X.clone();
        for mut row in normalized.rows_mut() {
            for (i, val) in row.iter_mut().enumerate() {
                *val = if val.is_nan() {
                    0.0
                } else {
                    (*val - self.mean[i]) / self.std[i]
                };
            }
        }

        Ok(normalized)
    }

    pub fn fit_transform(&mut self, names: &[String], X: &Array2<f64>) -> Result<Array2<f64>> {
        self.fit(names, X)?;
        self.transform(X)
    }

    pub fn mean(&self) -> Array1<f64> {
        Array1::from(self.mean.clone())
    }
}

/// Масштабирование в [0, 1]: (x - min) / (max - min).
/// NaN не участвуют в min/max и остаются NaN; колонка без разброса переходит в 0.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MinMaxScaler {
    names: Vec<String>,
    min: Vec<f64>,
    max: Vec<f64>,
    is_fitted: bool,
}

impl MinMaxScaler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fit(&mut self, names: &[String], X: &Array2<f64>) -> Result<()> {
        if names.len() != X.ncols() {
            return Err(MlError::Schema(format!(
                "{} names for {} features",
                names.len(),
                X.ncols()
            )));
        }

        let mut min = Vec::with_capacity(X.ncols());
        let mut max = Vec::with_capacity(X.ncols());
        for (j, column) in X.columns().into_iter().enumerate() {
            let (lo, hi) = column
                .iter()
                .filter(|v| !v.is_nan())
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
            if lo > hi {
                return Err(MlError::Schema(format!(
                    "numeric column '{}' has no values",
                    names[j]
                )));
            }
            min.push(lo);
            max.push(hi);
        }

        self.names = names.to_vec();
        self.min = min;
        self.max = max;
        self.is_fitted = true;
        Ok(())
    }

    pub fn transform(&self, X: &Array2<f64>) -> Result<Array2<f64>> {
        if !self.is_fitted {
            return Err(MlError::Model("scaler not fitted".to_string()));
        }
        if X.ncols() != self.min.len() {
            return Err(MlError::SchemaMismatch(format!(
                "expected {} numeric features ({}), got {}",
                self.min.len(),
                self.names.join(", "),
                X.ncols()
            )));
        }

        let mut scaled = X.clone();
        for mut row in scaled.rows_mut() {
            for (i, val) in row.iter_mut().enumerate() {
                let range = self.max[i] - self.min[i];
                if !val.is_nan() {
                    *val = if range < MIN_STD { 0.0 } else { (*val - self.min[i]) / range };
                }
            }
        }
        Ok(scaled)
    }

    pub fn fit_transform(&mut self, names: &[String], X: &Array2<f64>) -> Result<Array2<f64>> {
        self.fit(names, X)?;
        self.transform(X)
    }

    /// Пары (min, max) в порядке признаков
    pub fn ranges(&self) -> Vec<(f64, f64)> {
        self.min.iter().copied().zip(self.max.iter().copied()).collect()
    }
}
