//! Препроцессор: стандартизация числовых и one-hot категориальных колонок

use ndarray::{concatenate, Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{MlError, Result};
use crate::preprocessing::{DataNormalizer, OneHotEncoder};
use crate::types::{Column, Table};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preprocessor {
    numeric: Vec<String>,
    categorical: Vec<String>,
    normalizer: DataNormalizer,
    encoder: OneHotEncoder,
}

impl Preprocessor {
    pub fn fit(table: &Table, numeric: &[String], categorical: &[String]) -> Result<Self> {
        if numeric.is_empty() && categorical.is_empty() {
            return Err(MlError::Schema("no usable feature columns".to_string()));
        }

        let mut normalizer = DataNormalizer::new();
        if !numeric.is_empty() {
            normalizer.fit(numeric, &numeric_matrix(table, numeric)?)?;
        }

        let mut encoder = OneHotEncoder::new();
        encoder.fit(categorical, &categorical_values(table, categorical)?)?;

        Ok(Self {
            numeric: numeric.to_vec(),
            categorical: categorical.to_vec(),
            normalizer,
            encoder,
        })
    }

    pub fn transform(&self, table: &Table) -> Result<Array2<f64>> {
        let missing: Vec<&str> = self
            .input_columns()
            .filter(|c| !table.has_column(c))
            .collect();
        if !missing.is_empty() {
            return Err(MlError::SchemaMismatch(format!(
                "missing expected columns: {}",
                missing.join(", ")
            )));
        }

        let numeric = if self.numeric.is_empty() {
            Array2::zeros((table.nrows(), 0))
        } else {
            self.normalizer
                .transform(&numeric_matrix(table, &self.numeric)?)?
        };
        let categorical = self
            .encoder
            .transform(&categorical_values(table, &self.categorical)?)?;
        let categorical = if self.categorical.is_empty() {
            Array2::zeros((table.nrows(), 0))
        } else {
            categorical
        };

        concatenate(Axis(1), &[numeric.view(), categorical.view()])
            .map_err(|e| MlError::Model(format!("feature matrix assembly failed: {e}")))
    }

    /// Колонки, которые модель ожидает на входе
    pub fn input_columns(&self) -> impl Iterator<Item = &str> {
        self.numeric
            .iter()
            .chain(self.categorical.iter())
            .map(String::as_str)
    }

    /// Имена признаков после преобразования
    pub fn feature_names(&self) -> Vec<String> {
        let mut names = self.numeric.clone();
        names.extend(self.encoder.feature_names());
        names
    }
}

/// Матрица числовых колонок, пропуски — NaN
pub(crate) fn numeric_matrix(table: &Table, names: &[String]) -> Result<Array2<f64>> {
    let n = table.nrows();
    let mut matrix = Array2::from_elem((n, names.len()), f64::NAN);

    for (j, name) in names.iter().enumerate() {
        let column = table.require(name)?;
        let values = column.to_numeric();

        if let Column::Categorical(raw) = column {
            if let Some(bad) = raw
                .iter()
                .zip(&values)
                .find_map(|(r, v)| r.as_deref().filter(|_| v.is_none()))
            {
                return Err(MlError::SchemaMismatch(format!(
                    "column '{name}' expects numbers, got {bad:?}"
                )));
            }
        }

        for (i, v) in values.into_iter().enumerate() {
            if let Some(v) = v {
                matrix[[i, j]] = v;
            }
        }
    }

    Ok(matrix)
}

fn categorical_values(table: &Table, names: &[String]) -> Result<Vec<Vec<Option<String>>>> {
    names
        .iter()
        .map(|name| {
            Ok(match table.require(name)? {
                Column::Categorical(values) => values.clone(),
                Column::Numeric(values) => {
                    values.iter().map(|v| v.map(|v| v.to_string())).collect()
                }
                Column::Date(values) => values
                    .iter()
                    .map(|v| v.map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string()))
                    .collect(),
            })
        })
        .collect()
}
