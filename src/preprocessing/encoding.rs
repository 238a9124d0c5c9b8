//! One-hot кодирование категориальных признаков

use std::collections::BTreeSet;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::{MlError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct EncodedColumn {
    name: String,
    categories: Vec<String>,
}

/// Неизвестные категории и пропуски кодируются нулевым вектором
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OneHotEncoder {
    columns: Vec<EncodedColumn>,
}

impl OneHotEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// `values[j]` — значения j-й колонки
    pub fn fit(&mut self, names: &[String], values: &[Vec<Option<String>>]) -> Result<()> {
        let mut columns = Vec::with_capacity(names.len());
        for (name, column) in names.iter().zip(values) {
            let categories: BTreeSet<&str> = column.iter().flatten().map(String::as_str).collect();

            // Известное ограничение: одна категория вырождает кодирование
            if categories.len() < 2 {
                return Err(MlError::Schema(format!(
                    "categorical column '{name}' has {} distinct value(s)",
                    categories.len()
                )));
            }

            columns.push(EncodedColumn {
                name: name.clone(),
                categories: categories.into_iter().map(str::to_string).collect(),
            });
        }
        self.columns = columns;
        Ok(())
    }

    pub fn transform(&self, values: &[Vec<Option<String>>]) -> Result<Array2<f64>> {
        if values.len() != self.columns.len() {
            return Err(MlError::SchemaMismatch(format!(
                "expected {} categorical features, got {}",
                self.columns.len(),
                values.len()
            )));
        }

        let n_rows = values.first().map(Vec::len).unwrap_or(0);
        let mut encoded = Array2::zeros((n_rows, self.n_outputs()));

        let mut offset = 0;
        for (column, data) in self.columns.iter().zip(values) {
            for (i, value) in data.iter().enumerate() {
                let position = value
                    .as_deref()
                    .and_then(|v| column.categories.binary_search_by(|c| c.as_str().cmp(v)).ok());
                if let Some(k) = position {
                    encoded[[i, offset + k]] = 1.0;
                }
            }
            offset += column.categories.len();
        }

        Ok(encoded)
    }

    pub fn n_outputs(&self) -> usize {
        self.columns.iter().map(|c| c.categories.len()).sum()
    }

    /// Имена выходных признаков вида `column_category`
    pub fn feature_names(&self) -> Vec<String> {
        self.columns
            .iter()
            .flat_map(|c| c.categories.iter().map(move |cat| format!("{}_{}", c.name, cat)))
            .collect()
    }
}
