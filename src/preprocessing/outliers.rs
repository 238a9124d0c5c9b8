//! Обнаружение и обработка выбросов по правилу IQR

use serde::{Deserialize, Serialize};

use crate::error::{MlError, Result};
use crate::types::{Column, OutlierSummary, Table};

pub const DEFAULT_K: f64 = 1.5;

/// Допустимый диапазон значений колонки
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColumnBounds {
    pub lower: f64,
    pub upper: f64,
}

impl ColumnBounds {
    /// NaN-границы (пустая колонка) ничего не помечают
    pub fn is_outlier(&self, value: f64) -> bool {
        value < self.lower || value > self.upper
    }

    pub fn clip(&self, value: f64) -> f64 {
        if value < self.lower {
            self.lower
        } else if value > self.upper {
            self.upper
        } else {
            value
        }
    }
}

/// Какие колонки проверять и с каким множителем
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlierOptions {
    /// `None` — все числовые колонки
    pub columns: Option<Vec<String>>,
    pub k: f64,
    pub exclude: Vec<String>,
}

impl Default for OutlierOptions {
    fn default() -> Self {
        Self {
            columns: None,
            k: DEFAULT_K,
            exclude: Vec::new(),
        }
    }
}

impl OutlierOptions {
    pub fn with_k(k: f64) -> Self {
        Self {
            k,
            ..Self::default()
        }
    }

    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn exclude<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude = columns.into_iter().map(Into::into).collect();
        self
    }
}

/// Маска строк с выбросами и сводка по колонкам
#[derive(Debug, Clone, PartialEq)]
pub struct OutlierReport {
    pub mask: Vec<bool>,
    pub summary: Vec<OutlierSummary>,
}

impl OutlierReport {
    pub fn flagged(&self) -> usize {
        self.mask.iter().filter(|&&m| m).count()
    }
}

/// Квантиль с линейной интерполяцией по отсортированным значениям
pub fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

pub(crate) fn sorted_present(values: &[Option<f64>]) -> Vec<f64> {
    let mut present: Vec<f64> = values.iter().flatten().copied().collect();
    present.sort_by(f64::total_cmp);
    present
}

pub struct OutlierEngine;

impl OutlierEngine {
    /// (Q1 − k·IQR, Q3 + k·IQR); нечисловые значения исключаются
    pub fn bounds(column: &Column, k: f64) -> ColumnBounds {
        Self::bounds_of(&column.to_numeric(), k)
    }

    fn bounds_of(values: &[Option<f64>], k: f64) -> ColumnBounds {
        let sorted = sorted_present(values);
        let q1 = quantile(&sorted, 0.25);
        let q3 = quantile(&sorted, 0.75);
        let iqr = q3 - q1;
        ColumnBounds {
            lower: q1 - k * iqr,
            upper: q3 + k * iqr,
        }
    }

    fn selected_columns(table: &Table, options: &OutlierOptions) -> Result<Vec<String>> {
        let columns: Vec<String> = match &options.columns {
            Some(columns) => {
                for name in columns {
                    table.require(name)?;
                }
                columns.clone()
            }
            None => table
                .columns()
                .filter(|(_, c)| c.is_numeric())
                .map(|(name, _)| name.to_string())
                .collect(),
        };

        Ok(columns
            .into_iter()
            .filter(|c| !options.exclude.contains(c))
            .collect())
    }

    pub fn detect(table: &Table, options: &OutlierOptions) -> Result<OutlierReport> {
        if options.k.is_nan() {
            return Err(MlError::Schema("outlier multiplier k must be a number".to_string()));
        }

        let n = table.nrows();
        let mut mask = vec![false; n];
        let mut summary = Vec::new();

        for name in Self::selected_columns(table, options)? {
            let values = table.require(&name)?.to_numeric();
            let bounds = Self::bounds_of(&values, options.k);

            let mut n_outliers = 0;
            for (flag, value) in mask.iter_mut().zip(&values) {
                if let Some(v) = value {
                    if bounds.is_outlier(*v) {
                        *flag = true;
                        n_outliers += 1;
                    }
                }
            }

            let pct_outliers = if n == 0 {
                0.0
            } else {
                n_outliers as f64 / n as f64 * 100.0
            };
            tracing::debug!(
                column = %name,
                lower = bounds.lower,
                upper = bounds.upper,
                n_outliers,
                "IQR bounds computed"
            );
            summary.push(OutlierSummary {
                column: name,
                lower_bound: bounds.lower,
                upper_bound: bounds.upper,
                n_outliers,
                pct_outliers,
            });
        }

        summary.sort_by(|a, b| b.pct_outliers.total_cmp(&a.pct_outliers));

        Ok(OutlierReport { mask, summary })
    }

    /// Винзоризация: значения за границами заменяются ближайшей границей
    pub fn cap(table: &Table, options: &OutlierOptions) -> Result<Table> {
        let mut capped = table.clone();
        for name in Self::selected_columns(table, options)? {
            let values = table.require(&name)?.to_numeric();
            let bounds = Self::bounds_of(&values, options.k);
            let clipped = values.iter().map(|v| v.map(|v| bounds.clip(v))).collect();
            capped.set_column(name, Column::Numeric(clipped))?;
        }
        Ok(capped)
    }

    /// Удаляет строки, отмеченные `detect`
    pub fn drop(table: &Table, options: &OutlierOptions) -> Result<Table> {
        let report = Self::detect(table, options)?;
        let keep: Vec<bool> = report.mask.iter().map(|m| !m).collect();
        tracing::info!(
            removed = report.flagged(),
            remaining = keep.iter().filter(|&&k| k).count(),
            "outlier rows removed"
        );
        Ok(table.filter(&keep))
    }

    pub fn summarize(table: &Table, options: &OutlierOptions) -> Result<Vec<OutlierSummary>> {
        Ok(Self::detect(table, options)?.summary)
    }
}
