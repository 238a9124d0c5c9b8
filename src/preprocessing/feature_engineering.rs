//! Подготовка признаков: имена колонок, пропуски, производные признаки

use serde::{Deserialize, Serialize};

use crate::error::{MlError, Result};
use crate::preprocessing::normalization::MinMaxScaler;
use crate::preprocessing::outliers::{quantile, sorted_present};
use crate::preprocessing::transformer::numeric_matrix;
use crate::types::{Column, Table};

/// Стратегия заполнения пропусков
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ImputeStrategy {
    /// Константа 0 (числовые колонки)
    Zero,
    /// Медиана колонки (числовые колонки)
    Median,
    /// Метка, например "Unknown" (категориальные колонки)
    Label(String),
}

/// Значение производного отношения для одной строки
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Ratio {
    Defined(f64),
    /// Знаменатель равен нулю
    Undefined,
    /// В числителе или знаменателе пропуск
    Missing,
}

impl Ratio {
    pub fn value(&self) -> Option<f64> {
        match self {
            Ratio::Defined(v) => Some(*v),
            _ => None,
        }
    }
}

/// Таблица с новой колонкой и построчные значения отношения
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedRatio {
    pub table: Table,
    pub values: Vec<Ratio>,
}

impl DerivedRatio {
    pub fn undefined_rows(&self) -> Vec<usize> {
        self.values
            .iter()
            .enumerate()
            .filter_map(|(i, r)| matches!(r, Ratio::Undefined).then_some(i))
            .collect()
    }
}

pub fn normalize_name(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect()
}

fn median(values: &[Option<f64>]) -> Option<f64> {
    let sorted = sorted_present(values);
    (!sorted.is_empty()).then(|| quantile(&sorted, 0.5))
}

const LOAN_ZERO_FILL: [&str; 5] = [
    "tenure",
    "loanamount",
    "disbursementamount",
    "instalment",
    "principalbalance",
];
const LOAN_LABEL_FILL: [&str; 2] = ["loanstatus", "loanpurpose"];

pub struct FeatureEngineer;

impl FeatureEngineer {
    /// strip + lowercase + пробельные символы в `_`
    pub fn normalize_names(table: &Table) -> Table {
        let mut normalized = table.clone();
        normalized.rename_columns(normalize_name);

        let mut seen = std::collections::HashSet::new();
        for name in normalized.names() {
            if !seen.insert(name.as_str()) {
                tracing::warn!(column = %name, "duplicate column name after normalization");
            }
        }
        normalized
    }

    /// Возвращает новую таблицу; исходная не меняется
    pub fn impute_missing(table: &Table, column: &str, strategy: &ImputeStrategy) -> Result<Table> {
        let filled = match (table.require(column)?, strategy) {
            (Column::Numeric(values), ImputeStrategy::Zero) => {
                Column::Numeric(values.iter().map(|v| Some(v.unwrap_or(0.0))).collect())
            }
            (Column::Numeric(values), ImputeStrategy::Median) => {
                let fill = median(values);
                Column::Numeric(values.iter().map(|v| v.or(fill)).collect())
            }
            (Column::Categorical(values), ImputeStrategy::Label(label)) => Column::Categorical(
                values
                    .iter()
                    .map(|v| Some(v.clone().unwrap_or_else(|| label.clone())))
                    .collect(),
            ),
            (other, strategy) => {
                return Err(MlError::Schema(format!(
                    "cannot impute {} column '{column}' with {strategy:?}",
                    other.type_name()
                )))
            }
        };

        let mut out = table.clone();
        out.set_column(column, filled)?;
        Ok(out)
    }

    /// Медиана по каждой из `columns`; отсутствующие в таблице колонки пропускаются
    pub fn fill_missing_median(table: &Table, columns: &[&str]) -> Result<Table> {
        let mut out = table.clone();
        for &column in columns {
            if !out.has_column(column) {
                tracing::debug!(column, "column absent, median fill skipped");
                continue;
            }
            out = Self::impute_missing(&out, column, &ImputeStrategy::Median)?;
        }
        Ok(out)
    }

    /// Min-max масштабирование `columns` в [0, 1]; пропуски остаются пропусками
    pub fn normalize_columns(table: &Table, columns: &[&str]) -> Result<(Table, MinMaxScaler)> {
        let names: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        let matrix = numeric_matrix(table, &names)?;
        let mut scaler = MinMaxScaler::new();
        let scaled = scaler.fit_transform(&names, &matrix)?;

        let mut out = table.clone();
        for (j, name) in names.iter().enumerate() {
            let values = scaled
                .column(j)
                .iter()
                .map(|v| (!v.is_nan()).then_some(*v))
                .collect();
            out.set_column(name.as_str(), Column::Numeric(values))?;
        }
        Ok((out, scaler))
    }

    /// Поэлементное отношение; деление на ноль даёт `Ratio::Undefined`
    pub fn derive_ratio(
        table: &Table,
        numerator: &str,
        denominator: &str,
        output: &str,
    ) -> Result<DerivedRatio> {
        let num = table.require(numerator)?.to_numeric();
        let den = table.require(denominator)?.to_numeric();

        let values: Vec<Ratio> = num
            .iter()
            .zip(&den)
            .map(|(n, d)| match (n, d) {
                (Some(_), Some(d)) if *d == 0.0 => Ratio::Undefined,
                (Some(n), Some(d)) => Ratio::Defined(n / d),
                _ => Ratio::Missing,
            })
            .collect();

        let undefined = values.iter().filter(|r| matches!(r, Ratio::Undefined)).count();
        if undefined > 0 {
            tracing::warn!(output, undefined, "zero denominator in derived ratio");
        }

        let mut out = table.clone();
        out.set_column(output, Column::Numeric(values.iter().map(Ratio::value).collect()))?;
        Ok(DerivedRatio { table: out, values })
    }

    /// Удаляет строки, где доля пропусков больше `threshold`
    pub fn drop_missing(table: &Table, threshold: f64) -> Table {
        let ncols = table.ncols();
        if ncols == 0 {
            return table.clone();
        }
        let keep: Vec<bool> = (0..table.nrows())
            .map(|i| {
                let missing = table.columns().filter(|(_, c)| c.is_missing(i)).count();
                missing as f64 / ncols as f64 <= threshold
            })
            .collect();
        table.filter(&keep)
    }

    /// Очистка кредитного датасета (имена уже нормализованы)
    pub fn clean_loans(table: &Table) -> Result<Table> {
        let mut cleaned = table.clone();

        for column in LOAN_ZERO_FILL {
            if matches!(cleaned.column(column), Some(Column::Numeric(_))) {
                cleaned = Self::impute_missing(&cleaned, column, &ImputeStrategy::Zero)?;
            }
        }
        for column in LOAN_LABEL_FILL {
            if matches!(cleaned.column(column), Some(Column::Categorical(_))) {
                cleaned = Self::impute_missing(
                    &cleaned,
                    column,
                    &ImputeStrategy::Label("Unknown".to_string()),
                )?;
            }
        }
        if matches!(cleaned.column("interestrate"), Some(Column::Numeric(_))) {
            cleaned = Self::impute_missing(&cleaned, "interestrate", &ImputeStrategy::Median)?;
        }

        if let Some(target) = cleaned.column("isnpl") {
            let keep: Vec<bool> = (0..target.len()).map(|i| !target.is_missing(i)).collect();
            cleaned = cleaned.filter(&keep);
        }

        tracing::info!(
            rows_before = table.nrows(),
            rows_after = cleaned.nrows(),
            "loan data cleaned"
        );
        Ok(cleaned)
    }

    /// Долговая нагрузка, доля выплаченного основного долга, флаг высокой зарплаты
    pub fn add_loan_features(table: &Table) -> Result<Table> {
        let with_dti = Self::derive_ratio(table, "loanamount", "basic_salary", "debttoincome")?;

        let amount = table.require("loanamount")?.to_numeric();
        let balance = table.require("principalbalance")?.to_numeric();
        let paid: Vec<Option<f64>> = amount
            .iter()
            .zip(&balance)
            .map(|(a, b)| match (a, b) {
                (Some(a), Some(b)) => Some(a - b),
                _ => None,
            })
            .collect();

        let mut out = with_dti.table;
        out.set_column("principalpaid", Column::Numeric(paid))?;
        let with_pct =
            Self::derive_ratio(&out, "principalpaid", "loanamount", "principalpaidpct")?;
        let mut out = with_pct.table;

        let salary = table.require("basic_salary")?.to_numeric();
        let q3 = quantile(&sorted_present(&salary), 0.75);
        let flag = salary
            .iter()
            .map(|s| Some(if s.is_some_and(|s| s > q3) { 1.0 } else { 0.0 }))
            .collect();
        out.set_column("highsalaryflag", Column::Numeric(flag))?;

        let names: Vec<String> = out
            .names()
            .iter()
            .filter(|n| *n != "principalpaid")
            .cloned()
            .collect();
        out.select(&names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn loans() -> Table {
        Table::from_columns(vec![
            (
                "loanamount",
                Column::Numeric(vec![Some(1000.0), Some(2000.0), None, Some(500.0)]),
            ),
            (
                "basic_salary",
                Column::Numeric(vec![Some(4000.0), Some(0.0), Some(3000.0), Some(9000.0)]),
            ),
            (
                "principalbalance",
                Column::Numeric(vec![Some(250.0), Some(2000.0), Some(10.0), None]),
            ),
            (
                "loanpurpose",
                Column::Categorical(vec![Some("car".into()), None, Some("home".into()), None]),
            ),
            (
                "interestrate",
                Column::Numeric(vec![Some(5.0), None, Some(7.0), Some(9.0)]),
            ),
            (
                "isnpl",
                Column::Numeric(vec![Some(0.0), Some(1.0), Some(0.0), None]),
            ),
        ])
        .unwrap()
    }

    #[test]
    fn test_normalize_names() {
        let table = Table::from_columns(vec![
            ("  Basic Salary ", Column::Numeric(vec![Some(1.0)])),
            ("LoanDate", Column::Numeric(vec![Some(2.0)])),
            ("Loan\tPurpose", Column::Numeric(vec![Some(3.0)])),
        ])
        .unwrap();
        let normalized = FeatureEngineer::normalize_names(&table);
        assert_eq!(
            normalized.names(),
            &["basic_salary", "loandate", "loan_purpose"]
        );
    }

    #[test]
    fn test_impute_zero_keeps_original() {
        let table = loans();
        let filled =
            FeatureEngineer::impute_missing(&table, "loanamount", &ImputeStrategy::Zero).unwrap();
        assert_eq!(
            filled.column("loanamount"),
            Some(&Column::Numeric(vec![Some(1000.0), Some(2000.0), Some(0.0), Some(500.0)]))
        );
        assert!(table.column("loanamount").unwrap().is_missing(2));
    }

    #[test]
    fn test_impute_median() {
        let filled =
            FeatureEngineer::impute_missing(&loans(), "interestrate", &ImputeStrategy::Median)
                .unwrap();
        assert_eq!(
            filled.column("interestrate"),
            Some(&Column::Numeric(vec![Some(5.0), Some(7.0), Some(7.0), Some(9.0)]))
        );
    }

    #[test]
    fn test_impute_rejects_wrong_type_and_missing_column() {
        let err = FeatureEngineer::impute_missing(&loans(), "loanpurpose", &ImputeStrategy::Median)
            .unwrap_err();
        assert!(matches!(err, MlError::Schema(_)));

        let err = FeatureEngineer::impute_missing(&loans(), "nope", &ImputeStrategy::Zero)
            .unwrap_err();
        assert!(matches!(err, MlError::Schema(_)));
    }

    #[test]
    fn test_derive_ratio_marks_zero_denominator() {
        let derived =
            FeatureEngineer::derive_ratio(&loans(), "loanamount", "basic_salary", "dti").unwrap();
        assert_eq!(
            derived.values,
            vec![Ratio::Defined(0.25), Ratio::Undefined, Ratio::Missing, Ratio::Defined(500.0 / 9000.0)]
        );
        assert_eq!(derived.undefined_rows(), vec![1]);
        assert_eq!(
            derived.table.column("dti"),
            Some(&Column::Numeric(vec![Some(0.25), None, None, Some(500.0 / 9000.0)]))
        );
    }

    #[test]
    fn test_drop_missing_threshold() {
        let table = Table::from_columns(vec![
            ("a", Column::Numeric(vec![Some(1.0), None, None])),
            ("b", Column::Numeric(vec![Some(1.0), Some(2.0), None])),
        ])
        .unwrap();
        assert_eq!(FeatureEngineer::drop_missing(&table, 0.5).nrows(), 2);
        assert_eq!(FeatureEngineer::drop_missing(&table, 0.0).nrows(), 1);
    }

    #[test]
    fn test_clean_loans() {
        let cleaned = FeatureEngineer::clean_loans(&loans()).unwrap();
        assert_eq!(cleaned.nrows(), 3);
        assert_eq!(
            cleaned.column("loanamount"),
            Some(&Column::Numeric(vec![Some(1000.0), Some(2000.0), Some(0.0)]))
        );
        assert_eq!(
            cleaned.column("loanpurpose"),
            Some(&Column::Categorical(vec![
                Some("car".into()),
                Some("Unknown".into()),
                Some("home".into())
            ]))
        );
        assert_eq!(
            cleaned.column("interestrate"),
            Some(&Column::Numeric(vec![Some(5.0), Some(7.0), Some(7.0)]))
        );
    }

    #[test]
    fn test_add_loan_features() {
        let table = FeatureEngineer::clean_loans(&loans()).unwrap();
        let featured = FeatureEngineer::add_loan_features(&table).unwrap();
        assert!(featured.has_column("debttoincome"));
        assert!(!featured.has_column("principalpaid"));
        assert_eq!(
            featured.column("principalpaidpct").unwrap().to_numeric()[..2],
            [Some(0.75), Some(0.0)]
        );
        // loanamount 0 в третьей строке: отношение не определено
        assert!(featured.column("principalpaidpct").unwrap().is_missing(2));
        assert_eq!(
            featured.column("highsalaryflag"),
            Some(&Column::Numeric(vec![Some(1.0), Some(0.0), Some(0.0)]))
        );
    }

    #[test]
    fn test_fill_missing_median_skips_absent_columns() {
        let filled =
            FeatureEngineer::fill_missing_median(&loans(), &["loanamount", "interestrate", "tenure"])
                .unwrap();
        assert_eq!(filled.column("loanamount").unwrap().to_numeric()[2], Some(1000.0));
        assert_eq!(filled.column("interestrate").unwrap().to_numeric()[1], Some(7.0));
        assert!(!filled.has_column("tenure"));
        // остальные колонки не тронуты
        assert!(filled.column("principalbalance").unwrap().is_missing(3));

        let err = FeatureEngineer::fill_missing_median(&loans(), &["loanpurpose"]).unwrap_err();
        assert!(matches!(err, MlError::Schema(_)));
    }

    #[test]
    fn test_normalize_columns_min_max() {
        let (scaled, scaler) =
            FeatureEngineer::normalize_columns(&loans(), &["basic_salary", "loanamount"]).unwrap();

        let salary = scaled.column("basic_salary").unwrap().to_numeric();
        let expected = [4.0 / 9.0, 0.0, 1.0 / 3.0, 1.0];
        for (got, want) in salary.iter().zip(expected) {
            assert!((got.unwrap() - want).abs() < 1e-12);
        }
        assert_eq!(
            scaled.column("loanamount"),
            Some(&Column::Numeric(vec![Some(1.0 / 3.0), Some(1.0), None, Some(0.0)]))
        );
        assert_eq!(scaler.ranges(), vec![(0.0, 9000.0), (500.0, 2000.0)]);
        assert_eq!(scaled.names(), loans().names());

        let err = FeatureEngineer::normalize_columns(&loans(), &["nope"]).unwrap_err();
        assert!(matches!(err, MlError::Schema(_)));
    }

    proptest! {
        #[test]
        fn prop_normalize_names_idempotent(names in prop::collection::vec("[ A-Za-z\t_]{0,12}", 0..8)) {
            let mut table = Table::new();
            for (i, name) in names.iter().enumerate() {
                // уникальность до нормализации
                table.set_column(format!("{name}{i}"), Column::Numeric(vec![Some(i as f64)])).unwrap();
            }
            let once = FeatureEngineer::normalize_names(&table);
            let twice = FeatureEngineer::normalize_names(&once);
            prop_assert_eq!(once.ncols(), table.ncols());
            prop_assert_eq!(once, twice);
        }
    }
}
