/// Типы данных: таблица, записи и результаты

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::{MlError, Result};
use crate::preprocessing::outliers::{quantile, sorted_present};

const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];
const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%d/%m/%Y", "%Y/%m/%d"];
const NA_TOKENS: [&str; 6] = ["", "na", "nan", "null", "none", "n/a"];

/// Разбор даты в нескольких распространённых форматах
pub fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt);
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(raw, fmt) {
            return d.and_hms_opt(0, 0, 0);
        }
    }
    None
}

fn is_na(raw: &str) -> bool {
    let lowered = raw.trim().to_lowercase();
    NA_TOKENS.contains(&lowered.as_str())
}

/// Значение одной ячейки
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Number(f64),
    Text(String),
    Missing,
}

impl Cell {
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::Null => Ok(Cell::Missing),
            serde_json::Value::Number(n) => n
                .as_f64()
                .map(Cell::Number)
                .ok_or_else(|| MlError::SchemaMismatch(format!("unrepresentable number {n}"))),
            serde_json::Value::String(s) => Ok(Cell::Text(s.clone())),
            serde_json::Value::Bool(b) => Ok(Cell::Number(if *b { 1.0 } else { 0.0 })),
            other => Err(MlError::UnsupportedInputShape(format!(
                "{} nested inside a record",
                json_kind(other)
            ))),
        }
    }

    /// Числовое значение; текст разбирается, пустой текст считается пропуском
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Number(v) if v.is_finite() => Some(*v),
            Cell::Text(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
            _ => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        match self {
            Cell::Missing => true,
            Cell::Number(v) => v.is_nan(),
            Cell::Text(s) => is_na(s),
        }
    }
}

/// Запись: имя признака -> значение
pub type Record = BTreeMap<String, Cell>;

#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Numeric(Vec<Option<f64>>),
    Categorical(Vec<Option<String>>),
    Date(Vec<Option<NaiveDateTime>>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Numeric(v) => v.len(),
            Column::Categorical(v) => v.len(),
            Column::Date(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Column::Numeric(_))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Column::Numeric(_) => "numeric",
            Column::Categorical(_) => "categorical",
            Column::Date(_) => "date",
        }
    }

    /// Приведение к числам: нечисловые значения становятся пропусками
    pub fn to_numeric(&self) -> Vec<Option<f64>> {
        match self {
            Column::Numeric(v) => v.clone(),
            Column::Categorical(v) => v
                .iter()
                .map(|s| {
                    s.as_deref()
                        .and_then(|s| s.trim().parse::<f64>().ok())
                        .filter(|x| x.is_finite())
                })
                .collect(),
            Column::Date(v) => vec![None; v.len()],
        }
    }

    pub fn is_missing(&self, row: usize) -> bool {
        match self {
            Column::Numeric(v) => v[row].is_none(),
            Column::Categorical(v) => v[row].is_none(),
            Column::Date(v) => v[row].is_none(),
        }
    }

    pub fn non_missing_count(&self) -> usize {
        (0..self.len()).filter(|&i| !self.is_missing(i)).count()
    }

    pub fn cell(&self, row: usize) -> Cell {
        match self {
            Column::Numeric(v) => v[row].map(Cell::Number).unwrap_or(Cell::Missing),
            Column::Categorical(v) => v[row].clone().map(Cell::Text).unwrap_or(Cell::Missing),
            Column::Date(v) => v[row]
                .map(|d| Cell::Text(d.format("%Y-%m-%d %H:%M:%S").to_string()))
                .unwrap_or(Cell::Missing),
        }
    }

    pub fn take(&self, indices: &[usize]) -> Column {
        match self {
            Column::Numeric(v) => Column::Numeric(indices.iter().map(|&i| v[i]).collect()),
            Column::Categorical(v) => {
                Column::Categorical(indices.iter().map(|&i| v[i].clone()).collect())
            }
            Column::Date(v) => Column::Date(indices.iter().map(|&i| v[i]).collect()),
        }
    }

    /// Вывод типа колонки по сырым строкам (CSV)
    pub fn infer(raw: &[Option<String>]) -> Column {
        let present: Vec<&str> = raw.iter().flatten().map(|s| s.as_str()).collect();

        if present.iter().all(|s| s.trim().parse::<f64>().is_ok()) {
            return Column::Numeric(
                raw.iter()
                    .map(|s| s.as_deref().and_then(|s| s.trim().parse::<f64>().ok()))
                    .collect(),
            );
        }

        if present.iter().all(|s| parse_datetime(s).is_some()) {
            return Column::Date(raw.iter().map(|s| s.as_deref().and_then(parse_datetime)).collect());
        }

        Column::Categorical(raw.to_vec())
    }

    /// Вывод типа колонки по значениям записей
    pub fn from_cells(cells: &[Cell]) -> Column {
        let all_numeric = cells
            .iter()
            .all(|c| c.is_missing() || matches!(c, Cell::Number(_)));
        if all_numeric {
            return Column::Numeric(cells.iter().map(|c| c.as_f64()).collect());
        }

        let raw: Vec<Option<String>> = cells
            .iter()
            .map(|c| match c {
                _ if c.is_missing() => None,
                Cell::Number(v) => Some(v.to_string()),
                Cell::Text(s) => Some(s.clone()),
                Cell::Missing => None,
            })
            .collect();
        Column::infer(&raw)
    }

    fn format(&self, row: usize) -> String {
        match self.cell(row) {
            Cell::Number(v) => v.to_string(),
            Cell::Text(s) => s,
            Cell::Missing => String::new(),
        }
    }
}

/// Таблица с именованными колонками одинаковой длины
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    names: Vec<String>,
    columns: Vec<Column>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_columns<S: Into<String>>(columns: Vec<(S, Column)>) -> Result<Self> {
        let mut table = Table::new();
        for (name, column) in columns {
            table.set_column(name, column)?;
        }
        Ok(table)
    }

    pub fn nrows(&self) -> usize {
        self.columns.first().map(Column::len).unwrap_or(0)
    }

    pub fn ncols(&self) -> usize {
        self.columns.len()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| &self.columns[i])
    }

    /// Колонка или `MlError::Schema`
    pub fn require(&self, name: &str) -> Result<&Column> {
        self.column(name)
            .ok_or_else(|| MlError::Schema(format!("column '{name}' not found")))
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &Column)> {
        self.names.iter().map(String::as_str).zip(self.columns.iter())
    }

    /// Заменяет существующую колонку или добавляет новую в конец
    pub fn set_column<S: Into<String>>(&mut self, name: S, column: Column) -> Result<()> {
        let name = name.into();
        if !self.columns.is_empty() && column.len() != self.nrows() {
            return Err(MlError::Schema(format!(
                "column '{name}' has {} rows, table has {}",
                column.len(),
                self.nrows()
            )));
        }
        match self.names.iter().position(|n| *n == name) {
            Some(i) => self.columns[i] = column,
            None => {
                self.names.push(name);
                self.columns.push(column);
            }
        }
        Ok(())
    }

    pub fn rename_columns<F: FnMut(&str) -> String>(&mut self, mut f: F) {
        for name in &mut self.names {
            *name = f(name);
        }
    }

    pub fn rename_column(&mut self, from: &str, to: &str) -> Result<()> {
        let idx = self
            .names
            .iter()
            .position(|n| n == from)
            .ok_or_else(|| MlError::Schema(format!("column '{from}' not found")))?;
        self.names[idx] = to.to_string();
        Ok(())
    }

    pub fn select(&self, names: &[String]) -> Result<Table> {
        let mut out = Table::new();
        for name in names {
            out.set_column(name.clone(), self.require(name)?.clone())?;
        }
        Ok(out)
    }

    pub fn take_rows(&self, indices: &[usize]) -> Table {
        Table {
            names: self.names.clone(),
            columns: self.columns.iter().map(|c| c.take(indices)).collect(),
        }
    }

    /// Оставляет строки, где `keep[i] == true`
    pub fn filter(&self, keep: &[bool]) -> Table {
        let indices: Vec<usize> = keep
            .iter()
            .enumerate()
            .filter_map(|(i, &k)| k.then_some(i))
            .collect();
        self.take_rows(&indices)
    }

    pub fn row(&self, i: usize) -> Record {
        self.columns()
            .map(|(name, col)| (name.to_string(), col.cell(i)))
            .collect()
    }

    pub fn to_records(&self) -> Vec<Record> {
        (0..self.nrows()).map(|i| self.row(i)).collect()
    }

    /// Таблица из записей; колонки в порядке первого появления ключа
    pub fn from_records(records: &[Record]) -> Result<Table> {
        let mut order: Vec<String> = Vec::new();
        for record in records {
            for key in record.keys() {
                if !order.contains(key) {
                    order.push(key.clone());
                }
            }
        }

        let mut table = Table::new();
        for name in order {
            let cells: Vec<Cell> = records
                .iter()
                .map(|r| r.get(&name).cloned().unwrap_or(Cell::Missing))
                .collect();
            table.set_column(name, Column::from_cells(&cells))?;
        }
        Ok(table)
    }

    pub fn read_csv<P: AsRef<Path>>(path: P) -> Result<Table> {
        let file = File::open(path.as_ref())?;
        Self::from_csv_reader(file)
    }

    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Table> {
        let mut reader = csv::Reader::from_reader(reader);
        let headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();
        let mut raw: Vec<Vec<Option<String>>> = vec![Vec::new(); headers.len()];

        for record in reader.records() {
            let record = record?;
            for (j, column) in raw.iter_mut().enumerate() {
                let value = record.get(j).unwrap_or("");
                column.push(if is_na(value) { None } else { Some(value.to_string()) });
            }
        }

        let mut table = Table::new();
        for (name, values) in headers.into_iter().zip(raw) {
            table.names.push(name);
            table.columns.push(Column::infer(&values));
        }
        Ok(table)
    }

    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = csv::Writer::from_path(path.as_ref())?;
        writer.write_record(&self.names)?;
        for i in 0..self.nrows() {
            writer.write_record(self.columns.iter().map(|c| c.format(i)))?;
        }
        writer.flush()?;
        Ok(())
    }

    /// JSON вида `[{"col": value, ...}, ...]`
    pub fn read_json_records<P: AsRef<Path>>(path: P) -> Result<Table> {
        let file = File::open(path.as_ref())?;
        let value: serde_json::Value = serde_json::from_reader(file)?;
        let items = value.as_array().ok_or_else(|| {
            MlError::UnsupportedInputShape(format!("{} as JSON document", json_kind(&value)))
        })?;
        let records = items
            .iter()
            .map(record_from_json)
            .collect::<Result<Vec<_>>>()?;
        Table::from_records(&records)
    }

    pub fn write_json_records<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        // Порядок колонок сохраняется, поэтому не через Record
        let rows: Vec<serde_json::Map<String, serde_json::Value>> = (0..self.nrows())
            .map(|i| {
                self.columns()
                    .map(|(name, col)| {
                        let value = match col.cell(i) {
                            Cell::Number(v) => serde_json::json!(v),
                            Cell::Text(s) => serde_json::Value::String(s),
                            Cell::Missing => serde_json::Value::Null,
                        };
                        (name.to_string(), value)
                    })
                    .collect()
            })
            .collect();
        std::fs::write(path.as_ref(), serde_json::to_string(&rows)?)?;
        Ok(())
    }

    /// Сводная статистика по числовым колонкам в порядке таблицы
    pub fn describe(&self) -> Vec<ColumnStats> {
        self.columns()
            .filter(|(_, column)| column.is_numeric())
            .map(|(name, column)| ColumnStats::of(name, &column.to_numeric()))
            .collect()
    }
}

/// Запись из JSON-объекта
pub fn record_from_json(value: &serde_json::Value) -> Result<Record> {
    let object = value.as_object().ok_or_else(|| {
        MlError::UnsupportedInputShape(json_kind(value).to_string())
    })?;
    object
        .iter()
        .map(|(k, v)| Ok((k.clone(), Cell::from_json(v)?)))
        .collect()
}

pub(crate) fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "a list",
        serde_json::Value::Object(_) => "a mapping",
    }
}

/// Статистика одной числовой колонки; без значений всё, кроме `count`, равно NaN
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnStats {
    pub column: String,
    pub count: usize,
    pub mean: f64,
    /// Выборочное (n - 1)
    pub std: f64,
    pub min: f64,
    pub q25: f64,
    pub median: f64,
    pub q75: f64,
    pub max: f64,
}

impl ColumnStats {
    fn of(name: &str, values: &[Option<f64>]) -> Self {
        let sorted = sorted_present(values);
        let count = sorted.len();
        let mean = if count == 0 {
            f64::NAN
        } else {
            sorted.iter().sum::<f64>() / count as f64
        };
        let std = if count < 2 {
            f64::NAN
        } else {
            (sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (count - 1) as f64).sqrt()
        };

        Self {
            column: name.to_string(),
            count,
            mean,
            std,
            min: sorted.first().copied().unwrap_or(f64::NAN),
            q25: quantile(&sorted, 0.25),
            median: quantile(&sorted, 0.5),
            q75: quantile(&sorted, 0.75),
            max: sorted.last().copied().unwrap_or(f64::NAN),
        }
    }
}

/// Метрики регрессии
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub mae: f64,
    pub rmse: f64,
    pub r2: f64,
}

/// Строка сводки по выбросам одной колонки
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlierSummary {
    pub column: String,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub n_outliers: usize,
    pub pct_outliers: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionOutput {
    pub predictions: Vec<f64>,
    pub n: usize,
}

/// Результат обучения с сохранением
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub model_path: String,
    pub metrics_path: String,
    pub predictions_path: String,
    pub metrics: Metrics,
}

/// Сводка полного анализа
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub model: String,
    pub metrics: String,
    pub plot: String,
    pub retrained: bool,
    pub notes: String,
}
