//! Универсальная задача очистки: чтение файла, удаление строк без `x_feature`, запись результата

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{MlError, Result};
use crate::types::{Column, Table};

pub const TASK_NAME: &str = "clean_task";
pub const FEATURE_COLUMN: &str = "x_feature";

/// Сводка запуска, пишется рядом с результатом
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanSummary {
    pub task: String,
    pub run_at: DateTime<Utc>,
    pub input_path: String,
    pub output_path: String,
    pub rows_before: usize,
    pub rows_after: usize,
}

/// Небольшая таблица на случай отсутствующего входного файла
pub fn demo_table() -> Result<Table> {
    let columns = vec![
        (
            FEATURE_COLUMN,
            Column::Numeric(vec![Some(0.1), Some(1.2), Some(2.5), None, Some(3.3)]),
        ),
        ("y_target", Column::Numeric((1..=5).map(|v| Some(v as f64)).collect())),
    ];
    Table::from_columns(columns)
}

fn extension(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

fn read_input(path: &Path) -> Result<Table> {
    match extension(path).as_str() {
        "csv" => Table::read_csv(path),
        "json" => Table::read_json_records(path),
        other => Err(MlError::UnsupportedFileType(other.to_string())),
    }
}

/// Удаляет строки без `x_feature`; без такой колонки берётся первая числовая
pub fn clean_table(table: &Table) -> Result<Table> {
    let mut table = table.clone();
    if !table.has_column(FEATURE_COLUMN) {
        let first_numeric = table
            .columns()
            .find(|(_, column)| column.is_numeric())
            .map(|(name, _)| name.to_string())
            .ok_or_else(|| {
                MlError::Schema(format!("no '{FEATURE_COLUMN}' and no numeric column to use"))
            })?;
        tracing::warn!(column = %first_numeric, "'{}' not found, using first numeric column", FEATURE_COLUMN);
        table.rename_column(&first_numeric, FEATURE_COLUMN)?;
    }

    let feature = table.require(FEATURE_COLUMN)?;
    let keep: Vec<bool> = (0..table.nrows()).map(|i| !feature.is_missing(i)).collect();
    Ok(table.filter(&keep))
}

/// Путь результата: `.csv` и `.json` как есть, остальное переписывается в `.csv`
pub fn resolve_output(output: &Path) -> PathBuf {
    match extension(output).as_str() {
        "csv" | "json" => output.to_path_buf(),
        _ => output.with_extension("csv"),
    }
}

pub fn clean_task(input: &Path, output: &Path) -> Result<CleanSummary> {
    let table = if input.exists() {
        tracing::info!(path = %input.display(), "reading input");
        read_input(input)?
    } else {
        tracing::warn!(path = %input.display(), "input not found, using demo dataset");
        demo_table()?
    };

    let rows_before = table.nrows();
    let cleaned = clean_table(&table)?;
    let rows_after = cleaned.nrows();

    let output = resolve_output(output);
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)?;
    }
    if extension(&output) == "json" {
        cleaned.write_json_records(&output)?;
    } else {
        cleaned.write_csv(&output)?;
    }

    let summary = CleanSummary {
        task: TASK_NAME.to_string(),
        run_at: Utc::now(),
        input_path: input.display().to_string(),
        output_path: output.display().to_string(),
        rows_before,
        rows_after,
    };
    fs::write(
        output.with_extension("summary.json"),
        serde_json::to_vec_pretty(&summary)?,
    )?;

    tracing::info!(rows_before, rows_after, output = %output.display(), "clean task finished");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_dataset_when_input_missing() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out").join("clean.csv");
        let summary = clean_task(&dir.path().join("absent.csv"), &output).unwrap();

        assert_eq!(summary.rows_before, 5);
        assert_eq!(summary.rows_after, 4);
        assert!(output.is_file());
        assert!(dir.path().join("out").join("clean.summary.json").is_file());
    }

    #[test]
    fn test_demo_table_shape() {
        let table = demo_table().unwrap();
        assert_eq!(table.names(), [FEATURE_COLUMN, "y_target"]);
        assert_eq!(table.nrows(), 5);
        assert_eq!(table.require(FEATURE_COLUMN).unwrap().non_missing_count(), 4);
    }

    #[test]
    fn test_unknown_input_extension() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("prices.xlsx");
        fs::write(&input, b"not really excel").unwrap();
        let err = clean_task(&input, &dir.path().join("out.csv")).unwrap_err();
        assert!(matches!(err, MlError::UnsupportedFileType(ext) if ext == "xlsx"));
    }

    #[test]
    fn test_unknown_output_extension_becomes_csv() {
        let dir = tempfile::tempdir().unwrap();
        let summary = clean_task(&dir.path().join("absent.csv"), &dir.path().join("out.parquet")).unwrap();
        assert!(summary.output_path.ends_with("out.csv"));
        assert!(dir.path().join("out.csv").is_file());
    }

    #[test]
    fn test_json_round_trip_and_first_numeric_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.json");
        fs::write(
            &input,
            r#"[{"name": "a", "price": 1.5}, {"name": "b", "price": null}, {"name": "c", "price": 3}]"#,
        )
        .unwrap();
        let output = dir.path().join("out.json");
        let summary = clean_task(&input, &output).unwrap();
        assert_eq!((summary.rows_before, summary.rows_after), (3, 2));

        let cleaned = Table::read_json_records(&output).unwrap();
        assert!(cleaned.has_column(FEATURE_COLUMN));
        assert!(!cleaned.has_column("price"));
    }

    #[test]
    fn test_no_numeric_column() {
        let table = Table::from_columns(vec![(
            "name",
            Column::Categorical(vec![Some("a".to_string())]),
        )])
        .unwrap();
        assert!(matches!(clean_table(&table), Err(MlError::Schema(_))));
    }
}
