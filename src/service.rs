//! Сервис предсказаний: обучение с сохранением артефакта, загрузка, предсказание, полный анализ

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ServiceConfig;
use crate::error::{MlError, Result};
use crate::models::{train, FittedPipeline, PipelineConfig};
use crate::plot;
use crate::preprocessing::feature_engineering::normalize_name;
use crate::preprocessing::{FeatureEngineer, ImputeStrategy};
use crate::types::{
    json_kind, record_from_json, AnalysisSummary, Cell, Column, Metrics, PredictionOutput, Record,
    Table, TrainingReport,
};

/// Сохранённая модель вместе с метаданными
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub pipeline: FittedPipeline,
    pub feature_names: Vec<String>,
    pub model: String,
    pub target: String,
    pub metrics: Metrics,
    pub trained_at: DateTime<Utc>,
}

/// Вход для предсказания
#[derive(Debug, Clone, PartialEq)]
pub enum PredictionInput {
    One(Record),
    Many(Vec<Record>),
    Table(Table),
}

impl PredictionInput {
    /// Объект -> одна запись, массив объектов -> несколько
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::Object(_) => Ok(Self::One(record_from_json(value)?)),
            serde_json::Value::Array(items) => items
                .iter()
                .map(|item| {
                    record_from_json(item).map_err(|_| {
                        MlError::UnsupportedInputShape(format!("a list containing {}", json_kind(item)))
                    })
                })
                .collect::<Result<Vec<_>>>()
                .map(Self::Many),
            other => Err(MlError::UnsupportedInputShape(json_kind(other).to_string())),
        }
    }

    /// Число входных записей
    pub fn len(&self) -> usize {
        match self {
            Self::One(_) => 1,
            Self::Many(records) => records.len(),
            Self::Table(table) => table.nrows(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn into_table(self) -> Result<Table> {
        match self {
            Self::One(record) => Table::from_records(&[record]),
            Self::Many(records) => Table::from_records(&records),
            Self::Table(table) => Ok(table),
        }
    }
}

/// Позиционный параметр из пути URL
#[derive(Debug, Clone, PartialEq)]
pub enum PathValue {
    Numeric(f64),
    Raw(String),
}

impl PathValue {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().parse::<f64>() {
            Ok(v) if v.is_finite() => Self::Numeric(v),
            _ => Self::Raw(raw.to_string()),
        }
    }
}

impl From<PathValue> for Cell {
    fn from(value: PathValue) -> Self {
        match value {
            PathValue::Numeric(v) => Cell::Number(v),
            PathValue::Raw(s) => Cell::Text(s),
        }
    }
}

/// Временный файл рядом с целевым; без `commit` удаляется при drop
struct Staged {
    tmp: PathBuf,
    path: PathBuf,
    committed: bool,
}

impl Staged {
    fn commit(mut self) -> Result<()> {
        fs::rename(&self.tmp, &self.path)?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for Staged {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.tmp);
        }
    }
}

fn stage<F>(path: &Path, write: F) -> Result<Staged>
where
    F: FnOnce(&Path) -> Result<()>,
{
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let staged = Staged {
        tmp: path.with_file_name(tmp_name),
        path: path.to_path_buf(),
        committed: false,
    };
    write(&staged.tmp)?;
    Ok(staged)
}

/// Запись во временный файл рядом с целевым и переименование
fn write_atomic<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&Path) -> Result<()>,
{
    stage(path, write)?.commit()
}

fn stage_json<T: Serialize>(path: &Path, value: &T) -> Result<Staged> {
    stage(path, |tmp| {
        fs::write(tmp, serde_json::to_vec_pretty(value)?)?;
        Ok(())
    })
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

pub struct PredictionService {
    config: ServiceConfig,
    write_lock: Mutex<()>,
}

impl PredictionService {
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            config,
            write_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        // мьютекс без данных, только порядок записи
        self.write_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Параметры обучения с именами колонок в том же виде, что и после `normalize_names`
    pub fn pipeline_config(&self) -> PipelineConfig {
        let mut config = self.config.pipeline.clone();
        config.target = normalize_name(&config.target);
        config.date_column = config.date_column.as_deref().map(normalize_name);
        config
    }

    /// Канонический датасет: нормализованные имена, пропуски цели заполнены нулём
    pub fn load_dataset(&self) -> Result<Table> {
        let raw = Table::read_csv(&self.config.data_path)?;
        let table = FeatureEngineer::normalize_names(&raw);
        let target = normalize_name(&self.config.pipeline.target);
        FeatureEngineer::impute_missing(&table, &target, &ImputeStrategy::Zero)
    }

    pub fn train_and_persist(&self) -> Result<TrainingReport> {
        let _guard = self.lock();
        self.train_locked()
    }

    fn train_locked(&self) -> Result<TrainingReport> {
        let table = self.load_dataset()?;
        let config = self.pipeline_config();
        if let Some(date_column) = &config.date_column {
            if !table.has_column(date_column) {
                tracing::warn!(column = %date_column, "date column not found, split will be random");
            }
        }
        let run = train(&table, &config)?;

        let artifact = ModelArtifact {
            feature_names: run.pipeline.feature_names(),
            model: run.pipeline.kind().name().to_string(),
            target: run.pipeline.target().to_string(),
            metrics: run.metrics,
            trained_at: Utc::now(),
            pipeline: run.pipeline,
        };

        let model_path = self.config.artifact_path();
        let metrics_path = self.config.metrics_path();
        let predictions_path = self.config.predictions_path();

        let predictions = Table::from_columns(vec![
            ("y_true", Column::Numeric(run.y_true.iter().copied().map(Some).collect())),
            ("y_pred", Column::Numeric(run.y_pred.iter().copied().map(Some).collect())),
        ])?;

        // Сначала все временные файлы, затем переименования; артефакт последним
        let staged_model = stage(&model_path, |tmp| {
            fs::write(tmp, serde_json::to_vec(&artifact)?)?;
            Ok(())
        })?;
        let staged_metrics = stage_json(&metrics_path, &run.metrics)?;
        let staged_predictions = stage(&predictions_path, |tmp| predictions.write_csv(tmp))?;

        staged_metrics.commit()?;
        staged_predictions.commit()?;
        staged_model.commit()?;

        tracing::info!(
            model = %artifact.model,
            rows = table.nrows(),
            path = %model_path.display(),
            "model trained and saved"
        );

        Ok(TrainingReport {
            model_path: display(&model_path),
            metrics_path: display(&metrics_path),
            predictions_path: display(&predictions_path),
            metrics: run.metrics,
        })
    }

    pub fn artifact_exists(&self) -> bool {
        self.config.artifact_path().is_file()
    }

    pub fn load(&self) -> Result<ModelArtifact> {
        let path = self.config.artifact_path();
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(MlError::ArtifactNotFound(path));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Предсказания в порядке входных записей; артефакт читается при каждом вызове
    pub fn predict(&self, input: PredictionInput) -> Result<PredictionOutput> {
        let artifact = self.load()?;
        let expected = input.len();
        if expected == 0 {
            return Ok(PredictionOutput {
                predictions: Vec::new(),
                n: 0,
            });
        }

        // записи без ключей дают таблицу без колонок, transform сообщит о недостающих
        let table = input.into_table()?;
        let predictions = artifact.pipeline.predict(&table)?;
        if predictions.len() != expected {
            return Err(MlError::SchemaMismatch(format!(
                "{expected} records produced {} rows",
                predictions.len()
            )));
        }
        tracing::debug!(n = predictions.len(), "prediction served");
        Ok(PredictionOutput {
            n: predictions.len(),
            predictions,
        })
    }

    /// Значения из пути сопоставляются признакам в порядке `positional_features`
    pub fn predict_positional(&self, values: Vec<PathValue>) -> Result<PredictionOutput> {
        let order = &self.config.positional_features;
        if values.len() > order.len() {
            return Err(MlError::SchemaMismatch(format!(
                "got {} positional values, only {} positional features configured",
                values.len(),
                order.len()
            )));
        }
        let record: Record = order
            .iter()
            .cloned()
            .zip(values.into_iter().map(Cell::from))
            .collect();
        self.predict(PredictionInput::One(record))
    }

    pub fn run_full_analysis(&self, force_retrain: bool) -> Result<AnalysisSummary> {
        let _guard = self.lock();

        let retrained = force_retrain || !self.artifact_exists();
        if retrained {
            self.train_locked()?;
        } else {
            tracing::info!("reusing existing model artifact");
        }

        let artifact = self.load()?;
        let plot_path = self.config.plot_path();
        let importances = artifact.pipeline.feature_importances();
        write_atomic(&plot_path, |tmp| plot::save_importances(&importances, tmp))?;

        let notes = if retrained {
            format!("model retrained from {}", display(&self.config.data_path))
        } else {
            format!("existing artifact trained at {} reused", artifact.trained_at.to_rfc3339())
        };
        let summary = AnalysisSummary {
            model: display(&self.config.artifact_path()),
            metrics: display(&self.config.metrics_path()),
            plot: display(&plot_path),
            retrained,
            notes,
        };
        stage_json(&self.config.summary_path(), &summary)?.commit()?;

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{evaluate, split, ModelKind};
    use serde_json::json;

    fn write_loans(path: &Path, n: usize) {
        let mut csv = String::from("Loan ID,Age,Basic Salary,Loan Purpose,affordability\n");
        for i in 0..n {
            let age = 20 + (i % 30);
            let salary = 1000 + (i * 37) % 700;
            let purpose = ["car", "home", "school"][i % 3];
            let target = if i % 11 == 0 {
                String::new()
            } else {
                format!("{:.3}", salary as f64 / 1000.0 - age as f64 / 100.0)
            };
            csv.push_str(&format!("{i},{age},{salary},{purpose},{target}\n"));
        }
        fs::write(path, csv).unwrap();
    }

    fn service(dir: &Path) -> PredictionService {
        let mut config = ServiceConfig::new(dir);
        config.data_path = dir.join("loans.csv");
        config.pipeline.kind = ModelKind::random_forest(10, 7);
        config.positional_features = vec!["age".to_string(), "basic_salary".to_string()];
        write_loans(&config.data_path, 60);
        PredictionService::new(config)
    }

    #[test]
    fn test_predict_without_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        let input = PredictionInput::from_json(&json!({"age": 30})).unwrap();
        assert!(matches!(service.predict(input), Err(MlError::ArtifactNotFound(_))));
    }

    #[test]
    fn test_train_and_persist_writes_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        let report = service.train_and_persist().unwrap();

        assert!(service.artifact_exists());
        let metrics: Metrics =
            serde_json::from_slice(&fs::read(service.config().metrics_path()).unwrap()).unwrap();
        assert_eq!(metrics, report.metrics);

        let predictions = Table::read_csv(service.config().predictions_path()).unwrap();
        assert_eq!(predictions.names(), ["y_true", "y_pred"]);
        assert_eq!(predictions.nrows(), 12);
        assert!(!dir.path().join("model").join("model_v1.json.tmp").exists());
    }

    #[test]
    fn test_reloaded_artifact_reproduces_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        let report = service.train_and_persist().unwrap();

        let artifact = service.load().unwrap();
        assert_eq!(artifact.feature_names, ["age", "basic_salary", "loan_purpose"]);

        let config = &service.config().pipeline;
        let table = service.load_dataset().unwrap();
        let (_, test) = split(&table, None, config.test_fraction, config.seed).unwrap();
        let metrics = evaluate(&artifact.pipeline, &test, &config.target).unwrap();
        assert!((metrics.rmse - report.metrics.rmse).abs() < 1e-9);
        assert!((metrics.mae - report.metrics.mae).abs() < 1e-9);
    }

    fn age_config(dir: &Path) -> ServiceConfig {
        let mut config = ServiceConfig::new(dir);
        config.data_path = dir.join("ages.csv");
        config.pipeline.target = "y".to_string();
        config.pipeline.kind = ModelKind::Linear;
        let rows: String = (0..20).map(|i| format!("{},{}\n", 20 + i, 2 * i + 1)).collect();
        fs::write(&config.data_path, format!("age,y\n{rows}")).unwrap();
        config
    }

    #[test]
    fn test_predict_single_record_on_age_model() {
        let dir = tempfile::tempdir().unwrap();
        let service = PredictionService::new(age_config(dir.path()));
        service.train_and_persist().unwrap();

        let input = PredictionInput::from_json(&json!({"age": 30})).unwrap();
        let output = service.predict(input).unwrap();
        assert_eq!(output.n, 1);
        assert_eq!(output.predictions.len(), 1);
        assert!((output.predictions[0] - 21.0).abs() < 1e-6);
    }

    #[test]
    fn test_predict_many_keeps_order_and_checks_schema() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        service.train_and_persist().unwrap();

        let rows = json!([
            {"age": 25, "basic_salary": 1200, "loan_purpose": "car"},
            {"age": 45, "basic_salary": 1600, "loan_purpose": "unseen"},
        ]);
        let output = service
            .predict(PredictionInput::from_json(&rows).unwrap())
            .unwrap();
        assert_eq!(output.n, 2);

        let single = service
            .predict(PredictionInput::from_json(&rows[1]).unwrap())
            .unwrap();
        assert_eq!(single.predictions[0], output.predictions[1]);

        let missing = PredictionInput::from_json(&json!({"age": 30})).unwrap();
        assert!(matches!(service.predict(missing), Err(MlError::SchemaMismatch(_))));
    }

    #[test]
    fn test_unsupported_shapes() {
        for value in [json!(5), json!("age"), json!([1, 2]), json!(null)] {
            assert!(matches!(
                PredictionInput::from_json(&value),
                Err(MlError::UnsupportedInputShape(_))
            ));
        }
    }

    #[test]
    fn test_positional_values() {
        assert_eq!(PathValue::parse("3.5"), PathValue::Numeric(3.5));
        assert_eq!(PathValue::parse("car"), PathValue::Raw("car".to_string()));
        assert_eq!(PathValue::parse("nan"), PathValue::Raw("nan".to_string()));

        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        service.train_and_persist().unwrap();
        let too_many = vec![PathValue::Numeric(1.0); 3];
        assert!(matches!(
            service.predict_positional(too_many),
            Err(MlError::SchemaMismatch(_))
        ));
        // loan_purpose не задан позиционно
        assert!(matches!(
            service.predict_positional(vec![PathValue::Numeric(30.0), PathValue::Numeric(1500.0)]),
            Err(MlError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn test_full_analysis_reuses_artifact_unless_forced() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());

        let first = service.run_full_analysis(false).unwrap();
        assert!(first.retrained);
        assert!(Path::new(&first.plot).is_file());
        assert!(service.config().summary_path().is_file());

        let second = service.run_full_analysis(false).unwrap();
        assert!(!second.retrained);

        let forced = service.run_full_analysis(true).unwrap();
        assert!(forced.retrained);

        let saved: AnalysisSummary =
            serde_json::from_slice(&fs::read(service.config().summary_path()).unwrap()).unwrap();
        assert!(saved.retrained);
        assert_eq!(saved.model, forced.model);
    }

    #[test]
    fn test_records_without_features_are_schema_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let service = PredictionService::new(age_config(dir.path()));
        service.train_and_persist().unwrap();

        for payload in [json!({}), json!([{}, {}])] {
            let input = PredictionInput::from_json(&payload).unwrap();
            assert!(matches!(service.predict(input), Err(MlError::SchemaMismatch(_))), "{payload}");
        }

        let empty = PredictionInput::from_json(&json!([])).unwrap();
        assert!(empty.is_empty());
        assert_eq!(service.predict(empty).unwrap().n, 0);
    }

    #[test]
    fn test_failed_report_write_keeps_previous_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let config = age_config(dir.path());
        PredictionService::new(config.clone()).train_and_persist().unwrap();
        let before = fs::read(config.artifact_path()).unwrap();

        // каталог отчётов занят обычным файлом
        let mut broken = config.clone();
        broken.reports_dir = dir.path().join("reports_file");
        fs::write(&broken.reports_dir, b"not a directory").unwrap();
        assert!(PredictionService::new(broken).train_and_persist().is_err());

        assert_eq!(fs::read(config.artifact_path()).unwrap(), before);
        let leftovers: Vec<_> = fs::read_dir(&config.model_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .filter(|name| name.to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty(), "{leftovers:?}");
    }

    #[test]
    fn test_configured_names_follow_normalized_headers() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ServiceConfig::new(dir.path());
        config.data_path = dir.path().join("dated.csv");
        config.pipeline.target = "Affordability".to_string();
        config.pipeline.date_column = Some("LoanDate".to_string());
        config.pipeline.kind = ModelKind::Linear;

        // даты идут в обратном порядке, чтобы случайное разбиение не совпало с временным
        let rows: String = (0..20)
            .map(|i| format!("2021-01-{:02},{},{}\n", 20 - i, 20 + i, 2 * i + 1))
            .collect();
        fs::write(&config.data_path, format!("LoanDate,Age,Affordability\n{rows}")).unwrap();

        let service = PredictionService::new(config);
        assert_eq!(service.pipeline_config().date_column.as_deref(), Some("loandate"));
        service.train_and_persist().unwrap();

        let predictions = Table::read_csv(service.config().predictions_path()).unwrap();
        let y_true = predictions.require("y_true").unwrap().to_numeric();
        assert_eq!(y_true, vec![Some(7.0), Some(5.0), Some(3.0), Some(1.0)]);
    }
}
