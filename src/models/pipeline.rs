//! Пайплайн модели: типы колонок, разбиение train/test, обучение и оценка

#![allow(non_snake_case)]

use ndarray::Array1;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::error::{MlError, Result};
use crate::models::forest::{ForestParams, RandomForest, TreeParams};
use crate::models::linear::{select_alpha, LinearModel};
use crate::models::metrics::regression_metrics;
use crate::preprocessing::Preprocessor;
use crate::types::{Column, Metrics, Table};

pub const DEFAULT_ID_PATTERNS: [&str; 2] = ["id", "number"];
pub const DEFAULT_DATE_PATTERNS: [&str; 2] = ["date", "time"];

/// Вид модели и её гиперпараметры
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelKind {
    Linear,
    Ridge {
        alphas: Vec<f64>,
    },
    Lasso {
        alphas: Vec<f64>,
        max_iter: usize,
    },
    RandomForest {
        n_estimators: usize,
        max_depth: Option<usize>,
        min_samples_split: usize,
        seed: u64,
    },
}

impl ModelKind {
    pub fn ridge_cv() -> Self {
        ModelKind::Ridge {
            alphas: vec![0.1, 1.0, 10.0],
        }
    }

    pub fn lasso_cv() -> Self {
        ModelKind::Lasso {
            alphas: vec![0.001, 0.01, 0.1, 1.0],
            max_iter: 5000,
        }
    }

    pub fn random_forest(n_estimators: usize, seed: u64) -> Self {
        ModelKind::RandomForest {
            n_estimators,
            max_depth: None,
            min_samples_split: 2,
            seed,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ModelKind::Linear => "Linear",
            ModelKind::Ridge { .. } => "RidgeCV",
            ModelKind::Lasso { .. } => "LassoCV",
            ModelKind::RandomForest { .. } => "RandomForest",
        }
    }

    /// Набор базовых моделей для сравнения
    pub fn baselines(seed: u64) -> Vec<ModelKind> {
        vec![
            ModelKind::Linear,
            ModelKind::ridge_cv(),
            ModelKind::lasso_cv(),
            ModelKind::random_forest(250, seed),
        ]
    }
}

impl Default for ModelKind {
    fn default() -> Self {
        ModelKind::random_forest(100, 42)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Estimator {
    Linear(LinearModel),
    Forest(RandomForest),
}

impl Estimator {
    fn fit(kind: &ModelKind, X: &ndarray::Array2<f64>, y: &Array1<f64>) -> Result<Self> {
        Ok(match kind {
            ModelKind::Linear => Estimator::Linear(LinearModel::fit_ols(X, y)?),
            ModelKind::Ridge { alphas } => {
                let alpha = select_alpha(X, y, alphas, LinearModel::fit_ridge)?;
                Estimator::Linear(LinearModel::fit_ridge(X, y, alpha)?)
            }
            ModelKind::Lasso { alphas, max_iter } => {
                let fit = |X: &ndarray::Array2<f64>, y: &Array1<f64>, alpha: f64| {
                    LinearModel::fit_lasso(X, y, alpha, *max_iter)
                };
                let alpha = select_alpha(X, y, alphas, fit)?;
                Estimator::Linear(fit(X, y, alpha)?)
            }
            ModelKind::RandomForest {
                n_estimators,
                max_depth,
                min_samples_split,
                seed,
            } => {
                let params = ForestParams {
                    n_estimators: *n_estimators,
                    tree: TreeParams {
                        max_depth: *max_depth,
                        min_samples_split: (*min_samples_split).max(2),
                    },
                    seed: *seed,
                };
                Estimator::Forest(RandomForest::fit(X, y, params)?)
            }
        })
    }

    fn predict(&self, X: &ndarray::Array2<f64>) -> Result<Array1<f64>> {
        match self {
            Estimator::Linear(model) => model.predict(X),
            Estimator::Forest(model) => model.predict(X),
        }
    }
}

/// Разбиение колонок (кроме целевой) по ролям
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureTypes {
    pub numeric: Vec<String>,
    pub categorical: Vec<String>,
    pub dropped: Vec<String>,
}

/// Колонки-идентификаторы и даты отбрасываются по подстроке имени (без учёта регистра);
/// колонки с типом даты отбрасываются всегда
pub fn infer_types<S: AsRef<str>>(
    table: &Table,
    target: &str,
    id_patterns: &[S],
    date_patterns: &[S],
) -> Result<FeatureTypes> {
    table.require(target)?;

    let matches = |name: &str, patterns: &[S]| {
        let lowered = name.to_lowercase();
        patterns
            .iter()
            .any(|p| !p.as_ref().is_empty() && lowered.contains(&p.as_ref().to_lowercase()))
    };

    let mut types = FeatureTypes::default();
    for (name, column) in table.columns() {
        if name == target {
            continue;
        }
        let name = name.to_string();
        if matches(&name, id_patterns) || matches(&name, date_patterns) {
            types.dropped.push(name);
            continue;
        }
        match column {
            Column::Numeric(_) => types.numeric.push(name),
            Column::Categorical(_) => types.categorical.push(name),
            Column::Date(_) => types.dropped.push(name),
        }
    }

    tracing::debug!(
        numeric = types.numeric.len(),
        categorical = types.categorical.len(),
        dropped = ?types.dropped,
        "feature types inferred"
    );
    Ok(types)
}

/// Временное разбиение, если колонка даты есть и не пуста, иначе случайное с seed
pub fn split(
    table: &Table,
    date_column: Option<&str>,
    test_fraction: f64,
    seed: u64,
) -> Result<(Table, Table)> {
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return Err(MlError::Model(format!(
            "test fraction must be in (0, 1), got {test_fraction}"
        )));
    }
    let n = table.nrows();

    let dates = date_column.and_then(|c| match table.column(c) {
        Some(Column::Date(values)) if values.iter().any(Option::is_some) => Some(values),
        _ => None,
    });

    if let Some(dates) = dates {
        let mut order: Vec<usize> = (0..n).collect();
        // стабильная сортировка, пропуски в конце
        order.sort_by(|&a, &b| match (dates[a], dates[b]) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });
        let cut = ((1.0 - test_fraction) * n as f64) as usize;
        tracing::info!(train = cut, test = n - cut, "temporal train/test split");
        return Ok((table.take_rows(&order[..cut]), table.take_rows(&order[cut..])));
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(&mut StdRng::seed_from_u64(seed));
    let n_test = ((test_fraction * n as f64).ceil() as usize).min(n);
    tracing::info!(train = n - n_test, test = n_test, seed, "random train/test split");
    Ok((table.take_rows(&order[n_test..]), table.take_rows(&order[..n_test])))
}

/// Числовые значения целевой колонки
fn target_values(table: &Table, target: &str) -> Result<Vec<Option<f64>>> {
    let column = table.require(target)?;
    let values = column.to_numeric();
    if column.non_missing_count() > 0 && values.iter().all(Option::is_none) {
        return Err(MlError::Schema(format!(
            "target column '{target}' is {}, expected numeric",
            column.type_name()
        )));
    }
    Ok(values)
}

/// Строки с известным значением целевой колонки
fn labelled(table: &Table, target: &str) -> Result<(Table, Vec<f64>)> {
    let values = target_values(table, target)?;
    let keep: Vec<bool> = values.iter().map(Option::is_some).collect();
    let y: Vec<f64> = values.into_iter().flatten().collect();
    Ok((table.filter(&keep), y))
}

/// Препроцессор + модель
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FittedPipeline {
    target: String,
    kind: ModelKind,
    preprocessor: Preprocessor,
    estimator: Estimator,
}

impl FittedPipeline {
    /// Обучение на переданной таблице (обычно train-часть) с типами по умолчанию
    pub fn fit(table: &Table, target: &str, kind: &ModelKind) -> Result<Self> {
        let types = infer_types(table, target, &DEFAULT_ID_PATTERNS, &DEFAULT_DATE_PATTERNS)?;
        Self::fit_with_types(table, target, &types, kind)
    }

    pub fn fit_with_types(
        table: &Table,
        target: &str,
        types: &FeatureTypes,
        kind: &ModelKind,
    ) -> Result<Self> {
        let (table, y) = labelled(table, target)?;
        if y.is_empty() {
            return Err(MlError::InsufficientData(format!(
                "no rows with a value in target column '{target}'"
            )));
        }

        let preprocessor = Preprocessor::fit(&table, &types.numeric, &types.categorical)?;
        let X = preprocessor.transform(&table)?;
        let estimator = Estimator::fit(kind, &X, &Array1::from(y))?;

        tracing::info!(
            model = kind.name(),
            rows = X.nrows(),
            features = X.ncols(),
            "pipeline fitted"
        );

        Ok(Self {
            target: target.to_string(),
            kind: kind.clone(),
            preprocessor,
            estimator,
        })
    }

    pub fn predict(&self, table: &Table) -> Result<Vec<f64>> {
        let X = self.preprocessor.transform(table)?;
        Ok(self.estimator.predict(&X)?.to_vec())
    }

    /// Истинные и предсказанные значения для строк с известной целью
    pub fn predict_labelled(&self, table: &Table, target: &str) -> Result<(Vec<f64>, Vec<f64>)> {
        let (table, y_true) = labelled(table, target)?;
        let y_pred = self.predict(&table)?;
        Ok((y_true, y_pred))
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn kind(&self) -> &ModelKind {
        &self.kind
    }

    /// Входные колонки, ожидаемые моделью
    pub fn feature_names(&self) -> Vec<String> {
        self.preprocessor.input_columns().map(str::to_string).collect()
    }

    /// Коэффициенты линейной модели по убыванию модуля; `None` для леса
    pub fn coefficients(&self) -> Option<Vec<(String, f64)>> {
        let Estimator::Linear(model) = &self.estimator else {
            return None;
        };
        let mut table: Vec<(String, f64)> = self
            .preprocessor
            .feature_names()
            .into_iter()
            .zip(model.coefficients().iter().copied())
            .collect();
        table.sort_by(|a, b| b.1.abs().total_cmp(&a.1.abs()));
        Some(table)
    }

    /// Важность признаков после преобразования (сумма равна 1, если не все нули)
    pub fn feature_importances(&self) -> Vec<(String, f64)> {
        let raw: Vec<f64> = match &self.estimator {
            Estimator::Forest(forest) => forest.feature_importances(),
            Estimator::Linear(model) => {
                let abs: Vec<f64> = model.coefficients().iter().map(|c| c.abs()).collect();
                let total: f64 = abs.iter().sum();
                if total > 0.0 {
                    abs.iter().map(|a| a / total).collect()
                } else {
                    abs
                }
            }
        };
        self.preprocessor.feature_names().into_iter().zip(raw).collect()
    }
}

pub fn evaluate(pipeline: &FittedPipeline, test: &Table, target: &str) -> Result<Metrics> {
    let (y_true, y_pred) = pipeline.predict_labelled(test, target)?;
    regression_metrics(&y_true, &y_pred)
}

/// Параметры полного цикла обучения
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub target: String,
    pub id_patterns: Vec<String>,
    pub date_patterns: Vec<String>,
    pub date_column: Option<String>,
    pub test_fraction: f64,
    pub seed: u64,
    pub kind: ModelKind,
}

impl PipelineConfig {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            id_patterns: DEFAULT_ID_PATTERNS.iter().map(|s| s.to_string()).collect(),
            date_patterns: DEFAULT_DATE_PATTERNS.iter().map(|s| s.to_string()).collect(),
            date_column: None,
            test_fraction: 0.2,
            seed: 42,
            kind: ModelKind::default(),
        }
    }
}

pub struct TrainingRun {
    pub pipeline: FittedPipeline,
    pub feature_types: FeatureTypes,
    pub metrics: Metrics,
    pub y_true: Vec<f64>,
    pub y_pred: Vec<f64>,
}

/// Типы колонок, разбиение, обучение и оценка на тестовой части
pub fn train(table: &Table, config: &PipelineConfig) -> Result<TrainingRun> {
    let feature_types = infer_types(
        table,
        &config.target,
        &config.id_patterns,
        &config.date_patterns,
    )?;
    let (train_set, test_set) = split(
        table,
        config.date_column.as_deref(),
        config.test_fraction,
        config.seed,
    )?;

    let pipeline =
        FittedPipeline::fit_with_types(&train_set, &config.target, &feature_types, &config.kind)?;
    let (y_true, y_pred) = pipeline.predict_labelled(&test_set, &config.target)?;
    let metrics = regression_metrics(&y_true, &y_pred)?;

    tracing::info!(
        model = config.kind.name(),
        mae = metrics.mae,
        rmse = metrics.rmse,
        r2 = metrics.r2,
        "model evaluated on test split"
    );

    Ok(TrainingRun {
        pipeline,
        feature_types,
        metrics,
        y_true,
        y_pred,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineRow {
    pub model: String,
    #[serde(flatten)]
    pub metrics: Metrics,
}

/// Обучает все базовые модели, строки по возрастанию RMSE
pub fn compare_baselines(
    train_set: &Table,
    test_set: &Table,
    target: &str,
    types: &FeatureTypes,
    seed: u64,
) -> Result<Vec<BaselineRow>> {
    let mut rows = Vec::new();
    for kind in ModelKind::baselines(seed) {
        let pipeline = FittedPipeline::fit_with_types(train_set, target, types, &kind)?;
        rows.push(BaselineRow {
            model: kind.name().to_string(),
            metrics: evaluate(&pipeline, test_set, target)?,
        });
    }
    rows.sort_by(|a, b| a.metrics.rmse.total_cmp(&b.metrics.rmse));
    Ok(rows)
}
