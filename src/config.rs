//! Конфигурация сервиса: пути к модели, отчётам и данным

use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::models::{ModelKind, PipelineConfig};

pub const DEFAULT_MODEL_NAME: &str = "model_v1.json";
pub const DEFAULT_TARGET: &str = "affordability";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub model_dir: PathBuf,
    pub reports_dir: PathBuf,
    /// Канонический датасет для обучения (CSV)
    pub data_path: PathBuf,
    pub model_name: String,
    pub pipeline: PipelineConfig,
    /// Порядок признаков для `/predict/{a}/{b}`
    pub positional_features: Vec<String>,
    pub bind_addr: String,
}

impl ServiceConfig {
    /// Раскладка каталогов относительно корня проекта
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        let mut pipeline = PipelineConfig::new(DEFAULT_TARGET);
        pipeline.kind = ModelKind::random_forest(100, 42);

        Self {
            model_dir: root.join("model"),
            reports_dir: root.join("reports"),
            data_path: root
                .join("data")
                .join("processed")
                .join("cleaned_loan_data_capped.csv"),
            model_name: DEFAULT_MODEL_NAME.to_string(),
            pipeline,
            positional_features: vec!["feat1".to_string(), "feat2".to_string()],
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
        }
    }

    /// APP_ROOT, MODEL_DIR, REPORTS_DIR, FEATURES_DATA_CSV, TARGET_COLUMN,
    /// DATE_COLUMN, POSITIONAL_FEATURES (через запятую), BIND_ADDR
    pub fn from_env() -> Self {
        let root = env::var("APP_ROOT").unwrap_or_else(|_| ".".to_string());
        let mut config = Self::new(root);

        if let Ok(dir) = env::var("MODEL_DIR") {
            config.model_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = env::var("REPORTS_DIR") {
            config.reports_dir = PathBuf::from(dir);
        }
        if let Ok(path) = env::var("FEATURES_DATA_CSV") {
            config.data_path = PathBuf::from(path);
        }
        if let Ok(target) = env::var("TARGET_COLUMN") {
            config.pipeline.target = target;
        }
        if let Ok(column) = env::var("DATE_COLUMN") {
            config.pipeline.date_column = Some(column).filter(|c| !c.is_empty());
        }
        if let Ok(features) = env::var("POSITIONAL_FEATURES") {
            config.positional_features = features
                .split(',')
                .map(|f| f.trim().to_string())
                .filter(|f| !f.is_empty())
                .collect();
        }
        if let Ok(addr) = env::var("BIND_ADDR") {
            config.bind_addr = addr;
        }

        tracing::debug!(?config, "configuration loaded");
        config
    }

    pub fn artifact_path(&self) -> PathBuf {
        self.model_dir.join(&self.model_name)
    }

    pub fn metrics_path(&self) -> PathBuf {
        self.reports_dir.join("metrics.json")
    }

    pub fn predictions_path(&self) -> PathBuf {
        self.reports_dir.join("test_predictions.csv")
    }

    pub fn plot_path(&self) -> PathBuf {
        self.reports_dir.join("example_plot.png")
    }

    pub fn summary_path(&self) -> PathBuf {
        self.reports_dir.join("summary.json")
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::new(".")
    }
}
