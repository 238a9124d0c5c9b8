//! Loan ML - подготовка табличных данных, обучение регрессии и сервис предсказаний

pub mod api;
pub mod clean_task;
pub mod config;
pub mod error;
pub mod models;
pub mod plot;
pub mod preprocessing;
pub mod retry;
pub mod service;
pub mod synthetic;
pub mod types;

pub use types::*;
pub use models::*;
pub use preprocessing::*;

// Re-export для удобства
pub use config::ServiceConfig;
pub use error::{MlError, Result};
pub use retry::RetryPolicy;
pub use service::{ModelArtifact, PathValue, PredictionInput, PredictionService};
