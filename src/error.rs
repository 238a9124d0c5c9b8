//! Ошибки библиотеки

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MlError {
    /// Отсутствует или не поддерживается колонка (целевая или признак)
    #[error("schema error: {0}")]
    Schema(String),

    /// Предсказание запрошено до обучения
    #[error("model artifact not found at {}", .0.display())]
    ArtifactNotFound(PathBuf),

    /// Входные записи не совпадают с ожидаемыми признаками модели
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("unsupported input shape: expected a mapping, a list of mappings or a table, got {0}")]
    UnsupportedInputShape(String),

    #[error("unsupported file type: {0:?}")]
    UnsupportedFileType(String),

    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("model error: {0}")]
    Model(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),
}

impl MlError {
    /// Ошибка вызвана входными данными клиента, а не состоянием сервиса
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            MlError::Schema(_)
                | MlError::SchemaMismatch(_)
                | MlError::UnsupportedInputShape(_)
                | MlError::UnsupportedFileType(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, MlError>;
