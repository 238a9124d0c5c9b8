/// Модуль предобработки данных

pub mod encoding;
pub mod feature_engineering;
pub mod normalization;
pub mod outliers;
pub mod transformer;

pub use encoding::OneHotEncoder;
pub use feature_engineering::{DerivedRatio, FeatureEngineer, ImputeStrategy, Ratio};
pub use normalization::{DataNormalizer, MinMaxScaler};
pub use outliers::{ColumnBounds, OutlierEngine, OutlierOptions, OutlierReport};
pub use transformer::Preprocessor;
