/// ML модели

pub mod forest;
pub mod linear;
pub mod metrics;
pub mod pipeline;

pub use forest::RandomForest;
pub use linear::LinearModel;
pub use metrics::regression_metrics;
pub use pipeline::{
    compare_baselines, evaluate, infer_types, split, train, BaselineRow, FeatureTypes,
    FittedPipeline, ModelKind, PipelineConfig, TrainingRun,
};
