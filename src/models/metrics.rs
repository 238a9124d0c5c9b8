//! Метрики качества регрессии

use crate::error::{MlError, Result};
use crate::types::Metrics;

/// MAE, RMSE (корень из MSE) и R²
pub fn regression_metrics(y_true: &[f64], y_pred: &[f64]) -> Result<Metrics> {
    if y_true.len() != y_pred.len() {
        return Err(MlError::Model(format!(
            "{} true values but {} predictions",
            y_true.len(),
            y_pred.len()
        )));
    }
    if y_true.is_empty() {
        return Err(MlError::InsufficientData("no rows to evaluate".to_string()));
    }

    let n = y_true.len() as f64;
    let mae = y_true
        .iter()
        .zip(y_pred)
        .map(|(t, p)| (t - p).abs())
        .sum::<f64>()
        / n;
    let ss_res: f64 = y_true.iter().zip(y_pred).map(|(t, p)| (t - p).powi(2)).sum();
    let mse = ss_res / n;

    let mean = y_true.iter().sum::<f64>() / n;
    let ss_tot: f64 = y_true.iter().map(|t| (t - mean).powi(2)).sum();
    let r2 = if ss_tot > 0.0 {
        1.0 - ss_res / ss_tot
    } else if ss_res == 0.0 {
        1.0
    } else {
        0.0
    };

    Ok(Metrics {
        mae,
        rmse: mse.sqrt(),
        r2,
    })
}
