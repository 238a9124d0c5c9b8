/// API сервер модели

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use loan_ml::{api, PredictionService, ServiceConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Инициализация логирования
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = ServiceConfig::from_env();
    let addr = config.bind_addr.clone();
    let service = Arc::new(PredictionService::new(config));

    if !service.artifact_exists() {
        tracing::warn!(
            path = %service.config().artifact_path().display(),
            "no model artifact yet, call /run_full_analysis to train"
        );
    }

    let app = api::router(service);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("Server listening on http://{}", addr);
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
