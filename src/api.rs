//! HTTP API поверх сервиса предсказаний

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};

use crate::error::MlError;
use crate::service::{PathValue, PredictionInput, PredictionService};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<PredictionService>,
}

/// Ошибка обработчика: `{status: "error", message}`
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<MlError> for ApiError {
    fn from(err: MlError) -> Self {
        let status = if err.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("worker task failed: {err}"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, "{}", self.message);
        } else {
            tracing::warn!(status = %self.status, "{}", self.message);
        }
        let body = Json(json!({ "status": "error", "message": self.message }));
        (self.status, body).into_response()
    }
}

type ApiResult = Result<Json<Value>, ApiError>;

pub fn router(service: Arc<PredictionService>) -> Router {
    let state = AppState { service };

    // CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/predict", post(predict))
        .route("/predict/:first", get(predict_one))
        .route("/predict/:first/:second", get(predict_two))
        .route("/run_full_analysis", get(run_full_analysis))
        .layer(cors)
        .with_state(state)
}

async fn root() -> Json<Value> {
    Json(json!({ "status": "ok", "service": "model-api" }))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn predict(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult {
    let Json(body) = body.map_err(|e| ApiError::bad_request(format!("no JSON received: {e}")))?;

    // {"features": ...} или сами признаки
    let payload = match body.get("features") {
        Some(features) if body.is_object() => features.clone(),
        _ => body,
    };
    let input = PredictionInput::from_json(&payload)?;

    let service = state.service.clone();
    let result = tokio::task::spawn_blocking(move || service.predict(input)).await??;
    tracing::info!(n = result.n, "predict request served");
    Ok(Json(json!({ "status": "success", "result": result })))
}

async fn predict_positional(state: AppState, values: Vec<PathValue>) -> ApiResult {
    let service = state.service.clone();
    let result = tokio::task::spawn_blocking(move || service.predict_positional(values)).await??;
    Ok(Json(json!({ "status": "success", "result": result })))
}

async fn predict_one(State(state): State<AppState>, Path(first): Path<String>) -> ApiResult {
    predict_positional(state, vec![PathValue::parse(&first)]).await
}

async fn predict_two(
    State(state): State<AppState>,
    Path((first, second)): Path<(String, String)>,
) -> ApiResult {
    predict_positional(state, vec![PathValue::parse(&first), PathValue::parse(&second)]).await
}

#[derive(Debug, Default, Deserialize)]
pub struct AnalysisParams {
    #[serde(default)]
    force: Option<String>,
}

impl AnalysisParams {
    fn force(&self) -> bool {
        self.force
            .as_deref()
            .is_some_and(|f| matches!(f.to_lowercase().as_str(), "true" | "1" | "yes"))
    }
}

async fn run_full_analysis(
    State(state): State<AppState>,
    Query(params): Query<AnalysisParams>,
) -> ApiResult {
    let force = params.force();
    let service = state.service.clone();
    let summary = tokio::task::spawn_blocking(move || service.run_full_analysis(force)).await??;
    Ok(Json(json!({ "status": "success", "summary": summary })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::config::ServiceConfig;

    async fn call(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn app(dir: &std::path::Path) -> Router {
        router(Arc::new(PredictionService::new(ServiceConfig::new(dir))))
    }

    #[tokio::test]
    async fn test_root() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = call(app(dir.path()), Request::get("/").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "status": "ok", "service": "model-api" }));
    }

    #[tokio::test]
    async fn test_predict_without_model_is_server_error() {
        let dir = tempfile::tempdir().unwrap();
        let request = Request::post("/predict")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"features": {"age": 30}}"#))
            .unwrap();
        let (status, body) = call(app(dir.path()), request).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["status"], "error");
        assert!(body["message"].as_str().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn test_bad_payload_is_client_error() {
        let dir = tempfile::tempdir().unwrap();
        let request = Request::post("/predict")
            .header("content-type", "application/json")
            .body(Body::from("42"))
            .unwrap();
        let (status, body) = call(app(dir.path()), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "error");
    }

    #[tokio::test]
    async fn test_missing_json_is_client_error() {
        let dir = tempfile::tempdir().unwrap();
        let request = Request::post("/predict").body(Body::empty()).unwrap();
        let (status, _) = call(app(dir.path()), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_force_flag() {
        let parse = |v: &str| AnalysisParams { force: Some(v.to_string()) }.force();
        assert!(parse("true"));
        assert!(parse("True"));
        assert!(!parse("false"));
        assert!(!AnalysisParams::default().force());
    }
}
