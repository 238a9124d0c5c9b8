use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use loan_ml::clean_task::clean_task;
use loan_ml::models::ModelKind;
use loan_ml::{
    api, Column, FeatureEngineer, MlError, OutlierEngine, OutlierOptions, PredictionInput,
    PredictionService, RetryPolicy, ServiceConfig, Table,
};

fn raw_loans(n: usize) -> String {
    let mut csv = String::from(
        "LoanID,LoanAmount,Basic Salary,PrincipalBalance,LoanPurpose,IsNPL,affordability\n",
    );
    for i in 0..n {
        let amount = if i == 5 { 90000.0 } else { 1000.0 + ((i * 53) % 900) as f64 };
        let salary = 2000.0 + ((i * 71) % 1500) as f64;
        let salary_cell = if i % 13 == 0 { String::new() } else { salary.to_string() };
        let balance = amount * (i % 5) as f64 / 10.0;
        let purpose = if i % 17 == 0 { "" } else { ["car", "home", "school"][i % 3] };
        let npl = if i % 19 == 0 { String::new() } else { (i % 2).to_string() };
        let affordability = (salary - amount.min(2000.0) * 0.5) / 1000.0;
        csv.push_str(&format!(
            "{i},{amount},{salary_cell},{balance},{purpose},{npl},{affordability:.4}\n"
        ));
    }
    csv
}

/// Сырые данные -> очистка -> ограничение выбросов -> производные признаки
fn prepare_dataset(root: &Path) -> Table {
    let raw = Table::from_csv_reader(raw_loans(80).as_bytes()).unwrap();
    let named = FeatureEngineer::normalize_names(&raw);
    let cleaned = FeatureEngineer::clean_loans(&named).unwrap();
    let capped =
        OutlierEngine::cap(&cleaned, &OutlierOptions::default().columns(["loanamount"])).unwrap();
    let featured = FeatureEngineer::add_loan_features(&capped).unwrap();

    let path = root.join("data").join("processed").join("cleaned_loan_data_capped.csv");
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    featured.write_csv(&path).unwrap();
    featured
}

fn service(root: &Path) -> Arc<PredictionService> {
    let mut config = ServiceConfig::new(root);
    config.pipeline.kind = ModelKind::random_forest(20, 1);
    Arc::new(PredictionService::new(config))
}

async fn call(app: axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[test]
fn test_preparation_steps() {
    let dir = tempfile::tempdir().unwrap();
    let table = prepare_dataset(dir.path());

    // строки без isnpl удалены
    assert_eq!(table.nrows(), 75);
    let purpose = table.require("loanpurpose").unwrap();
    assert_eq!(purpose.non_missing_count(), table.nrows());

    let amount = table.require("loanamount").unwrap().to_numeric();
    assert!(amount.iter().flatten().all(|a| *a < 90000.0));
    for column in ["debttoincome", "principalpaidpct", "highsalaryflag"] {
        assert!(table.has_column(column), "{column}");
    }
}

#[test]
fn test_outlier_scenario() {
    let table = Table::from_columns(vec![(
        "v",
        Column::Numeric([1.0, 2.0, 3.0, 4.0, 100.0].into_iter().map(Some).collect()),
    )])
    .unwrap();
    let options = OutlierOptions::with_k(1.5);

    let report = OutlierEngine::detect(&table, &options).unwrap();
    assert_eq!(report.mask, vec![false, false, false, false, true]);

    let capped = OutlierEngine::cap(&table, &options).unwrap();
    assert_eq!(capped.require("v").unwrap().to_numeric()[4], Some(7.0));

    assert_eq!(OutlierEngine::drop(&table, &options).unwrap().nrows(), 4);
}

#[tokio::test]
async fn test_train_then_serve_over_http() {
    let dir = tempfile::tempdir().unwrap();
    let table = prepare_dataset(dir.path());
    let service = service(dir.path());
    let app = api::router(service.clone());

    let request = Request::get("/run_full_analysis?force=true")
        .body(Body::empty())
        .unwrap();
    let (status, body) = call(app.clone(), request).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["summary"]["retrained"], true);
    assert!(dir.path().join("reports").join("example_plot.png").is_file());
    assert!(dir.path().join("model").join("model_v1.json").is_file());

    let records = serde_json::to_value(&table.to_records()[..2]).unwrap();
    let request = Request::post("/predict")
        .header("content-type", "application/json")
        .body(Body::from(json!({ "features": records }).to_string()))
        .unwrap();
    let (status, body) = call(app.clone(), request).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"], "success");
    assert_eq!(body["result"]["n"], 2);

    let direct = service
        .predict(PredictionInput::from_json(&records).unwrap())
        .unwrap();
    assert_eq!(body["result"]["predictions"], json!(direct.predictions));

    // позиционные признаки по умолчанию модели не известны
    let request = Request::get("/predict/1.5/2").body(Body::empty()).unwrap();
    let (status, body) = call(app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");
}

#[test]
fn test_clean_task_retries_unsupported_input() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("prices.xls");
    fs::write(&input, b"binary").unwrap();

    let policy = RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::ZERO,
        backoff_multiplier: 2.0,
    };
    let mut attempts = 0;
    let result = policy.run("clean_task", || {
        attempts += 1;
        clean_task(&input, &dir.path().join("out.csv"))
    });
    assert_eq!(attempts, 3);
    assert!(matches!(result, Err(MlError::UnsupportedFileType(_))));
    assert!(!dir.path().join("out.csv").exists());
}
