use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
};
use chrono::NaiveDate;
use heatwave::{
    kpi_router, AccuracyKpi, AlertAggregate, InMemoryKpiSource, KpiError, KpiReport,
    KpiSnapshotSource,
};
use serde_json::Value;
use tower::util::ServiceExt;

fn sample_report() -> KpiReport {
    KpiReport {
        detail: Vec::new(),
        accuracy: vec![AccuracyKpi {
            city_id: 1,
            horizon_h: 3,
            n_pred: 12,
            n_with_actual: 10,
            mae: Some(1.25),
            mape_pct: None,
        }],
        alerts: vec![AlertAggregate {
            city_id: 1,
            date: NaiveDate::from_ymd_opt(2024, 7, 1).unwrap(),
            horizon_h: 3,
            heat_hours: 4,
            cold_hours: 0,
            avg_pred_temp_c: 27.5,
        }],
    }
}

async fn get_json(source: Arc<dyn KpiSnapshotSource>, uri: &str) -> (StatusCode, Value) {
    let response = kpi_router(source)
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn accuracy_route_serves_json_rows() {
    let source = Arc::new(InMemoryKpiSource::new(sample_report()));
    let (status, body) = get_json(source, "/kpi/accuracy").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["city_id"], 1);
    assert_eq!(body[0]["n_pred"], 12);
    assert_eq!(body[0]["mae"], 1.25);
    assert!(body[0]["mape_pct"].is_null());
}

#[tokio::test]
async fn alerts_and_detail_routes_reflect_replaced_report() {
    let source = InMemoryKpiSource::new(KpiReport::default());
    let (_, empty) = get_json(Arc::new(source.clone()), "/kpi/alerts").await;
    assert_eq!(empty, Value::Array(Vec::new()));

    source.replace_report(sample_report());
    let (status, alerts) = get_json(Arc::new(source.clone()), "/kpi/alerts").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(alerts[0]["date"], "2024-07-01");
    assert_eq!(alerts[0]["heat_hours"], 4);

    let (_, detail) = get_json(Arc::new(source), "/kpi/detail").await;
    assert_eq!(detail, Value::Array(Vec::new()));
}

struct FailingSource;

impl KpiSnapshotSource for FailingSource {
    fn report(&self) -> Result<KpiReport, KpiError> {
        Err(KpiError::Unavailable("store offline".to_string()))
    }
}

#[tokio::test]
async fn source_failure_is_a_json_500() {
    let (status, body) = get_json(Arc::new(FailingSource), "/kpi/accuracy").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("store offline"));
}

/// Blocks inside `report` until a second request is in flight too, which
/// only happens when reports are built off the async worker thread.
struct RendezvousSource {
    entered: AtomicUsize,
}

impl KpiSnapshotSource for RendezvousSource {
    fn report(&self) -> Result<KpiReport, KpiError> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        let deadline = Instant::now() + Duration::from_secs(2);
        while self.entered.load(Ordering::SeqCst) < 2 {
            if Instant::now() >= deadline {
                return Err(KpiError::Unavailable("peer request never started".to_string()));
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        Ok(sample_report())
    }
}

#[tokio::test]
async fn blocking_source_does_not_stall_concurrent_requests() {
    let source: Arc<dyn KpiSnapshotSource> = Arc::new(RendezvousSource {
        entered: AtomicUsize::new(0),
    });

    let (first, second) = tokio::join!(
        get_json(Arc::clone(&source), "/kpi/accuracy"),
        get_json(Arc::clone(&source), "/kpi/alerts"),
    );

    assert_eq!(first.0, StatusCode::OK);
    assert_eq!(second.0, StatusCode::OK);
    assert_eq!(second.1[0]["heat_hours"], 4);
}
