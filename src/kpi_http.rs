//! Read-only JSON routes over the KPI aggregates.

use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::AlertThresholds;
use crate::kpi::{kpi_report_from_store, KpiError, KpiReport};
use crate::store::Store;

pub trait KpiSnapshotSource: Send + Sync + 'static {
    fn report(&self) -> Result<KpiReport, KpiError>;
}

/// Recomputes the report from the store on every request.
pub struct StoreKpiSource {
    store: Mutex<Store>,
    thresholds: AlertThresholds,
}

impl StoreKpiSource {
    pub fn new(store: Store, thresholds: AlertThresholds) -> Self {
        Self {
            store: Mutex::new(store),
            thresholds,
        }
    }
}

impl KpiSnapshotSource for StoreKpiSource {
    fn report(&self) -> Result<KpiReport, KpiError> {
        let store = self
            .store
            .lock()
            .map_err(|_| KpiError::Unavailable("store lock poisoned".to_string()))?;
        kpi_report_from_store(&store, &self.thresholds)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryKpiSource {
    inner: Arc<RwLock<KpiReport>>,
}

impl InMemoryKpiSource {
    pub fn new(report: KpiReport) -> Self {
        Self {
            inner: Arc::new(RwLock::new(report)),
        }
    }

    /// Swaps the served report. A writer that panicked mid-swap leaves a
    /// whole report behind, so a poisoned lock is recovered.
    pub fn replace_report(&self, report: KpiReport) {
        let mut guard = self.inner.write().unwrap_or_else(|poisoned| {
            warn!(
                component = "kpi_server",
                event = "kpi.report_lock.recovered"
            );
            PoisonError::into_inner(poisoned)
        });
        *guard = report;
    }
}

impl KpiSnapshotSource for InMemoryKpiSource {
    fn report(&self) -> Result<KpiReport, KpiError> {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Ok(guard.clone())
    }
}

pub fn kpi_router(source: Arc<dyn KpiSnapshotSource>) -> Router {
    Router::new()
        .route("/kpi/accuracy", get(get_accuracy))
        .route("/kpi/alerts", get(get_alerts))
        .route("/kpi/detail", get(get_detail))
        .with_state(KpiAppState { source })
}

#[derive(Clone)]
struct KpiAppState {
    source: Arc<dyn KpiSnapshotSource>,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

async fn get_accuracy(State(state): State<KpiAppState>) -> Response {
    respond(&state, "/kpi/accuracy", |report| Json(report.accuracy).into_response()).await
}

async fn get_alerts(State(state): State<KpiAppState>) -> Response {
    respond(&state, "/kpi/alerts", |report| Json(report.alerts).into_response()).await
}

async fn get_detail(State(state): State<KpiAppState>) -> Response {
    respond(&state, "/kpi/detail", |report| Json(report.detail).into_response()).await
}

/// Sources may block on SQLite, so the report is built on the blocking pool.
async fn load_report(state: &KpiAppState) -> Result<KpiReport, KpiError> {
    let source = Arc::clone(&state.source);
    tokio::task::spawn_blocking(move || source.report())
        .await
        .unwrap_or_else(|err| Err(KpiError::Unavailable(format!("report task failed: {err}"))))
}

async fn respond(
    state: &KpiAppState,
    route: &'static str,
    render: impl FnOnce(KpiReport) -> Response,
) -> Response {
    let started = Instant::now();
    match load_report(state).await {
        Ok(report) => {
            info!(
                component = "kpi_server",
                event = "http.kpi.request",
                route,
                status = 200u16,
                elapsed_ms = started.elapsed().as_millis() as u64
            );
            render(report)
        }
        Err(err) => {
            warn!(
                component = "kpi_server",
                event = "http.kpi.request",
                route,
                status = 500u16,
                error = %err
            );
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody {
                    error: err.to_string(),
                }),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kpi::AlertAggregate;
    use chrono::NaiveDate;

    fn report_with_alert_day(day: u32) -> KpiReport {
        KpiReport {
            alerts: vec![AlertAggregate {
                city_id: 1,
                date: NaiveDate::from_ymd_opt(2024, 7, day).unwrap(),
                horizon_h: 3,
                heat_hours: 2,
                cold_hours: 0,
                avg_pred_temp_c: 31.5,
            }],
            ..KpiReport::default()
        }
    }

    #[test]
    fn replace_report_recovers_after_writer_panic() {
        let source = InMemoryKpiSource::new(report_with_alert_day(1));
        let shared = Arc::clone(&source.inner);
        let writer = std::thread::spawn(move || {
            let _guard = shared.write().unwrap();
            panic!("writer died holding the report lock");
        });
        assert!(writer.join().is_err());
        assert!(source.inner.is_poisoned());

        source.replace_report(report_with_alert_day(2));

        let served = source.report().unwrap();
        assert_eq!(served, report_with_alert_day(2));
    }
}
