//! Joins stored predictions with the observation recorded at
//! `ts_utc + horizon` and aggregates accuracy and threshold alerts.

use std::collections::{BTreeMap, HashMap};

use chrono::{Duration as ChronoDuration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::config::AlertThresholds;
use crate::store::{PersistenceError, Prediction, Store};

#[derive(Debug, Error)]
pub enum KpiError {
    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),
    #[error("KPI source unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Actual {
    pub city_id: i64,
    pub ts_utc: NaiveDateTime,
    pub temp_c: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionVsActual {
    pub city_id: i64,
    pub ts_utc: NaiveDateTime,
    pub horizon_h: u32,
    pub model_name: String,
    pub target_ts_utc: NaiveDateTime,
    pub pred_temp_c: Option<f64>,
    pub actual_temp_c: Option<f64>,
    pub abs_err: Option<f64>,
    pub ape: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccuracyKpi {
    pub city_id: i64,
    pub horizon_h: u32,
    pub n_pred: usize,
    pub n_with_actual: usize,
    pub mae: Option<f64>,
    pub mape_pct: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertAggregate {
    pub city_id: i64,
    pub date: NaiveDate,
    pub horizon_h: u32,
    pub heat_hours: usize,
    pub cold_hours: usize,
    pub avg_pred_temp_c: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KpiReport {
    pub detail: Vec<PredictionVsActual>,
    pub accuracy: Vec<AccuracyKpi>,
    pub alerts: Vec<AlertAggregate>,
}

/// Left join: every prediction yields one row, with the actual present only
/// when an observation exists at exactly `ts_utc + horizon_h`.
pub fn reconcile(predictions: &[Prediction], actuals: &[Actual]) -> Vec<PredictionVsActual> {
    let by_key: HashMap<(i64, NaiveDateTime), f64> = actuals
        .iter()
        .map(|a| ((a.city_id, a.ts_utc), a.temp_c))
        .collect();

    let mut rows: Vec<PredictionVsActual> = predictions
        .iter()
        .map(|p| {
            let target_ts_utc = p.ts_utc + ChronoDuration::hours(i64::from(p.horizon_h));
            let actual_temp_c = by_key.get(&(p.city_id, target_ts_utc)).copied();
            let abs_err = p
                .pred_temp_c
                .zip(actual_temp_c)
                .map(|(pred, actual)| (pred - actual).abs());
            let ape = abs_err
                .zip(actual_temp_c)
                .filter(|(_, actual)| *actual != 0.0)
                .map(|(err, actual)| err / actual.abs());

            PredictionVsActual {
                city_id: p.city_id,
                ts_utc: p.ts_utc,
                horizon_h: p.horizon_h,
                model_name: p.model_name.clone(),
                target_ts_utc,
                pred_temp_c: p.pred_temp_c,
                actual_temp_c,
                abs_err,
                ape,
            }
        })
        .collect();

    rows.sort_by(|a, b| {
        (a.city_id, a.ts_utc, a.horizon_h, &a.model_name)
            .cmp(&(b.city_id, b.ts_utc, b.horizon_h, &b.model_name))
    });
    rows
}

pub fn accuracy_by_city_horizon(rows: &[PredictionVsActual]) -> Vec<AccuracyKpi> {
    #[derive(Default)]
    struct Acc {
        n_pred: usize,
        n_with_actual: usize,
        err_sum: f64,
        n_err: usize,
        ape_sum: f64,
        n_ape: usize,
    }

    let mut groups: BTreeMap<(i64, u32), Acc> = BTreeMap::new();
    for row in rows {
        let acc = groups.entry((row.city_id, row.horizon_h)).or_default();
        if row.pred_temp_c.is_some() {
            acc.n_pred += 1;
        }
        if row.actual_temp_c.is_some() {
            acc.n_with_actual += 1;
        }
        if let Some(err) = row.abs_err {
            acc.err_sum += err;
            acc.n_err += 1;
        }
        if let Some(ape) = row.ape {
            acc.ape_sum += ape;
            acc.n_ape += 1;
        }
    }

    groups
        .into_iter()
        .map(|((city_id, horizon_h), acc)| AccuracyKpi {
            city_id,
            horizon_h,
            n_pred: acc.n_pred,
            n_with_actual: acc.n_with_actual,
            mae: (acc.n_err > 0).then(|| acc.err_sum / acc.n_err as f64),
            mape_pct: (acc.n_ape > 0).then(|| 100.0 * acc.ape_sum / acc.n_ape as f64),
        })
        .collect()
}

/// Per (city, calendar date of the base timestamp, horizon): hours at or
/// above the heat threshold, at or below the cold threshold, and the mean
/// prediction. Rows without a predicted value do not count.
pub fn alerts_by_day(
    rows: &[PredictionVsActual],
    thresholds: &AlertThresholds,
) -> Vec<AlertAggregate> {
    let mut groups: BTreeMap<(i64, NaiveDate, u32), (usize, usize, f64, usize)> = BTreeMap::new();
    for row in rows {
        let Some(pred) = row.pred_temp_c else {
            continue;
        };
        let entry = groups
            .entry((row.city_id, row.ts_utc.date(), row.horizon_h))
            .or_default();
        if pred >= thresholds.heat_c {
            entry.0 += 1;
        }
        if pred <= thresholds.cold_c {
            entry.1 += 1;
        }
        entry.2 += pred;
        entry.3 += 1;
    }

    groups
        .into_iter()
        .map(
            |((city_id, date, horizon_h), (heat_hours, cold_hours, sum, n))| AlertAggregate {
                city_id,
                date,
                horizon_h,
                heat_hours,
                cold_hours,
                avg_pred_temp_c: sum / n as f64,
            },
        )
        .collect()
}

pub fn kpi_report(
    predictions: &[Prediction],
    actuals: &[Actual],
    thresholds: &AlertThresholds,
) -> KpiReport {
    let detail = reconcile(predictions, actuals);
    let accuracy = accuracy_by_city_horizon(&detail);
    let alerts = alerts_by_day(&detail, thresholds);
    KpiReport {
        detail,
        accuracy,
        alerts,
    }
}

pub fn kpi_report_from_store(
    store: &Store,
    thresholds: &AlertThresholds,
) -> Result<KpiReport, KpiError> {
    let predictions = store.load_predictions()?;
    let actuals: Vec<Actual> = store
        .load_observations()?
        .into_iter()
        .map(|obs| Actual {
            city_id: obs.city_id,
            ts_utc: obs.ts_utc,
            temp_c: obs.temp_c,
        })
        .collect();

    let report = kpi_report(&predictions, &actuals, thresholds);
    info!(
        component = "kpi",
        event = "kpi.report.finish",
        predictions = predictions.len(),
        actuals = actuals.len(),
        accuracy_groups = report.accuracy.len(),
        alert_groups = report.alerts.len()
    );
    Ok(report)
}
