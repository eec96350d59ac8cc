//! Observation-to-feature transform shared by training and inference.

use std::collections::BTreeMap;
use std::f64::consts::PI;

use chrono::{Datelike, Duration as ChronoDuration, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info, warn};

use crate::normalize::{CurrentObservation, ForecastPoint};
use crate::store::{PersistenceError, Store};

pub const FEATURE_SCHEMA_VERSION: u32 = 1;

const HOUR_PERIOD: f64 = 24.0;
const DOW_PERIOD: f64 = 7.0;

const METRIC_COLUMNS: [&str; 5] = [
    "temp_c",
    "humidity_pct",
    "pressure_hpa",
    "wind_speed_ms",
    "clouds_pct",
];
const TIME_COLUMNS: [&str; 4] = ["hour_sin", "hour_cos", "dow_sin", "dow_cos"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureDType {
    F64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureColumn {
    pub name: String,
    pub dtype: FeatureDType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub version: u32,
    pub fingerprint: String,
    pub columns: Vec<FeatureColumn>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub city_id: i64,
    pub ts_utc: NaiveDateTime,
    pub values: Vec<f64>,
    pub target: Option<f64>,
    pub matched_forecast_ts: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureBuildConfig {
    pub horizon_h: u32,
    /// Largest accepted distance between `ts + horizon` and the matched
    /// forecast timestamp. `None` accepts any distance.
    pub max_match_delta: Option<ChronoDuration>,
}

impl FeatureBuildConfig {
    pub fn new(horizon_h: u32) -> Self {
        Self {
            horizon_h,
            max_match_delta: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureBuildReport {
    pub observations: u64,
    pub output_rows: u64,
    pub skipped_no_forecast: u64,
    pub skipped_outside_tolerance: u64,
    pub skipped_incomplete: u64,
}

#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),
    #[error("schema version mismatch: expected {expected}, got {actual}")]
    SchemaVersionMismatch { expected: u32, actual: u32 },
    #[error("schema fingerprint mismatch: expected {expected}, got {actual}")]
    SchemaFingerprintMismatch { expected: String, actual: String },
}

pub fn build_feature_schema() -> FeatureSchema {
    let columns: Vec<FeatureColumn> = METRIC_COLUMNS
        .iter()
        .chain(TIME_COLUMNS.iter())
        .map(|name| FeatureColumn {
            name: (*name).to_string(),
            dtype: FeatureDType::F64,
        })
        .collect();
    let fingerprint = schema_fingerprint(FEATURE_SCHEMA_VERSION, &columns);

    FeatureSchema {
        version: FEATURE_SCHEMA_VERSION,
        fingerprint,
        columns,
    }
}

pub fn assert_schema_compatible(
    expected: &FeatureSchema,
    actual: &FeatureSchema,
) -> Result<(), FeatureError> {
    if expected.version != actual.version {
        return Err(FeatureError::SchemaVersionMismatch {
            expected: expected.version,
            actual: actual.version,
        });
    }

    if expected.fingerprint != actual.fingerprint {
        return Err(FeatureError::SchemaFingerprintMismatch {
            expected: expected.fingerprint.clone(),
            actual: actual.fingerprint.clone(),
        });
    }

    Ok(())
}

/// Sine/cosine pairs for hour-of-day (period 24) and day-of-week
/// (period 7, Monday = 0).
pub fn cyclical_time_encoding(ts: NaiveDateTime) -> [f64; 4] {
    let hour = f64::from(ts.hour());
    let dow = f64::from(ts.weekday().num_days_from_monday());
    let hour_angle = 2.0 * PI * hour / HOUR_PERIOD;
    let dow_angle = 2.0 * PI * dow / DOW_PERIOD;
    [
        hour_angle.sin(),
        hour_angle.cos(),
        dow_angle.sin(),
        dow_angle.cos(),
    ]
}

/// Feature vector in schema order, or the name of the first missing metric.
pub fn observation_features(obs: &CurrentObservation) -> Result<Vec<f64>, &'static str> {
    let metrics = [
        Some(obs.temp_c),
        obs.humidity_pct,
        obs.pressure_hpa,
        obs.wind_speed_ms,
        obs.clouds_pct,
    ];

    let mut values = Vec::with_capacity(METRIC_COLUMNS.len() + TIME_COLUMNS.len());
    for (name, metric) in METRIC_COLUMNS.iter().zip(metrics) {
        values.push(metric.ok_or(*name)?);
    }
    values.extend(cyclical_time_encoding(obs.ts_utc));
    Ok(values)
}

/// Picks the candidate closest to `target`. Candidates must be sorted by
/// timestamp; on a tie the earlier candidate wins.
pub fn nearest_in_time<T>(
    candidates: &[(NaiveDateTime, T)],
    target: NaiveDateTime,
) -> Option<&(NaiveDateTime, T)> {
    let idx = candidates.partition_point(|(ts, _)| *ts < target);
    let before = idx.checked_sub(1).and_then(|i| candidates.get(i));
    let after = candidates.get(idx);

    match (before, after) {
        (Some(b), Some(a)) => {
            if (a.0 - target) < (target - b.0) {
                Some(a)
            } else {
                Some(b)
            }
        }
        (Some(b), None) => Some(b),
        (None, Some(a)) => Some(a),
        (None, None) => None,
    }
}

/// Pairs each observation with the forecast temperature nearest to
/// `ts_utc + horizon` for the same city. Observations without a usable
/// forecast or with a missing feature metric are dropped and counted.
pub fn build_training_rows(
    observations: &[CurrentObservation],
    forecasts: &[ForecastPoint],
    cfg: &FeatureBuildConfig,
) -> (Vec<FeatureRow>, FeatureBuildReport) {
    let horizon = ChronoDuration::hours(i64::from(cfg.horizon_h));
    let by_city = forecasts_by_city(forecasts);
    let mut report = FeatureBuildReport {
        observations: observations.len() as u64,
        ..FeatureBuildReport::default()
    };
    let mut rows = Vec::new();

    for obs in observations {
        let target_ts = obs.ts_utc + horizon;
        let Some(&(matched_ts, target_temp)) = by_city
            .get(&obs.city_id)
            .and_then(|candidates| nearest_in_time(candidates, target_ts))
        else {
            report.skipped_no_forecast += 1;
            continue;
        };

        if let Some(max_delta) = cfg.max_match_delta {
            let delta = if matched_ts >= target_ts {
                matched_ts - target_ts
            } else {
                target_ts - matched_ts
            };
            if delta > max_delta {
                report.skipped_outside_tolerance += 1;
                continue;
            }
        }

        match observation_features(obs) {
            Ok(values) => rows.push(FeatureRow {
                city_id: obs.city_id,
                ts_utc: obs.ts_utc,
                values,
                target: Some(target_temp),
                matched_forecast_ts: Some(matched_ts),
            }),
            Err(_) => report.skipped_incomplete += 1,
        }
    }

    report.output_rows = rows.len() as u64;
    rows.sort_by(|a, b| (a.city_id, a.ts_utc).cmp(&(b.city_id, b.ts_utc)));
    log_build_report("training", cfg.horizon_h, &report);
    (rows, report)
}

/// Inference rows carry no target; incomplete observations are skipped.
pub fn build_inference_rows(
    observations: &[CurrentObservation],
) -> (Vec<FeatureRow>, FeatureBuildReport) {
    let mut report = FeatureBuildReport {
        observations: observations.len() as u64,
        ..FeatureBuildReport::default()
    };
    let mut rows = Vec::with_capacity(observations.len());

    for obs in observations {
        match observation_features(obs) {
            Ok(values) => rows.push(FeatureRow {
                city_id: obs.city_id,
                ts_utc: obs.ts_utc,
                values,
                target: None,
                matched_forecast_ts: None,
            }),
            Err(missing) => {
                report.skipped_incomplete += 1;
                warn!(
                    component = "features",
                    event = "features.row.incomplete",
                    city_id = obs.city_id,
                    ts_utc = %obs.ts_utc,
                    missing
                );
            }
        }
    }

    report.output_rows = rows.len() as u64;
    (rows, report)
}

pub fn build_training_rows_from_store(
    store: &Store,
    cfg: &FeatureBuildConfig,
) -> Result<(Vec<FeatureRow>, FeatureBuildReport), FeatureError> {
    let observations = store.load_observations()?;
    let forecasts = store.load_forecasts()?;
    Ok(build_training_rows(&observations, &forecasts, cfg))
}

pub fn recent_inference_rows_from_store(
    store: &Store,
    last_per_city: u32,
) -> Result<(Vec<FeatureRow>, FeatureBuildReport), FeatureError> {
    let observations = store.load_recent_observations(last_per_city)?;
    let (rows, report) = build_inference_rows(&observations);
    log_build_report("inference", 0, &report);
    Ok((rows, report))
}

fn forecasts_by_city(forecasts: &[ForecastPoint]) -> BTreeMap<i64, Vec<(NaiveDateTime, f64)>> {
    let mut by_city: BTreeMap<i64, Vec<(NaiveDateTime, f64)>> = BTreeMap::new();
    for point in forecasts {
        by_city
            .entry(point.city_id)
            .or_default()
            .push((point.ts_forecast_utc, point.temp_c));
    }
    for candidates in by_city.values_mut() {
        candidates.sort_by_key(|(ts, _)| *ts);
    }
    by_city
}

fn log_build_report(kind: &'static str, horizon_h: u32, report: &FeatureBuildReport) {
    info!(
        component = "features",
        event = "features.build.finish",
        kind,
        horizon_h,
        observations = report.observations,
        output_rows = report.output_rows,
        skipped_no_forecast = report.skipped_no_forecast,
        skipped_outside_tolerance = report.skipped_outside_tolerance,
        skipped_incomplete = report.skipped_incomplete
    );
}

fn schema_fingerprint(version: u32, columns: &[FeatureColumn]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("version:{version};"));
    hasher.update(format!("hour_period:{HOUR_PERIOD};dow_period:{DOW_PERIOD};"));
    hasher.update("columns:");
    for column in columns {
        hasher.update(column.name.as_bytes());
        hasher.update(":f64;");
    }
    hex::encode(hasher.finalize())
}
