//! Flattens typed API responses into rows shaped like the store tables.

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::owm::{CloudsBlock, ConditionBlock, CurrentResponse, ForecastResponse, MainBlock, WindBlock};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentObservation {
    pub city_id: i64,
    pub ts_utc: NaiveDateTime,
    pub temp_c: f64,
    pub feels_like_c: Option<f64>,
    pub humidity_pct: Option<f64>,
    pub pressure_hpa: Option<f64>,
    pub wind_speed_ms: Option<f64>,
    pub wind_deg: Option<f64>,
    pub clouds_pct: Option<f64>,
    pub weather_main: Option<String>,
    pub weather_desc: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub city_id: i64,
    pub ts_forecast_utc: NaiveDateTime,
    pub temp_c: f64,
    pub temp_min_c: Option<f64>,
    pub temp_max_c: Option<f64>,
    pub humidity_pct: Option<f64>,
    pub pressure_hpa: Option<f64>,
    pub wind_speed_ms: Option<f64>,
    pub wind_deg: Option<f64>,
    pub clouds_pct: Option<f64>,
    pub weather_main: Option<String>,
    pub weather_desc: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DataQualityError {
    #[error("city {city_id}: missing mandatory field {field}")]
    MissingField { city_id: i64, field: &'static str },
    #[error("city {city_id}: epoch {epoch} is out of range")]
    InvalidTimestamp { city_id: i64, epoch: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedItem {
    pub index: usize,
    pub error: DataQualityError,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct NormalizedForecast {
    pub rows: Vec<ForecastPoint>,
    pub rejected: Vec<RejectedItem>,
}

/// Converts an epoch in seconds to a naive UTC timestamp; the offset is dropped
/// so current and forecast rows compare directly.
pub fn epoch_to_naive_utc(epoch: i64) -> Option<NaiveDateTime> {
    DateTime::from_timestamp(epoch, 0).map(|dt| dt.naive_utc())
}

pub fn normalize_current(
    city_id: i64,
    response: &CurrentResponse,
) -> Result<CurrentObservation, DataQualityError> {
    let (ts_utc, main, temp_c) = mandatory(city_id, response.dt, response.main.as_ref())?;
    let wind = response.wind.as_ref();
    let condition = first_condition(response.weather.as_deref());

    Ok(CurrentObservation {
        city_id,
        ts_utc,
        temp_c,
        feels_like_c: main.feels_like,
        humidity_pct: main.humidity,
        pressure_hpa: main.pressure,
        wind_speed_ms: wind.and_then(|w| w.speed),
        wind_deg: wind.and_then(|w| w.deg),
        clouds_pct: clouds_all(response.clouds.as_ref()),
        weather_main: condition.and_then(|c| c.main.clone()),
        weather_desc: condition.and_then(|c| c.description.clone()),
    })
}

/// Items missing a mandatory field are rejected one by one; the rest of the
/// forecast list is still returned.
pub fn normalize_forecast(city_id: i64, response: &ForecastResponse) -> NormalizedForecast {
    let mut out = NormalizedForecast::default();

    for (index, item) in response.list.iter().enumerate() {
        match mandatory(city_id, item.dt, item.main.as_ref()) {
            Ok((ts_forecast_utc, main, temp_c)) => {
                let wind: Option<&WindBlock> = item.wind.as_ref();
                let condition = first_condition(item.weather.as_deref());
                out.rows.push(ForecastPoint {
                    city_id,
                    ts_forecast_utc,
                    temp_c,
                    temp_min_c: main.temp_min,
                    temp_max_c: main.temp_max,
                    humidity_pct: main.humidity,
                    pressure_hpa: main.pressure,
                    wind_speed_ms: wind.and_then(|w| w.speed),
                    wind_deg: wind.and_then(|w| w.deg),
                    clouds_pct: clouds_all(item.clouds.as_ref()),
                    weather_main: condition.and_then(|c| c.main.clone()),
                    weather_desc: condition.and_then(|c| c.description.clone()),
                });
            }
            Err(error) => out.rejected.push(RejectedItem { index, error }),
        }
    }

    out
}

fn mandatory(
    city_id: i64,
    dt: Option<i64>,
    main: Option<&MainBlock>,
) -> Result<(NaiveDateTime, &MainBlock, f64), DataQualityError> {
    let epoch = dt.ok_or(DataQualityError::MissingField {
        city_id,
        field: "dt",
    })?;
    let main = main.ok_or(DataQualityError::MissingField {
        city_id,
        field: "main",
    })?;
    let temp = main.temp.ok_or(DataQualityError::MissingField {
        city_id,
        field: "main.temp",
    })?;
    let ts = epoch_to_naive_utc(epoch)
        .ok_or(DataQualityError::InvalidTimestamp { city_id, epoch })?;
    Ok((ts, main, temp))
}

fn first_condition(weather: Option<&[ConditionBlock]>) -> Option<&ConditionBlock> {
    weather.and_then(|entries| entries.first())
}

fn clouds_all(clouds: Option<&CloudsBlock>) -> Option<f64> {
    clouds.and_then(|c| c.all)
}
