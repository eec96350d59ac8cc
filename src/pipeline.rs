//! Ingest orchestration: fetch, normalize and upsert one city at a time.

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::normalize::{normalize_current, normalize_forecast, RejectedItem};
use crate::owm::{UpstreamError, WeatherFetcher};
use crate::store::{City, MergeReport, PersistenceError, Store};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    Completed,
    NoActiveCities,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CityOutcome {
    Ingested {
        current: MergeReport,
        forecast: MergeReport,
        current_rejected: Option<String>,
        forecast_rejected: usize,
    },
    Failed {
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CityIngest {
    pub city_id: i64,
    pub name: String,
    pub outcome: CityOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub status: IngestStatus,
    pub cities: Vec<CityIngest>,
    pub current_rows: usize,
    pub forecast_rows: usize,
    pub failed_cities: usize,
}

impl IngestReport {
    fn empty(status: IngestStatus) -> Self {
        Self {
            status,
            cities: Vec::new(),
            current_rows: 0,
            forecast_rows: 0,
            failed_cities: 0,
        }
    }
}

/// Ingests every active city. An upstream failure skips only that city;
/// a persistence failure stops the run with the earlier cities already
/// committed.
pub fn run_ingest(
    store: &mut Store,
    fetcher: &dyn WeatherFetcher,
) -> Result<IngestReport, PipelineError> {
    let cities = store.active_cities()?;
    if cities.is_empty() {
        warn!(component = "ingest", event = "ingest.no_active_cities");
        return Ok(IngestReport::empty(IngestStatus::NoActiveCities));
    }

    let mut report = IngestReport::empty(IngestStatus::Completed);
    for city in &cities {
        let outcome = match fetch_city(fetcher, city) {
            Ok(fetched) => ingest_city(store, city, fetched)?,
            Err(err) => {
                warn!(
                    component = "ingest",
                    event = "ingest.city.failed",
                    city_id = city.city_id,
                    city = %city.name,
                    error = %err
                );
                report.failed_cities += 1;
                CityOutcome::Failed {
                    error: err.to_string(),
                }
            }
        };

        if let CityOutcome::Ingested {
            current, forecast, ..
        } = &outcome
        {
            report.current_rows += current.staged;
            report.forecast_rows += forecast.staged;
        }
        report.cities.push(CityIngest {
            city_id: city.city_id,
            name: city.name.clone(),
            outcome,
        });
    }

    info!(
        component = "ingest",
        event = "ingest.finish",
        cities = cities.len(),
        failed_cities = report.failed_cities,
        current_rows = report.current_rows,
        forecast_rows = report.forecast_rows
    );
    Ok(report)
}

struct FetchedCity {
    current: crate::owm::CurrentResponse,
    forecast: crate::owm::ForecastResponse,
}

fn fetch_city(fetcher: &dyn WeatherFetcher, city: &City) -> Result<FetchedCity, UpstreamError> {
    Ok(FetchedCity {
        current: fetcher.fetch_current(city.lat, city.lon)?,
        forecast: fetcher.fetch_forecast(city.lat, city.lon)?,
    })
}

fn ingest_city(
    store: &mut Store,
    city: &City,
    fetched: FetchedCity,
) -> Result<CityOutcome, PipelineError> {
    let (current_rows, current_rejected) = match normalize_current(city.city_id, &fetched.current) {
        Ok(row) => (vec![row], None),
        Err(err) => {
            warn!(
                component = "ingest",
                event = "ingest.current.rejected",
                city_id = city.city_id,
                error = %err
            );
            (Vec::new(), Some(err.to_string()))
        }
    };

    let forecast = normalize_forecast(city.city_id, &fetched.forecast);
    log_rejected_items(city.city_id, &forecast.rejected);

    let current = store.upsert(&current_rows)?;
    let forecast_merge = store.upsert(&forecast.rows)?;

    info!(
        component = "ingest",
        event = "ingest.city.finish",
        city_id = city.city_id,
        city = %city.name,
        current_rows = current.staged,
        forecast_rows = forecast_merge.staged,
        forecast_inserted = forecast_merge.inserted,
        forecast_updated = forecast_merge.updated,
        forecast_rejected = forecast.rejected.len()
    );

    Ok(CityOutcome::Ingested {
        current,
        forecast: forecast_merge,
        current_rejected,
        forecast_rejected: forecast.rejected.len(),
    })
}

fn log_rejected_items(city_id: i64, rejected: &[RejectedItem]) {
    for item in rejected {
        warn!(
            component = "ingest",
            event = "ingest.forecast_item.rejected",
            city_id,
            index = item.index,
            error = %item.error
        );
    }
}
