//! OpenWeatherMap current/forecast client.
//!
//! Response types mirror the nested JSON with every field optional, so that a
//! missing mandatory field surfaces as a data-quality rejection in the
//! normalizer rather than as a decode failure here.

use std::time::Duration;

use reqwest::Url;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::OwmConfig;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MainBlock {
    pub temp: Option<f64>,
    pub feels_like: Option<f64>,
    pub temp_min: Option<f64>,
    pub temp_max: Option<f64>,
    pub humidity: Option<f64>,
    pub pressure: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct WindBlock {
    pub speed: Option<f64>,
    pub deg: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CloudsBlock {
    pub all: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ConditionBlock {
    pub main: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CurrentResponse {
    pub dt: Option<i64>,
    pub main: Option<MainBlock>,
    pub wind: Option<WindBlock>,
    pub clouds: Option<CloudsBlock>,
    pub weather: Option<Vec<ConditionBlock>>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ForecastItem {
    pub dt: Option<i64>,
    pub main: Option<MainBlock>,
    pub wind: Option<WindBlock>,
    pub clouds: Option<CloudsBlock>,
    pub weather: Option<Vec<ConditionBlock>>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ForecastResponse {
    #[serde(default)]
    pub list: Vec<ForecastItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Current,
    Forecast,
}

impl Endpoint {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Current => "weather",
            Self::Forecast => "forecast",
        }
    }
}

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("HTTP client build error: {0}")]
    HttpClientBuild(String),
    #[error("invalid request URL for /{endpoint}: {message}")]
    InvalidUrl {
        endpoint: &'static str,
        message: String,
    },
    #[error("request to /{endpoint} failed: {message}")]
    Request {
        endpoint: &'static str,
        message: String,
    },
    #[error("/{endpoint} returned HTTP status {status}")]
    Status { endpoint: &'static str, status: u16 },
    #[error("could not decode /{endpoint} response: {message}")]
    Decode {
        endpoint: &'static str,
        message: String,
    },
}

impl UpstreamError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Request { .. } => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::HttpClientBuild(_) | Self::InvalidUrl { .. } | Self::Decode { .. } => false,
        }
    }
}

pub trait WeatherFetcher {
    fn fetch_current(&self, lat: f64, lon: f64) -> Result<CurrentResponse, UpstreamError>;
    fn fetch_forecast(&self, lat: f64, lon: f64) -> Result<ForecastResponse, UpstreamError>;
}

pub struct ReqwestWeatherFetcher {
    client: reqwest::blocking::Client,
    cfg: OwmConfig,
}

impl ReqwestWeatherFetcher {
    pub fn new(cfg: OwmConfig) -> Result<Self, UpstreamError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_millis(cfg.http_timeout_ms))
            .build()
            .map_err(|err| UpstreamError::HttpClientBuild(err.to_string()))?;
        Ok(Self { client, cfg })
    }

    fn request_url(&self, endpoint: Endpoint, lat: f64, lon: f64) -> Result<Url, UpstreamError> {
        let base = format!(
            "{}/{}",
            self.cfg.base_url.trim_end_matches('/'),
            endpoint.as_str()
        );
        Url::parse_with_params(
            &base,
            &[
                ("lat", lat.to_string()),
                ("lon", lon.to_string()),
                ("appid", self.cfg.api_key.clone()),
                ("units", self.cfg.units.clone()),
                ("lang", self.cfg.lang.clone()),
            ],
        )
        .map_err(|err| UpstreamError::InvalidUrl {
            endpoint: endpoint.as_str(),
            message: err.to_string(),
        })
    }

    fn get_bytes(&self, endpoint: Endpoint, url: &Url) -> Result<Vec<u8>, UpstreamError> {
        // Errors never echo the URL: it carries the API key.
        let response = self
            .client
            .get(url.clone())
            .send()
            .map_err(|err| UpstreamError::Request {
                endpoint: endpoint.as_str(),
                message: err.without_url().to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::Status {
                endpoint: endpoint.as_str(),
                status: status.as_u16(),
            });
        }

        response
            .bytes()
            .map(|bytes| bytes.to_vec())
            .map_err(|err| UpstreamError::Request {
                endpoint: endpoint.as_str(),
                message: err.without_url().to_string(),
            })
    }

    fn fetch_json<T: for<'de> Deserialize<'de>>(
        &self,
        endpoint: Endpoint,
        lat: f64,
        lon: f64,
    ) -> Result<T, UpstreamError> {
        let url = self.request_url(endpoint, lat, lon)?;
        debug!(
            component = "owm",
            event = "owm.request",
            endpoint = endpoint.as_str(),
            lat,
            lon
        );
        let body = retry(&self.cfg, endpoint, || self.get_bytes(endpoint, &url))?;
        decode_response(endpoint, &body)
    }
}

impl WeatherFetcher for ReqwestWeatherFetcher {
    fn fetch_current(&self, lat: f64, lon: f64) -> Result<CurrentResponse, UpstreamError> {
        self.fetch_json(Endpoint::Current, lat, lon)
    }

    fn fetch_forecast(&self, lat: f64, lon: f64) -> Result<ForecastResponse, UpstreamError> {
        self.fetch_json(Endpoint::Forecast, lat, lon)
    }
}

pub fn decode_response<T: for<'de> Deserialize<'de>>(
    endpoint: Endpoint,
    body: &[u8],
) -> Result<T, UpstreamError> {
    serde_json::from_slice(body).map_err(|err| UpstreamError::Decode {
        endpoint: endpoint.as_str(),
        message: err.to_string(),
    })
}

fn retry<T>(
    cfg: &OwmConfig,
    endpoint: Endpoint,
    mut f: impl FnMut() -> Result<T, UpstreamError>,
) -> Result<T, UpstreamError> {
    let mut attempt: u32 = 0;
    loop {
        match f() {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= cfg.max_retries || !err.is_retryable() => return Err(err),
            Err(err) => {
                attempt = attempt.saturating_add(1);
                let shift = attempt.saturating_sub(1).min(10);
                let sleep_ms = cfg.retry_backoff_ms.saturating_mul(1u64 << shift);
                warn!(
                    component = "owm",
                    event = "owm.request.retry",
                    endpoint = endpoint.as_str(),
                    attempt,
                    sleep_ms,
                    error = %err
                );
                std::thread::sleep(Duration::from_millis(sleep_ms));
            }
        }
    }
}
