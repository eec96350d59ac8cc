//! Run configuration, built once at the binary edge and passed down explicitly.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_OWM_BASE_URL: &str = "https://api.openweathermap.org/data/2.5";

/// Upper bound for the forecast matching window: one year.
pub const MAX_MATCH_TOLERANCE_HOURS: f64 = 24.0 * 366.0;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid value '{value}' for {key}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub db_path: PathBuf,
    pub busy_timeout_ms: u64,
    pub cities_seed_path: PathBuf,
}

impl StoreConfig {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            db_path: PathBuf::from(required(&lookup, "HEATWAVE_DB_PATH")?),
            busy_timeout_ms: parsed_or(&lookup, "HEATWAVE_DB_BUSY_TIMEOUT_MS", 5_000)?,
            cities_seed_path: non_empty(&lookup, "HEATWAVE_CITIES_SEED")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data/cities_seed.csv")),
        })
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwmConfig {
    pub api_key: String,
    pub base_url: String,
    pub units: String,
    pub lang: String,
    pub http_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl OwmConfig {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            api_key: required(&lookup, "HEATWAVE_OWM_API_KEY")?,
            base_url: non_empty(&lookup, "HEATWAVE_OWM_BASE_URL")
                .unwrap_or_else(|| DEFAULT_OWM_BASE_URL.to_string()),
            units: non_empty(&lookup, "HEATWAVE_UNITS").unwrap_or_else(|| "metric".to_string()),
            lang: non_empty(&lookup, "HEATWAVE_LANG").unwrap_or_else(|| "pl".to_string()),
            http_timeout_ms: parsed_or(&lookup, "HEATWAVE_HTTP_TIMEOUT_MS", 20_000)?,
            max_retries: parsed_or(&lookup, "HEATWAVE_HTTP_MAX_RETRIES", 2)?,
            retry_backoff_ms: parsed_or(&lookup, "HEATWAVE_HTTP_RETRY_BACKOFF_MS", 200)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub horizons: Vec<u32>,
    pub model_dir: PathBuf,
    pub last_per_city: u32,
    pub match_tolerance_hours: Option<f64>,
    pub ridge_lambda: f64,
    pub min_training_rows: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            horizons: vec![3, 6],
            model_dir: PathBuf::from("models"),
            last_per_city: 12,
            match_tolerance_hours: None,
            ridge_lambda: 1.0,
            min_training_rows: 100,
        }
    }
}

impl ModelConfig {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let horizons = match non_empty(&lookup, "HEATWAVE_HORIZONS") {
            Some(raw) => parse_horizons(&raw)?,
            None => defaults.horizons,
        };
        let match_tolerance_hours = match non_empty(&lookup, "HEATWAVE_MATCH_TOLERANCE_HOURS") {
            Some(raw) => Some(parse_in_range(
                "HEATWAVE_MATCH_TOLERANCE_HOURS",
                &raw,
                0.0,
                MAX_MATCH_TOLERANCE_HOURS,
            )?),
            None => None,
        };
        let ridge_lambda = match non_empty(&lookup, "HEATWAVE_RIDGE_LAMBDA") {
            Some(raw) => parse_in_range("HEATWAVE_RIDGE_LAMBDA", &raw, 0.0, f64::MAX)?,
            None => defaults.ridge_lambda,
        };

        Ok(Self {
            horizons,
            model_dir: non_empty(&lookup, "HEATWAVE_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.model_dir),
            last_per_city: parsed_or(&lookup, "HEATWAVE_LAST_PER_CITY", defaults.last_per_city)?,
            match_tolerance_hours,
            ridge_lambda,
            min_training_rows: parsed_or(
                &lookup,
                "HEATWAVE_MIN_TRAINING_ROWS",
                defaults.min_training_rows,
            )?,
        })
    }

    /// `None` when unset, or when a hand-built config holds a value that
    /// cannot be represented as a duration.
    pub fn match_tolerance(&self) -> Option<chrono::Duration> {
        let seconds = (self.match_tolerance_hours? * 3600.0).round();
        if !(seconds.is_finite() && seconds >= 0.0 && seconds <= i64::MAX as f64) {
            return None;
        }
        chrono::Duration::try_seconds(seconds as i64)
    }
}

/// Predicted temperatures at or above `heat_c` count as heat hours, at or
/// below `cold_c` as cold hours.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlertThresholds {
    pub heat_c: f64,
    pub cold_c: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            heat_c: 28.0,
            cold_c: 0.0,
        }
    }
}

impl AlertThresholds {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            heat_c: parsed_or(&lookup, "HEATWAVE_HEAT_THRESHOLD", defaults.heat_c)?,
            cold_c: parsed_or(&lookup, "HEATWAVE_COLD_THRESHOLD", defaults.cold_c)?,
        })
    }
}

pub fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn non_empty(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key)
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
}

fn required(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<String, ConfigError> {
    non_empty(lookup, key).ok_or(ConfigError::Missing(key))
}

fn parsed_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match non_empty(lookup, key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn parse_value<T: FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.parse::<T>().map_err(|_| ConfigError::Invalid {
        key,
        value: raw.to_string(),
    })
}

/// Finite floats within `[min, max]`; NaN and infinities are rejected.
fn parse_in_range(key: &'static str, raw: &str, min: f64, max: f64) -> Result<f64, ConfigError> {
    let value: f64 = parse_value(key, raw)?;
    if value.is_finite() && (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(ConfigError::Invalid {
            key,
            value: raw.to_string(),
        })
    }
}

fn parse_horizons(raw: &str) -> Result<Vec<u32>, ConfigError> {
    let invalid = || ConfigError::Invalid {
        key: "HEATWAVE_HORIZONS",
        value: raw.to_string(),
    };

    let mut horizons = Vec::new();
    for token in raw.split(',') {
        let hours: u32 = token.trim().parse().map_err(|_| invalid())?;
        if hours == 0 {
            return Err(invalid());
        }
        if !horizons.contains(&hours) {
            horizons.push(hours);
        }
    }
    if horizons.is_empty() {
        return Err(invalid());
    }
    Ok(horizons)
}
