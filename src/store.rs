//! SQLite store: schema, city seed, and the staged merge-by-key primitive.

use std::path::Path;
use std::time::Duration;

use chrono::NaiveDateTime;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::normalize::{CurrentObservation, ForecastPoint};

const SQL_TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS cities (
    city_id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    country TEXT,
    lat REAL NOT NULL,
    lon REAL NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS weather_current (
    city_id INTEGER NOT NULL REFERENCES cities(city_id),
    ts_utc TEXT NOT NULL,
    temp_c REAL NOT NULL,
    feels_like_c REAL,
    humidity_pct REAL,
    pressure_hpa REAL,
    wind_speed_ms REAL,
    wind_deg REAL,
    clouds_pct REAL,
    weather_main TEXT,
    weather_desc TEXT,
    PRIMARY KEY (city_id, ts_utc)
);

CREATE TABLE IF NOT EXISTS weather_forecast (
    city_id INTEGER NOT NULL REFERENCES cities(city_id),
    ts_forecast_utc TEXT NOT NULL,
    temp_c REAL NOT NULL,
    temp_min_c REAL,
    temp_max_c REAL,
    humidity_pct REAL,
    pressure_hpa REAL,
    wind_speed_ms REAL,
    wind_deg REAL,
    clouds_pct REAL,
    weather_main TEXT,
    weather_desc TEXT,
    PRIMARY KEY (city_id, ts_forecast_utc)
);

CREATE TABLE IF NOT EXISTS weather_predictions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    city_id INTEGER NOT NULL REFERENCES cities(city_id),
    ts_utc TEXT NOT NULL,
    horizon_h INTEGER NOT NULL,
    pred_temp_c REAL,
    model_name TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE (city_id, ts_utc, horizon_h, model_name)
);
";

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("invalid merge target {table}: {reason}")]
    InvalidTarget { table: &'static str, reason: String },
    #[error("row {row_index} for {table} has {found} values, expected {expected}")]
    RowShape {
        table: &'static str,
        row_index: usize,
        found: usize,
        expected: usize,
    },
    #[error("merge into {table} rolled back: {source}")]
    MergeFailed {
        table: &'static str,
        #[source]
        source: rusqlite::Error,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Destination table of a merge and the columns that form its natural key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertTarget {
    pub table: &'static str,
    pub columns: &'static [&'static str],
    pub key_columns: &'static [&'static str],
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReport {
    pub staged: usize,
    pub inserted: usize,
    pub updated: usize,
}

/// Merge a batch into a target by key: existing keys get their non-key
/// columns overwritten, new keys are inserted, and the batch lands atomically.
pub trait BatchMerge {
    fn merge_batch(
        &mut self,
        target: &UpsertTarget,
        rows: &[Vec<Value>],
    ) -> Result<MergeReport, PersistenceError>;
}

pub trait UpsertRow {
    const TARGET: UpsertTarget;

    /// Values in `TARGET.columns` order.
    fn to_values(&self) -> Vec<Value>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct City {
    pub city_id: i64,
    pub name: String,
    pub country: Option<String>,
    pub lat: f64,
    pub lon: f64,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub city_id: i64,
    pub ts_utc: NaiveDateTime,
    pub horizon_h: u32,
    pub pred_temp_c: Option<f64>,
    pub model_name: String,
    pub created_at: NaiveDateTime,
}

pub const CITIES: UpsertTarget = UpsertTarget {
    table: "cities",
    columns: &["city_id", "name", "country", "lat", "lon", "is_active"],
    key_columns: &["city_id"],
};

pub const WEATHER_CURRENT: UpsertTarget = UpsertTarget {
    table: "weather_current",
    columns: &[
        "city_id",
        "ts_utc",
        "temp_c",
        "feels_like_c",
        "humidity_pct",
        "pressure_hpa",
        "wind_speed_ms",
        "wind_deg",
        "clouds_pct",
        "weather_main",
        "weather_desc",
    ],
    key_columns: &["city_id", "ts_utc"],
};

pub const WEATHER_FORECAST: UpsertTarget = UpsertTarget {
    table: "weather_forecast",
    columns: &[
        "city_id",
        "ts_forecast_utc",
        "temp_c",
        "temp_min_c",
        "temp_max_c",
        "humidity_pct",
        "pressure_hpa",
        "wind_speed_ms",
        "wind_deg",
        "clouds_pct",
        "weather_main",
        "weather_desc",
    ],
    key_columns: &["city_id", "ts_forecast_utc"],
};

pub const WEATHER_PREDICTIONS: UpsertTarget = UpsertTarget {
    table: "weather_predictions",
    columns: &[
        "city_id",
        "ts_utc",
        "horizon_h",
        "pred_temp_c",
        "model_name",
        "created_at",
    ],
    key_columns: &["city_id", "ts_utc", "horizon_h", "model_name"],
};

impl UpsertRow for City {
    const TARGET: UpsertTarget = CITIES;

    fn to_values(&self) -> Vec<Value> {
        vec![
            Value::Integer(self.city_id),
            Value::Text(self.name.clone()),
            opt_text(&self.country),
            Value::Real(self.lat),
            Value::Real(self.lon),
            Value::Integer(i64::from(self.is_active)),
        ]
    }
}

impl UpsertRow for CurrentObservation {
    const TARGET: UpsertTarget = WEATHER_CURRENT;

    fn to_values(&self) -> Vec<Value> {
        vec![
            Value::Integer(self.city_id),
            ts_value(self.ts_utc),
            Value::Real(self.temp_c),
            opt_real(self.feels_like_c),
            opt_real(self.humidity_pct),
            opt_real(self.pressure_hpa),
            opt_real(self.wind_speed_ms),
            opt_real(self.wind_deg),
            opt_real(self.clouds_pct),
            opt_text(&self.weather_main),
            opt_text(&self.weather_desc),
        ]
    }
}

impl UpsertRow for ForecastPoint {
    const TARGET: UpsertTarget = WEATHER_FORECAST;

    fn to_values(&self) -> Vec<Value> {
        vec![
            Value::Integer(self.city_id),
            ts_value(self.ts_forecast_utc),
            Value::Real(self.temp_c),
            opt_real(self.temp_min_c),
            opt_real(self.temp_max_c),
            opt_real(self.humidity_pct),
            opt_real(self.pressure_hpa),
            opt_real(self.wind_speed_ms),
            opt_real(self.wind_deg),
            opt_real(self.clouds_pct),
            opt_text(&self.weather_main),
            opt_text(&self.weather_desc),
        ]
    }
}

impl UpsertRow for Prediction {
    const TARGET: UpsertTarget = WEATHER_PREDICTIONS;

    fn to_values(&self) -> Vec<Value> {
        vec![
            Value::Integer(self.city_id),
            ts_value(self.ts_utc),
            Value::Integer(i64::from(self.horizon_h)),
            opt_real(self.pred_temp_c),
            Value::Text(self.model_name.clone()),
            ts_value(self.created_at),
        ]
    }
}

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self, PersistenceError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            ",
        )?;
        Self::init(conn, busy_timeout)
    }

    pub fn open_in_memory() -> Result<Self, PersistenceError> {
        Self::init(Connection::open_in_memory()?, Duration::from_millis(5_000))
    }

    fn init(conn: Connection, busy_timeout: Duration) -> Result<Self, PersistenceError> {
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch(
            "
            PRAGMA foreign_keys=ON;
            PRAGMA temp_store=MEMORY;
            ",
        )?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn })
    }

    pub fn upsert<R: UpsertRow>(&mut self, rows: &[R]) -> Result<MergeReport, PersistenceError> {
        let values: Vec<Vec<Value>> = rows.iter().map(UpsertRow::to_values).collect();
        self.merge_batch(&R::TARGET, &values)
    }

    pub fn count_rows(&self, table: &'static str) -> Result<u64, PersistenceError> {
        count_table(&self.conn, table).map_err(PersistenceError::from)
    }

    /// Loads the seed CSV into `cities` only when the table is empty.
    /// Returns the number of seeded cities.
    pub fn seed_cities_if_empty(&mut self, csv_path: &Path) -> Result<usize, PersistenceError> {
        if self.count_rows("cities")? > 0 {
            debug!(
                component = "store",
                event = "store.seed.skipped",
                reason = "cities_present"
            );
            return Ok(0);
        }

        let mut reader = csv::Reader::from_path(csv_path)?;
        let mut cities = Vec::new();
        for record in reader.deserialize::<CitySeedRecord>() {
            cities.push(City::from(record?));
        }

        let report = self.upsert(&cities)?;
        info!(
            component = "store",
            event = "store.seed.finish",
            path = %csv_path.display(),
            seeded = report.inserted
        );
        Ok(report.inserted)
    }

    pub fn active_cities(&self) -> Result<Vec<City>, PersistenceError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT city_id, name, country, lat, lon, is_active
            FROM cities
            WHERE is_active
            ORDER BY city_id
            ",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(City {
                city_id: row.get(0)?,
                name: row.get(1)?,
                country: row.get(2)?,
                lat: row.get(3)?,
                lon: row.get(4)?,
                is_active: row.get(5)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn load_observations(&self) -> Result<Vec<CurrentObservation>, PersistenceError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT city_id, ts_utc, temp_c, feels_like_c, humidity_pct, pressure_hpa,
                   wind_speed_ms, wind_deg, clouds_pct, weather_main, weather_desc
            FROM weather_current
            ORDER BY city_id, ts_utc
            ",
        )?;
        let rows = stmt.query_map([], observation_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Most recent `last_per_city` observations per city, newest first within
    /// each city.
    pub fn load_recent_observations(
        &self,
        last_per_city: u32,
    ) -> Result<Vec<CurrentObservation>, PersistenceError> {
        let mut stmt = self.conn.prepare(
            "
            WITH ranked AS (
                SELECT *,
                       ROW_NUMBER() OVER (PARTITION BY city_id ORDER BY ts_utc DESC) AS rn
                FROM weather_current
            )
            SELECT city_id, ts_utc, temp_c, feels_like_c, humidity_pct, pressure_hpa,
                   wind_speed_ms, wind_deg, clouds_pct, weather_main, weather_desc
            FROM ranked
            WHERE rn <= ?1
            ORDER BY city_id, ts_utc DESC
            ",
        )?;
        let rows = stmt.query_map(params![last_per_city], observation_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn load_forecasts(&self) -> Result<Vec<ForecastPoint>, PersistenceError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT city_id, ts_forecast_utc, temp_c, temp_min_c, temp_max_c, humidity_pct,
                   pressure_hpa, wind_speed_ms, wind_deg, clouds_pct, weather_main, weather_desc
            FROM weather_forecast
            ORDER BY city_id, ts_forecast_utc
            ",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(ForecastPoint {
                city_id: row.get(0)?,
                ts_forecast_utc: row.get(1)?,
                temp_c: row.get(2)?,
                temp_min_c: row.get(3)?,
                temp_max_c: row.get(4)?,
                humidity_pct: row.get(5)?,
                pressure_hpa: row.get(6)?,
                wind_speed_ms: row.get(7)?,
                wind_deg: row.get(8)?,
                clouds_pct: row.get(9)?,
                weather_main: row.get(10)?,
                weather_desc: row.get(11)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn load_predictions(&self) -> Result<Vec<Prediction>, PersistenceError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT city_id, ts_utc, horizon_h, pred_temp_c, model_name, created_at
            FROM weather_predictions
            ORDER BY city_id, ts_utc, horizon_h, model_name
            ",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Prediction {
                city_id: row.get(0)?,
                ts_utc: row.get(1)?,
                horizon_h: row.get(2)?,
                pred_temp_c: row.get(3)?,
                model_name: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn find_prediction(
        &self,
        city_id: i64,
        ts_utc: NaiveDateTime,
        horizon_h: u32,
        model_name: &str,
    ) -> Result<Option<Prediction>, PersistenceError> {
        let found = self
            .conn
            .query_row(
                "
                SELECT city_id, ts_utc, horizon_h, pred_temp_c, model_name, created_at
                FROM weather_predictions
                WHERE city_id = ?1 AND ts_utc = ?2 AND horizon_h = ?3 AND model_name = ?4
                ",
                params![city_id, ts_value(ts_utc), horizon_h, model_name],
                |row| {
                    Ok(Prediction {
                        city_id: row.get(0)?,
                        ts_utc: row.get(1)?,
                        horizon_h: row.get(2)?,
                        pred_temp_c: row.get(3)?,
                        model_name: row.get(4)?,
                        created_at: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(found)
    }
}

impl BatchMerge for Store {
    fn merge_batch(
        &mut self,
        target: &UpsertTarget,
        rows: &[Vec<Value>],
    ) -> Result<MergeReport, PersistenceError> {
        if rows.is_empty() {
            return Ok(MergeReport::default());
        }

        validate_target(target)?;
        for (row_index, row) in rows.iter().enumerate() {
            if row.len() != target.columns.len() {
                return Err(PersistenceError::RowShape {
                    table: target.table,
                    row_index,
                    found: row.len(),
                    expected: target.columns.len(),
                });
            }
        }

        let tx = self.conn.transaction()?;
        let before = count_table(&tx, target.table)?;
        stage_and_merge(&tx, target, rows).map_err(|source| PersistenceError::MergeFailed {
            table: target.table,
            source,
        })?;
        let after = count_table(&tx, target.table)?;
        tx.commit()?;

        let inserted = usize::try_from(after.saturating_sub(before)).unwrap_or(usize::MAX);
        let report = MergeReport {
            staged: rows.len(),
            inserted,
            updated: rows.len().saturating_sub(inserted),
        };
        debug!(
            component = "store",
            event = "store.merge.finish",
            table = target.table,
            staged = report.staged,
            inserted = report.inserted,
            updated = report.updated
        );
        Ok(report)
    }
}

/// Staging table lives in the temp schema and is created and dropped inside
/// the caller's transaction, so a failure leaves neither staging nor target
/// changes behind.
fn stage_and_merge(
    conn: &Connection,
    target: &UpsertTarget,
    rows: &[Vec<Value>],
) -> Result<(), rusqlite::Error> {
    let staging = format!("_stg_{}", target.table);
    let cols = target.columns.join(", ");
    let placeholders = (1..=target.columns.len())
        .map(|idx| format!("?{idx}"))
        .collect::<Vec<_>>()
        .join(", ");

    conn.execute_batch(&format!(
        "CREATE TEMP TABLE {staging} AS SELECT {cols} FROM main.{table} WHERE 0;",
        table = target.table
    ))?;

    {
        let mut stmt = conn.prepare(&format!(
            "INSERT INTO temp.{staging} ({cols}) VALUES ({placeholders})"
        ))?;
        for row in rows {
            stmt.execute(params_from_iter(row.iter()))?;
        }
    }

    conn.execute_batch(&merge_sql(target, &staging))?;
    conn.execute_batch(&format!("DROP TABLE temp.{staging};"))?;
    Ok(())
}

fn merge_sql(target: &UpsertTarget, staging: &str) -> String {
    let cols = target.columns.join(", ");
    let conflict = target.key_columns.join(", ");
    let updates: Vec<String> = target
        .columns
        .iter()
        .filter(|col| !target.key_columns.contains(*col))
        .map(|col| format!("{col} = excluded.{col}"))
        .collect();
    let action = if updates.is_empty() {
        "DO NOTHING".to_string()
    } else {
        format!("DO UPDATE SET {}", updates.join(", "))
    };

    // `WHERE true` keeps SQLite from parsing ON CONFLICT as a join constraint.
    format!(
        "INSERT INTO main.{table} ({cols})
         SELECT {cols} FROM temp.{staging} WHERE true
         ON CONFLICT ({conflict}) {action};",
        table = target.table
    )
}

fn validate_target(target: &UpsertTarget) -> Result<(), PersistenceError> {
    let invalid = |reason: String| PersistenceError::InvalidTarget {
        table: target.table,
        reason,
    };

    if target.columns.is_empty() {
        return Err(invalid("no columns declared".to_string()));
    }
    if target.key_columns.is_empty() {
        return Err(invalid("no key columns declared".to_string()));
    }
    for key in target.key_columns {
        if !target.columns.contains(key) {
            return Err(invalid(format!("key column {key} is not a declared column")));
        }
    }
    let identifiers = std::iter::once(&target.table).chain(target.columns.iter());
    for ident in identifiers {
        if ident.is_empty() || !ident.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(invalid(format!("unsafe identifier '{ident}'")));
        }
    }
    Ok(())
}

fn count_table(conn: &Connection, table: &str) -> Result<u64, rusqlite::Error> {
    let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
        row.get(0)
    })?;
    Ok(count.max(0) as u64)
}

fn observation_from_row(row: &Row<'_>) -> rusqlite::Result<CurrentObservation> {
    Ok(CurrentObservation {
        city_id: row.get(0)?,
        ts_utc: row.get(1)?,
        temp_c: row.get(2)?,
        feels_like_c: row.get(3)?,
        humidity_pct: row.get(4)?,
        pressure_hpa: row.get(5)?,
        wind_speed_ms: row.get(6)?,
        wind_deg: row.get(7)?,
        clouds_pct: row.get(8)?,
        weather_main: row.get(9)?,
        weather_desc: row.get(10)?,
    })
}

#[derive(Debug, Deserialize)]
struct CitySeedRecord {
    city_id: i64,
    name: String,
    country: Option<String>,
    lat: f64,
    lon: f64,
    #[serde(default = "default_active")]
    is_active: SeedFlag,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SeedFlag {
    Bool(bool),
    Int(i64),
}

fn default_active() -> SeedFlag {
    SeedFlag::Bool(true)
}

impl From<CitySeedRecord> for City {
    fn from(record: CitySeedRecord) -> Self {
        Self {
            city_id: record.city_id,
            name: record.name,
            country: record.country.filter(|c| !c.trim().is_empty()),
            lat: record.lat,
            lon: record.lon,
            is_active: match record.is_active {
                SeedFlag::Bool(flag) => flag,
                SeedFlag::Int(flag) => flag != 0,
            },
        }
    }
}

pub fn ts_value(ts: NaiveDateTime) -> Value {
    Value::Text(ts.format(SQL_TS_FORMAT).to_string())
}

fn opt_real(value: Option<f64>) -> Value {
    value.map(Value::Real).unwrap_or(Value::Null)
}

fn opt_text(value: &Option<String>) -> Value {
    value.clone().map(Value::Text).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 7, 1)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn city(id: i64) -> City {
        City {
            city_id: id,
            name: format!("city-{id}"),
            country: Some("PL".to_string()),
            lat: 52.0,
            lon: 21.0,
            is_active: true,
        }
    }

    #[test]
    fn merge_sql_updates_only_non_key_columns() {
        let sql = merge_sql(&WEATHER_PREDICTIONS, "_stg_weather_predictions");
        assert!(sql.contains("ON CONFLICT (city_id, ts_utc, horizon_h, model_name)"));
        assert!(sql.contains("pred_temp_c = excluded.pred_temp_c"));
        assert!(sql.contains("created_at = excluded.created_at"));
        assert!(!sql.contains("city_id = excluded.city_id"));
        assert!(sql.contains("WHERE true"));
    }

    #[test]
    fn key_only_target_does_nothing_on_conflict() {
        const KEYS_ONLY: UpsertTarget = UpsertTarget {
            table: "cities",
            columns: &["city_id"],
            key_columns: &["city_id"],
        };
        assert!(merge_sql(&KEYS_ONLY, "_stg_cities").contains("DO NOTHING"));
    }

    #[test]
    fn invalid_targets_are_rejected_before_any_write() {
        let mut store = Store::open_in_memory().unwrap();
        const BAD_KEY: UpsertTarget = UpsertTarget {
            table: "cities",
            columns: &["city_id", "name"],
            key_columns: &["name", "missing"],
        };
        let err = store
            .merge_batch(&BAD_KEY, &[vec![Value::Integer(1), Value::Text("x".into())]])
            .unwrap_err();
        assert!(matches!(err, PersistenceError::InvalidTarget { .. }));

        let err = store
            .merge_batch(&CITIES, &[vec![Value::Integer(1)]])
            .unwrap_err();
        assert!(matches!(err, PersistenceError::RowShape { found: 1, expected: 6, .. }));
        assert_eq!(store.count_rows("cities").unwrap(), 0);
    }

    #[test]
    fn timestamps_round_trip_through_text_columns() {
        let mut store = Store::open_in_memory().unwrap();
        store.upsert(&[city(1)]).unwrap();
        let row = CurrentObservation {
            city_id: 1,
            ts_utc: ts(13),
            temp_c: 21.5,
            feels_like_c: None,
            humidity_pct: Some(40.0),
            pressure_hpa: None,
            wind_speed_ms: None,
            wind_deg: None,
            clouds_pct: None,
            weather_main: Some("Clear".to_string()),
            weather_desc: None,
        };
        store.upsert(std::slice::from_ref(&row)).unwrap();

        assert_eq!(store.load_observations().unwrap(), vec![row]);
    }

    #[test]
    fn recent_observations_are_bounded_per_city() {
        let mut store = Store::open_in_memory().unwrap();
        store.upsert(&[city(1), city(2)]).unwrap();
        let rows: Vec<CurrentObservation> = [(1, 1), (1, 2), (1, 3), (2, 5)]
            .into_iter()
            .map(|(city_id, hour)| CurrentObservation {
                city_id,
                ts_utc: ts(hour),
                temp_c: hour as f64,
                feels_like_c: None,
                humidity_pct: None,
                pressure_hpa: None,
                wind_speed_ms: None,
                wind_deg: None,
                clouds_pct: None,
                weather_main: None,
                weather_desc: None,
            })
            .collect();
        store.upsert(&rows).unwrap();

        let recent = store.load_recent_observations(2).unwrap();
        let keys: Vec<(i64, NaiveDateTime)> =
            recent.iter().map(|r| (r.city_id, r.ts_utc)).collect();
        assert_eq!(keys, vec![(1, ts(3)), (1, ts(2)), (2, ts(5))]);
    }

    #[test]
    fn inactive_cities_are_not_listed() {
        let mut store = Store::open_in_memory().unwrap();
        let mut sleeping = city(2);
        sleeping.is_active = false;
        store.upsert(&[city(1), sleeping]).unwrap();

        let active: Vec<i64> = store
            .active_cities()
            .unwrap()
            .into_iter()
            .map(|c| c.city_id)
            .collect();
        assert_eq!(active, vec![1]);
    }
}
