use chrono::{NaiveDate, NaiveDateTime};
use heatwave::{
    BatchMerge, City, CurrentObservation, ForecastPoint, PersistenceError, Prediction, Store,
    UpsertRow, WEATHER_CURRENT,
};
use rusqlite::types::Value;

fn at(h: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 7, 1)
        .unwrap()
        .and_hms_opt(h, 0, 0)
        .unwrap()
}

fn city(city_id: i64, name: &str) -> City {
    City {
        city_id,
        name: name.to_string(),
        country: Some("PL".to_string()),
        lat: 52.0,
        lon: 21.0,
        is_active: true,
    }
}

fn observation(city_id: i64, h: u32, temp_c: f64) -> CurrentObservation {
    CurrentObservation {
        city_id,
        ts_utc: at(h),
        temp_c,
        feels_like_c: None,
        humidity_pct: Some(70.0),
        pressure_hpa: Some(1013.0),
        wind_speed_ms: Some(2.0),
        wind_deg: None,
        clouds_pct: Some(20.0),
        weather_main: Some("Clear".to_string()),
        weather_desc: None,
    }
}

fn forecast(city_id: i64, h: u32, temp_c: f64) -> ForecastPoint {
    ForecastPoint {
        city_id,
        ts_forecast_utc: at(h),
        temp_c,
        temp_min_c: None,
        temp_max_c: None,
        humidity_pct: None,
        pressure_hpa: None,
        wind_speed_ms: None,
        wind_deg: None,
        clouds_pct: None,
        weather_main: None,
        weather_desc: None,
    }
}

fn seeded_store() -> Store {
    let mut store = Store::open_in_memory().unwrap();
    store
        .upsert(&[city(1, "Warszawa"), city(2, "Kraków")])
        .unwrap();
    store
}

#[test]
fn reingesting_the_same_batch_keeps_row_count() {
    let mut store = seeded_store();
    let batch = vec![
        observation(1, 10, 20.0),
        observation(1, 11, 21.0),
        observation(2, 10, 18.0),
    ];

    let first = store.upsert(&batch).unwrap();
    let second = store.upsert(&batch).unwrap();

    assert_eq!(first.inserted, 3);
    assert_eq!(first.updated, 0);
    assert_eq!(second.inserted, 0);
    assert_eq!(second.updated, 3);
    assert_eq!(store.count_rows("weather_current").unwrap(), 3);
}

#[test]
fn existing_key_takes_non_key_values_from_the_batch() {
    let mut store = seeded_store();
    store.upsert(&[forecast(1, 12, 20.0)]).unwrap();

    let mut revised = forecast(1, 12, 22.0);
    revised.weather_desc = Some("clear sky".to_string());
    let report = store.upsert(&[revised, forecast(1, 15, 24.0)]).unwrap();

    assert_eq!(report.inserted, 1);
    assert_eq!(report.updated, 1);
    let rows = store.load_forecasts().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].temp_c, 22.0);
    assert_eq!(rows[0].weather_desc.as_deref(), Some("clear sky"));
    assert_eq!(rows[1].ts_forecast_utc, at(15));
}

#[test]
fn unknown_city_rolls_back_the_whole_batch() {
    let mut store = seeded_store();
    let err = store
        .upsert(&[observation(1, 10, 20.0), observation(99, 10, 5.0)])
        .unwrap_err();

    assert!(matches!(err, PersistenceError::MergeFailed { table: "weather_current", .. }));
    assert_eq!(store.count_rows("weather_current").unwrap(), 0);

    // The store stays usable after the rollback.
    store.upsert(&[observation(1, 10, 20.0)]).unwrap();
    assert_eq!(store.count_rows("weather_current").unwrap(), 1);
}

#[test]
fn predictions_differing_in_any_key_column_are_distinct() {
    let mut store = seeded_store();
    let base = Prediction {
        city_id: 1,
        ts_utc: at(10),
        horizon_h: 3,
        pred_temp_c: Some(21.0),
        model_name: "linear_temp_3h_v1".to_string(),
        created_at: at(11),
    };
    let other_horizon = Prediction {
        horizon_h: 6,
        ..base.clone()
    };
    let other_model = Prediction {
        model_name: "linear_temp_3h_v2".to_string(),
        ..base.clone()
    };
    let other_ts = Prediction {
        ts_utc: at(9),
        ..base.clone()
    };

    let report = store
        .upsert(&[base.clone(), other_horizon, other_model, other_ts])
        .unwrap();
    assert_eq!(report.inserted, 4);

    let rerun = Prediction {
        pred_temp_c: None,
        created_at: at(12),
        ..base
    };
    store.upsert(&[rerun]).unwrap();
    assert_eq!(store.count_rows("weather_predictions").unwrap(), 4);
    let stored = store
        .find_prediction(1, at(10), 3, "linear_temp_3h_v1")
        .unwrap()
        .unwrap();
    assert_eq!(stored.pred_temp_c, None);
    assert_eq!(stored.created_at, at(12));
}

#[test]
fn empty_batch_is_a_no_op() {
    let mut store = seeded_store();
    let report = store.upsert::<CurrentObservation>(&[]).unwrap();
    assert_eq!(report.staged, 0);
    assert_eq!(report.inserted, 0);
    assert_eq!(store.count_rows("weather_current").unwrap(), 0);
}

#[test]
fn short_rows_are_rejected_before_any_write() {
    let mut store = seeded_store();
    let good = observation(1, 10, 20.0).to_values();
    let short = vec![Value::Integer(1)];

    let err = store
        .merge_batch(&WEATHER_CURRENT, &[good, short])
        .unwrap_err();
    assert!(matches!(
        err,
        PersistenceError::RowShape {
            row_index: 1,
            found: 1,
            ..
        }
    ));
    assert_eq!(store.count_rows("weather_current").unwrap(), 0);
}

#[test]
fn city_seed_runs_only_on_an_empty_table() {
    let dir = tempfile::tempdir().unwrap();
    let csv_path = dir.path().join("cities.csv");
    std::fs::write(
        &csv_path,
        "city_id,name,country,lat,lon,is_active\n1,Warszawa,PL,52.23,21.01,1\n2,Zakopane,PL,49.30,19.95,0\n",
    )
    .unwrap();

    let db_path = dir.path().join("db").join("heatwave.sqlite");
    let mut store = Store::open(&db_path, std::time::Duration::from_millis(1_000)).unwrap();
    assert_eq!(store.seed_cities_if_empty(&csv_path).unwrap(), 2);
    assert_eq!(store.seed_cities_if_empty(&csv_path).unwrap(), 0);

    let active = store.active_cities().unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].name, "Warszawa");
    drop(store);

    // Reopening an existing file keeps the data and the schema.
    let reopened = Store::open(&db_path, std::time::Duration::from_millis(1_000)).unwrap();
    assert_eq!(reopened.count_rows("cities").unwrap(), 2);
}
