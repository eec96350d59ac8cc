use std::collections::HashMap;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use heatwave::{
    build_training_rows_from_store, materialize_predictions, save_artifact, train_linear_model,
    ArtifactSource, City, CurrentObservation, DirectoryArtifacts, FeatureBuildConfig,
    ForecastPoint, HorizonOutcome, LoadedModel, MaterializeConfig, MaterializeStatus, ModelError,
    Regressor, SkipReason, Store, TrainingConfig,
};

fn at(h: i64) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 7, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        + Duration::hours(h)
}

fn observation(city_id: i64, h: i64, temp_c: f64) -> CurrentObservation {
    CurrentObservation {
        city_id,
        ts_utc: at(h),
        temp_c,
        feels_like_c: None,
        humidity_pct: Some(60.0 + (h % 7) as f64),
        pressure_hpa: Some(1010.0 + (h % 5) as f64),
        wind_speed_ms: Some(2.0 + (h % 3) as f64),
        wind_deg: None,
        clouds_pct: Some((h % 11) as f64 * 9.0),
        weather_main: None,
        weather_desc: None,
    }
}

fn store_with_cities(ids: &[i64]) -> Store {
    let mut store = Store::open_in_memory().unwrap();
    let cities: Vec<City> = ids
        .iter()
        .map(|&city_id| City {
            city_id,
            name: format!("city-{city_id}"),
            country: None,
            lat: 50.0,
            lon: 20.0,
            is_active: true,
        })
        .collect();
    store.upsert(&cities).unwrap();
    store
}

struct Constant(f64);

impl Regressor for Constant {
    fn predict(&self, _features: &[f64]) -> Result<f64, ModelError> {
        Ok(self.0)
    }
}

/// Horizon -> constant output; horizons not listed are missing.
struct FixedArtifacts {
    outputs: HashMap<u32, f64>,
    broken: Vec<u32>,
}

impl ArtifactSource for FixedArtifacts {
    fn load(&self, horizon_h: u32) -> Result<Option<LoadedModel>, ModelError> {
        if self.broken.contains(&horizon_h) {
            return Err(ModelError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "truncated artifact",
            )));
        }
        Ok(self.outputs.get(&horizon_h).map(|&value| LoadedModel {
            model_name: format!("const_{horizon_h}h"),
            regressor: Box::new(Constant(value)),
        }))
    }
}

fn cfg(horizons: &[u32], last_per_city: u32) -> MaterializeConfig {
    MaterializeConfig {
        horizons: horizons.to_vec(),
        last_per_city,
    }
}

#[test]
fn latest_rows_per_city_are_scored_for_each_horizon() {
    let mut store = store_with_cities(&[1, 2]);
    let observations: Vec<_> = (0..5)
        .flat_map(|h| [observation(1, h, 20.0), observation(2, h, 10.0)])
        .collect();
    store.upsert(&observations).unwrap();

    let artifacts = FixedArtifacts {
        outputs: HashMap::from([(3, 21.5), (6, 23.0)]),
        broken: Vec::new(),
    };
    let report = materialize_predictions(&mut store, &artifacts, &cfg(&[3, 6], 3), at(10)).unwrap();

    assert_eq!(report.status, MaterializeStatus::Saved);
    assert_eq!(report.feature_rows, 6);
    assert_eq!(report.total_saved, 12);
    let stored = store.load_predictions().unwrap();
    assert_eq!(stored.len(), 12);
    assert!(stored.iter().all(|p| p.ts_utc >= at(2)));
    assert!(stored
        .iter()
        .filter(|p| p.horizon_h == 6)
        .all(|p| p.pred_temp_c == Some(23.0) && p.model_name == "const_6h"));
}

#[test]
fn rerun_overwrites_instead_of_duplicating() {
    let mut store = store_with_cities(&[1]);
    store.upsert(&[observation(1, 0, 20.0)]).unwrap();

    let first = FixedArtifacts {
        outputs: HashMap::from([(3, 21.0)]),
        broken: Vec::new(),
    };
    let second = FixedArtifacts {
        outputs: HashMap::from([(3, 25.0)]),
        broken: Vec::new(),
    };
    materialize_predictions(&mut store, &first, &cfg(&[3], 12), at(1)).unwrap();
    let first_stored = store.load_predictions().unwrap();
    assert_eq!(first_stored[0].created_at, at(1));

    let rerun_at = at(2) + Duration::milliseconds(750);
    materialize_predictions(&mut store, &second, &cfg(&[3], 12), rerun_at).unwrap();

    let stored = store.load_predictions().unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].pred_temp_c, Some(25.0));
    assert_eq!(stored[0].created_at, at(2));
}

#[test]
fn missing_and_unreadable_models_skip_only_their_horizon() {
    let mut store = store_with_cities(&[1]);
    store.upsert(&[observation(1, 0, 20.0)]).unwrap();

    let artifacts = FixedArtifacts {
        outputs: HashMap::from([(6, 22.0)]),
        broken: vec![12],
    };
    let report =
        materialize_predictions(&mut store, &artifacts, &cfg(&[3, 6, 12], 12), at(1)).unwrap();

    assert_eq!(report.status, MaterializeStatus::Saved);
    assert_eq!(
        report.horizons[0],
        (3, HorizonOutcome::Skipped { reason: SkipReason::Missing })
    );
    assert!(matches!(report.horizons[1].1, HorizonOutcome::Saved { rows: 1, .. }));
    assert!(matches!(
        report.horizons[2].1,
        HorizonOutcome::Skipped {
            reason: SkipReason::Unreadable(_)
        }
    ));
    assert_eq!(store.count_rows("weather_predictions").unwrap(), 1);
}

#[test]
fn no_models_is_reported_without_writes() {
    let mut store = store_with_cities(&[1]);
    store.upsert(&[observation(1, 0, 20.0)]).unwrap();

    let artifacts = FixedArtifacts {
        outputs: HashMap::new(),
        broken: Vec::new(),
    };
    let report = materialize_predictions(&mut store, &artifacts, &cfg(&[3, 6], 12), at(1)).unwrap();

    assert_eq!(report.status, MaterializeStatus::NoModelsAvailable);
    assert_eq!(report.total_saved, 0);
    assert_eq!(store.count_rows("weather_predictions").unwrap(), 0);
}

#[test]
fn empty_store_reports_no_feature_rows() {
    let mut store = store_with_cities(&[1]);
    let artifacts = FixedArtifacts {
        outputs: HashMap::from([(3, 1.0)]),
        broken: Vec::new(),
    };
    let report = materialize_predictions(&mut store, &artifacts, &cfg(&[3], 12), at(1)).unwrap();
    assert_eq!(report.status, MaterializeStatus::NoFeatureRows);
}

#[test]
fn non_finite_outputs_are_stored_as_null() {
    let mut store = store_with_cities(&[1]);
    store.upsert(&[observation(1, 0, 20.0)]).unwrap();

    let artifacts = FixedArtifacts {
        outputs: HashMap::from([(3, f64::NAN)]),
        broken: Vec::new(),
    };
    let report = materialize_predictions(&mut store, &artifacts, &cfg(&[3], 12), at(1)).unwrap();

    assert!(matches!(
        report.horizons[0].1,
        HorizonOutcome::Saved {
            null_predictions: 1,
            ..
        }
    ));
    assert_eq!(store.load_predictions().unwrap()[0].pred_temp_c, None);
}

#[test]
fn trained_artifacts_on_disk_drive_materialization() {
    let mut store = store_with_cities(&[1]);
    let observations: Vec<_> = (0..150)
        .map(|h| observation(1, h, 12.0 + ((h as f64) * 0.3).sin() * 6.0))
        .collect();
    let forecasts: Vec<ForecastPoint> = observations
        .iter()
        .map(|obs| ForecastPoint {
            city_id: 1,
            ts_forecast_utc: obs.ts_utc,
            temp_c: obs.temp_c + 0.5,
            temp_min_c: None,
            temp_max_c: None,
            humidity_pct: None,
            pressure_hpa: None,
            wind_speed_ms: None,
            wind_deg: None,
            clouds_pct: None,
            weather_main: None,
            weather_desc: None,
        })
        .collect();
    store.upsert(&observations).unwrap();
    store.upsert(&forecasts).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let (rows, _) = build_training_rows_from_store(&store, &FeatureBuildConfig::new(3)).unwrap();
    let (model, metrics) = train_linear_model(&rows, 3, &TrainingConfig::default()).unwrap();
    save_artifact(dir.path(), &model, &metrics).unwrap();

    let artifacts = DirectoryArtifacts::new(dir.path());
    let report = materialize_predictions(&mut store, &artifacts, &cfg(&[3, 6], 12), at(200)).unwrap();

    assert_eq!(report.status, MaterializeStatus::Saved);
    assert_eq!(report.total_saved, 12);
    assert_eq!(
        report.horizons[1],
        (6, HorizonOutcome::Skipped { reason: SkipReason::Missing })
    );
    let stored = store.load_predictions().unwrap();
    assert!(stored.iter().all(|p| p.model_name == "linear_temp_3h_v1"));
    assert!(stored.iter().all(|p| p.pred_temp_c.is_some()));
}
