//! Scores the latest feature rows per city with the stored per-horizon models
//! and upserts the results into `weather_predictions`.

use chrono::{NaiveDateTime, SubsecRound};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::features::{recent_inference_rows_from_store, FeatureError, FeatureRow};
use crate::model::{ArtifactSource, LoadedModel, ModelError};
use crate::store::{PersistenceError, Prediction, Store};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializeConfig {
    pub horizons: Vec<u32>,
    pub last_per_city: u32,
}

impl Default for MaterializeConfig {
    fn default() -> Self {
        Self {
            horizons: vec![3, 6],
            last_per_city: 12,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    Missing,
    Incompatible(String),
    Unreadable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum HorizonOutcome {
    Saved {
        model_name: String,
        rows: usize,
        null_predictions: usize,
    },
    Skipped {
        reason: SkipReason,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterializeStatus {
    Saved,
    NoModelsAvailable,
    NoFeatureRows,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterializeReport {
    pub status: MaterializeStatus,
    pub feature_rows: usize,
    pub horizons: Vec<(u32, HorizonOutcome)>,
    pub total_saved: usize,
}

#[derive(Debug, Error)]
pub enum MaterializeError {
    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),
    #[error("feature error: {0}")]
    Feature(#[from] FeatureError),
}

/// Runs one materialization pass. A horizon whose model is missing or
/// unusable is skipped; storage failures abort the run. Predictions are
/// keyed by `(city, ts_utc, horizon, model)`, so a rerun overwrites.
pub fn materialize_predictions(
    store: &mut Store,
    artifacts: &dyn ArtifactSource,
    cfg: &MaterializeConfig,
    now: NaiveDateTime,
) -> Result<MaterializeReport, MaterializeError> {
    let (rows, _) = recent_inference_rows_from_store(store, cfg.last_per_city)?;
    if rows.is_empty() {
        warn!(
            component = "materialize",
            event = "materialize.no_feature_rows",
            last_per_city = cfg.last_per_city
        );
        return Ok(MaterializeReport {
            status: MaterializeStatus::NoFeatureRows,
            feature_rows: 0,
            horizons: Vec::new(),
            total_saved: 0,
        });
    }

    let created_at = now.trunc_subsecs(0);
    let mut horizons = Vec::with_capacity(cfg.horizons.len());
    let mut total_saved = 0;

    for &horizon_h in &cfg.horizons {
        let loaded = match load_model(artifacts, horizon_h) {
            Ok(loaded) => loaded,
            Err(reason) => {
                warn!(
                    component = "materialize",
                    event = "materialize.horizon.skipped",
                    horizon_h,
                    reason = ?reason
                );
                horizons.push((horizon_h, HorizonOutcome::Skipped { reason }));
                continue;
            }
        };

        let predictions = score_rows(&rows, horizon_h, &loaded, created_at);
        let null_predictions = predictions
            .iter()
            .filter(|p| p.pred_temp_c.is_none())
            .count();
        store.upsert(&predictions)?;

        info!(
            component = "materialize",
            event = "materialize.horizon.saved",
            horizon_h,
            model_name = %loaded.model_name,
            rows = predictions.len(),
            null_predictions
        );
        total_saved += predictions.len();
        horizons.push((
            horizon_h,
            HorizonOutcome::Saved {
                model_name: loaded.model_name,
                rows: predictions.len(),
                null_predictions,
            },
        ));
    }

    let any_saved = horizons
        .iter()
        .any(|(_, outcome)| matches!(outcome, HorizonOutcome::Saved { .. }));
    let status = if any_saved {
        MaterializeStatus::Saved
    } else {
        MaterializeStatus::NoModelsAvailable
    };

    info!(
        component = "materialize",
        event = "materialize.finish",
        status = ?status,
        feature_rows = rows.len(),
        total_saved
    );

    Ok(MaterializeReport {
        status,
        feature_rows: rows.len(),
        horizons,
        total_saved,
    })
}

fn load_model(artifacts: &dyn ArtifactSource, horizon_h: u32) -> Result<LoadedModel, SkipReason> {
    match artifacts.load(horizon_h) {
        Ok(Some(loaded)) => Ok(loaded),
        Ok(None) => Err(SkipReason::Missing),
        Err(err @ (ModelError::Incompatible { .. } | ModelError::FeatureLength { .. })) => {
            Err(SkipReason::Incompatible(err.to_string()))
        }
        Err(err) => Err(SkipReason::Unreadable(err.to_string())),
    }
}

fn score_rows(
    rows: &[FeatureRow],
    horizon_h: u32,
    loaded: &LoadedModel,
    created_at: NaiveDateTime,
) -> Vec<Prediction> {
    rows.iter()
        .map(|row| {
            let pred_temp_c = match loaded.regressor.predict(&row.values) {
                Ok(value) if value.is_finite() => Some(value),
                Ok(_) => None,
                Err(err) => {
                    warn!(
                        component = "materialize",
                        event = "materialize.row.unscored",
                        city_id = row.city_id,
                        ts_utc = %row.ts_utc,
                        horizon_h,
                        error = %err
                    );
                    None
                }
            };
            Prediction {
                city_id: row.city_id,
                ts_utc: row.ts_utc,
                horizon_h,
                pred_temp_c,
                model_name: loaded.model_name.clone(),
                created_at,
            }
        })
        .collect()
}
