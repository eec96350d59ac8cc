//! Heatwave core crate.
//!
//! Weather ingest into SQLite with keyed upserts, nearest-time feature
//! building, per-horizon temperature models, prediction materialization and
//! KPI reconciliation against later observations.

mod config;
mod features;
mod kpi;
mod kpi_http;
mod materialize;
mod model;
mod normalize;
mod observability;
mod owm;
mod pipeline;
mod store;

pub use config::{
    env_lookup, AlertThresholds, ConfigError, ModelConfig, OwmConfig, StoreConfig,
    DEFAULT_OWM_BASE_URL, MAX_MATCH_TOLERANCE_HOURS,
};
pub use features::{
    assert_schema_compatible, build_feature_schema, build_inference_rows, build_training_rows,
    build_training_rows_from_store, cyclical_time_encoding, nearest_in_time,
    observation_features, recent_inference_rows_from_store, FeatureBuildConfig,
    FeatureBuildReport, FeatureColumn, FeatureDType, FeatureError, FeatureRow, FeatureSchema,
    FEATURE_SCHEMA_VERSION,
};
pub use kpi::{
    accuracy_by_city_horizon, alerts_by_day, kpi_report, kpi_report_from_store, reconcile,
    AccuracyKpi, Actual, AlertAggregate, KpiError, KpiReport, PredictionVsActual,
};
pub use kpi_http::{kpi_router, InMemoryKpiSource, KpiSnapshotSource, StoreKpiSource};
pub use materialize::{
    materialize_predictions, HorizonOutcome, MaterializeConfig, MaterializeError,
    MaterializeReport, MaterializeStatus, SkipReason,
};
pub use model::{
    artifact_path, load_artifact, metrics_path, model_name_for, save_artifact,
    train_linear_model, ArtifactSource, DirectoryArtifacts, LinearModel, LoadedModel, ModelError,
    Regressor, TrainingConfig, TrainingMetrics,
};
pub use normalize::{
    epoch_to_naive_utc, normalize_current, normalize_forecast, CurrentObservation,
    DataQualityError, ForecastPoint, NormalizedForecast, RejectedItem,
};
pub use observability::{
    init_logging, log_app_bind, log_app_finish, log_app_start, logging_config_from_env,
    logging_config_from_lookup, LogFormat, LoggingConfig, LoggingInitError,
};
pub use owm::{
    decode_response, CloudsBlock, ConditionBlock, CurrentResponse, Endpoint, ForecastItem,
    ForecastResponse, MainBlock, ReqwestWeatherFetcher, UpstreamError, WeatherFetcher, WindBlock,
};
pub use pipeline::{
    run_ingest, CityIngest, CityOutcome, IngestReport, IngestStatus, PipelineError,
};
pub use store::{
    ts_value, BatchMerge, City, MergeReport, PersistenceError, Prediction, Store, UpsertRow,
    UpsertTarget, CITIES, WEATHER_CURRENT, WEATHER_FORECAST, WEATHER_PREDICTIONS,
};
