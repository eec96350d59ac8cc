use chrono::Utc;
use heatwave::{
    env_lookup, init_logging, log_app_finish, log_app_start, logging_config_from_env,
    materialize_predictions, DirectoryArtifacts, MaterializeConfig, MaterializeStatus,
    ModelConfig, Store, StoreConfig,
};

const APP: &str = "heatwave_predict";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start(APP, &logging_cfg);

    let store_cfg = StoreConfig::from_lookup(env_lookup)?;
    let model_cfg = ModelConfig::from_lookup(env_lookup)?;
    let mut store = Store::open(&store_cfg.db_path, store_cfg.busy_timeout())?;

    let artifacts = DirectoryArtifacts::new(&model_cfg.model_dir);
    let cfg = MaterializeConfig {
        horizons: model_cfg.horizons.clone(),
        last_per_city: model_cfg.last_per_city,
    };

    let report = materialize_predictions(&mut store, &artifacts, &cfg, Utc::now().naive_utc())?;
    let summary = match report.status {
        MaterializeStatus::Saved => format!("saved {} predictions", report.total_saved),
        MaterializeStatus::NoModelsAvailable => "no predictions saved (no models)".to_string(),
        MaterializeStatus::NoFeatureRows => "no feature rows to score".to_string(),
    };
    log_app_finish(APP, &summary);
    Ok(())
}
