use heatwave::{
    build_training_rows_from_store, env_lookup, init_logging, log_app_finish, log_app_start,
    logging_config_from_env, save_artifact, train_linear_model, FeatureBuildConfig, ModelConfig,
    ModelError, Store, StoreConfig, TrainingConfig,
};
use tracing::warn;

const APP: &str = "heatwave_train";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start(APP, &logging_cfg);

    let store_cfg = StoreConfig::from_lookup(env_lookup)?;
    let model_cfg = ModelConfig::from_lookup(env_lookup)?;
    let store = Store::open(&store_cfg.db_path, store_cfg.busy_timeout())?;

    let training_cfg = TrainingConfig {
        ridge_lambda: model_cfg.ridge_lambda,
        min_rows: model_cfg.min_training_rows,
        ..TrainingConfig::default()
    };

    let mut trained = Vec::new();
    for &horizon_h in &model_cfg.horizons {
        let feature_cfg = FeatureBuildConfig {
            horizon_h,
            max_match_delta: model_cfg.match_tolerance(),
        };
        let (rows, _) = build_training_rows_from_store(&store, &feature_cfg)?;

        match train_linear_model(&rows, horizon_h, &training_cfg) {
            Ok((model, metrics)) => {
                let path = save_artifact(&model_cfg.model_dir, &model, &metrics)?;
                trained.push(format!("+{horizon_h}h -> {}", path.display()));
            }
            Err(err @ ModelError::InsufficientData { .. }) => {
                warn!(
                    component = APP,
                    event = "train.horizon.skipped",
                    horizon_h,
                    error = %err
                );
            }
            Err(err) => return Err(err.into()),
        }
    }

    let summary = if trained.is_empty() {
        "no models trained".to_string()
    } else {
        trained.join(", ")
    };
    log_app_finish(APP, &summary);
    Ok(())
}
