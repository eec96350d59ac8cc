use heatwave::{
    env_lookup, init_logging, log_app_finish, log_app_start, logging_config_from_env, run_ingest,
    IngestStatus, OwmConfig, ReqwestWeatherFetcher, Store, StoreConfig,
};

const APP: &str = "heatwave_ingest";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start(APP, &logging_cfg);

    let store_cfg = StoreConfig::from_lookup(env_lookup)?;
    let owm_cfg = OwmConfig::from_lookup(env_lookup)?;

    let mut store = Store::open(&store_cfg.db_path, store_cfg.busy_timeout())?;
    store.seed_cities_if_empty(&store_cfg.cities_seed_path)?;
    let fetcher = ReqwestWeatherFetcher::new(owm_cfg)?;

    let report = run_ingest(&mut store, &fetcher)?;
    let summary = match report.status {
        IngestStatus::NoActiveCities => "no active cities".to_string(),
        IngestStatus::Completed => format!(
            "{} cities, {} failed, {} current rows, {} forecast rows",
            report.cities.len(),
            report.failed_cities,
            report.current_rows,
            report.forecast_rows
        ),
    };
    log_app_finish(APP, &summary);
    Ok(())
}
