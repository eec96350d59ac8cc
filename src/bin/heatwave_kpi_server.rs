use std::{net::SocketAddr, sync::Arc};

use heatwave::{
    env_lookup, init_logging, kpi_router, log_app_bind, log_app_start, logging_config_from_env,
    AlertThresholds, KpiSnapshotSource, Store, StoreConfig, StoreKpiSource,
};

const APP: &str = "heatwave_kpi_server";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start(APP, &logging_cfg);

    let addr: SocketAddr = env_lookup("HEATWAVE_KPI_ADDR")
        .unwrap_or_else(|| "127.0.0.1:8080".to_string())
        .parse()?;

    let store_cfg = StoreConfig::from_lookup(env_lookup)?;
    let thresholds = AlertThresholds::from_lookup(env_lookup)?;
    let store = Store::open(&store_cfg.db_path, store_cfg.busy_timeout())?;

    let source: Arc<dyn KpiSnapshotSource> = Arc::new(StoreKpiSource::new(store, thresholds));
    let app = kpi_router(source);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    log_app_bind(APP, bound_addr);
    axum::serve(listener, app).await?;

    Ok(())
}
