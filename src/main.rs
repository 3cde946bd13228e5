use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::{net::SocketAddr, sync::Arc};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stroke_stabilizer::{control::ControlServer, router, AppConfig, AppState};

/// Set to `json` for machine-readable logs
const LOG_FORMAT_ENV: &str = "STABILIZER_LOG_FORMAT";

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("Starting stroke stabilizer server v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::from_env()?;
    info!(
        "Session defaults: R={} Q=({}, {}, {}) lookahead={}ms hysteresis=({}, {})",
        config.stabilizer.measurement_noise,
        config.stabilizer.noise_base,
        config.stabilizer.noise_gain,
        config.stabilizer.noise_cap,
        config.stabilizer.lookahead_secs * 1000.0,
        config.stabilizer.enter_threshold,
        config.stabilizer.exit_threshold,
    );

    let metrics = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("Prometheus exporter unavailable: {}", e);
            None
        }
    };

    let control_server = Arc::new(ControlServer::new(config.stabilizer.clone())?);
    let app = router(AppState {
        control_server,
        metrics,
    });

    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    info!("Server listening on {}", config.bind);
    info!("WebSocket: ws://{}/ws", config.bind);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "stroke_stabilizer=debug,tower_http=debug".into());

    let json = std::env::var(LOG_FORMAT_ENV)
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
