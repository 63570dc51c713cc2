use std::future::IntoFuture;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use playground_server::{
    AppState, Config, MonotonicClock, build_pipeline, build_router, metrics, telemetry, utils,
};

#[tokio::main]
async fn main() -> ExitCode {
    // Logging is configured from the loaded config, so a config error is
    // reported through a default subscriber
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            telemetry::init_tracing(&Config::default());
            error!("Configuration error: {e}");
            return ExitCode::from(exitcode::CONFIG as u8);
        }
    };
    telemetry::init_tracing(&config);

    info!(
        "Starting Playground Server v{}",
        env!("CARGO_PKG_VERSION")
    );

    match run(config).await {
        Ok(()) => ExitCode::from(exitcode::OK as u8),
        Err(exit_code) => ExitCode::from(exit_code as u8),
    }
}

/// Run the application, returning an exit code on error.
async fn run(config: Config) -> Result<(), exitcode::ExitCode> {
    info!(
        host = %config.host,
        port = %config.port,
        rate_limit_enabled = config.rate_limit_enabled,
        log_level = %config.log_level,
        log_json = config.log_json,
        "Configuration loaded"
    );

    if let Some(metrics_addr) = config.metrics_addr() {
        metrics::try_init_metrics(metrics_addr);
    }

    // Build application state and pipeline
    let state = AppState::new(config.clone());
    let pipeline = build_pipeline(
        &config,
        build_router(state.clone()),
        Arc::new(MonotonicClock),
    )
    .map_err(|e| {
        error!("Failed to build pipeline: {e}");
        exitcode::CONFIG
    })?;

    if let Some(registry) = &pipeline.registry {
        state.spawn_sweeper(registry);
    }

    // Start server
    let addr: SocketAddr = config.server_addr().parse().map_err(|e| {
        error!("Invalid server address: {e}");
        exitcode::CONFIG
    })?;
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind to {addr}: {e}");
        exitcode::UNAVAILABLE
    })?;

    info!("Server listening on http://{addr}");
    info!("API endpoints:");
    info!("  GET  /api/v1/add?a=&b=       - Addition (also /add)");
    info!("  GET  /api/v1/subtract?a=&b=  - Subtraction (also /subtract)");
    info!("  GET  /api/v1/multiply?a=&b=  - Multiplication (also /multiply)");
    info!("  GET  /api/v1/divide?a=&b=    - Division (also /divide)");
    info!("  GET  /api/v1/history?limit=  - Recorded calculations (also /history)");
    info!("  GET  /healthz                - Liveness probe");

    // Start server with graceful shutdown, bounded by SHUTDOWN_TIMEOUT_SECS
    let shutdown = CancellationToken::new();
    let app = pipeline
        .into_router()
        .into_make_service_with_connect_info::<SocketAddr>();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(utils::shutdown_signal(shutdown.clone()))
        .into_future();

    tokio::select! {
        result = server => {
            result.map_err(|e| {
                error!("Server error: {e}");
                exitcode::SOFTWARE
            })?;
        }
        () = utils::grace_period_elapsed(shutdown, config.shutdown_timeout) => {
            warn!(
                timeout_secs = config.shutdown_timeout.as_secs(),
                "In-flight requests did not finish in time, stopping server"
            );
        }
    }

    // Drain recordings, close the sink, stop background tasks
    info!("HTTP server stopped, shutting down...");
    state.shutdown().await;

    info!("Server shutdown complete");
    Ok(())
}
