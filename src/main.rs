use std::net::SocketAddr;
use std::process::ExitCode;

use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use mailer_guard::config::LogFormat;
use mailer_guard::{AppState, Config, build_router, connect_store, metrics, utils};

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::from_env();

    // Logging comes up before the config error is reported so it gets logged
    let (log_format, log_level) = match &config {
        Ok(config) => (config.log_format, config.log_level.as_str()),
        Err(_) => (LogFormat::Text, "info"),
    };
    init_tracing(log_format, log_level);

    info!("Starting mailer_guard v{}", env!("CARGO_PKG_VERSION"));

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {e}");
            return ExitCode::from(exitcode::CONFIG as u8);
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::from(exitcode::OK as u8),
        Err(exit_code) => ExitCode::from(exit_code as u8),
    }
}

fn init_tracing(format: LogFormat, default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

/// Run the application, returning an exit code on error.
async fn run(config: Config) -> Result<(), exitcode::ExitCode> {
    info!(
        host = %config.host,
        port = %config.port,
        store = %config.store_backend,
        rate_limit_max_tokens = config.rate_limit_max_tokens,
        admin_enabled = config.admin_enabled(),
        "Configuration loaded"
    );

    if let Some(metrics_addr) = config.metrics_addr() {
        metrics::try_init_metrics(metrics_addr);
    }

    info!("Connecting to coordination store...");
    let store = connect_store(&config).await.map_err(|e| {
        error!("Failed to connect to coordination store: {e}");
        exitcode::UNAVAILABLE
    })?;

    let addr: SocketAddr = config.server_addr().parse().map_err(|e| {
        error!("Invalid server address: {e}");
        exitcode::CONFIG
    })?;
    let admin_enabled = config.admin_enabled();

    let state = AppState::new(store, config).map_err(|e| {
        error!("Failed to build application state: {e}");
        exitcode::CONFIG
    })?;
    let app = build_router(state.clone());

    let listener = TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind to {addr}: {e}");
        exitcode::UNAVAILABLE
    })?;

    info!("Server listening on http://{addr}");
    info!("API endpoints:");
    info!("  GET    /health                                   - Health check");
    info!("  GET    /ready                                    - Readiness check");
    info!("  POST   /v1/emails                                - Send an email");
    if admin_enabled {
        info!("  GET    /admin/rate-limits/{{identifier}}           - Bucket state");
        info!("  DELETE /admin/rate-limits/{{identifier}}           - Reset bucket");
        info!("  GET    /admin/idempotency/{{workspace}}/{{key}}      - Stored result");
        info!("  DELETE /admin/idempotency/{{workspace}}/{{key}}      - Drop lock and result");
        info!("  DELETE /admin/idempotency/{{workspace}}/{{key}}/lock - Release lock");
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(utils::shutdown_signal())
        .await
        .map_err(|e| {
            error!("Server error: {e}");
            exitcode::SOFTWARE
        })?;

    info!("HTTP server stopped, shutting down background tasks...");
    state.shutdown().await;

    info!("Server shutdown complete");
    Ok(())
}
