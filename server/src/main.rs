use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use papertrans::{JobController, ServiceConfig};
use papertrans_server::{build_router, AppState};

const DEFAULT_LOG_FILTER: &str = "papertrans=info,papertrans_server=info,tower_http=info";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    init_tracing();

    // --- Configuration ---
    let config = ServiceConfig::from_env()?;
    tracing::info!(
        host = %config.host,
        port = config.port,
        data_dir = %config.data_dir.display(),
        queue_capacity = config.queue_capacity,
        engine = %config.engine.program,
        "Loaded service configuration"
    );
    if config.engine.credentials.api_key.is_none() {
        tracing::warn!("OPENAI_API_KEY is not set; jobs must supply their own API key");
    }

    // --- Job service ---
    let controller = Arc::new(JobController::open(&config)?);
    let report = controller.recover()?;
    tracing::info!(
        requeued = report.requeued.len(),
        deferred = report.deferred.len(),
        interrupted = report.interrupted.len(),
        "Startup recovery finished"
    );

    // --- Router ---
    let app = build_router(AppState::new(
        Arc::clone(&controller),
        config.max_upload_bytes,
    ));

    // --- Start server ---
    let addr = SocketAddr::new(config.host.parse()?, config.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Starting server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, waiting for the running job");
    controller.shutdown().await;
    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// `RUST_LOG` filter (with a default), human-readable output unless
/// `LOG_FORMAT=json`.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
