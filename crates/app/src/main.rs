//! Quoting service entry point.

use app::{Application, Config, telemetry};
use tokio::signal;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), app::AppError> {
    // 1. Load configuration and initialize tracing
    let config = Config::from_env();
    telemetry::init_tracing(&config)?;

    // 2. Install the Prometheus exporter if an address is configured
    telemetry::init_metrics(&config)?;

    // 3. Open the event store and wire the buses
    let application = Application::build(config).await?;

    // 4. Serve until asked to stop
    shutdown_signal().await;
    application.shutdown();

    tracing::info!("quoting core shut down gracefully");
    Ok(())
}
