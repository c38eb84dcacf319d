//! Fleet controller daemon entrypoint.

use mimalloc::MiMalloc;
use tokio::signal;

use fleet::config::Config;
use fleet::controller::FleetController;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;
    config.validate()?;

    tracing::info!(
        catalog = %config.catalog_path.display(),
        providers = ?config.providers,
        sync_interval_secs = config.sync_interval.as_secs(),
        "fleetd starting"
    );

    let controller = FleetController::from_config(&config).await?;

    // One reconciliation, print the fleet, exit.
    if std::env::args().any(|arg| arg == "--once") {
        controller.sync_now().await?;
        println!("{}", serde_json::to_string_pretty(&controller.status())?);
        controller.shutdown();
        return Ok(());
    }

    let sync = controller.spawn();

    shutdown_signal().await;
    controller.shutdown();
    if let Err(e) = sync.await {
        tracing::error!("sync loop ended abnormally: {}", e);
    }

    tracing::info!("fleetd shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
