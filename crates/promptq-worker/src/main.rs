use anyhow::{Context, Result};
use promptq_core::config::{config_path, WorkerSettings};
use promptq_core::{build_registry, verify_handlers};
use promptq_store::Store;
use promptq_worker::{allocate_worker_id, heartbeat_loop, Dispatcher};
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Outstanding background tasks get this long to wind down after the
/// dispatch loop ends.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "promptq_worker=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("promptq-worker starting...");

    let settings = WorkerSettings::load(config_path()).context("Failed to load config")?;
    let store = Store::connect(&settings.redis_url())
        .await
        .context("Failed to connect to store")?;
    tracing::info!("Store connection established");

    // Only handlers that answer the probe are advertised; a worker with
    // nothing to advertise is misconfigured and must not register
    let registry = build_registry(&settings.handlers);
    let verified = verify_handlers(registry).await;
    if verified.is_empty() {
        anyhow::bail!("No available task handlers");
    }
    tracing::info!(handlers = ?verified.handler_ids(), "Available worker handlers");

    let worker_id = allocate_worker_id();
    store
        .register_worker(&worker_id, &verified.configs())
        .await
        .context("Failed to register worker")?;
    tracing::info!(worker_id = %worker_id, "Handlers successfully stored");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let heartbeat = tokio::spawn(heartbeat_loop(
        store.clone(),
        worker_id.clone(),
        shutdown_rx.clone(),
    ));

    Dispatcher::new(
        store.clone(),
        verified,
        settings.max_retries,
        shutdown_rx,
    )
    .run()
    .await;

    if tokio::time::timeout(SHUTDOWN_GRACE, heartbeat).await.is_err() {
        tracing::warn!("Some tasks did not finish gracefully");
    }
    if let Err(e) = store.deregister_worker(&worker_id).await {
        tracing::error!(error = %e, "Cleanup error");
    }
    tracing::info!("Worker shutdown completed");

    Ok(())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
