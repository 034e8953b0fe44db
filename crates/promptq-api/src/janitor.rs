// Hourly dead-letter trim

use std::time::Duration;

use promptq_store::{Store, DLQ_TRIM_THRESHOLD};

const JANITOR_INTERVAL: Duration = Duration::from_secs(3600);

pub async fn run(store: Store) {
    loop {
        tokio::time::sleep(JANITOR_INTERVAL).await;
        tracing::info!("Cleaning up dead_letters...");
        match store.trim_dead_letters(DLQ_TRIM_THRESHOLD).await {
            Ok(0) => {}
            Ok(purged) => tracing::info!(purged, "Dead letters trimmed"),
            Err(e) => tracing::error!(error = %e, "Dead letter cleanup failed"),
        }
    }
}
