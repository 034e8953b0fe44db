// Worker identity and the heartbeat discipline

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use promptq_store::Store;
use tokio::sync::watch;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Allocate this process's registry key: `worker:<ns-since-epoch>`.
pub fn allocate_worker_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("worker:{}", nanos)
}

/// Refresh the worker's liveness TTL every 15s until shutdown.
///
/// A failed heartbeat ends the loop: the key will expire within 30s and the
/// reconciler will re-route whatever this worker left behind.
pub async fn heartbeat_loop(store: Store, worker_id: String, mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if let Err(e) = store.heartbeat(&worker_id).await {
            tracing::warn!(worker_id = %worker_id, error = %e, "Heartbeat failed");
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(HEARTBEAT_INTERVAL) => {}
            _ = shutdown.changed() => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_ids_are_distinct_and_prefixed() {
        let a = allocate_worker_id();
        std::thread::sleep(Duration::from_millis(1));
        let b = allocate_worker_id();
        assert!(a.starts_with("worker:"));
        assert_ne!(a, b);
    }
}
