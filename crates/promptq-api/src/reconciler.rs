// Availability reconciler
//
// The singleton loop that keeps queue placement consistent with the set of
// live handlers. Each cycle aggregates the worker registry, diffs the handler
// key-set against the previous snapshot, migrates queues on any change, and
// publishes the new snapshot both in-process (watch channel, single owner -
// everyone else reads immutable copies) and to the store.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use promptq_core::HandlerConfig;
use promptq_store::{Store, StoreError};
use tokio::sync::watch;

const RECONCILE_INTERVAL: Duration = Duration::from_secs(10);

/// What the reconciler publishes: live worker counts per handler id, plus the
/// handler configs as stored by the workers.
#[derive(Debug, Clone, Default)]
pub struct HandlerSnapshot {
    pub available: HashMap<String, u32>,
    pub configs: HashMap<String, HandlerConfig>,
}

/// Key-set diff between two snapshots: (added, removed).
fn diff_handlers(
    previous: &HashSet<String>,
    current: &HashSet<String>,
) -> (HashSet<String>, HashSet<String>) {
    let added = current.difference(previous).cloned().collect();
    let removed = previous.difference(current).cloned().collect();
    (added, removed)
}

pub async fn run(store: Store, snapshot_tx: watch::Sender<HandlerSnapshot>) {
    loop {
        if let Err(e) = cycle(&store, &snapshot_tx).await {
            tracing::error!(error = %e, "Error during updating available handlers");
        }
        tokio::time::sleep(RECONCILE_INTERVAL).await;
    }
}

async fn cycle(
    store: &Store,
    snapshot_tx: &watch::Sender<HandlerSnapshot>,
) -> Result<(), StoreError> {
    let available = store.aggregate_available_handlers().await?;

    let (previous_ids, mut configs) = {
        let current = snapshot_tx.borrow();
        (
            current.available.keys().cloned().collect::<HashSet<_>>(),
            current.configs.clone(),
        )
    };
    let current_ids: HashSet<String> = available.keys().cloned().collect();
    let (added, removed) = diff_handlers(&previous_ids, &current_ids);

    if !added.is_empty() || !removed.is_empty() {
        tracing::debug!(available = ?available, "Handlers updated");
        if !added.is_empty() {
            tracing::debug!(added = ?added, "Handlers added");
        }
        if !removed.is_empty() {
            tracing::debug!(removed = ?removed, "Handlers removed");
        }

        migrate(store, &removed, &added).await?;
        configs = store.read_handlers_configs().await?;
    }

    snapshot_tx.send_replace(HandlerSnapshot {
        available: available.clone(),
        configs,
    });
    store.publish_available_handlers(&available).await?;

    Ok(())
}

/// The migration protocol. Idempotent and safe to interrupt: every primitive
/// is a convergent rewrite, so concurrent reconcilers (one per API instance)
/// cannot lose a task.
async fn migrate(
    store: &Store,
    removed: &HashSet<String>,
    added: &HashSet<String>,
) -> Result<(), StoreError> {
    if !removed.is_empty() {
        tracing::info!("Moving unactual tasks to pending queue...");
        for handler_id in removed {
            store.drain_ready_shard(handler_id).await?;
        }
        // claimed-but-unresolved tasks of dead workers; running handlers of
        // live workers are never preempted
        tracing::info!("Moving processing tasks to pending queue...");
        store.repending_processing(removed).await?;
    }

    if !added.is_empty() {
        tracing::info!("Pending tasks recovery...");
        store.recover_pending(added).await?;
    }

    tracing::info!("Queues update finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn diff_detects_added_and_removed() {
        let (added, removed) = diff_handlers(&set(&["echo:1", "rag:2"]), &set(&["echo:1", "sum:1"]));
        assert_eq!(added, set(&["sum:1"]));
        assert_eq!(removed, set(&["rag:2"]));
    }

    #[test]
    fn diff_is_empty_for_identical_sets() {
        let ids = set(&["echo:1"]);
        let (added, removed) = diff_handlers(&ids, &ids);
        assert!(added.is_empty());
        assert!(removed.is_empty());
    }

    #[test]
    fn count_changes_alone_do_not_diff() {
        // two workers for the same handler vs one: key-set is unchanged, so
        // no migration is triggered
        let (added, removed) = diff_handlers(&set(&["echo:1"]), &set(&["echo:1"]));
        assert!(added.is_empty() && removed.is_empty());
    }
}
