// Worker registry: heartbeat-scoped worker keys and the aggregate
// handler-availability map derived from them

use std::collections::HashMap;

use promptq_core::HandlerConfig;
use redis::AsyncCommands;

use crate::client::{keys, Store, StoreError, WORKER_TTL_SECS};

impl Store {
    /// Register a worker: publish the merged handler configs, write the
    /// worker's advertised handler ids under its TTL-scoped key, and append
    /// it to the known-workers list - all in one pipeline.
    pub async fn register_worker(
        &self,
        worker_id: &str,
        configs: &[HandlerConfig],
    ) -> Result<(), StoreError> {
        let mut conn = self.conn();

        let handler_ids: Vec<String> = configs.iter().map(|c| c.handler_id()).collect();
        let merged = self.merged_handlers_configs(configs).await?;

        redis::pipe()
            .atomic()
            .set(keys::HANDLERS_CONFIGS, serde_json::to_string(&merged)?)
            .set_ex(
                worker_id,
                serde_json::to_string(&handler_ids)?,
                WORKER_TTL_SECS,
            )
            .lpush(keys::WORKERS, worker_id)
            .query_async::<_, ()>(&mut conn)
            .await?;

        Ok(())
    }

    /// Merge-union: configs already in the store win, locally known handlers
    /// missing from the store are added.
    async fn merged_handlers_configs(
        &self,
        local: &[HandlerConfig],
    ) -> Result<HashMap<String, HandlerConfig>, StoreError> {
        let mut merged = self.read_handlers_configs().await?;
        for config in local {
            merged
                .entry(config.handler_id())
                .or_insert_with(|| config.clone());
        }
        Ok(merged)
    }

    /// Published handler configs; an absent or corrupt map reads as empty.
    pub async fn read_handlers_configs(
        &self,
    ) -> Result<HashMap<String, HandlerConfig>, StoreError> {
        let mut conn = self.conn();
        let raw: Option<String> = conn.get(keys::HANDLERS_CONFIGS).await?;
        let Some(raw) = raw else {
            return Ok(HashMap::new());
        };
        match serde_json::from_str(&raw) {
            Ok(configs) => Ok(configs),
            Err(e) => {
                tracing::warn!(error = %e, "Stored handler configs are invalid, ignoring");
                Ok(HashMap::new())
            }
        }
    }

    /// Refresh the worker's liveness window.
    pub async fn heartbeat(&self, worker_id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn();
        conn.expire::<_, ()>(worker_id, WORKER_TTL_SECS as i64)
            .await?;
        Ok(())
    }

    /// Graceful shutdown: drop the worker key so its handlers disappear from
    /// the aggregate without waiting for the TTL.
    pub async fn deregister_worker(&self, worker_id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn();
        conn.del::<_, ()>(worker_id).await?;
        Ok(())
    }

    /// Aggregate `handler_id -> live worker count` over all workers whose
    /// key still exists. Expired workers read as empty handler lists.
    pub async fn aggregate_available_handlers(
        &self,
    ) -> Result<HashMap<String, u32>, StoreError> {
        let mut conn = self.conn();
        let worker_ids: Vec<String> = conn.lrange(keys::WORKERS, 0, -1).await?;

        let mut counts: HashMap<String, u32> = HashMap::new();
        for worker_id in worker_ids {
            let raw: Option<String> = conn.get(&worker_id).await?;
            let handler_ids: Vec<String> = raw
                .and_then(|raw| serde_json::from_str(&raw).ok())
                .unwrap_or_default();
            for handler_id in handler_ids {
                *counts.entry(handler_id).or_insert(0) += 1;
            }
        }

        Ok(counts)
    }

    /// Publish the aggregate snapshot for other processes to read.
    pub async fn publish_available_handlers(
        &self,
        available: &HashMap<String, u32>,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn();
        conn.set::<_, _, ()>(keys::AVAILABLE_HANDLERS, serde_json::to_string(available)?)
            .await?;
        Ok(())
    }

    /// API shutdown teardown: no reconciler, no published snapshot.
    pub async fn clear_available_handlers(&self) -> Result<(), StoreError> {
        let mut conn = self.conn();
        conn.del::<_, ()>(keys::AVAILABLE_HANDLERS).await?;
        Ok(())
    }
}
