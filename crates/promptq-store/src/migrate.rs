// Queue migration primitives, driven by reconciler diffs
//
// Every move is idempotent and safe to interrupt: BRPOPLPUSH parks the id in
// the destination shard before anything else happens, and the follow-up
// pipeline is a convergent rewrite. Running a migration twice with the same
// diff leaves the store in the same state as running it once.

use std::collections::HashSet;

use promptq_core::{Task, TaskStatus};
use redis::AsyncCommands;

use crate::client::{keys, Store, StoreError, LIVE_TTL_SECS};

const DRAIN_TIMEOUT_SECS: usize = 1;

impl Store {
    /// A handler disappeared: drain its ready shard into its pending shard,
    /// re-marking each task PENDING and removing it from the global ready
    /// queue.
    pub async fn drain_ready_shard(&self, handler_id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let source = keys::ready_shard(handler_id);
        let destination = keys::pending_shard(handler_id);

        loop {
            let task_id: Option<String> = redis::cmd("BRPOPLPUSH")
                .arg(&source)
                .arg(&destination)
                .arg(DRAIN_TIMEOUT_SECS)
                .query_async(&mut conn)
                .await?;
            let Some(task_id) = task_id else { break };

            let mut task = match self.get_task(&task_id).await {
                Ok(Some(task)) => task,
                Ok(None) => {
                    tracing::warn!(task_id = %task_id, "Unable to load task, record missing");
                    continue;
                }
                Err(StoreError::Validation(e)) => {
                    tracing::warn!(task_id = %task_id, error = %e, "Unable to load task");
                    continue;
                }
                Err(e) => return Err(e),
            };

            task.status = TaskStatus::Pending;
            task.current_position = -1;
            let payload = serde_json::to_string(&task)?;
            redis::pipe()
                .atomic()
                .lrem(keys::TASK_QUEUE, 0, &task_id)
                .lpush(keys::PENDING_TASK_QUEUE, &task_id)
                .set_ex(keys::task(&task_id), payload, LIVE_TTL_SECS)
                .query_async::<_, ()>(&mut conn)
                .await?;
            tracing::info!(task_id = %task_id, handler_id = %handler_id, "Task is pending now");
        }

        Ok(())
    }

    /// Rescue orphaned processing entries: any claimed-but-unresolved task
    /// whose handler just disappeared goes back to pending. Tasks of still
    /// live handlers are left alone - their worker will finish them.
    pub async fn repending_processing(
        &self,
        removed_handlers: &HashSet<String>,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let processing: Vec<String> = conn.lrange(keys::PROCESSING_QUEUE, 0, -1).await?;

        for task_id in processing {
            let mut task = match self.get_task(&task_id).await {
                Ok(Some(task)) => task,
                Ok(None) => {
                    tracing::warn!(task_id = %task_id, "Unable to load task, record missing");
                    continue;
                }
                Err(StoreError::Validation(e)) => {
                    tracing::warn!(task_id = %task_id, error = %e, "Unable to load task");
                    continue;
                }
                Err(e) => return Err(e),
            };
            if !removed_handlers.contains(&task.handler_id) {
                continue;
            }

            let handler_id = task.handler_id.clone();
            task.status = TaskStatus::Pending;
            task.current_position = -1;
            let payload = serde_json::to_string(&task)?;
            redis::pipe()
                .atomic()
                .lrem(keys::PROCESSING_QUEUE, 0, &task_id)
                .lpush(keys::PENDING_TASK_QUEUE, &task_id)
                .lpush(keys::pending_shard(&handler_id), &task_id)
                .set_ex(keys::task(&task_id), payload, LIVE_TTL_SECS)
                .query_async::<_, ()>(&mut conn)
                .await?;
            tracing::info!(
                task_id = %task_id,
                handler_id = %handler_id,
                "Task is pending now (was in processing)"
            );
        }

        Ok(())
    }

    /// A handler (re)appeared: move its parked tasks from the pending queues
    /// back into the ready queues. Original queue positions are not
    /// preserved.
    pub async fn recover_pending(
        &self,
        added_handlers: &HashSet<String>,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let pending: Vec<String> = conn.lrange(keys::PENDING_TASK_QUEUE, 0, -1).await?;

        for task_id in pending {
            let mut task = match self.get_task(&task_id).await {
                Ok(Some(task)) => task,
                Ok(None) => {
                    tracing::warn!(task_id = %task_id, "Unable to load task, record missing");
                    continue;
                }
                Err(StoreError::Validation(e)) => {
                    tracing::warn!(task_id = %task_id, error = %e, "Unable to load task");
                    continue;
                }
                Err(e) => return Err(e),
            };
            if !added_handlers.contains(&task.handler_id) {
                continue;
            }

            let handler_id = task.handler_id.clone();
            task.status = TaskStatus::Queued;
            let payload = serde_json::to_string(&task)?;
            redis::pipe()
                .atomic()
                .lrem(keys::PENDING_TASK_QUEUE, 0, &task_id)
                .lrem(keys::pending_shard(&handler_id), 0, &task_id)
                .lpush(keys::TASK_QUEUE, &task_id)
                .lpush(keys::ready_shard(&handler_id), &task_id)
                .set_ex(keys::task(&task_id), payload, LIVE_TTL_SECS)
                .query_async::<_, ()>(&mut conn)
                .await?;
            tracing::info!(task_id = %task_id, handler_id = %handler_id, "Task recovered");
        }

        Ok(())
    }
}
