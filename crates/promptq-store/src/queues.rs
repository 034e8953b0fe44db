// Queue manager: pipelined placement primitives
//
// Each primitive is one atomic pipeline. Ordering inside a pipeline is chosen
// so a task id always lands in its destination before (or in the same EXEC
// as) it leaves its source - a task in two lists is recoverable, a task in
// zero lists is lost.

use promptq_core::Task;
use redis::AsyncCommands;

use crate::client::{keys, Store, StoreError, LIVE_TTL_SECS, TERMINAL_TTL_SECS};

/// Claim poll interval; also the worker's floor between empty polls.
const CLAIM_TIMEOUT_SECS: usize = 1;

impl Store {
    /// Place a new task into the global ready queue and its handler shard.
    pub async fn enqueue_ready(&self, task: &Task) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let payload = serde_json::to_string(task)?;
        redis::pipe()
            .atomic()
            .set_ex(keys::task(&task.task_id), payload, LIVE_TTL_SECS)
            .lpush(keys::TASK_QUEUE, &task.task_id)
            .lpush(keys::ready_shard(&task.handler_id), &task.task_id)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    /// Place a new task into the pending queues (no live handler yet).
    pub async fn enqueue_pending(&self, task: &Task) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let payload = serde_json::to_string(task)?;
        redis::pipe()
            .atomic()
            .set_ex(keys::task(&task.task_id), payload, LIVE_TTL_SECS)
            .lpush(keys::PENDING_TASK_QUEUE, &task.task_id)
            .lpush(keys::pending_shard(&task.handler_id), &task.task_id)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    /// Length of the global ready queue, observed at enqueue time for the
    /// advisory `start_position`.
    pub async fn ready_len(&self) -> Result<i64, StoreError> {
        let mut conn = self.conn();
        Ok(conn.llen(keys::TASK_QUEUE).await?)
    }

    /// Block-pop the next task id from any of the given ready shards and
    /// move it to the processing queue. Returns `None` on timeout.
    pub async fn claim(&self, shard_keys: &[String]) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn();

        let popped: Option<(String, String)> = redis::cmd("BRPOP")
            .arg(shard_keys)
            .arg(CLAIM_TIMEOUT_SECS)
            .query_async(&mut conn)
            .await?;

        let Some((source_queue, task_id)) = popped else {
            return Ok(None);
        };
        tracing::info!(task_id = %task_id, queue = %source_queue, "Received task");

        redis::pipe()
            .atomic()
            .lrem(keys::TASK_QUEUE, 0, &task_id)
            .lpush(keys::PROCESSING_QUEUE, &task_id)
            .query_async::<_, ()>(&mut conn)
            .await?;

        Ok(Some(task_id))
    }

    /// Persist a finished task and release its processing slot.
    pub async fn complete(&self, task: &Task) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let payload = serde_json::to_string(task)?;
        redis::pipe()
            .atomic()
            .set_ex(keys::task(&task.task_id), payload, TERMINAL_TTL_SECS)
            .lrem(keys::PROCESSING_QUEUE, 1, &task.task_id)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    /// Terminal failure: release the processing slot and park the id in
    /// dead letters for the janitor.
    pub async fn fail_terminal(&self, task: &Task) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let payload = serde_json::to_string(task)?;
        redis::pipe()
            .atomic()
            .lrem(keys::PROCESSING_QUEUE, 1, &task.task_id)
            .rpush(keys::DEAD_LETTERS, &task.task_id)
            .set_ex(keys::task(&task.task_id), payload, TERMINAL_TTL_SECS)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    /// Re-enqueue after a transient handler failure. The global queue gets
    /// the id at the head (RPUSH: the head is on the right) so the retry
    /// does not wait behind the whole backlog.
    pub async fn retry(&self, task: &Task) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let payload = serde_json::to_string(task)?;
        redis::pipe()
            .atomic()
            .lrem(keys::PROCESSING_QUEUE, 1, &task.task_id)
            .rpush(keys::TASK_QUEUE, &task.task_id)
            .lpush(keys::ready_shard(&task.handler_id), &task.task_id)
            .set_ex(keys::task(&task.task_id), payload, TERMINAL_TTL_SECS)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    /// Recompute a task's 1-based position in the global ready queue and
    /// write it onto the record (refreshing the live TTL).
    ///
    /// Absent from the ready queue: -1 if parked in pending, else 0. The
    /// position can only shrink while the task stays in the queue.
    pub async fn update_position(&self, task_id: &str) -> Result<i64, StoreError> {
        let mut conn = self.conn();

        // Head is on the right, so reverse before indexing
        let queued: Vec<String> = conn.lrange(keys::TASK_QUEUE, 0, -1).await?;
        let position = match queued.iter().rev().position(|id| id == task_id) {
            Some(idx) => idx as i64 + 1,
            None => {
                let pending: Vec<String> = conn.lrange(keys::PENDING_TASK_QUEUE, 0, -1).await?;
                if pending.iter().any(|id| id == task_id) {
                    -1
                } else {
                    0
                }
            }
        };

        if let Some(mut task) = self.get_task(task_id).await? {
            task.current_position = position;
            self.put_task(&task, LIVE_TTL_SECS).await?;
        }

        Ok(position)
    }
}
