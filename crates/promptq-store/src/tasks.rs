// Task record storage: TTL-scoped JSON under task:{id}

use promptq_core::Task;
use redis::AsyncCommands;

use crate::client::{keys, Store, StoreError};

impl Store {
    /// Write (or rewrite) a task record with the given TTL.
    pub async fn put_task(&self, task: &Task, ttl_secs: u64) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let payload = serde_json::to_string(task)?;
        conn.set_ex::<_, _, ()>(keys::task(&task.task_id), payload, ttl_secs)
            .await?;
        Ok(())
    }

    /// Load a task record. `Ok(None)` when the key is gone (expired or
    /// deleted); `Err(Validation)` when the payload does not deserialize.
    pub async fn get_task(&self, task_id: &str) -> Result<Option<Task>, StoreError> {
        let mut conn = self.conn();
        let raw: Option<String> = conn.get(keys::task(task_id)).await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Like `get_task`, but a missing record is an error.
    pub async fn load_task(&self, task_id: &str) -> Result<Task, StoreError> {
        self.get_task(task_id)
            .await?
            .ok_or_else(|| StoreError::TaskNotFound(task_id.to_string()))
    }

    /// All live task records. One bad record must never break a listing, so
    /// entries that fail validation are logged and skipped.
    pub async fn scan_tasks(&self) -> Result<Vec<Task>, StoreError> {
        let mut conn = self.conn();
        let mut tasks = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let (next, task_keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg("task:*")
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;

            for key in task_keys {
                let raw: Option<String> = conn.get(&key).await?;
                let Some(raw) = raw else { continue };
                match serde_json::from_str::<Task>(&raw) {
                    Ok(task) => tasks.push(task),
                    Err(e) => {
                        tracing::warn!(key = %key, error = %e, "Unable to load task, skipping");
                    }
                }
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        Ok(tasks)
    }
}
