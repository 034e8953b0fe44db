// Dead-letter trimming
//
// Failures are cold data with a low retention bar: once the list outgrows the
// threshold the whole thing goes, records included. Cheaper than per-entry
// eviction and the 24h record TTL bounds the loss window anyway.

use redis::AsyncCommands;

use crate::client::{keys, Store, StoreError};

/// Trim once the dead-letter list outgrows this many entries.
pub const DLQ_TRIM_THRESHOLD: usize = 50;

impl Store {
    /// Delete every dead-lettered task record and the list itself if the
    /// list holds more than `threshold` entries. Returns the number of
    /// entries purged.
    pub async fn trim_dead_letters(&self, threshold: usize) -> Result<usize, StoreError> {
        let mut conn = self.conn();

        let len: usize = conn.llen(keys::DEAD_LETTERS).await?;
        if len <= threshold {
            return Ok(0);
        }

        let task_ids: Vec<String> = conn.lrange(keys::DEAD_LETTERS, 0, -1).await?;
        let purged = task_ids.len();

        let mut pipe = redis::pipe();
        pipe.atomic();
        for task_id in &task_ids {
            pipe.del(keys::task(task_id));
        }
        pipe.del(keys::DEAD_LETTERS);
        pipe.query_async::<_, ()>(&mut conn).await?;

        Ok(purged)
    }
}
