// Store client and key layout

use redis::aio::ConnectionManager;
use std::time::Duration;
use thiserror::Error;

/// Task records live for an hour while in flight...
pub const LIVE_TTL_SECS: u64 = 3600;
/// ...and for a day once terminal, so results stay inspectable.
pub const TERMINAL_TTL_SECS: u64 = 86400;
/// Worker liveness window; refreshed by the 15s heartbeat.
pub const WORKER_TTL_SECS: u64 = 30;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Key layout. Everything is a string; queues are lists with the head on the
/// right (LPUSH to enqueue, BRPOP to claim).
pub mod keys {
    /// Global ordered list of ready task ids.
    pub const TASK_QUEUE: &str = "task_queue";
    /// Tasks whose handler is currently absent.
    pub const PENDING_TASK_QUEUE: &str = "pending_task_queue";
    /// Tasks a worker has claimed but not yet resolved.
    pub const PROCESSING_QUEUE: &str = "processing_queue";
    /// Terminal failures retained for inspection.
    pub const DEAD_LETTERS: &str = "dead_letters";
    /// Append-only list of known worker keys; stale entries are tolerated
    /// and filtered by TTL lookup.
    pub const WORKERS: &str = "workers";
    /// JSON map handler_id -> HandlerConfig.
    pub const HANDLERS_CONFIGS: &str = "handlers_configs";
    /// Published snapshot: JSON map handler_id -> live worker count.
    pub const AVAILABLE_HANDLERS: &str = "available_handlers";

    pub fn task(task_id: &str) -> String {
        format!("task:{}", task_id)
    }

    pub fn ready_shard(handler_id: &str) -> String {
        format!("{}:{}", TASK_QUEUE, handler_id)
    }

    pub fn pending_shard(handler_id: &str) -> String {
        format!("{}:{}", PENDING_TASK_QUEUE, handler_id)
    }

    pub fn token(jwt: &str) -> String {
        format!("token:{}", jwt)
    }
}

/// Errors from store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store connection failed: {0}")]
    ConnectionFailed(String),

    #[error("store operation failed: {0}")]
    Redis(#[from] redis::RedisError),

    /// A record that does not deserialize. Scan loops log and skip these.
    #[error("record validation failed: {0}")]
    Validation(#[from] serde_json::Error),

    #[error("task {0} not found")]
    TaskNotFound(String),
}

/// Thin wrapper over the shared key-value/list store.
///
/// Cheap to clone; the underlying `ConnectionManager` multiplexes one
/// connection and reconnects automatically.
#[derive(Clone)]
pub struct Store {
    redis: ConnectionManager,
}

impl Store {
    /// Connect to the store at `redis://host:port/db`.
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        let redis = tokio::time::timeout(CONNECT_TIMEOUT, ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::ConnectionFailed("connect timed out".to_string()))?
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        Ok(Self { redis })
    }

    pub(crate) fn conn(&self) -> ConnectionManager {
        self.redis.clone()
    }
}
