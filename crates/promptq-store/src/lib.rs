// Redis-backed storage layer
//
// Owns every key the system touches: task records, the global and per-handler
// ready/pending queues, the processing queue, dead letters, the worker
// registry and auth tokens. The store is the only cross-process
// synchronization point; its single-threaded command execution plus atomic
// pipelines provide all the atomicity the queue choreography relies on.

pub mod client;
mod janitor;
mod migrate;
mod queues;
mod registry;
mod tasks;
mod tokens;

pub use client::{keys, Store, StoreError};
pub use client::{LIVE_TTL_SECS, TERMINAL_TTL_SECS, WORKER_TTL_SECS};
pub use janitor::DLQ_TRIM_THRESHOLD;
