// Core domain types for promptq
// Decision: keep this crate store-agnostic - queue keys and Redis details live
// in promptq-store, HTTP concerns in promptq-api

pub mod config;
pub mod error;
pub mod handler;
pub mod task;

pub use config::{ApiSettings, ColdStoreSettings, WorkerSettings};
pub use error::{ConfigError, HandlerError};
pub use handler::{
    build_registry, verify_handlers, HandlerConfig, HandlerRegistry, TaskHandler,
};
pub use task::{
    short_task_id, validate_handler_id, Answer, FeedbackKind, Task, TaskFeedback, TaskStatus,
};
