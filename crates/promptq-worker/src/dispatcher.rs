// The dispatch loop: blocking multi-queue pop, RUNNING transition, handler
// invocation, then complete / retry / dead-letter
//
// One task at a time per worker: the handler call is awaited to completion
// before the next claim, which is what makes the startup verification
// meaningful. A running handler is never interrupted, even during shutdown.

use std::time::{Duration, Instant};

use promptq_core::{Answer, HandlerError, HandlerRegistry, TaskStatus};
use promptq_store::{keys, Store, StoreError, LIVE_TTL_SECS};
use tokio::sync::watch;

const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Dead-letter once the retry budget is spent; fatal handler errors skip the
/// budget entirely.
fn exhausts_retries(error: &HandlerError, retries: u32, max_retries: u32) -> bool {
    matches!(error, HandlerError::Fatal(_)) || retries >= max_retries
}

pub struct Dispatcher {
    store: Store,
    handlers: HandlerRegistry,
    shard_keys: Vec<String>,
    max_retries: u32,
    shutdown: watch::Receiver<bool>,
}

impl Dispatcher {
    pub fn new(
        store: Store,
        handlers: HandlerRegistry,
        max_retries: u32,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let shard_keys = handlers
            .handler_ids()
            .iter()
            .map(|id| keys::ready_shard(id))
            .collect();
        Self {
            store,
            handlers,
            shard_keys,
            max_retries,
            shutdown,
        }
    }

    /// Run until shutdown is signalled. Every error inside an iteration is
    /// caught and logged; the loop itself only ends on shutdown.
    pub async fn run(mut self) {
        while !*self.shutdown.borrow_and_update() {
            match self.store.claim(&self.shard_keys).await {
                Ok(Some(task_id)) => {
                    if let Err(e) = self.process_task(&task_id).await {
                        tracing::error!(task_id = %task_id, error = %e, "Worker error");
                        tokio::time::sleep(ERROR_BACKOFF).await;
                    }
                }
                Ok(None) => continue,
                Err(e) => {
                    tracing::error!(error = %e, "Worker error");
                    tokio::time::sleep(ERROR_BACKOFF).await;
                }
            }
        }
        tracing::info!("Worker loop stopped");
    }

    async fn process_task(&self, task_id: &str) -> Result<(), StoreError> {
        let mut task = match self.store.get_task(task_id).await {
            Ok(Some(task)) => task,
            Ok(None) => {
                tracing::error!(task_id = %task_id, "Task startup error: record missing");
                return Ok(());
            }
            Err(StoreError::Validation(e)) => {
                tracing::error!(task_id = %task_id, error = %e, "Task startup error");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        task.status = TaskStatus::Running;
        self.store.put_task(&task, LIVE_TTL_SECS).await?;

        let Some(handler) = self.handlers.get(&task.handler_id) else {
            let error =
                HandlerError::transient(format!("Unsupported task type: {}", task.handler_id));
            return self.handle_failure(task_id, error).await;
        };

        tracing::debug!(task_id = %task_id, prompt = %task.prompt, "Processing prompt");
        let started = Instant::now();
        let handler_task = task.clone();
        let outcome = tokio::task::spawn_blocking(move || handler.handle(&handler_task)).await;
        let processing_time = started.elapsed().as_secs_f64();

        match outcome {
            Ok(Ok(answer)) => {
                task.status = TaskStatus::Completed;
                task.result = answer;
                task.worker_processing_time = processing_time;
                self.store.complete(&task).await?;
                tracing::info!(
                    task_id = %task_id,
                    processing_time = format!("{:.2}s", processing_time),
                    "Task completed"
                );
                Ok(())
            }
            Ok(Err(error)) => self.handle_failure(task_id, error).await,
            Err(join_error) => {
                let error = HandlerError::fatal(format!("Handler panicked: {}", join_error));
                self.handle_failure(task_id, error).await
            }
        }
    }

    /// Retry/DLQ policy. The record is re-read first: positions and feedback
    /// may have moved underneath the running handler.
    async fn handle_failure(&self, task_id: &str, error: HandlerError) -> Result<(), StoreError> {
        let mut task = match self.store.get_task(task_id).await {
            Ok(Some(task)) => task,
            Ok(None) => {
                tracing::error!(task_id = %task_id, "Task not found");
                return Ok(());
            }
            Err(StoreError::Validation(e)) => {
                tracing::error!(task_id = %task_id, error = %e, "Critical task processing error");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        task.retries += 1;

        if exhausts_retries(&error, task.retries, self.max_retries) {
            task.error = Answer::new(error.to_string());
            task.status = TaskStatus::Failed;
            self.store.fail_terminal(&task).await?;
            tracing::error!(task_id = %task_id, error = %error, "Task moved to DLQ");
        } else {
            self.store.retry(&task).await?;
            tracing::warn!(
                task_id = %task_id,
                attempt = task.retries,
                error = %error,
                "Retry for task"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_consume_the_retry_budget() {
        let err = HandlerError::transient("boom");
        assert!(!exhausts_retries(&err, 1, 3));
        assert!(!exhausts_retries(&err, 2, 3));
        assert!(exhausts_retries(&err, 3, 3));
        // a stale record can only ever be at the bound, never past it
        assert!(exhausts_retries(&err, 4, 3));
    }

    #[test]
    fn fatal_errors_skip_the_retry_budget() {
        let err = HandlerError::fatal("no such model");
        assert!(exhausts_retries(&err, 1, 3));
    }
}
