// Task HTTP routes: enqueue, status subscription (SSE), listing, feedback

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::cookie::CookieJar;
use chrono::Utc;
use futures::stream::{self, Stream, StreamExt};
use promptq_core::{validate_handler_id, ApiSettings, Task, TaskFeedback, TaskStatus};
use promptq_store::{Store, TERMINAL_TTL_SECS};
use serde::{Deserialize, Serialize};
use std::{convert::Infallible, sync::Arc, time::Duration};
use tokio::sync::watch;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::current_user;
use crate::reconciler::HandlerSnapshot;

/// App state for task routes
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub settings: Arc<ApiSettings>,
    pub snapshot: watch::Receiver<HandlerSnapshot>,
}

/// Request to enqueue a prompt
#[derive(Debug, Deserialize, ToSchema)]
pub struct TaskCreate {
    pub prompt: String,
    pub handler_id: String,
    pub is_first: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EnqueueResponse {
    pub task_id: String,
    pub short_task_id: String,
}

/// Create task routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/enqueue", post(enqueue_task))
        .route("/api/v1/subscribe/:task_id", get(subscribe_task))
        .route("/api/v1/feedback/:task_id", post(submit_task_feedback))
        .route("/api/v1/tasks", get(list_tasks))
        .route("/api/v1/first-tasks", get(list_first_tasks))
        .with_state(state)
}

/// POST /api/v1/enqueue - place a prompt into the queue choreography
#[utoipa::path(
    post,
    path = "/api/v1/enqueue",
    request_body = TaskCreate,
    responses(
        (status = 200, description = "Task enqueued", body = EnqueueResponse),
        (status = 401, description = "Not authenticated"),
        (status = 405, description = "Invalid handler id"),
        (status = 500, description = "Internal server error")
    ),
    tag = "tasks"
)]
pub async fn enqueue_task(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<TaskCreate>,
) -> Result<Json<EnqueueResponse>, StatusCode> {
    let user_id = current_user(&jar, &state.store, &state.settings).await?;

    if !validate_handler_id(&req.handler_id) {
        return Err(StatusCode::METHOD_NOT_ALLOWED);
    }

    let task_id = Uuid::new_v4().to_string();
    let mut task = Task::new(task_id, user_id, &req.prompt, &req.handler_id, req.is_first);

    let handler_available = state.snapshot.borrow().available.contains_key(&req.handler_id);
    let placed = if handler_available {
        // LLEN and the enqueue LPUSH are separate commands, so this position
        // is advisory under concurrent enqueues
        let queue_len = state.store.ready_len().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to read queue length");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
        task.start_position = queue_len + 1;
        task.status = TaskStatus::Queued;
        state.store.enqueue_ready(&task).await
    } else {
        task.start_position = -1;
        task.status = TaskStatus::Pending;
        state.store.enqueue_pending(&task).await
    };
    placed.map_err(|e| {
        tracing::error!(error = %e, "Failed to enqueue task");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    tracing::info!(
        task_id = %task.task_id,
        handler_id = %task.handler_id,
        status = %task.status,
        "Task enqueued"
    );

    Ok(Json(EnqueueResponse {
        task_id: task.task_id,
        short_task_id: task.short_task_id,
    }))
}

struct SubscribeState {
    last_status: Option<TaskStatus>,
    last_position: Option<i64>,
    first_tick: bool,
    done: bool,
}

/// GET /api/v1/subscribe/{task_id} - SSE stream of the task record
///
/// Emits the full record whenever status or queue position changes, once a
/// second. Ends after the terminal frame (stamping `finished_at` and
/// extending the record TTL to 24h), or immediately if the record is gone.
#[utoipa::path(
    get,
    path = "/api/v1/subscribe/{task_id}",
    params(("task_id" = String, Path, description = "Task ID")),
    responses(
        (status = 200, description = "Task status stream", content_type = "text/event-stream")
    ),
    tag = "tasks"
)]
pub async fn subscribe_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    tracing::info!(task_id = %task_id, "Starting status stream");
    let store = state.store.clone();

    let initial = SubscribeState {
        last_status: None,
        last_position: None,
        first_tick: true,
        done: false,
    };

    let stream = stream::unfold(initial, move |mut sub| {
        let store = store.clone();
        let task_id = task_id.clone();
        async move {
            if sub.done {
                return None;
            }
            if !sub.first_tick {
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            sub.first_tick = false;

            if let Err(e) = store.update_position(&task_id).await {
                tracing::error!(task_id = %task_id, error = %e, "Failed to update position");
                return None;
            }
            let task = match store.get_task(&task_id).await {
                Ok(Some(task)) => task,
                Ok(None) => return None,
                Err(e) => {
                    tracing::error!(task_id = %task_id, error = %e, "Failed to load task");
                    return None;
                }
            };

            let mut frames: Vec<Result<Event, Infallible>> = Vec::new();
            let changed = sub.last_status != Some(task.status)
                || sub.last_position != Some(task.current_position);
            if changed {
                let json = serde_json::to_string_pretty(&task).unwrap_or_else(|_| "{}".to_string());
                frames.push(Ok(Event::default().data(json)));
                sub.last_status = Some(task.status);
                sub.last_position = Some(task.current_position);
            }

            if task.status.is_terminal() {
                let mut task = task;
                task.finished_at = Some(Utc::now());
                if let Err(e) = store.put_task(&task, TERMINAL_TTL_SECS).await {
                    tracing::error!(task_id = %task_id, error = %e, "Failed to stamp finished_at");
                }
                sub.done = true;
            }

            Some((stream::iter(frames), sub))
        }
    })
    .flatten();

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// POST /api/v1/feedback/{task_id} - like/dislike a finished task
#[utoipa::path(
    post,
    path = "/api/v1/feedback/{task_id}",
    params(("task_id" = String, Path, description = "Task ID")),
    request_body = TaskFeedback,
    responses(
        (status = 200, description = "Feedback recorded"),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Not the task owner"),
        (status = 404, description = "Task not found"),
        (status = 500, description = "Internal server error")
    ),
    tag = "tasks"
)]
pub async fn submit_task_feedback(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(task_id): Path<String>,
    Json(feedback): Json<TaskFeedback>,
) -> Result<StatusCode, StatusCode> {
    let user_id = current_user(&jar, &state.store, &state.settings).await?;

    let mut task = state
        .store
        .get_task(&task_id)
        .await
        .map_err(|e| {
            tracing::error!(task_id = %task_id, error = %e, "Failed to load task");
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::NOT_FOUND)?;

    if task.user_id != user_id {
        return Err(StatusCode::FORBIDDEN);
    }

    // no read-modify-write guard here: last write wins
    task.feedback = feedback;
    state
        .store
        .put_task(&task, promptq_store::LIVE_TTL_SECS)
        .await
        .map_err(|e| {
            tracing::error!(task_id = %task_id, error = %e, "Failed to store feedback");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(StatusCode::OK)
}

/// GET /api/v1/tasks - all of the caller's tasks, oldest first
#[utoipa::path(
    get,
    path = "/api/v1/tasks",
    responses(
        (status = 200, description = "Task JSON strings", body = Vec<String>),
        (status = 401, description = "Not authenticated"),
        (status = 500, description = "Internal server error")
    ),
    tag = "tasks"
)]
pub async fn list_tasks(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<Json<Vec<String>>, StatusCode> {
    list_filtered(&state, &jar, |_| true).await
}

/// GET /api/v1/first-tasks - conversation starters only
#[utoipa::path(
    get,
    path = "/api/v1/first-tasks",
    responses(
        (status = 200, description = "Task JSON strings", body = Vec<String>),
        (status = 401, description = "Not authenticated"),
        (status = 500, description = "Internal server error")
    ),
    tag = "tasks"
)]
pub async fn list_first_tasks(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<Json<Vec<String>>, StatusCode> {
    list_filtered(&state, &jar, |task| task.is_first).await
}

async fn list_filtered(
    state: &AppState,
    jar: &CookieJar,
    keep: impl Fn(&Task) -> bool,
) -> Result<Json<Vec<String>>, StatusCode> {
    let user_id = current_user(jar, &state.store, &state.settings).await?;

    let mut tasks: Vec<Task> = state
        .store
        .scan_tasks()
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to scan tasks");
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .into_iter()
        .filter(|task| task.user_id == user_id && keep(task))
        .collect();
    tasks.sort_by_key(|task| task.queued_at);

    let tasks_as_json = tasks
        .iter()
        .filter_map(|task| serde_json::to_string_pretty(task).ok())
        .collect();

    Ok(Json(tasks_as_json))
}
