// Handler availability stream for the frontend

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Router,
};
use futures::stream::{self, Stream, StreamExt};
use std::{convert::Infallible, time::Duration};
use tokio::sync::watch;

use crate::reconciler::HandlerSnapshot;

const HANDLERS_TICK: Duration = Duration::from_secs(3);

/// App state for handler routes
#[derive(Clone)]
pub struct AppState {
    pub snapshot: watch::Receiver<HandlerSnapshot>,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/handlers/stream", get(stream_handlers))
        .with_state(state)
}

/// GET /api/v1/handlers/stream - SSE of `{available_handlers, configs}`,
/// emitted whenever the reconciler's snapshot changes.
#[utoipa::path(
    get,
    path = "/api/v1/handlers/stream",
    responses(
        (status = 200, description = "Handler availability stream", content_type = "text/event-stream")
    ),
    tag = "handlers"
)]
pub async fn stream_handlers(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let snapshot = state.snapshot.clone();

    let stream = stream::unfold(
        (snapshot, None::<serde_json::Value>, true),
        move |(snapshot, last_payload, first_tick)| async move {
            if !first_tick {
                tokio::time::sleep(HANDLERS_TICK).await;
            }

            let payload = {
                let current = snapshot.borrow();
                serde_json::json!({
                    "available_handlers": current.available,
                    "configs": current.configs,
                })
            };

            let mut frames: Vec<Result<Event, Infallible>> = Vec::new();
            if last_payload.as_ref() != Some(&payload) {
                tracing::debug!(handlers = %payload["available_handlers"], "Available handlers updated");
                frames.push(Ok(Event::default().data(payload.to_string())));
            }

            Some((stream::iter(frames), (snapshot, Some(payload), false)))
        },
    )
    .flatten();

    Sse::new(stream).keep_alive(KeepAlive::default())
}
