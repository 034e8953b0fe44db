// Promptq API server

mod auth;
mod coldstore;
mod feedback;
mod handlers;
mod janitor;
mod reconciler;
mod tasks;

use anyhow::{Context, Result};
use axum::{
    http::{header, HeaderValue, Method},
    routing::get,
    Json, Router,
};
use promptq_core::config::config_path;
use promptq_core::{Answer, ApiSettings, FeedbackKind, HandlerConfig, Task, TaskFeedback, TaskStatus};
use promptq_store::Store;
use reconciler::HandlerSnapshot;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        tasks::enqueue_task,
        tasks::subscribe_task,
        tasks::submit_task_feedback,
        tasks::list_tasks,
        tasks::list_first_tasks,
        handlers::stream_handlers,
        feedback::submit_feedback,
    ),
    components(
        schemas(
            Task, TaskStatus, Answer, TaskFeedback, FeedbackKind, HandlerConfig,
            tasks::TaskCreate,
            tasks::EnqueueResponse,
            feedback::FeedbackItem,
            feedback::FeedbackResponse,
        )
    ),
    tags(
        (name = "tasks", description = "Task enqueueing, status subscription and feedback"),
        (name = "handlers", description = "Handler availability"),
        (name = "feedback", description = "Product feedback")
    ),
    info(
        title = "Promptq API",
        version = "0.2.0",
        description = "Distributed prompt-task dispatcher",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    )
)]
struct ApiDoc;

async fn openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "promptq_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("promptq-api starting...");

    // .env only carries cold-store credential passthrough
    dotenvy::dotenv().ok();

    let settings =
        Arc::new(ApiSettings::load(config_path()).context("Failed to load config")?);

    let store = Store::connect(&settings.redis_url())
        .await
        .context("Failed to connect to store")?;
    tracing::info!("Connected to store");

    // Singleton per API instance: owns the in-process availability snapshot
    let (snapshot_tx, snapshot_rx) = watch::channel(HandlerSnapshot::default());
    tokio::spawn(reconciler::run(store.clone(), snapshot_tx));
    tokio::spawn(janitor::run(store.clone()));
    if settings.use_gp_cold_store {
        tokio::spawn(coldstore::run(store.clone(), settings.cold_store()));
    }

    // Create module-specific states
    let auth_state = auth::AppState {
        store: store.clone(),
        settings: settings.clone(),
    };
    let tasks_state = tasks::AppState {
        store: store.clone(),
        settings: settings.clone(),
        snapshot: snapshot_rx.clone(),
    };
    let handlers_state = handlers::AppState {
        snapshot: snapshot_rx,
    };

    let frontend_origin = settings
        .frontend_url()
        .parse::<HeaderValue>()
        .context("Invalid frontend origin")?;

    // Build router
    let app = Router::new()
        .route("/", get(auth::root).with_state(auth_state.clone()))
        .merge(tasks::routes(tasks_state))
        .merge(handlers::routes(handlers_state))
        .merge(feedback::routes())
        .route("/api-doc/openapi.json", get(openapi))
        .layer(axum::middleware::from_fn_with_state(
            auth_state,
            auth::renew_token_layer,
        ))
        .layer(
            CorsLayer::new()
                .allow_origin(frontend_origin)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers([header::CONTENT_TYPE])
                .allow_credentials(true),
        )
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = format!("{}:{}", settings.host, settings.backend_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // No reconciler means no trustworthy snapshot: unpublish it
    if let Err(e) = store.clear_available_handlers().await {
        tracing::error!(error = %e, "Failed to clear published handlers");
    }
    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    tracing::info!("Shutdown signal received");
}
