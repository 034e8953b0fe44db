// Free-form product feedback, appended to a local JSON file

use axum::{http::StatusCode, routing::post, Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::Path;
use utoipa::ToSchema;

const FEEDBACK_FILE: &str = "feedback.json";

#[derive(Debug, Deserialize, ToSchema)]
pub struct FeedbackItem {
    pub text: String,
    #[serde(default)]
    pub contact: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct FeedbackResponse {
    pub status: String,
    pub message: String,
}

pub fn routes() -> Router {
    Router::new().route("/api/v1/feedback", post(submit_feedback))
}

/// POST /api/v1/feedback - store a feedback entry
#[utoipa::path(
    post,
    path = "/api/v1/feedback",
    request_body = FeedbackItem,
    responses(
        (status = 200, description = "Feedback stored", body = FeedbackResponse),
        (status = 500, description = "Failed to save feedback")
    ),
    tag = "feedback"
)]
pub async fn submit_feedback(
    Json(item): Json<FeedbackItem>,
) -> Result<Json<FeedbackResponse>, (StatusCode, String)> {
    append_feedback(&item).await.map_err(|e| {
        tracing::error!(error = %e, "Failed to save feedback");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to save feedback: {}", e),
        )
    })?;

    Ok(Json(FeedbackResponse {
        status: "success".to_string(),
        message: "Feedback received".to_string(),
    }))
}

async fn append_feedback(item: &FeedbackItem) -> anyhow::Result<()> {
    let path = Path::new(FEEDBACK_FILE);

    let mut entries: Vec<serde_json::Value> = match tokio::fs::read_to_string(path).await {
        Ok(raw) => serde_json::from_str(&raw).unwrap_or_default(),
        Err(_) => Vec::new(),
    };

    entries.push(serde_json::json!({
        "text": item.text,
        "contact": item.contact,
        "timestamp": Utc::now().to_rfc3339(),
    }));

    tokio::fs::write(path, serde_json::to_string_pretty(&entries)?).await?;
    Ok(())
}
