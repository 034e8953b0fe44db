// Integration tests for the Promptq API
// Run with: cargo test --test integration_test -- --ignored
//
// Requires a running stack: Redis, promptq-api, and one promptq-worker
// advertising `echo:1` (import_path `builtin:echo`).

use serde_json::json;
use std::time::Duration;

const API_BASE_URL: &str = "http://localhost:8000";

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .cookie_store(true)
        .build()
        .expect("Failed to build client")
}

/// GET / bootstraps a guest cookie (303 back to / on first visit).
async fn authenticate(client: &reqwest::Client) {
    let response = client
        .get(API_BASE_URL)
        .send()
        .await
        .expect("Failed to reach API");
    assert!(response.status().is_success());
}

async fn task_status(client: &reqwest::Client, task_id: &str) -> Option<String> {
    let tasks: Vec<String> = client
        .get(format!("{}/api/v1/tasks", API_BASE_URL))
        .send()
        .await
        .expect("Failed to list tasks")
        .json()
        .await
        .expect("Failed to parse task list");

    tasks
        .iter()
        .filter_map(|raw| serde_json::from_str::<serde_json::Value>(raw).ok())
        .find(|task| task["task_id"] == task_id)
        .and_then(|task| task["status"].as_str().map(String::from))
}

#[tokio::test]
#[ignore] // Run with: cargo test --test integration_test -- --ignored
async fn test_happy_path_echo_task() {
    let client = client();
    authenticate(&client).await;

    // Enqueue for the live echo handler
    let response = client
        .post(format!("{}/api/v1/enqueue", API_BASE_URL))
        .json(&json!({"prompt": "hi", "handler_id": "echo:1", "is_first": true}))
        .send()
        .await
        .expect("Failed to enqueue");
    assert_eq!(response.status(), 200);

    let body: serde_json::Value = response.json().await.expect("Failed to parse response");
    let task_id = body["task_id"].as_str().expect("task_id missing").to_string();
    let short_id = body["short_task_id"].as_str().expect("short id missing");
    assert_eq!(short_id.len(), 3);

    // Wait for the worker to complete it
    let mut status = None;
    for _ in 0..30 {
        status = task_status(&client, &task_id).await;
        if status.as_deref() == Some("completed") {
            break;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    assert_eq!(status.as_deref(), Some("completed"));

    // Echo handler returns the prompt; processing time is measured
    let tasks: Vec<String> = client
        .get(format!("{}/api/v1/tasks", API_BASE_URL))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let task: serde_json::Value = tasks
        .iter()
        .filter_map(|raw| serde_json::from_str(raw).ok())
        .find(|task: &serde_json::Value| task["task_id"] == task_id.as_str())
        .expect("task not listed");
    assert_eq!(task["result"]["text"], "hi");
    assert!(task["worker_processing_time"].as_f64().unwrap() >= 0.0);
}

#[tokio::test]
#[ignore]
async fn test_enqueue_requires_auth() {
    // no cookie jar bootstrap
    let response = reqwest::Client::new()
        .post(format!("{}/api/v1/enqueue", API_BASE_URL))
        .json(&json!({"prompt": "hi", "handler_id": "echo:1", "is_first": true}))
        .send()
        .await
        .expect("Failed to reach API");
    assert_eq!(response.status(), 401);
}

#[tokio::test]
#[ignore]
async fn test_invalid_handler_ids_are_rejected() {
    let client = client();
    authenticate(&client).await;

    for handler_id in ["", "default"] {
        let response = client
            .post(format!("{}/api/v1/enqueue", API_BASE_URL))
            .json(&json!({"prompt": "hi", "handler_id": handler_id, "is_first": true}))
            .send()
            .await
            .expect("Failed to enqueue");
        assert_eq!(response.status(), 405, "handler_id {:?}", handler_id);
    }
}

#[tokio::test]
#[ignore]
async fn test_absent_handler_parks_task_as_pending() {
    let client = client();
    authenticate(&client).await;

    let response = client
        .post(format!("{}/api/v1/enqueue", API_BASE_URL))
        .json(&json!({"prompt": "hi", "handler_id": "nobody:9", "is_first": true}))
        .send()
        .await
        .expect("Failed to enqueue");
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    let task_id = body["task_id"].as_str().unwrap().to_string();

    let tasks: Vec<String> = client
        .get(format!("{}/api/v1/tasks", API_BASE_URL))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let task: serde_json::Value = tasks
        .iter()
        .filter_map(|raw| serde_json::from_str(raw).ok())
        .find(|task: &serde_json::Value| task["task_id"] == task_id.as_str())
        .expect("task not listed");
    assert_eq!(task["status"], "pending");
    assert_eq!(task["start_position"], -1);
}

#[tokio::test]
#[ignore]
async fn test_feedback_is_owner_only() {
    let owner = client();
    authenticate(&owner).await;

    let response = owner
        .post(format!("{}/api/v1/enqueue", API_BASE_URL))
        .json(&json!({"prompt": "hi", "handler_id": "echo:1", "is_first": true}))
        .send()
        .await
        .expect("Failed to enqueue");
    let body: serde_json::Value = response.json().await.unwrap();
    let task_id = body["task_id"].as_str().unwrap().to_string();

    // a different guest user
    let stranger = client();
    authenticate(&stranger).await;
    let response = stranger
        .post(format!("{}/api/v1/feedback/{}", API_BASE_URL, task_id))
        .json(&json!({"feedback": "like"}))
        .send()
        .await
        .expect("Failed to post feedback");
    assert_eq!(response.status(), 403);

    // the owner may
    let response = owner
        .post(format!("{}/api/v1/feedback/{}", API_BASE_URL, task_id))
        .json(&json!({"feedback": "like"}))
        .send()
        .await
        .expect("Failed to post feedback");
    assert_eq!(response.status(), 200);
}

#[tokio::test]
#[ignore]
async fn test_product_feedback_endpoint() {
    let client = client();
    let response = client
        .post(format!("{}/api/v1/feedback", API_BASE_URL))
        .json(&json!({"text": "queue works", "contact": "dev@example.com"}))
        .send()
        .await
        .expect("Failed to post feedback");
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "success");
}
