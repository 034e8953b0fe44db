// The Task entity and its wire schema
//
// Task is the sole first-class entity of the system. The JSON produced here is
// what lands under `task:{id}` in the store, what the SSE subscription emits,
// and what the cold-store replicator reads back - so the field set is frozen.

use blake2::digest::consts::U4;
use blake2::{Blake2b, Digest};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// No live worker advertises the task's handler.
    #[default]
    Pending,
    /// Waiting in the ready queue for a free worker.
    Queued,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Terminal states keep their record for 24h and then expire.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Queued => write!(f, "queued"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "queued" => Ok(TaskStatus::Queued),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            _ => Err(format!("Unknown task status: {}", s)),
        }
    }
}

/// User reaction to a finished task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
    Like,
    Dislike,
    #[default]
    Neutral,
}

impl std::fmt::Display for FeedbackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeedbackKind::Like => write!(f, "like"),
            FeedbackKind::Dislike => write!(f, "dislike"),
            FeedbackKind::Neutral => write!(f, "neutral"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct TaskFeedback {
    #[serde(default)]
    pub feedback: FeedbackKind,
}

/// Handler output: answer text plus the documents it was grounded on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct Answer {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub relevant_docs: BTreeMap<String, String>,
}

impl Answer {
    pub fn new(text: impl Into<String>) -> Self {
        Answer {
            text: text.into(),
            relevant_docs: BTreeMap::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// A user-submitted prompt travelling through the queue choreography.
///
/// `first_id`/`parent_id`/`child_id` chain tasks into conversations; the core
/// carries the ids opaquely and never resolves them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct Task {
    #[serde(default)]
    pub task_id: String,
    pub prompt: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub handler_id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub short_task_id: String,
    pub queued_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default = "default_true")]
    pub is_first: bool,
    #[serde(default)]
    pub first_id: String,
    #[serde(default)]
    pub parent_id: String,
    #[serde(default)]
    pub child_id: String,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub retries: u32,
    #[serde(default)]
    pub result: Answer,
    #[serde(default)]
    pub error: Answer,
    /// Ready-queue length observed at enqueue, -1 when enqueued to pending.
    #[serde(default)]
    pub start_position: i64,
    /// 1-based position in the global ready queue at last observation,
    /// 0 if absent, -1 if parked in pending.
    #[serde(default)]
    pub current_position: i64,
    #[serde(default)]
    pub feedback: TaskFeedback,
    /// Seconds spent inside the handler.
    #[serde(default)]
    pub worker_processing_time: f64,
}

impl Task {
    /// Build a fresh task at enqueue time. Whitespace around the prompt is
    /// not meaningful and is dropped here, before the record is ever stored.
    pub fn new(
        task_id: impl Into<String>,
        user_id: impl Into<String>,
        prompt: &str,
        handler_id: impl Into<String>,
        is_first: bool,
    ) -> Self {
        let task_id = task_id.into();
        let user_id = user_id.into();
        let short_task_id = short_task_id(&task_id, &user_id);
        Task {
            task_id,
            prompt: prompt.trim().to_string(),
            status: TaskStatus::Pending,
            handler_id: handler_id.into(),
            user_id,
            short_task_id,
            queued_at: Utc::now(),
            finished_at: None,
            is_first,
            first_id: String::new(),
            parent_id: String::new(),
            child_id: String::new(),
            context: String::new(),
            retries: 0,
            result: Answer::default(),
            error: Answer::default(),
            start_position: 0,
            current_position: 0,
            feedback: TaskFeedback::default(),
            worker_processing_time: 0.0,
        }
    }

    /// The dummy task handlers are probed with at worker startup.
    pub fn verification() -> Self {
        Task::new("", "", "Привет", "", true)
    }

    /// `<task_type>` half of the handler id.
    pub fn task_type(&self) -> &str {
        self.handler_id.split(':').next().unwrap_or("")
    }

    /// `<version>` half of the handler id.
    pub fn task_type_version(&self) -> &str {
        self.handler_id.split(':').nth(1).unwrap_or("")
    }
}

const SHORT_ID_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const SHORT_ID_LEN: usize = 3;

/// Display-only 3-char fingerprint of `(task_id, user_id)`.
///
/// Base-36 digits of the big-endian 32-bit BLAKE2b digest, most significant
/// digit first. Pure and deterministic; collisions are expected and fine.
pub fn short_task_id(task_id: &str, user_id: &str) -> String {
    let mut hasher = Blake2b::<U4>::new();
    hasher.update(format!("{}:{}", task_id, user_id).as_bytes());
    let digest: [u8; 4] = hasher.finalize().into();
    let mut num = u32::from_be_bytes(digest);

    let mut out = [0u8; SHORT_ID_LEN];
    for slot in out.iter_mut().rev() {
        *slot = SHORT_ID_ALPHABET[(num % 36) as usize];
        num /= 36;
    }
    // Alphabet bytes are ASCII, so this cannot fail
    String::from_utf8_lossy(&out).into_owned()
}

/// Enqueue-time handler id policy: empty ids and the literal `default`
/// placeholder are rejected before any store key is created.
pub fn validate_handler_id(handler_id: &str) -> bool {
    !handler_id.is_empty() && handler_id != "default"
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(prompt: &str) -> Task {
        Task::new("t-1", "u-1", prompt, "echo:1", true)
    }

    #[test]
    fn short_id_is_deterministic() {
        let a = short_task_id("0b6f1a9e", "user-42");
        let b = short_task_id("0b6f1a9e", "user-42");
        assert_eq!(a, b);
    }

    #[test]
    fn short_id_shape() {
        for (t, u) in [("a", "b"), ("", ""), ("0b6f1a9e", "user-42")] {
            let id = short_task_id(t, u);
            assert_eq!(id.len(), 3);
            assert!(id.bytes().all(|c| SHORT_ID_ALPHABET.contains(&c)));
        }
    }

    #[test]
    fn short_id_depends_on_both_inputs() {
        // (task_id, user_id) is hashed as "{task}:{user}", so swapping the
        // separator position must not collide for these inputs
        assert_ne!(short_task_id("ab", "c"), short_task_id("a", "bc"));
    }

    #[test]
    fn short_id_reference_vectors() {
        assert_eq!(short_task_id("0b6f1a9e", "user-42"), "5T3");
        assert_eq!(short_task_id("a", "b"), "2UJ");
        assert_eq!(short_task_id("", ""), "R37");
    }

    #[test]
    fn prompt_is_trimmed() {
        assert_eq!(task("  hi \n").prompt, "hi");
    }

    #[test]
    fn derived_views_split_handler_id() {
        let t = task("hi");
        assert_eq!(t.task_type(), "echo");
        assert_eq!(t.task_type_version(), "1");

        let mut bare = task("hi");
        bare.handler_id = "noversion".into();
        assert_eq!(bare.task_type(), "noversion");
        assert_eq!(bare.task_type_version(), "");
    }

    #[test]
    fn handler_id_policy() {
        assert!(validate_handler_id("echo:1"));
        assert!(!validate_handler_id(""));
        assert!(!validate_handler_id("default"));
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Queued,
            TaskStatus::Running,
            TaskStatus::Completed,
            TaskStatus::Failed,
        ] {
            assert_eq!(status.to_string().parse::<TaskStatus>(), Ok(status));
        }
        assert!("bogus".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn serde_round_trip_is_stable() {
        let mut t = task("hi");
        t.status = TaskStatus::Completed;
        t.finished_at = Some(Utc::now());
        t.result = Answer::new("ok");
        t.result
            .relevant_docs
            .insert("doc-1".into(), "chapter 3".into());
        t.retries = 2;
        t.worker_processing_time = 0.125;

        let once = serde_json::to_string(&t).unwrap();
        let back: Task = serde_json::from_str(&once).unwrap();
        let twice = serde_json::to_string(&back).unwrap();
        assert_eq!(once, twice);
        assert_eq!(t, back);
    }

    #[test]
    fn deserialize_fills_defaults() {
        let raw = r#"{"prompt":"hi","queued_at":"2025-01-01T00:00:00Z"}"#;
        let t: Task = serde_json::from_str(raw).unwrap();
        assert_eq!(t.status, TaskStatus::Pending);
        assert!(t.is_first);
        assert_eq!(t.current_position, 0);
        assert_eq!(t.feedback.feedback, FeedbackKind::Neutral);
    }

    #[test]
    fn status_json_is_snake_case() {
        let mut t = task("hi");
        t.status = TaskStatus::Failed;
        let value: serde_json::Value = serde_json::to_value(&t).unwrap();
        assert_eq!(value["status"], "failed");
    }
}
